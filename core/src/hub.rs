// Dashboard hub - client sessions of one dashboard
//
// Owns the store, the reconciler and the table of connected clients. The
// transport layer feeds it connects, disconnects, messages and events; all
// outbound traffic leaves through the EventBroadcaster.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::ctrl::{apply_ctrl, CtrlAction, CtrlTarget};
use crate::model::{decode_topic, EntityRef, PropKind, ARRAY_SEPARATOR, CONFIG_PREFIX};
use crate::reconcile::Reconciler;
use crate::sink::{EventBroadcaster, Outbound};
use crate::store::{split_path, Mutation, Store};
use crate::{DashError, Result};

const CONN_ID_LEN: usize = 16;
const BROWSER_ID_LEN: usize = 24;

/// Receives the output of a widget (`nr/<node>` messages)
#[async_trait]
pub trait InputHandler: Send + Sync {
    async fn handle_input(&self, array_topic: Option<&str>, payload: Value, conn_id: &str) -> Result<()>;
}

/// Receives dashboard events: client lifecycle, tab changes and the like
#[async_trait]
pub trait CtrlHandler: Send + Sync {
    async fn handle_event(&self, target: &str, payload: &Value, conn_id: &str) -> Result<()>;
}

/// A connected (or idle, not yet expired) client
#[derive(Clone, Debug)]
pub struct Connection {
    pub conn_id: String,
    pub browser_id: String,
    /// Bumped on every connect; a disconnect only expires its own generation
    pub generation: u64,
    pub connected_at: DateTime<Utc>,
    /// Whether this connect sent the initial snapshot
    pub snapshot: bool,
}

#[derive(Clone)]
pub struct DashboardHub {
    config: Arc<DashboardConfig>,
    store: Arc<Mutex<Store>>,
    reconciler: Arc<Mutex<Reconciler>>,
    broadcaster: EventBroadcaster,
    clients: Arc<DashMap<String, Connection>>,
    idle_timers: Arc<DashMap<String, JoinHandle<()>>>,
    inputs: Arc<DashMap<String, Arc<dyn InputHandler>>>,
    ctrl_handlers: Arc<DashMap<String, Arc<dyn CtrlHandler>>>,
    generation: Arc<AtomicU64>,
}

impl DashboardHub {
    /// Create a hub whose store starts from `initial` (e.g. a persisted config)
    pub fn new(config: DashboardConfig, initial: Value) -> Self {
        let broadcaster = EventBroadcaster::new(config.broadcast_capacity);
        let store =
            Store::with_default_title(initial, &config.title, Arc::new(broadcaster.clone()));
        info!(title = %config.title, path = %config.path, "dashboard hub created");
        Self {
            config: Arc::new(config),
            store: Arc::new(Mutex::new(store)),
            reconciler: Arc::new(Mutex::new(Reconciler::new())),
            broadcaster,
            clients: Arc::new(DashMap::new()),
            idle_timers: Arc::new(DashMap::new()),
            inputs: Arc::new(DashMap::new()),
            ctrl_handlers: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Mutex<Store>> {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<Mutex<Reconciler>> {
        &self.reconciler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.broadcaster.subscribe()
    }

    pub fn connection(&self, conn_id: &str) -> Option<Connection> {
        self.clients.get(conn_id).map(|c| c.value().clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn register_input(&self, node_id: &str, handler: Arc<dyn InputHandler>) {
        self.inputs.insert(node_id.to_string(), handler);
    }

    pub fn unregister_input(&self, node_id: &str) {
        self.inputs.remove(node_id);
    }

    pub fn register_ctrl(&self, node_id: &str, handler: Arc<dyn CtrlHandler>) {
        self.ctrl_handlers.insert(node_id.to_string(), handler);
    }

    pub fn unregister_ctrl(&self, node_id: &str) {
        self.ctrl_handlers.remove(node_id);
    }

    /// API for nodes driving one widget
    pub fn widget(&self, entity: &EntityRef) -> WidgetApi {
        let node_id = entity
            .node_id()
            .split(ARRAY_SEPARATOR)
            .next()
            .unwrap_or_default()
            .to_string();
        WidgetApi {
            hub: self.clone(),
            widget_id: entity.store_id(),
            node_id,
        }
    }

    /// Send a message to one client or, without `conn_id`, to all of them
    pub fn send(&self, kind: &str, topic: &str, value: Value, conn_id: Option<&str>) {
        match conn_id {
            Some(conn) if self.clients.contains_key(conn) => {
                self.broadcaster.send_to(conn, kind, topic, value)
            }
            Some(conn) => debug!(conn, "connection is gone, dropping message"),
            None => self.broadcaster.broadcast(Outbound {
                kind: kind.to_string(),
                topic: topic.to_string(),
                value,
                target: None,
            }),
        }
    }

    // =========================================================================
    // Client lifecycle
    // =========================================================================

    /// Register a client connection.
    ///
    /// New clients get the config snapshot and server data, and a
    /// `new client` event goes to the ctrl handlers. A known client
    /// reconnecting only has its idle timer cancelled.
    pub async fn connect(&self, conn_id: &str, browser_id: &str) -> Result<Connection> {
        if conn_id.len() != CONN_ID_LEN {
            warn!(conn = conn_id, "missing or invalid client (connection) ID");
            return Err(DashError::Session(format!("invalid connection ID '{conn_id}'")));
        }
        if browser_id.len() != BROWSER_ID_LEN {
            warn!(browser = browser_id, "missing or invalid session (browser) ID");
            return Err(DashError::Session(format!("invalid browser ID '{browser_id}'")));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reconnect = self.clients.contains_key(conn_id);
        if reconnect {
            if let Some((_, timer)) = self.idle_timers.remove(conn_id) {
                timer.abort();
            }
        } else {
            self.send_snapshot(conn_id).await;
        }

        let conn = Connection {
            conn_id: conn_id.to_string(),
            browser_id: browser_id.to_string(),
            generation,
            connected_at: Utc::now(),
            snapshot: !reconnect,
        };
        self.clients.insert(conn_id.to_string(), conn.clone());
        info!(conn = conn_id, browser = browser_id, generation, reconnect, "client connected");

        if !reconnect {
            let event = json!({ "type": "new client", "browser": browser_id });
            self.dispatch_event(conn_id, "dashboard", event).await;
        }
        Ok(conn)
    }

    async fn send_snapshot(&self, conn_id: &str) {
        let store = self.store.lock().await;
        if self.config.send_config {
            if let Some(collections) = store.config().as_object() {
                for (key, value) in collections {
                    self.broadcaster
                        .send_to(conn_id, "set", &format!("{CONFIG_PREFIX}/{key}"), value.clone());
                }
            }
            self.broadcaster
                .send_to(conn_id, "set", &format!("{CONFIG_PREFIX}/ready"), json!(true));
        }
        self.broadcaster
            .send_to(conn_id, "set", "sd", store.server_data().clone());
    }

    /// The transport lost connection `generation` of `conn_id`. Unless the
    /// client reconnects within the idle timeout it is forgotten and an
    /// `idle client` event fires. Must be called from within a tokio runtime.
    pub fn disconnect(&self, conn_id: &str, generation: u64) {
        let current = self.clients.get(conn_id).map(|c| c.generation);
        if current != Some(generation) {
            debug!(conn = conn_id, generation, "stale disconnect ignored");
            return;
        }
        info!(conn = conn_id, generation, "client disconnected");

        let hub = self.clone();
        let conn = conn_id.to_string();
        let timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            hub.expire(&conn, generation).await;
        });
        if let Some(old) = self.idle_timers.insert(conn_id.to_string(), handle) {
            old.abort();
        }
    }

    async fn expire(&self, conn_id: &str, generation: u64) {
        let removed = self
            .clients
            .remove_if(conn_id, |_, c| c.generation == generation)
            .is_some();
        self.idle_timers.remove(conn_id);
        if removed {
            info!(conn = conn_id, "client idle");
            self.dispatch_event(conn_id, "dashboard", json!({ "type": "idle client" }))
                .await;
        }
    }

    // =========================================================================
    // Inbound traffic
    // =========================================================================

    /// A `msg` from a client: widget output (`nr/...`) or a config edit (`$config/...`)
    pub async fn handle_message(&self, conn_id: &str, topic: &str, payload: Value) -> Result<()> {
        let segs = split_path(topic);
        if segs.first() == Some(&CONFIG_PREFIX) {
            if !self.config.allow_config_edits {
                warn!(conn = conn_id, topic, "config edit rejected");
                return Err(DashError::Session(
                    "saving config from the dashboard is disabled".into(),
                ));
            }
            let path = segs[1..].join("/");
            let mutation = if payload.is_null() {
                Mutation::delete(path)
            } else {
                Mutation::set(path, payload)
            };
            let mut store = self.store.lock().await;
            store.mutate(&format!("edit by {conn_id}"), vec![mutation])?;
            return Ok(());
        }

        let Some(rest) = topic.strip_prefix("nr/") else {
            warn!(conn = conn_id, topic, "message with unknown topic ignored");
            return Ok(());
        };
        let (node, array_topic) = match rest.find(ARRAY_SEPARATOR) {
            Some(ix) if ix > 0 => (
                &rest[..ix],
                Some(decode_topic(&rest[ix + ARRAY_SEPARATOR.len_utf8()..])),
            ),
            _ => (rest, None),
        };
        let handler = self.inputs.get(node).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => {
                if let Err(e) = handler.handle_input(array_topic.as_deref(), payload, conn_id).await {
                    warn!(node, error = %e, "error handling input");
                }
            }
            None => debug!(node, "no input handler"),
        }
        Ok(())
    }

    /// An `event` from a client, forwarded to every ctrl handler with the
    /// element's wire `id` replaced by its `node_id`
    pub async fn handle_event(&self, conn_id: &str, target: &str, mut payload: Value) {
        if let Some(obj) = payload.as_object_mut() {
            if let Some(wire) = obj.remove("id") {
                match wire.as_str().map(str::parse::<EntityRef>) {
                    Some(Ok(entity)) => {
                        let node_id = entity.node_id().to_string();
                        let reconciler = self.reconciler.lock().await;
                        match reconciler.container(&node_id) {
                            Some(decl) => {
                                obj.insert("name".into(), json!(decl.name));
                                obj.insert("title".into(), json!(decl.title));
                            }
                            None if reconciler.widget(&node_id).is_some() => {}
                            None => warn!(id = %wire, "no node found for element"),
                        }
                        obj.insert("node_id".into(), Value::String(node_id));
                    }
                    _ => warn!(id = %wire, "event carries a malformed element ID"),
                }
            }
        }
        self.dispatch_event(conn_id, target, payload).await;
    }

    async fn dispatch_event(&self, conn_id: &str, target: &str, payload: Value) {
        debug!(conn = conn_id, target, "dashboard event");
        let handlers: Vec<(String, Arc<dyn CtrlHandler>)> = self
            .ctrl_handlers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (node, handler) in handlers {
            if let Err(e) = handler.handle_event(target, &payload, conn_id).await {
                warn!(node = %node, error = %e, "error handling ctrl event");
            }
        }
    }

    /// Open, close or edit a tab, grid or panel
    pub async fn ctrl(
        &self,
        target: CtrlTarget,
        key: &str,
        action: CtrlAction,
        conn_id: Option<&str>,
    ) -> Result<()> {
        let reconciler = self.reconciler.lock().await;
        let mut store = self.store.lock().await;
        if let Some(msg) = apply_ctrl(&mut store, &reconciler, target, key, action, conn_id)? {
            self.send(&msg.kind, &msg.topic, msg.value, msg.target.as_deref());
        }
        Ok(())
    }
}

/// Live values of one widget, stored under `node-red/<widget id>/` in the
/// server data
pub struct WidgetApi {
    hub: DashboardHub,
    widget_id: String,
    node_id: String,
}

impl WidgetApi {
    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    /// Set the value at `path` (`prop` or `prop/below/it`)
    pub async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.update(path, Some(value)).await
    }

    /// Remove the value at `path`; removing a whole prop reverts it to its static value
    pub async fn unset(&self, path: &str) -> Result<()> {
        self.update(path, None).await
    }

    /// Set several props at once, typically `msg.props`; null values unset
    pub async fn set_props(&self, props: Map<String, Value>) -> Result<()> {
        for (prop, value) in props {
            if value.is_null() {
                self.unset(&prop).await?;
            } else {
                self.set(&prop, value).await?;
            }
        }
        Ok(())
    }

    /// Route the widget's output to `handler`
    pub fn on_input(&self, handler: Arc<dyn InputHandler>) {
        self.hub.register_input(&self.node_id, handler);
    }

    async fn update(&self, path: &str, value: Option<Value>) -> Result<()> {
        let segs = split_path(path);
        let prop = *segs
            .first()
            .ok_or_else(|| DashError::Config(format!("empty prop path for widget {}", self.widget_id)))?;
        let data_path = format!("node-red/{}/{}", self.widget_id, segs.join("/"));
        let pointer = format!("node-red/{}/{prop}", self.widget_id);

        let mut store = self.hub.store.lock().await;
        let widget = store.widget_by_id(&self.widget_id)?;
        if !widget.statics.contains_key(prop) {
            warn!(widget = %self.widget_id, prop, "widget has no such prop");
        }

        match value {
            Some(v) => {
                store.set(&data_path, v.clone())?;
                self.hub.broadcaster.broadcast(Outbound::set(data_path, v));
                if widget.dynamic.get(prop).and_then(Value::as_str) != Some(pointer.as_str()) {
                    store.update_widget_prop(&self.widget_id, PropKind::Dynamic, prop, Some(json!(pointer)))?;
                }
            }
            None => {
                store.unset(&data_path)?;
                self.hub.broadcaster.broadcast(Outbound::unset(data_path));
                if segs.len() == 1 && widget.dynamic.contains_key(prop) {
                    store.update_widget_prop(&self.widget_id, PropKind::Dynamic, prop, None)?;
                }
            }
        }
        Ok(())
    }
}
