// Config reconciler
//
// Translates the flow engine's container and widget declarations into the
// store's ID space. All registries live in one `Reconciler` per dashboard,
// tied to the deploy lifecycle: `begin_deploy`, register/remove nodes,
// `finish_deploy`.

mod decl;
mod host;

pub use decl::{parse_children, ArraySpec, ContainerDecl, ContainerKind, WidgetDecl};
pub use host::{DashboardHost, DeclaredNodes, NodeState};

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::model::{ChildRef, EntityKind, EntityRef, Grid, GridKind, PropKind, Tab, Widget};
use crate::store::{Store, StoreError};
use crate::{DashError, Result};

/// Node properties that never end up in a widget's static props
const RUNTIME_PROPS: &[&str] = &["id", "type", "x", "y", "z", "wires", "_alias"];

const MAX_ROWS: i64 = 99;
const MAX_COLS: i64 = 19;

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct DeploySummary {
    /// Containers added or rewritten
    pub updated: usize,
    /// Containers that could not be written, by node ID
    pub failures: Vec<(String, StoreError)>,
}

impl DeploySummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn checked_dim(value: i64, max: i64, what: &str, node_id: &str) -> u32 {
    if (1..=max).contains(&value) {
        value as u32
    } else {
        warn!(node = node_id, value, "invalid number of {what}, using 1");
        1
    }
}

#[derive(Debug, Default)]
pub struct Reconciler {
    containers: BTreeMap<String, ContainerDecl>,
    widgets: HashMap<String, WidgetDecl>,
    // containers registered since the last finish_deploy, not yet in the store
    fresh: HashSet<String>,
    // dynamic props of widgets removed during the current deploy, by store ID
    dynamics: HashMap<String, Map<String, Value>>,
    // known topics of array widgets, sorted; survives deploys
    array_topics: HashMap<String, Vec<String>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container(&self, node_id: &str) -> Option<&ContainerDecl> {
        self.containers.get(node_id)
    }

    pub fn containers(&self) -> impl Iterator<Item = &ContainerDecl> {
        self.containers.values()
    }

    pub fn widget(&self, node_id: &str) -> Option<&WidgetDecl> {
        self.widgets.get(node_id)
    }

    /// Known topics of an array widget in the order they are displayed
    pub fn array_topics(&self, node_id: &str) -> &[String] {
        self.array_topics
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    // =========================================================================
    // Deploy lifecycle
    // =========================================================================

    /// Flows are stopping: hold back broadcasts until `finish_deploy`
    pub fn begin_deploy(&mut self, store: &mut Store) {
        debug!("deploy started, queueing mutations");
        store.set_queueing(true);
    }

    /// Record a container declaration; new containers reach the store on `finish_deploy`
    pub fn register_container(&mut self, store: &mut Store, mut decl: ContainerDecl) -> Result<()> {
        match &mut decl.kind {
            ContainerKind::Dashboard => {
                let title = if decl.title.is_empty() {
                    store.default_title().to_string()
                } else {
                    decl.title.clone()
                };
                if store.dash()?.title != title {
                    store.update_dash(single("title", json!(title)))?;
                }
            }
            ContainerKind::Panel { rows, cols, .. } => {
                *rows = checked_dim(*rows, MAX_ROWS, "rows", &decl.node_id) as i64;
                *cols = checked_dim(*cols, MAX_COLS, "cols", &decl.node_id) as i64;
            }
            _ => {}
        }
        debug!(node = %decl.node_id, children = decl.children.len(), "register container");
        self.fresh.insert(decl.node_id.clone());
        self.containers.insert(decl.node_id.clone(), decl);
        Ok(())
    }

    /// Record a widget declaration and add its widget(s) to the store.
    ///
    /// Array widgets produce one clone per known topic. Returns the entities added.
    pub fn register_widget(&mut self, store: &mut Store, mut decl: WidgetDecl) -> Result<Vec<EntityRef>> {
        let node_id = decl.node_id.clone();
        if self.widgets.contains_key(&node_id) {
            self.remove_widget(store, &node_id);
        }

        let container = self.containers.get_mut(&decl.container).ok_or_else(|| {
            DashError::Config(format!(
                "widget {node_id} is not part of any dashboard: container {} unknown",
                decl.container
            ))
        })?;
        if !container.accepts(EntityKind::Widget) {
            return Err(DashError::Config(format!(
                "container {} cannot hold widget {node_id}",
                decl.container
            )));
        }
        if !container.children.contains(&node_id) {
            warn!(node = %node_id, container = %decl.container, "widget missing from its container's children, appending");
            container.children.push(node_id.clone());
        }

        decl.rows = checked_dim(decl.rows, MAX_ROWS, "rows", &node_id) as i64;
        decl.cols = checked_dim(decl.cols, MAX_COLS, "cols", &node_id) as i64;

        let entities = self.widget_entities(&decl);
        for entity in &entities {
            self.put_widget(store, &decl, entity)?;
        }
        debug!(node = %node_id, count = entities.len(), "register widget");
        self.widgets.insert(node_id, decl);
        Ok(entities)
    }

    /// Delete a widget's entities from the store, remembering their dynamic
    /// props for a re-registration within the same deploy. Returns how many
    /// entities were deleted.
    pub fn remove_widget(&mut self, store: &mut Store, node_id: &str) -> usize {
        let Some(decl) = self.widgets.remove(node_id) else {
            return 0;
        };
        let mut removed = 0;
        for entity in self.widget_entities(&decl) {
            let id = entity.store_id();
            match store.widget_by_id(&id) {
                Ok(widget) => {
                    self.dynamics.insert(id.clone(), widget.dynamic);
                }
                Err(e) => {
                    warn!(widget = %id, error = %e, "widget vanished before removal");
                    continue;
                }
            }
            match store.delete_widget(&id) {
                Ok(()) => removed += 1,
                Err(e) => warn!(widget = %id, error = %e, "cannot delete widget"),
            }
        }
        removed
    }

    /// Forget a container and delete its tab, grid or panel from the store
    pub fn remove_container(&mut self, store: &mut Store, node_id: &str) -> Result<()> {
        let Some(decl) = self.containers.remove(node_id) else {
            return Ok(());
        };
        let was_fresh = self.fresh.remove(node_id);
        let Some(entity) = decl.entity() else {
            return Ok(());
        };
        let id = entity.store_id();
        let res = match entity.kind() {
            EntityKind::Tab => store.delete_tab(&id),
            EntityKind::Grid => store.delete_grid(&id),
            EntityKind::Widget => store.delete_widget(&id),
        };
        match res {
            // never made it into the store
            Err(StoreError::NotFound(_)) if was_fresh => Ok(()),
            r => Ok(r?),
        }
    }

    /// Resolve every container's children, write the result into the store
    /// and flush the queued mutations.
    ///
    /// A container that cannot be written is logged and reported in the
    /// summary; its siblings are still processed.
    pub fn finish_deploy(&mut self, store: &mut Store, host: &dyn DashboardHost) -> DeploySummary {
        let mut summary = DeploySummary::default();

        // the dashboard goes last so it orders the tabs added on the way
        let (dashboards, others): (Vec<&ContainerDecl>, Vec<&ContainerDecl>) = self
            .containers
            .values()
            .partition(|c| c.kind == ContainerKind::Dashboard);
        let order: Vec<String> = others
            .into_iter()
            .chain(dashboards)
            .map(|c| c.node_id.clone())
            .collect();

        for node_id in order {
            match self.sync_container(store, host, &node_id) {
                Ok(true) => summary.updated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(node = %node_id, error = %e, "cannot reconcile container");
                    summary.failures.push((node_id, e));
                }
            }
        }

        store.stop_queueing();
        self.fresh.clear();
        self.dynamics.clear();
        info!(
            updated = summary.updated,
            failures = summary.failures.len(),
            "deploy finished"
        );
        summary
    }

    // =========================================================================
    // Array widgets
    // =========================================================================

    /// Add a clone of array widget `node_id` for `topic` and list it in the
    /// container. Returns false if the topic is known or the array is full.
    pub fn add_widget_topic(
        &mut self,
        store: &mut Store,
        host: &dyn DashboardHost,
        node_id: &str,
        topic: &str,
    ) -> Result<bool> {
        let decl = self.array_decl(node_id)?;
        let max = decl.array.map(|a| a.max).unwrap_or_default();
        let known = self.array_topics(node_id);
        if known.iter().any(|t| t == topic) {
            return Ok(false);
        }
        if known.len() >= max {
            warn!(node = node_id, topic, max, "array widget is full, ignoring topic");
            return Ok(false);
        }

        self.put_widget(store, &decl, &EntityRef::array_clone(node_id, topic))?;
        let topics = self.array_topics.entry(node_id.to_string()).or_default();
        topics.push(topic.to_string());
        topics.sort();

        self.sync_container(store, host, &decl.container)?;
        Ok(true)
    }

    /// Delete the clone of array widget `node_id` for `topic`
    pub fn delete_widget_topic(
        &mut self,
        store: &mut Store,
        host: &dyn DashboardHost,
        node_id: &str,
        topic: &str,
    ) -> Result<bool> {
        let decl = self.array_decl(node_id)?;
        let Some(topics) = self.array_topics.get_mut(node_id) else {
            return Ok(false);
        };
        let Some(pos) = topics.iter().position(|t| t == topic) else {
            return Ok(false);
        };
        topics.remove(pos);

        let id = EntityRef::array_clone(node_id, topic).store_id();
        match store.delete_widget(&id) {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.sync_container(store, host, &decl.container)?;
        Ok(true)
    }

    fn array_decl(&self, node_id: &str) -> Result<WidgetDecl> {
        let decl = self
            .widgets
            .get(node_id)
            .ok_or_else(|| DashError::Config(format!("widget {node_id} is not registered")))?;
        if decl.array.is_none() {
            return Err(DashError::Config(format!("widget {node_id} is not an array widget")));
        }
        Ok(decl.clone())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn widget_entities(&self, decl: &WidgetDecl) -> Vec<EntityRef> {
        match decl.array {
            None => vec![EntityRef::Widget(decl.node_id.clone())],
            Some(spec) => self
                .array_topics(&decl.node_id)
                .iter()
                .take(spec.max)
                .map(|t| EntityRef::array_clone(&decl.node_id, t))
                .collect(),
        }
    }

    /// Add the widget for `entity`, or take over one the store was seeded with
    fn put_widget(&mut self, store: &mut Store, decl: &WidgetDecl, entity: &EntityRef) -> Result<()> {
        let id = entity.store_id();
        if !store.has_widget(&id) {
            let widget = self.build_widget(decl, entity);
            return Ok(store.add_widget(None, widget)?);
        }
        // keep the live props of the persisted widget
        if let Ok(seeded) = store.widget_by_id(&id) {
            self.dynamics.entry(id.clone()).or_insert(seeded.dynamic);
        }
        debug!(widget = %id, "adopting widget already in the store");
        let widget = self.build_widget(decl, entity);
        Ok(store.replace_widget(widget)?)
    }

    fn build_widget(&mut self, decl: &WidgetDecl, entity: &EntityRef) -> Widget {
        let id = entity.store_id();
        let statics = decl
            .props
            .iter()
            .filter(|(k, _)| !RUNTIME_PROPS.contains(&k.as_str()) && !k.starts_with("fd_"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Widget {
            kind: decl.kind.clone(),
            rows: decl.rows as u32,
            cols: decl.cols as u32,
            statics,
            dynamic: self.dynamics.remove(&id).unwrap_or_default(),
            dyn_root: Some(format!("node-red/{id}")),
            output: Some(format!("nr/{}", entity.node_id())),
            group: decl.array.map(|_| decl.node_id.clone()),
            extra: Map::new(),
            id,
        }
    }

    /// Resolve a container's declared children to store child references
    fn resolve_children(&self, decl: &ContainerDecl, host: &dyn DashboardHost) -> Vec<ChildRef> {
        let mut out = Vec::with_capacity(decl.children.len());
        for child in &decl.children {
            let entity = match host.node_state(child) {
                NodeState::Absent => {
                    debug!(container = %decl.node_id, child = %child, "dropping deleted child");
                    continue;
                }
                NodeState::Disabled(kind) => {
                    let entity = EntityRef::new(kind, child.as_str());
                    if self.accepts(decl, &entity) {
                        out.push(ChildRef::Disabled(entity));
                    }
                    continue;
                }
                NodeState::Active => {
                    if let Some(c) = self.containers.get(child) {
                        c.entity()
                    } else if let Some(w) = self.widgets.get(child) {
                        if w.array.is_some() {
                            if self.accepts(decl, &EntityRef::Widget(child.clone())) {
                                out.extend(self.widget_entities(w).into_iter().map(ChildRef::Live));
                            }
                            continue;
                        }
                        Some(EntityRef::Widget(child.clone()))
                    } else {
                        None
                    }
                }
            };
            match entity {
                Some(entity) if self.accepts(decl, &entity) => out.push(ChildRef::Live(entity)),
                Some(_) => {}
                None => warn!(container = %decl.node_id, child = %child, "child has no dashboard entity"),
            }
        }
        out
    }

    fn accepts(&self, decl: &ContainerDecl, entity: &EntityRef) -> bool {
        let ok = decl.accepts(entity.kind());
        if !ok {
            warn!(
                container = %decl.node_id,
                child = %entity.node_id(),
                kind = entity.kind().name(),
                "container cannot hold child of this kind, dropping it"
            );
        }
        ok
    }

    fn sync_container(
        &self,
        store: &mut Store,
        host: &dyn DashboardHost,
        node_id: &str,
    ) -> std::result::Result<bool, StoreError> {
        let Some(decl) = self.containers.get(node_id) else {
            return Ok(false);
        };
        let children: Vec<String> = self
            .resolve_children(decl, host)
            .iter()
            .map(ChildRef::store_id)
            .collect();
        write_container(store, decl, children, self.fresh.contains(node_id))
    }
}

/// Add a fresh container to the store, or rewrite its child list if it changed.
/// Returns whether anything was written.
fn write_container(
    store: &mut Store,
    decl: &ContainerDecl,
    children: Vec<String>,
    fresh: bool,
) -> std::result::Result<bool, StoreError> {
    let id = decl.entity().map(|e| e.store_id()).unwrap_or_default();
    match &decl.kind {
        ContainerKind::Dashboard => {
            if store.dash()?.tabs == children {
                return Ok(false);
            }
            store.update_dash(single("tabs", json!(children)))?;
        }
        ContainerKind::Tab { icon } => {
            if fresh && store.tab_by_id(&id).is_err() {
                store.add_tab(Tab {
                    id,
                    title: decl.title.clone(),
                    icon: icon.clone(),
                    grids: Some(children),
                    ..Default::default()
                })?;
                return Ok(true);
            }
            if store.tab_by_id(&id)?.grids.as_deref() == Some(children.as_slice()) {
                return Ok(false);
            }
            store.update_tab(&id, single("grids", json!(children)))?;
        }
        ContainerKind::Iframe { icon, url, slot } => {
            if fresh && store.tab_by_id(&id).is_err() {
                store.add_tab(Tab {
                    id,
                    title: decl.title.clone(),
                    icon: icon.clone(),
                    url: Some(url.clone()),
                    slot: Some(slot.clone().unwrap_or_else(|| "a".to_string())),
                    ..Default::default()
                })?;
                return Ok(true);
            }
            store.tab_by_id(&id)?;
            return Ok(false);
        }
        ContainerKind::Grid {
            grid_kind,
            min_cols,
            max_cols,
        } => {
            if fresh && store.grid_by_id(&id).is_err() {
                let mut extra = Map::new();
                if *grid_kind == GridKind::PopupGrid {
                    extra.insert("show".to_string(), json!(false));
                }
                store.add_grid(
                    None,
                    Grid {
                        id,
                        kind: grid_kind.clone(),
                        title: decl.title.clone(),
                        min_cols: *min_cols,
                        max_cols: *max_cols,
                        widgets: children,
                        extra,
                    },
                )?;
                return Ok(true);
            }
            if store.grid_by_id(&id)?.widgets == children {
                return Ok(false);
            }
            store.update_grid(&id, single("widgets", json!(children)))?;
        }
        ContainerKind::Panel { rows, cols, solid } => {
            if fresh && store.widget_by_id(&id).is_err() {
                let statics = json!({
                    "title": decl.title,
                    "solid": solid,
                    "widgets": children,
                });
                store.add_widget(
                    None,
                    Widget {
                        kind: Widget::PANEL_KIND.to_string(),
                        rows: *rows as u32,
                        cols: *cols as u32,
                        statics: statics.as_object().cloned().unwrap_or_default(),
                        dyn_root: Some(format!("node-red/{id}")),
                        id,
                        ..Default::default()
                    },
                )?;
                return Ok(true);
            }
            if store.widget_by_id(&id)?.panel_children() == children {
                return Ok(false);
            }
            store.update_widget_prop(&id, PropKind::Static, "widgets", Some(json!(children)))?;
        }
    }
    Ok(true)
}
