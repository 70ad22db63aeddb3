mod flow;

use async_trait::async_trait;
use flexdash_core::{
    CtrlAction, CtrlHandler, DashboardConfig, DashboardHub, EntityRef, InputHandler, Result,
};
use flow::Flow;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

// Simulated client IDs (16 and 24 chars, as a browser would send them)
const CONN_ID: &str = "sim-conn-0000001";
const BROWSER_ID: &str = "sim-browser-000000000001";

/// Logs what a node would receive from its widget
struct LogInput {
    node_id: String,
}

#[async_trait]
impl InputHandler for LogInput {
    async fn handle_input(&self, array_topic: Option<&str>, payload: Value, conn_id: &str) -> Result<()> {
        info!(target = "dashboard_sim", node = %self.node_id, array_topic, conn = conn_id, %payload, "widget output");
        Ok(())
    }
}

/// Logs dashboard events the way a ctrl node would forward them
struct LogCtrl;

#[async_trait]
impl CtrlHandler for LogCtrl {
    async fn handle_event(&self, target: &str, payload: &Value, conn_id: &str) -> Result<()> {
        info!(target = "dashboard_sim", event_target = target, conn = conn_id, %payload, "dashboard event");
        Ok(())
    }
}

fn preview(value: &Value) -> String {
    let s = value.to_string();
    if s.len() > 100 {
        let cut = (0..=100).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &s[..cut])
    } else {
        s
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,flexdash_core=info,dashboard_sim=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = DashboardConfig::load();
    let idle = Duration::from_millis(cfg.idle_timeout_ms);
    let flow_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demo/dashboard_sim/flow.toml".to_string());
    let flow = Flow::load(&flow_path)?;
    info!(
        target = "dashboard_sim",
        path = %flow_path,
        containers = flow.containers.len(),
        widgets = flow.widgets.len(),
        "Loaded flow"
    );

    let hub = DashboardHub::new(cfg, Value::Null);

    // Every outbound message, as a socket layer would deliver it
    let mut rx = hub.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => info!(
                    target = "dashboard_sim",
                    kind = %msg.kind,
                    topic = %msg.topic,
                    to = msg.target.as_deref().unwrap_or("*"),
                    value = %preview(&msg.value),
                    "outbound"
                ),
                Err(RecvError::Lagged(n)) => warn!(target = "dashboard_sim", skipped = n, "logger lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 1) Deploy: register every node, then reconcile in one pass
    let host = flow.host()?;
    {
        let mut rec = hub.reconciler().lock().await;
        let mut store = hub.store().lock().await;
        rec.begin_deploy(&mut store);
        for decl in flow.containers.iter().cloned() {
            rec.register_container(&mut store, decl)?;
        }
        for decl in flow.widgets.iter().filter(|w| !flow.is_disabled(&w.node_id)).cloned() {
            let node_id = decl.node_id.clone();
            if let Err(e) = rec.register_widget(&mut store, decl) {
                warn!(target = "dashboard_sim", node = %node_id, error = %e, "Skipping widget");
            }
        }
        let summary = rec.finish_deploy(&mut store, &host);
        info!(
            target = "dashboard_sim",
            updated = summary.updated,
            failures = summary.failures.len(),
            "Deploy done"
        );
    }

    for w in flow.widgets.iter().filter(|w| !flow.is_disabled(&w.node_id)) {
        let api = hub.widget(&EntityRef::Widget(w.node_id.clone()));
        api.on_input(Arc::new(LogInput {
            node_id: w.node_id.clone(),
        }));
    }
    hub.register_ctrl("sim-ctrl", Arc::new(LogCtrl));

    // 2) A browser connects and gets the snapshot
    let conn = hub.connect(CONN_ID, BROWSER_ID).await?;

    // 3) Array widgets learn their topics
    for step in &flow.topics {
        let mut rec = hub.reconciler().lock().await;
        let mut store = hub.store().lock().await;
        if let Err(e) = rec.add_widget_topic(&mut store, &host, &step.widget, &step.topic) {
            warn!(target = "dashboard_sim", widget = %step.widget, error = %e, "Cannot add topic");
        }
    }

    // 4) Nodes push live values
    for step in &flow.updates {
        let api = hub.widget(&EntityRef::Widget(step.widget.clone()));
        if let Err(e) = api.set_props(step.props.clone()).await {
            warn!(target = "dashboard_sim", widget = %step.widget, error = %e, "Update failed");
        }
    }

    // 5) The client clicks around
    for step in &flow.inputs {
        if let Err(e) = hub
            .handle_message(CONN_ID, &step.topic, step.payload.clone())
            .await
        {
            warn!(target = "dashboard_sim", topic = %step.topic, error = %e, "Message rejected");
        }
    }
    if let Some(tab) = flow.containers.iter().find_map(|c| match c.entity() {
        Some(e @ EntityRef::Tab(_)) => Some(e),
        _ => None,
    }) {
        hub.handle_event(CONN_ID, "tab", json!({ "id": tab.store_id(), "action": "select" }))
            .await;
    }

    // 6) Remote control
    for step in &flow.ctrl {
        // edits apply to everyone, open/close only to our client
        let (action, conn_id) = match step.action.as_str() {
            "open" => (CtrlAction::Open, Some(CONN_ID)),
            "close" => (CtrlAction::Close, Some(CONN_ID)),
            "edit" => (CtrlAction::Edit(step.props.clone()), None),
            other => {
                warn!(target = "dashboard_sim", action = other, "Unknown ctrl action");
                continue;
            }
        };
        if let Err(e) = hub.ctrl(step.target, &step.key, action, conn_id).await {
            warn!(target = "dashboard_sim", key = %step.key, error = %e, "Ctrl failed");
        }
    }

    // 7) The browser goes away and the client idles out
    hub.disconnect(CONN_ID, conn.generation);
    tokio::time::sleep(idle + Duration::from_millis(100)).await;
    info!(target = "dashboard_sim", clients = hub.client_count(), "Simulation finished");

    logger.abort();
    Ok(())
}
