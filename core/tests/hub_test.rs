use async_trait::async_trait;
use flexdash_core::{
    parse_children, ContainerDecl, ContainerKind, CtrlAction, CtrlHandler, CtrlTarget,
    DashError, DashboardConfig, DashboardHub, DeclaredNodes, EntityRef, GridKind, InputHandler,
    Outbound, Result, WidgetDecl,
};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const CONN: &str = "conn-0123456789a";
const BROWSER: &str = "browser-0123456789abcdef";

#[derive(Default)]
struct RecordingCtrl {
    events: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl CtrlHandler for RecordingCtrl {
    async fn handle_event(&self, target: &str, payload: &Value, _conn_id: &str) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((target.to_string(), payload.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingInput {
    inputs: Mutex<Vec<(Option<String>, Value, String)>>,
}

#[async_trait]
impl InputHandler for RecordingInput {
    async fn handle_input(&self, array_topic: Option<&str>, payload: Value, conn_id: &str) -> Result<()> {
        self.inputs.lock().unwrap().push((
            array_topic.map(str::to_string),
            payload,
            conn_id.to_string(),
        ));
        Ok(())
    }
}

fn test_config() -> DashboardConfig {
    DashboardConfig {
        title: "Test".to_string(),
        path: "/flexdash".to_string(),
        send_config: true,
        allow_config_edits: false,
        idle_timeout_ms: 30,
        broadcast_capacity: 100,
    }
}

fn drain(rx: &mut broadcast::Receiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn decl(id: &str, title: &str, kind: ContainerKind, children: &str) -> ContainerDecl {
    ContainerDecl {
        node_id: id.to_string(),
        name: None,
        title: title.to_string(),
        kind,
        children: parse_children(children),
    }
}

// Hub with tab t1 > grid g1 > widget n1
async fn deployed_hub(config: DashboardConfig) -> DashboardHub {
    let hub = DashboardHub::new(config, Value::Null);
    {
        let mut rec = hub.reconciler().lock().await;
        let mut store = hub.store().lock().await;
        rec.begin_deploy(&mut store);
        rec.register_container(&mut store, decl("t1", "Main", ContainerKind::Tab { icon: None }, ",g1"))
            .unwrap();
        let grid = ContainerKind::Grid {
            grid_kind: GridKind::FixedGrid,
            min_cols: 1,
            max_cols: 20,
        };
        rec.register_container(&mut store, decl("g1", "Sensors", grid, ",n1"))
            .unwrap();
        let widget = WidgetDecl {
            node_id: "n1".to_string(),
            kind: "Stat".to_string(),
            container: "g1".to_string(),
            rows: 1,
            cols: 1,
            props: json!({ "title": "Temp", "value": 0 })
                .as_object()
                .cloned()
                .unwrap(),
            array: None,
        };
        rec.register_widget(&mut store, widget).unwrap();

        let mut host = DeclaredNodes::new();
        for id in ["t1", "g1", "n1"] {
            host.activate(id);
        }
        assert!(rec.finish_deploy(&mut store, &host).is_clean());
    }
    hub
}

#[tokio::test]
async fn test_new_client_gets_snapshot() {
    let hub = deployed_hub(test_config()).await;
    let ctrl = Arc::new(RecordingCtrl::default());
    hub.register_ctrl("c1", ctrl.clone());
    let mut rx = hub.subscribe();

    let conn = hub.connect(CONN, BROWSER).await.unwrap();
    assert!(conn.snapshot);

    let msgs = drain(&mut rx);
    assert!(msgs.iter().all(|m| m.is_for(CONN) && !m.is_for("other-connection")));
    let topics: Vec<&str> = msgs.iter().map(|m| m.topic.as_str()).collect();
    for topic in ["$config/dash", "$config/tabs", "$config/grids", "$config/widgets"] {
        assert!(topics.contains(&topic), "missing {topic}");
    }
    assert_eq!(&topics[topics.len() - 2..], ["$config/ready", "sd"]);

    let events = ctrl.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "dashboard");
    assert_eq!(events[0].1, json!({ "type": "new client", "browser": BROWSER }));
}

#[tokio::test]
async fn test_snapshot_without_config() {
    let hub = deployed_hub(DashboardConfig {
        send_config: false,
        ..test_config()
    })
    .await;
    let mut rx = hub.subscribe();
    hub.connect(CONN, BROWSER).await.unwrap();

    let msgs = drain(&mut rx);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].topic, "sd");
}

#[tokio::test]
async fn test_invalid_ids_are_rejected() {
    let hub = deployed_hub(test_config()).await;
    assert!(matches!(
        hub.connect("short", BROWSER).await,
        Err(DashError::Session(_))
    ));
    assert!(matches!(
        hub.connect(CONN, "short").await,
        Err(DashError::Session(_))
    ));
    assert_eq!(hub.client_count(), 0);
}

#[tokio::test]
async fn test_idle_client_expires() {
    let hub = deployed_hub(test_config()).await;
    let ctrl = Arc::new(RecordingCtrl::default());
    hub.register_ctrl("c1", ctrl.clone());

    let conn = hub.connect(CONN, BROWSER).await.unwrap();
    hub.disconnect(CONN, conn.generation);
    assert_eq!(hub.client_count(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(hub.client_count(), 0);
    let events = ctrl.events.lock().unwrap();
    assert_eq!(events.last().unwrap().1, json!({ "type": "idle client" }));
}

#[tokio::test]
async fn test_reconnect_cancels_idle_timer() {
    let hub = deployed_hub(DashboardConfig {
        idle_timeout_ms: 100,
        ..test_config()
    })
    .await;
    let ctrl = Arc::new(RecordingCtrl::default());
    hub.register_ctrl("c1", ctrl.clone());
    let first = hub.connect(CONN, BROWSER).await.unwrap();
    hub.disconnect(CONN, first.generation);

    let mut rx = hub.subscribe();
    let second = hub.connect(CONN, BROWSER).await.unwrap();
    assert!(!second.snapshot);
    assert!(second.generation > first.generation);
    assert!(drain(&mut rx).is_empty());

    // a late disconnect of the old generation changes nothing
    hub.disconnect(CONN, first.generation);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(hub.client_count(), 1);
    assert_eq!(ctrl.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_widget_output_is_routed() {
    let hub = deployed_hub(test_config()).await;
    let input = Arc::new(RecordingInput::default());
    hub.widget(&EntityRef::Widget("n1".into())).on_input(input.clone());

    hub.handle_message(CONN, "nr/n1|alpha", json!(5)).await.unwrap();
    hub.handle_message(CONN, "nr/n1", json!("click")).await.unwrap();
    hub.handle_message(CONN, "nr/unknown", json!(1)).await.unwrap();
    hub.handle_message(CONN, "nr/n1|home%2Ftemp", json!(7)).await.unwrap();

    let inputs = input.inputs.lock().unwrap();
    assert_eq!(inputs.len(), 3);
    assert_eq!(inputs[0], (Some("alpha".to_string()), json!(5), CONN.to_string()));
    assert_eq!(inputs[1].0, None);
    assert_eq!(inputs[2].0.as_deref(), Some("home/temp"));
}

#[tokio::test]
async fn test_config_title_names_new_dashboard() {
    let config = DashboardConfig::from_toml_str("title = \"Greenhouse\"").unwrap();
    let hub = DashboardHub::new(config, Value::Null);
    assert_eq!(hub.store().lock().await.dash().unwrap().title, "Greenhouse");

    // a persisted title wins
    let hub = DashboardHub::new(
        test_config(),
        json!({ "dash": { "title": "Saved", "tabs": [] } }),
    );
    assert_eq!(hub.store().lock().await.dash().unwrap().title, "Saved");
}

#[tokio::test]
async fn test_config_edits_from_clients() {
    let hub = deployed_hub(test_config()).await;
    let err = hub
        .handle_message(CONN, "$config/dash/title", json!("Mine"))
        .await
        .unwrap_err();
    assert!(matches!(err, DashError::Session(_)));

    let hub = deployed_hub(DashboardConfig {
        allow_config_edits: true,
        ..test_config()
    })
    .await;
    let mut rx = hub.subscribe();
    hub.handle_message(CONN, "$config/dash/title", json!("Mine"))
        .await
        .unwrap();
    assert_eq!(hub.store().lock().await.dash().unwrap().title, "Mine");
    let msgs = drain(&mut rx);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].topic, "$config/dash");
    assert_eq!(msgs[0].target, None);
}

#[tokio::test]
async fn test_event_ids_are_translated() {
    let hub = deployed_hub(test_config()).await;
    let ctrl = Arc::new(RecordingCtrl::default());
    hub.register_ctrl("c1", ctrl.clone());

    hub.handle_event(CONN, "tab", json!({ "id": "tt1", "action": "open" }))
        .await;

    let events = ctrl.events.lock().unwrap();
    let payload = &events[0].1;
    assert_eq!(events[0].0, "tab");
    assert_eq!(payload["node_id"], "t1");
    assert_eq!(payload["title"], "Main");
    assert!(payload.get("id").is_none());
}

#[tokio::test]
async fn test_widget_api_sets_live_values() {
    let hub = deployed_hub(test_config()).await;
    let api = hub.widget(&EntityRef::Widget("n1".into()));
    let mut rx = hub.subscribe();

    api.set("value", json!(42)).await.unwrap();
    {
        let store = hub.store().lock().await;
        assert_eq!(store.get("node-red/wn1/value").unwrap(), Some(&json!(42)));
        let w = store.widget_by_id("wn1").unwrap();
        assert_eq!(w.dynamic["value"], "node-red/wn1/value");
    }
    let msgs = drain(&mut rx);
    assert_eq!(msgs[0], Outbound::set("node-red/wn1/value", json!(42)));
    assert_eq!(msgs[1].topic, "$config/widgets/wn1");

    // pointer already in place, only the value goes out
    api.set("value", json!(43)).await.unwrap();
    assert_eq!(drain(&mut rx).len(), 1);

    let mut props = Map::new();
    props.insert("value".to_string(), Value::Null);
    api.set_props(props).await.unwrap();
    let store = hub.store().lock().await;
    assert!(store.widget_by_id("wn1").unwrap().dynamic.is_empty());
    assert_eq!(store.get("node-red/wn1/value").unwrap(), None);
    let msgs = drain(&mut rx);
    assert_eq!(msgs[0].kind, "unset");
}

#[tokio::test]
async fn test_ctrl_actions() {
    let hub = deployed_hub(test_config()).await;
    hub.connect(CONN, BROWSER).await.unwrap();
    let mut rx = hub.subscribe();

    hub.ctrl(CtrlTarget::Grid, "Sensors", CtrlAction::Open, Some(CONN))
        .await
        .unwrap();
    let msgs = drain(&mut rx);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].kind, "ctrl");
    assert_eq!(msgs[0].target.as_deref(), Some(CONN));
    assert_eq!(msgs[0].value, json!({ "action": "open", "type": "grid", "id": "gg1" }));

    assert!(hub
        .ctrl(CtrlTarget::Tab, "t1", CtrlAction::Close, None)
        .await
        .is_err());
    assert!(hub
        .ctrl(CtrlTarget::Tab, "g1", CtrlAction::Open, None)
        .await
        .is_err());
    assert!(hub
        .ctrl(CtrlTarget::Panel, "nothing", CtrlAction::Open, None)
        .await
        .is_err());

    let edit = json!({ "title": "Overview", "bogus": 1, "id": "x" })
        .as_object()
        .cloned()
        .unwrap();
    hub.ctrl(CtrlTarget::Tab, "Main", CtrlAction::Edit(edit), None)
        .await
        .unwrap();
    let tab = hub.store().lock().await.tab_by_id("tt1").unwrap();
    assert_eq!(tab.title, "Overview");
    assert!(!tab.extra.contains_key("bogus"));
}
