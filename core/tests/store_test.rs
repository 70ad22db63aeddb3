use flexdash_core::{EntityRef, Grid, PropKind, Store, StoreError, Tab, Widget};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

type Emitted = Arc<Mutex<Vec<(String, Value)>>>;

// Store with a sink recording every publish
fn recording_store(config: Value) -> (Store, Emitted) {
    let emitted: Emitted = Arc::new(Mutex::new(Vec::new()));
    let sink = emitted.clone();
    let store = Store::new(
        config,
        Arc::new(move |topic: &str, value: &Value| {
            sink.lock().unwrap().push((topic.to_string(), value.clone()));
        }),
    );
    (store, emitted)
}

fn props(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

fn stat(id: &str, title: &str) -> Widget {
    Widget {
        id: id.to_string(),
        kind: "Stat".to_string(),
        rows: 1,
        cols: 1,
        statics: props(json!({ "title": title })),
        ..Default::default()
    }
}

// One tab t1 holding grid g1
fn store_with_grid() -> (Store, Emitted) {
    let (mut store, emitted) = recording_store(Value::Null);
    store
        .add_tab(Tab {
            id: "t1".to_string(),
            title: "Main".to_string(),
            grids: Some(vec![]),
            ..Default::default()
        })
        .unwrap();
    store
        .add_grid(
            Some("t1"),
            Grid {
                id: "g1".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    emitted.lock().unwrap().clear();
    (store, emitted)
}

#[test]
fn test_new_store_without_title_gets_empty_dashboard() {
    let (store, _) = recording_store(json!({ "dash": { "tabs": [] } }));
    assert_eq!(store.dash().unwrap().title, "FlexDash");
    assert_eq!(store.config()["widgets"], json!({}));

    let (store, _) = recording_store(json!({ "dash": { "title": "Plant", "tabs": ["t1"] } }));
    assert_eq!(store.dash().unwrap().tabs, vec!["t1"]);
    assert_eq!(store.config()["grids"], json!({}));
}

#[test]
fn test_path_round_trip() {
    let (mut store, _) = recording_store(Value::Null);
    let value = json!({ "a": [1, 2, { "b": null }], "c": "x" });
    store.set("node-red/w1/data", value.clone()).unwrap();
    assert_eq!(store.get("node-red/w1/data").unwrap(), Some(&value));

    store.set("/$config//dash/extra/", json!(5)).unwrap();
    assert_eq!(store.get("$config/dash/extra").unwrap(), Some(&json!(5)));
    assert_eq!(store.get("nothing/here").unwrap(), None);
}

#[test]
fn test_cannot_replace_roots() {
    let (mut store, _) = recording_store(Value::Null);
    assert!(matches!(store.set("", json!(1)), Err(StoreError::Path(_))));
    assert!(matches!(store.set("$config", json!(1)), Err(StoreError::Path(_))));
    assert!(matches!(store.unset("/"), Err(StoreError::Path(_))));
}

#[test]
fn test_array_append_only_at_end() {
    let (mut store, _) = recording_store(Value::Null);
    store.set("a", json!([])).unwrap();
    store.set("a/0", json!("x")).unwrap();
    store.set("a/1", json!("y")).unwrap();
    assert!(matches!(store.set("a/5", json!("z")), Err(StoreError::Path(_))));
    store.set("a/1", json!("w")).unwrap();
    assert_eq!(store.get("a").unwrap(), Some(&json!(["x", "w"])));
    assert!(store.set("a/x", json!(1)).is_err());
    assert!(store.unset("a/0").is_err());
}

#[test]
fn test_push_and_shift() {
    let (mut store, _) = recording_store(Value::Null);
    store.push("log/lines", json!("one")).unwrap();
    store.push("log/lines", json!("two")).unwrap();
    assert_eq!(store.shift("log/lines").unwrap(), Some(json!("one")));
    assert_eq!(store.get("log/lines").unwrap(), Some(&json!(["two"])));

    store.set("log/count", json!(3)).unwrap();
    assert!(store.push("log/count", json!(4)).is_err());
    assert!(store.shift("log/count").is_err());
}

#[test]
fn test_example_scenario() {
    let (mut store, _) = store_with_grid();
    let grid = EntityRef::Grid("1".to_string());
    assert_eq!(grid.store_id(), "g1");

    store.add_widget(Some(&grid), stat("w1", "X")).unwrap();
    assert_eq!(store.grid_by_id("g1").unwrap().widgets, vec!["w1"]);
    assert_eq!(store.widget_by_id("w1").unwrap().statics["title"], "X");

    store.delete_widget("w1").unwrap();
    assert!(store.grid_by_id("g1").unwrap().widgets.is_empty());
    assert!(matches!(store.widget_by_id("w1"), Err(StoreError::NotFound(_))));
}

#[test]
fn test_no_duplicate_ids() {
    let (mut store, _) = store_with_grid();
    store.add_widget(None, stat("w1", "X")).unwrap();
    let err = store.add_widget(None, stat("w1", "Y")).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
    assert!(err.to_string().contains("w1"));

    let dup = Grid {
        id: "g1".to_string(),
        ..Default::default()
    };
    assert!(matches!(store.add_grid(None, dup), Err(StoreError::Duplicate(_))));
}

#[test]
fn test_existence_checked_mutations() {
    let (mut store, _) = store_with_grid();
    assert!(store.update_widget("wX", props(json!({ "rows": 2 }))).is_err());
    assert!(store.delete_widget("wX").is_err());
    assert!(store.delete_tab("tX").is_err());
    assert!(store.update_grid("gX", Map::new()).is_err());
    assert!(store
        .update_widget_prop("wX", PropKind::Static, "title", Some(json!("x")))
        .is_err());
    assert!(matches!(
        store.replace_widget(stat("wX", "X")),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn test_ids_must_be_single_segments() {
    let (mut store, _) = store_with_grid();
    let err = store.add_widget(None, stat("w1|home/temp", "X")).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
    assert!(store.add_widget(None, stat("", "X")).is_err());
    assert_eq!(store.config()["widgets"], json!({}));
}

#[test]
fn test_replace_widget_keeps_it_listed() {
    let (mut store, _) = store_with_grid();
    store
        .add_widget(Some(&EntityRef::Grid("1".into())), stat("w1", "X"))
        .unwrap();
    assert!(store.has_widget("w1"));
    store.replace_widget(stat("w1", "Y")).unwrap();
    assert_eq!(store.widget_by_id("w1").unwrap().statics["title"], "Y");
    assert_eq!(store.grid_by_id("g1").unwrap().widgets, vec!["w1"]);
}

#[test]
fn test_index_getters() {
    let (mut store, _) = store_with_grid();
    store
        .add_widget(Some(&EntityRef::Grid("1".into())), stat("w1", "X"))
        .unwrap();
    assert_eq!(store.tab_id_by_ix(0).unwrap(), "t1");
    assert_eq!(store.grid_id_by_ix("t1", 0).unwrap(), "g1");
    assert_eq!(store.widget_id_by_ix("g1", 0).unwrap(), "w1");
    assert!(store.tab_id_by_ix(1).is_err());
    assert!(store.widget_id_by_ix("g1", 3).is_err());
    assert!(store.widget_id_by_panel_ix("w1", 0).is_err());
}

#[test]
fn test_panel_children() {
    let (mut store, _) = store_with_grid();
    let panel = Widget {
        id: "wp".to_string(),
        kind: "Panel".to_string(),
        rows: 2,
        cols: 2,
        ..Default::default()
    };
    store.add_widget(Some(&EntityRef::Grid("1".into())), panel).unwrap();
    let parent = EntityRef::Widget("p".into());
    store.add_widget(Some(&parent), stat("w1", "A")).unwrap();
    store.add_widget(Some(&parent), stat("w2", "B")).unwrap();
    assert_eq!(store.widget_id_by_panel_ix("wp", 1).unwrap(), "w2");

    store.delete_widget("w1").unwrap();
    assert_eq!(store.widget_by_id("wp").unwrap().panel_children(), vec!["w2"]);

    let err = store
        .add_widget(Some(&EntityRef::Widget("2".into())), stat("w3", "C"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn test_delete_grid_unlinks_from_tab() {
    let (mut store, emitted) = store_with_grid();
    store.delete_grid("g1").unwrap();
    assert_eq!(store.tab_by_id("t1").unwrap().grids, Some(vec![]));

    let emitted = emitted.lock().unwrap();
    assert!(emitted.contains(&("$config/grids/g1".to_string(), Value::Null)));
    assert!(emitted.iter().any(|(t, _)| t == "$config/tabs/t1"));
}

#[test]
fn test_emits_whole_entities() {
    let (mut store, emitted) = store_with_grid();
    store.add_widget(None, stat("w1", "X")).unwrap();
    store
        .update_widget_prop("w1", PropKind::Static, "title", Some(json!("Y")))
        .unwrap();

    let emitted = emitted.lock().unwrap();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[1].0, "$config/widgets/w1");
    assert_eq!(emitted[1].1["static"]["title"], "Y");
    assert_eq!(emitted[1].1["id"], "w1");
}

#[test]
fn test_queueing_collapses_duplicates() {
    let (mut store, emitted) = store_with_grid();
    store.add_widget(None, stat("w1", "X")).unwrap();
    emitted.lock().unwrap().clear();

    store.set_queueing(true);
    store.update_widget("w1", props(json!({ "rows": 2 }))).unwrap();
    store
        .update_widget_prop("w1", PropKind::Static, "title", Some(json!("a")))
        .unwrap();
    store
        .update_widget_prop("w1", PropKind::Static, "title", Some(json!("b")))
        .unwrap();
    assert!(emitted.lock().unwrap().is_empty());
    assert_eq!(store.queued_topics().collect::<Vec<_>>(), vec!["widgets/w1"]);

    store.stop_queueing();
    assert!(!store.is_queueing());
    let emitted = emitted.lock().unwrap();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].0, "$config/widgets/w1");
    assert_eq!(emitted[0].1["static"]["title"], "b");
    assert_eq!(emitted[0].1["rows"], 2);
}

#[test]
fn test_queued_topic_back_at_old_value_is_not_sent() {
    let (mut store, emitted) = store_with_grid();
    store.add_widget(None, stat("w1", "X")).unwrap();
    emitted.lock().unwrap().clear();

    store.set_queueing(true);
    store.delete_widget("w1").unwrap();
    store.add_widget(None, stat("w1", "X")).unwrap();
    store.add_widget(None, stat("w2", "Y")).unwrap();
    store.stop_queueing();

    let emitted = emitted.lock().unwrap();
    let topics: Vec<&str> = emitted.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(topics, vec!["$config/widgets/w2"]);
}

#[test]
fn test_failed_batch_keeps_applied_mutations() {
    use flexdash_core::Mutation;

    let (mut store, emitted) = recording_store(Value::Null);
    let err = store
        .mutate(
            "partial",
            vec![
                Mutation::set("dash/tabs/0", json!("t1")),
                Mutation::set("dash/tabs/5", json!("t2")),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Path(_)));
    assert_eq!(store.dash().unwrap().tabs, vec!["t1"]);
    assert_eq!(emitted.lock().unwrap().len(), 1);
}

#[test]
fn test_update_with_null_deletes_prop() {
    let (mut store, _) = store_with_grid();
    store
        .update_grid("g1", props(json!({ "title": "G", "show": true })))
        .unwrap();
    store.update_grid("g1", props(json!({ "show": null }))).unwrap();
    let grid = store.grid_by_id("g1").unwrap();
    assert_eq!(grid.title, "G");
    assert!(!grid.extra.contains_key("show"));
}
