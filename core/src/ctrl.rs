// Remote control of tabs, grids and panels
//
// A control message names its target by node ID, or by name, title or icon,
// and either opens/closes it on the clients or edits its config.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::model::{EntityKind, PropKind};
use crate::reconcile::{ContainerDecl, ContainerKind, Reconciler};
use crate::sink::Outbound;
use crate::store::{Store, StoreError};
use crate::{DashError, Result};

/// Fields a control message may never overwrite
const EDIT_EXCLUDED: &[&str] = &["id", "kind", "static", "dynamic", "dyn_root", "output"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CtrlTarget {
    Tab,
    Grid,
    Panel,
}

impl CtrlTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            CtrlTarget::Tab => "tab",
            CtrlTarget::Grid => "grid",
            CtrlTarget::Panel => "panel",
        }
    }

    fn matches(self, kind: &ContainerKind) -> bool {
        matches!(
            (self, kind),
            (CtrlTarget::Tab, ContainerKind::Tab { .. })
                | (CtrlTarget::Grid, ContainerKind::Grid { .. })
                | (CtrlTarget::Panel, ContainerKind::Panel { .. })
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CtrlAction {
    Open,
    Close,
    /// Overwrite existing fields of the element
    Edit(Map<String, Value>),
}

fn field<'a>(decl: &'a ContainerDecl, name: &str) -> Option<&'a str> {
    match name {
        "name" => decl.name.as_deref(),
        "title" => Some(decl.title.as_str()),
        "icon" => decl.icon(),
        _ => None,
    }
}

impl Reconciler {
    /// Find the container a control message refers to: by node ID, else
    /// uniquely by name, title or icon (first field with any match wins).
    pub fn find_container(&self, target: CtrlTarget, key: &str) -> Result<&ContainerDecl> {
        if let Some(decl) = self.container(key) {
            if target.matches(&decl.kind) {
                return Ok(decl);
            }
            return Err(DashError::Config(format!(
                "node {key} is not a {}",
                target.as_str()
            )));
        }

        let candidates: Vec<&ContainerDecl> = self
            .containers()
            .filter(|c| target.matches(&c.kind))
            .collect();
        for name in ["name", "title", "icon"] {
            let hits: Vec<&ContainerDecl> = candidates
                .iter()
                .copied()
                .filter(|c| field(c, name) == Some(key))
                .collect();
            match hits.as_slice() {
                [] => continue,
                [decl] => return Ok(*decl),
                _ => {
                    return Err(DashError::Config(format!(
                        "multiple {}s have {name} '{key}'",
                        target.as_str()
                    )))
                }
            }
        }
        Err(StoreError::NotFound(format!("no {} matches '{key}'", target.as_str())).into())
    }
}

/// Carry out a control action. Open and close produce the message to send to
/// the clients (or to `conn_id` only); edits are applied to the store.
pub fn apply_ctrl(
    store: &mut Store,
    reconciler: &Reconciler,
    target: CtrlTarget,
    key: &str,
    action: CtrlAction,
    conn_id: Option<&str>,
) -> Result<Option<Outbound>> {
    let decl = reconciler.find_container(target, key)?;
    let entity = decl.entity().ok_or_else(|| {
        DashError::Config(format!("node {} has no dashboard element", decl.node_id))
    })?;
    let id = entity.store_id();

    let verb = match &action {
        CtrlAction::Open => "open",
        CtrlAction::Close => "close",
        CtrlAction::Edit(props) => return edit(store, entity.kind(), &id, props.clone(), conn_id),
    };
    let allowed = matches!(
        (target, &action),
        (CtrlTarget::Grid, _) | (CtrlTarget::Tab, CtrlAction::Open)
    );
    if !allowed {
        return Err(DashError::Config(format!(
            "cannot {verb} a {}",
            target.as_str()
        )));
    }
    info!(action = verb, target = target.as_str(), id = %id, "ctrl");
    Ok(Some(Outbound {
        kind: "ctrl".to_string(),
        topic: String::new(),
        value: json!({ "action": verb, "type": target.as_str(), "id": id }),
        target: conn_id.map(str::to_string),
    }))
}

fn edit(
    store: &mut Store,
    kind: EntityKind,
    id: &str,
    props: Map<String, Value>,
    conn_id: Option<&str>,
) -> Result<Option<Outbound>> {
    if conn_id.is_some() {
        return Err(DashError::Session(
            "editing for a single connection is not supported".into(),
        ));
    }
    let current = match kind {
        EntityKind::Tab => serde_json::to_value(store.tab_by_id(id)?)?,
        EntityKind::Grid => serde_json::to_value(store.grid_by_id(id)?)?,
        EntityKind::Widget => serde_json::to_value(store.widget_by_id(id)?)?,
    };
    let statics = current.get("static").cloned().unwrap_or(Value::Null);

    let mut update = Map::new();
    let mut static_update = Map::new();
    for (k, v) in props {
        if EDIT_EXCLUDED.contains(&k.as_str()) {
            continue;
        }
        if current.get(&k).is_some() {
            update.insert(k, v);
        } else if statics.get(&k).is_some() {
            // panel title and the like live in the static props
            static_update.insert(k, v);
        }
    }
    if update.is_empty() && static_update.is_empty() {
        debug!(id, "ctrl edit touches no existing field");
        return Ok(None);
    }

    match kind {
        EntityKind::Tab => store.update_tab(id, update)?,
        EntityKind::Grid => store.update_grid(id, update)?,
        EntityKind::Widget => {
            if !update.is_empty() {
                store.update_widget(id, update)?;
            }
            for (k, v) in static_update {
                store.update_widget_prop(id, PropKind::Static, &k, Some(v))?;
            }
        }
    }
    Ok(None)
}
