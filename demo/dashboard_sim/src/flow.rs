use std::fs;
use std::path::Path;

use flexdash_core::{
    ContainerDecl, CtrlTarget, DashError, DeclaredNodes, EntityKind, Result, WidgetDecl,
};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A flow as the simulator sees it: dashboard nodes plus a script of
/// client-side activity to replay after the deploy
#[derive(Debug, Default, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub containers: Vec<ContainerDecl>,
    #[serde(default)]
    pub widgets: Vec<WidgetDecl>,
    /// Nodes that are declared but disabled
    #[serde(default)]
    pub disabled: Vec<DisabledNode>,
    /// Topics to feed to array widgets
    #[serde(default)]
    pub topics: Vec<TopicStep>,
    /// Live prop values to push to widgets
    #[serde(default)]
    pub updates: Vec<UpdateStep>,
    /// Widget outputs the simulated client sends
    #[serde(default)]
    pub inputs: Vec<InputStep>,
    #[serde(default)]
    pub ctrl: Vec<CtrlStep>,
}

#[derive(Debug, Deserialize)]
pub struct DisabledNode {
    pub id: String,
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct TopicStep {
    pub widget: String,
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStep {
    pub widget: String,
    pub props: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct InputStep {
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct CtrlStep {
    pub target: CtrlTarget,
    pub key: String,
    /// `open`, `close` or `edit`
    pub action: String,
    #[serde(default)]
    pub props: Map<String, Value>,
}

impl Flow {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn is_disabled(&self, node_id: &str) -> bool {
        self.disabled.iter().any(|d| d.id == node_id)
    }

    /// Node states as the flow engine would report them
    pub fn host(&self) -> Result<DeclaredNodes> {
        let mut host = DeclaredNodes::new();
        for c in &self.containers {
            host.activate(c.node_id.as_str());
        }
        for w in &self.widgets {
            host.activate(w.node_id.as_str());
        }
        for d in &self.disabled {
            let kind = match d.kind.as_str() {
                "tab" => EntityKind::Tab,
                "grid" => EntityKind::Grid,
                "widget" | "panel" => EntityKind::Widget,
                other => {
                    return Err(DashError::Config(format!(
                        "disabled node {} has unknown kind '{other}'",
                        d.id
                    )))
                }
            };
            host.disable(d.id.as_str(), kind);
        }
        Ok(host)
    }
}
