// Declarations of dashboard nodes as the flow engine describes them

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

use crate::model::{EntityKind, EntityRef, GridKind};

/// Parse a child list of the form `,id1,id2`: the leading comma is optional,
/// empty entries are skipped and duplicates dropped.
pub fn parse_children(csv: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (i, id) in csv.split(',').enumerate() {
        if id.is_empty() {
            if i > 0 {
                warn!(children = csv, "empty ID in child list");
            }
            continue;
        }
        if seen.insert(id) {
            out.push(id.to_string());
        }
    }
    out
}

fn children_csv<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(parse_children(&String::deserialize(d)?))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContainerKind {
    Dashboard,
    Tab {
        #[serde(default)]
        icon: Option<String>,
    },
    Iframe {
        #[serde(default)]
        icon: Option<String>,
        url: String,
        #[serde(default)]
        slot: Option<String>,
    },
    Grid {
        #[serde(default)]
        grid_kind: GridKind,
        #[serde(default)]
        min_cols: u32,
        #[serde(default)]
        max_cols: u32,
    },
    Panel {
        #[serde(default = "one")]
        rows: i64,
        #[serde(default = "one")]
        cols: i64,
        #[serde(default)]
        solid: bool,
    },
}

fn one() -> i64 {
    1
}

/// A container node: dashboard, tab, iframe tab, grid or panel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerDecl {
    #[serde(rename = "id")]
    pub node_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub kind: ContainerKind,
    #[serde(default, deserialize_with = "children_csv")]
    pub children: Vec<String>,
}

impl ContainerDecl {
    /// The store entity backing this container; the dashboard has none
    pub fn entity(&self) -> Option<EntityRef> {
        let id = self.node_id.clone();
        match self.kind {
            ContainerKind::Dashboard => None,
            ContainerKind::Tab { .. } | ContainerKind::Iframe { .. } => Some(EntityRef::Tab(id)),
            ContainerKind::Grid { .. } => Some(EntityRef::Grid(id)),
            ContainerKind::Panel { .. } => Some(EntityRef::Widget(id)),
        }
    }

    /// Whether entities of `kind` may appear in this container's child list
    pub fn accepts(&self, kind: EntityKind) -> bool {
        match self.kind {
            ContainerKind::Dashboard => kind == EntityKind::Tab,
            ContainerKind::Tab { .. } => kind == EntityKind::Grid,
            ContainerKind::Iframe { .. } => false,
            ContainerKind::Grid { .. } | ContainerKind::Panel { .. } => kind == EntityKind::Widget,
        }
    }

    pub fn icon(&self) -> Option<&str> {
        match &self.kind {
            ContainerKind::Tab { icon } | ContainerKind::Iframe { icon, .. } => icon.as_deref(),
            _ => None,
        }
    }
}

/// Repeat-per-topic configuration of an array widget
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    pub max: usize,
}

/// A widget node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WidgetDecl {
    #[serde(rename = "id")]
    pub node_id: String,
    /// UI component name, e.g. `Stat`, `PushButton`
    pub kind: String,
    /// Node ID of the grid or panel holding the widget
    pub container: String,
    #[serde(default = "one")]
    pub rows: i64,
    #[serde(default = "one")]
    pub cols: i64,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub array: Option<ArraySpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_children() {
        assert_eq!(parse_children(",a,b"), vec!["a", "b"]);
        assert_eq!(parse_children("a,,b,a"), vec!["a", "b"]);
        assert!(parse_children("").is_empty());
    }

    #[test]
    fn test_container_accepts() {
        let grid = ContainerDecl {
            node_id: "g".into(),
            name: None,
            title: String::new(),
            kind: ContainerKind::Grid {
                grid_kind: GridKind::FixedGrid,
                min_cols: 1,
                max_cols: 20,
            },
            children: vec![],
        };
        assert!(grid.accepts(EntityKind::Widget));
        assert!(!grid.accepts(EntityKind::Grid));
        assert_eq!(grid.entity(), Some(EntityRef::Grid("g".into())));
    }
}
