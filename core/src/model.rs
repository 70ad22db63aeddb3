// Dashboard config model
//
// Typed views of the entities held in the `$config` tree plus the wire
// encoding of their IDs (`t`/`g`/`w` prefixes, `~` disabled marker).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::store::StoreError;

/// Leading path segment that routes a path into the config tree
pub const CONFIG_PREFIX: &str = "$config";

/// Marks a child reference whose entity is declared but disabled
pub const DISABLED_MARKER: char = '~';

/// Separates an array-widget ID from its topic
pub const ARRAY_SEPARATOR: char = '|';

/// Title of a dashboard seeded without one
pub const DEFAULT_TITLE: &str = "FlexDash";

/// The dashboard singleton
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dash {
    pub title: String,
    #[serde(default)]
    pub tabs: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A tab holds grids, or points at an external page (iframe tab)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tab {
    pub fn is_iframe(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GridKind {
    #[default]
    FixedGrid,
    PopupGrid,
    ArrayGrid,
    Custom(String),
}

impl GridKind {
    pub fn as_str(&self) -> &str {
        match self {
            GridKind::FixedGrid => "FixedGrid",
            GridKind::PopupGrid => "PopupGrid",
            GridKind::ArrayGrid => "ArrayGrid",
            GridKind::Custom(s) => s,
        }
    }
}

impl From<String> for GridKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "FixedGrid" => GridKind::FixedGrid,
            "PopupGrid" => GridKind::PopupGrid,
            "ArrayGrid" => GridKind::ArrayGrid,
            _ => GridKind::Custom(s),
        }
    }
}

impl From<GridKind> for String {
    fn from(kind: GridKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub id: String,
    #[serde(default)]
    pub kind: GridKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub min_cols: u32,
    #[serde(default)]
    pub max_cols: u32,
    #[serde(default)]
    pub widgets: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A widget; panels are widgets of kind `Panel` listing children in `static.widgets`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub kind: String,
    #[serde(default = "one")]
    pub rows: u32,
    #[serde(default = "one")]
    pub cols: u32,
    #[serde(rename = "static", default)]
    pub statics: Map<String, Value>,
    #[serde(default)]
    pub dynamic: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dyn_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn one() -> u32 {
    1
}

impl Widget {
    pub const PANEL_KIND: &'static str = "Panel";

    pub fn is_panel(&self) -> bool {
        self.kind.ends_with(Self::PANEL_KIND)
            || self.statics.get("widgets").is_some_and(Value::is_array)
    }

    /// Child widget IDs of a panel (empty for plain widgets)
    pub fn panel_children(&self) -> Vec<String> {
        self.statics
            .get("widgets")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Which prop map of a widget an update targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropKind {
    Static,
    Dynamic,
}

impl PropKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PropKind::Static => "static",
            PropKind::Dynamic => "dynamic",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Tab,
    Grid,
    Widget,
}

impl EntityKind {
    pub fn prefix(self) -> char {
        match self {
            EntityKind::Tab => 't',
            EntityKind::Grid => 'g',
            EntityKind::Widget => 'w',
        }
    }

    /// Name of the config collection holding entities of this kind
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Tab => "tabs",
            EntityKind::Grid => "grids",
            EntityKind::Widget => "widgets",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Tab => "tab",
            EntityKind::Grid => "grid",
            EntityKind::Widget => "widget",
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            't' => Some(EntityKind::Tab),
            'g' => Some(EntityKind::Grid),
            'w' => Some(EntityKind::Widget),
            _ => None,
        }
    }
}

/// A structural entity, identified by its external (node) ID.
///
/// The prefixed string form only exists at the wire boundary: use
/// [`EntityRef::store_id`] to encode and `str::parse` to decode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Tab(String),
    Grid(String),
    Widget(String),
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        let id = id.into();
        match kind {
            EntityKind::Tab => EntityRef::Tab(id),
            EntityKind::Grid => EntityRef::Grid(id),
            EntityKind::Widget => EntityRef::Widget(id),
        }
    }

    /// Clone of an array-template widget for one topic.
    ///
    /// The topic is escaped with [`encode_topic`] so the ID stays a single
    /// path segment.
    pub fn array_clone(node_id: &str, topic: &str) -> Self {
        EntityRef::Widget(format!("{node_id}{ARRAY_SEPARATOR}{}", encode_topic(topic)))
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Tab(_) => EntityKind::Tab,
            EntityRef::Grid(_) => EntityKind::Grid,
            EntityRef::Widget(_) => EntityKind::Widget,
        }
    }

    pub fn node_id(&self) -> &str {
        match self {
            EntityRef::Tab(id) | EntityRef::Grid(id) | EntityRef::Widget(id) => id,
        }
    }

    /// ID of this entity in the store (its key within the collection)
    pub fn store_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind().prefix(), self.node_id())
    }
}

impl FromStr for EntityRef {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let kind = chars
            .next()
            .and_then(EntityKind::from_prefix)
            .ok_or_else(|| StoreError::Invalid(format!("'{s}' is not a tab, grid or widget ID")))?;
        let rest = chars.as_str();
        if rest.is_empty() {
            return Err(StoreError::Invalid(format!("'{s}' is missing its node ID")));
        }
        Ok(EntityRef::new(kind, rest))
    }
}

/// Escape an array topic for use inside an entity ID: `%` becomes `%25`
/// and `/` becomes `%2F`.
pub fn encode_topic(topic: &str) -> String {
    topic.replace('%', "%25").replace('/', "%2F")
}

/// Inverse of [`encode_topic`]; unknown escapes are kept as they are
pub fn decode_topic(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(ix) = rest.find('%') {
        out.push_str(&rest[..ix]);
        let tail = &rest[ix..];
        match tail.get(1..3) {
            Some(code) if code.eq_ignore_ascii_case("2f") => {
                out.push('/');
                rest = &tail[3..];
            }
            Some("25") => {
                out.push('%');
                rest = &tail[3..];
            }
            _ => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// An entry of a container's child list
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChildRef {
    Live(EntityRef),
    Disabled(EntityRef),
}

impl ChildRef {
    pub fn entity(&self) -> &EntityRef {
        match self {
            ChildRef::Live(e) | ChildRef::Disabled(e) => e,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, ChildRef::Disabled(_))
    }

    pub fn store_id(&self) -> String {
        match self {
            ChildRef::Live(e) => e.store_id(),
            ChildRef::Disabled(e) => format!("{DISABLED_MARKER}{}", e.store_id()),
        }
    }
}

impl FromStr for ChildRef {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(DISABLED_MARKER) {
            Some(rest) => Ok(ChildRef::Disabled(rest.parse()?)),
            None => Ok(ChildRef::Live(s.parse()?)),
        }
    }
}
