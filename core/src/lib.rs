// FlexDash Core Library
// Dashboard configuration store, deploy reconciler and client session hub

pub mod config;
pub mod ctrl;
pub mod hub;
pub mod model;
pub mod reconcile;
pub mod sink;
pub mod store;

// Export core types
pub use config::DashboardConfig;
pub use ctrl::{apply_ctrl, CtrlAction, CtrlTarget};
pub use hub::{Connection, CtrlHandler, DashboardHub, InputHandler, WidgetApi};
pub use model::{
    decode_topic, encode_topic, ChildRef, Dash, EntityKind, EntityRef, Grid, GridKind, PropKind,
    Tab, Widget, CONFIG_PREFIX,
};
pub use reconcile::{
    parse_children, ArraySpec, ContainerDecl, ContainerKind, DashboardHost, DeclaredNodes,
    DeploySummary, NodeState, Reconciler, WidgetDecl,
};
pub use sink::{EventBroadcaster, EventSink, Outbound};
pub use store::{Mutation, Store, StoreError};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, DashError>;
