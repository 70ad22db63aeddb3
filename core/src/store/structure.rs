// Typed access to the `$config` portion of the store
//
// Getters fail with a StoreError naming the missing entity; they are the only
// way the rest of the crate reads structural entities. Mutating helpers check
// existence first and then hand one batch of low-level mutations to `mutate`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Mutation, Store, StoreError};
use crate::model::{Dash, EntityKind, EntityRef, Grid, PropKind, Tab, Widget};

fn to_value<T: Serialize>(entity: &T) -> Result<Value, StoreError> {
    serde_json::to_value(entity).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn keys(props: &Map<String, Value>) -> String {
    props.keys().cloned().collect::<Vec<_>>().join(",")
}

/// Mutations writing each of `props` below `base`; null values delete the prop
fn prop_mutations(base: &str, props: Map<String, Value>) -> Vec<Mutation> {
    props
        .into_iter()
        .map(|(k, v)| match v {
            Value::Null => Mutation::delete(format!("{base}/{k}")),
            v => Mutation::set(format!("{base}/{k}"), v),
        })
        .collect()
}

/// Mutation replacing the child list at `path` with `ids` minus `id`, if it lists `id`
fn unlink(path: String, ids: Option<&Value>, id: &str) -> Option<Mutation> {
    let ids = ids?.as_array()?;
    if !ids.iter().any(|c| c.as_str() == Some(id)) {
        return None;
    }
    let kept: Vec<Value> = ids
        .iter()
        .filter(|c| c.as_str() != Some(id))
        .cloned()
        .collect();
    Some(Mutation::set(path, Value::Array(kept)))
}

/// IDs become path segments, so they must be non-empty and free of `/`
fn check_id(kind: EntityKind, id: &str) -> Result<(), StoreError> {
    if id.is_empty() || id.contains('/') {
        return Err(StoreError::Invalid(format!(
            "'{id}' is not a valid {} ID",
            kind.name()
        )));
    }
    Ok(())
}

impl Store {
    fn entity<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> Result<T, StoreError> {
        let missing = || StoreError::NotFound(format!("{} {id} does not exist", kind.name()));
        let raw = self
            .config
            .get(kind.collection())
            .and_then(|c| c.get(id))
            .ok_or_else(missing)?;
        if raw.get("id").and_then(Value::as_str) != Some(id) {
            return Err(missing());
        }
        T::deserialize(raw).map_err(|e| {
            StoreError::Invalid(format!("{} {id} is malformed: {e}", kind.name()))
        })
    }

    fn exists(&self, kind: EntityKind, id: &str) -> bool {
        self.config
            .get(kind.collection())
            .and_then(|c| c.get(id))
            .is_some()
    }

    fn entries<'a>(&'a self, collection: &str) -> impl Iterator<Item = (&'a String, &'a Value)> + 'a {
        self.config
            .get(collection)
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|m| m.iter())
    }

    // =========================================================================
    // Getters with error checks
    // =========================================================================

    pub fn dash(&self) -> Result<Dash, StoreError> {
        let raw = self
            .config
            .get("dash")
            .ok_or_else(|| StoreError::NotFound("dash does not exist".into()))?;
        Dash::deserialize(raw).map_err(|e| StoreError::Invalid(format!("dash is malformed: {e}")))
    }

    pub fn tab_by_id(&self, id: &str) -> Result<Tab, StoreError> {
        self.entity(EntityKind::Tab, id)
    }

    pub fn grid_by_id(&self, id: &str) -> Result<Grid, StoreError> {
        self.entity(EntityKind::Grid, id)
    }

    pub fn widget_by_id(&self, id: &str) -> Result<Widget, StoreError> {
        self.entity(EntityKind::Widget, id)
    }

    /// Whether the widgets collection has an entry for `id`, well-formed or not
    pub fn has_widget(&self, id: &str) -> bool {
        self.exists(EntityKind::Widget, id)
    }

    pub fn tab_id_by_ix(&self, ix: usize) -> Result<String, StoreError> {
        self.dash()?
            .tabs
            .get(ix)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("tab #{ix} does not exist")))
    }

    pub fn grid_id_by_ix(&self, tab_id: &str, ix: usize) -> Result<String, StoreError> {
        let tab = self.tab_by_id(tab_id)?;
        tab.grids
            .as_ref()
            .and_then(|g| g.get(ix))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("grid #{ix} does not exist in tab {tab_id}")))
    }

    pub fn widget_id_by_ix(&self, grid_id: &str, ix: usize) -> Result<String, StoreError> {
        self.grid_by_id(grid_id)?
            .widgets
            .get(ix)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("widget #{ix} does not exist in grid {grid_id}"))
            })
    }

    pub fn widget_id_by_panel_ix(&self, panel_id: &str, ix: usize) -> Result<String, StoreError> {
        self.widget_by_id(panel_id)?
            .panel_children()
            .get(ix)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("widget #{ix} does not exist in panel {panel_id}"))
            })
    }

    // =========================================================================
    // Operations on the dash
    // =========================================================================

    /// Merge `props` into the dash
    pub fn update_dash(&mut self, props: Map<String, Value>) -> Result<(), StoreError> {
        let tagline = format!("update dash {}", keys(&props));
        self.mutate(&tagline, prop_mutations("dash", props))
    }

    // =========================================================================
    // Operations on tabs
    // =========================================================================

    /// Add a tab and list it at the end of the dash's tabs
    pub fn add_tab(&mut self, tab: Tab) -> Result<(), StoreError> {
        check_id(EntityKind::Tab, &tab.id)?;
        if self.exists(EntityKind::Tab, &tab.id) {
            return Err(StoreError::Duplicate(format!("tab {} already exists", tab.id)));
        }
        let dash = self.dash()?;
        let mut batch = vec![Mutation::set(format!("tabs/{}", tab.id), to_value(&tab)?)];
        if !dash.tabs.contains(&tab.id) {
            batch.push(Mutation::set(
                format!("dash/tabs/{}", dash.tabs.len()),
                Value::String(tab.id.clone()),
            ));
        }
        self.mutate("add a tab", batch)
    }

    /// Delete a tab and remove it from the dash's tabs
    pub fn delete_tab(&mut self, tab_id: &str) -> Result<(), StoreError> {
        self.tab_by_id(tab_id)?;
        let mut batch = vec![Mutation::delete(format!("tabs/{tab_id}"))];
        batch.extend(unlink("dash/tabs".into(), self.config.pointer("/dash/tabs"), tab_id));
        self.mutate("delete a tab", batch)
    }

    /// Merge `props` into an existing tab
    pub fn update_tab(&mut self, tab_id: &str, props: Map<String, Value>) -> Result<(), StoreError> {
        self.tab_by_id(tab_id)?;
        let tagline = format!("update tab {}", keys(&props));
        self.mutate(&tagline, prop_mutations(&format!("tabs/{tab_id}"), props))
    }

    // =========================================================================
    // Operations on grids
    // =========================================================================

    /// Add a grid, optionally appending it to a tab's grids
    pub fn add_grid(&mut self, tab_id: Option<&str>, grid: Grid) -> Result<(), StoreError> {
        check_id(EntityKind::Grid, &grid.id)?;
        if self.exists(EntityKind::Grid, &grid.id) {
            return Err(StoreError::Duplicate(format!("grid {} already exists", grid.id)));
        }
        let mut batch = vec![Mutation::set(format!("grids/{}", grid.id), to_value(&grid)?)];
        if let Some(tab_id) = tab_id {
            let tab = self.tab_by_id(tab_id)?;
            let grids = tab.grids.ok_or_else(|| {
                StoreError::Invalid(format!("tab {tab_id} cannot hold grids"))
            })?;
            batch.push(Mutation::set(
                format!("tabs/{tab_id}/grids/{}", grids.len()),
                Value::String(grid.id.clone()),
            ));
        }
        self.mutate("add a grid", batch)
    }

    /// Delete a grid and remove it from every tab listing it
    pub fn delete_grid(&mut self, grid_id: &str) -> Result<(), StoreError> {
        self.grid_by_id(grid_id)?;
        let mut batch = vec![Mutation::delete(format!("grids/{grid_id}"))];
        batch.extend(self.entries("tabs").filter_map(|(tab_id, tab)| {
            unlink(format!("tabs/{tab_id}/grids"), tab.get("grids"), grid_id)
        }));
        self.mutate("delete a grid", batch)
    }

    /// Merge `props` into an existing grid
    pub fn update_grid(&mut self, grid_id: &str, props: Map<String, Value>) -> Result<(), StoreError> {
        self.grid_by_id(grid_id)?;
        let tagline = format!("update grid {}", keys(&props));
        self.mutate(&tagline, prop_mutations(&format!("grids/{grid_id}"), props))
    }

    // =========================================================================
    // Operations on widgets
    // =========================================================================

    /// Add a widget, optionally appending it to a grid or panel
    pub fn add_widget(
        &mut self,
        parent: Option<&EntityRef>,
        widget: Widget,
    ) -> Result<(), StoreError> {
        check_id(EntityKind::Widget, &widget.id)?;
        if self.exists(EntityKind::Widget, &widget.id) {
            return Err(StoreError::Duplicate(format!("widget {} already exists", widget.id)));
        }
        let mut batch = vec![Mutation::set(format!("widgets/{}", widget.id), to_value(&widget)?)];
        let id = Value::String(widget.id.clone());
        match parent {
            None => {}
            Some(p @ EntityRef::Grid(_)) => {
                let grid_id = p.store_id();
                let grid = self.grid_by_id(&grid_id)?;
                batch.push(Mutation::set(
                    format!("grids/{grid_id}/widgets/{}", grid.widgets.len()),
                    id,
                ));
            }
            Some(p @ EntityRef::Widget(_)) => {
                let panel_id = p.store_id();
                let panel = self.widget_by_id(&panel_id)?;
                if !panel.is_panel() {
                    return Err(StoreError::Invalid(format!(
                        "widget {panel_id} is not a panel"
                    )));
                }
                match panel.statics.get("widgets") {
                    Some(Value::Array(children)) => batch.push(Mutation::set(
                        format!("widgets/{panel_id}/static/widgets/{}", children.len()),
                        id,
                    )),
                    _ => batch.push(Mutation::set(
                        format!("widgets/{panel_id}/static/widgets"),
                        Value::Array(vec![id]),
                    )),
                }
            }
            Some(p @ EntityRef::Tab(_)) => {
                return Err(StoreError::Invalid(format!(
                    "tab {} cannot hold widgets",
                    p.store_id()
                )))
            }
        }
        self.mutate("add a widget", batch)
    }

    /// Delete a widget and remove it from every grid and panel listing it
    pub fn delete_widget(&mut self, widget_id: &str) -> Result<(), StoreError> {
        self.widget_by_id(widget_id)?;
        let mut batch = vec![Mutation::delete(format!("widgets/{widget_id}"))];
        batch.extend(self.entries("grids").filter_map(|(grid_id, grid)| {
            unlink(format!("grids/{grid_id}/widgets"), grid.get("widgets"), widget_id)
        }));
        batch.extend(
            self.entries("widgets")
                .filter(|(panel_id, _)| panel_id.as_str() != widget_id)
                .filter_map(|(panel_id, panel)| {
                    unlink(
                        format!("widgets/{panel_id}/static/widgets"),
                        panel.pointer("/static/widgets"),
                        widget_id,
                    )
                }),
        );
        self.mutate("delete a widget", batch)
    }

    /// Replace an existing widget as a whole; the containers listing it are kept
    pub fn replace_widget(&mut self, widget: Widget) -> Result<(), StoreError> {
        if !self.has_widget(&widget.id) {
            return Err(StoreError::NotFound(format!("widget {} does not exist", widget.id)));
        }
        let batch = vec![Mutation::set(format!("widgets/{}", widget.id), to_value(&widget)?)];
        self.mutate("replace a widget", batch)
    }

    /// Merge `props` into an existing widget's top-level fields
    pub fn update_widget(
        &mut self,
        widget_id: &str,
        props: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.widget_by_id(widget_id)?;
        let tagline = format!("update widget {}", keys(&props));
        self.mutate(&tagline, prop_mutations(&format!("widgets/{widget_id}"), props))
    }

    /// Set (or with `None` delete) one static or dynamic prop of a widget
    pub fn update_widget_prop(
        &mut self,
        widget_id: &str,
        which: PropKind,
        prop: &str,
        value: Option<Value>,
    ) -> Result<(), StoreError> {
        self.widget_by_id(widget_id)?;
        let tagline = format!("update widget prop {}:{prop}", which.as_str());
        let path = format!("widgets/{widget_id}/{}/{prop}", which.as_str());
        let mutation = match value {
            Some(v) => Mutation::set(path, v),
            None => Mutation::delete(path),
        };
        self.mutate(&tagline, vec![mutation])
    }
}
