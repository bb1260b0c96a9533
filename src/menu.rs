//! Menu rows and route tree construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a menu participates in route resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuStatus {
    Enabled,
    Disabled,
}

impl MenuStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MenuStatus::Enabled => "enabled",
            MenuStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(MenuStatus::Enabled),
            "disabled" => Some(MenuStatus::Disabled),
            _ => None,
        }
    }
}

/// A menu row in the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuRecord {
    pub id: i64,
    pub domain: String,
    /// Parent menu id, `None` for top-level entries.
    pub pid: Option<i64>,
    /// Route name, also used as the home marker.
    pub name: String,
    /// Route path served to the frontend.
    pub path: String,
    pub component: Option<String>,
    /// Sort order within one tree level, ascending.
    pub order: i32,
    pub status: MenuStatus,
    /// Hidden menus render nothing and are skipped for home selection.
    pub hidden: bool,
}

impl MenuRecord {
    pub fn new(id: i64, domain: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            domain: domain.into(),
            pid: None,
            path: format!("/{name}"),
            name,
            component: None,
            order: 0,
            status: MenuStatus::Enabled,
            hidden: false,
        }
    }

    pub fn with_parent(mut self, pid: i64) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_status(mut self, status: MenuStatus) -> Self {
        self.status = status;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// A menu row with its resolved children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuNode {
    #[serde(flatten)]
    pub menu: MenuRecord,
    pub children: Vec<MenuNode>,
}

/// The cached result of route resolution for one user and domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTree {
    /// Name of the route to land on after login.
    pub home: String,
    pub routes: Vec<MenuNode>,
}

impl RouteTree {
    /// The result served when a user resolves to no roles.
    pub fn empty() -> Self {
        Self {
            home: String::new(),
            routes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Build a tree from flat rows, keyed by `pid` and sorted by `order`
/// ascending at every level.
///
/// Rows whose `pid` does not resolve to another row in the input are treated
/// as roots, so an orphaned subtree stays visible instead of vanishing.
pub fn build_tree(mut rows: Vec<MenuRecord>) -> Vec<MenuNode> {
    rows.sort_by(|a, b| (a.order, a.id).cmp(&(b.order, b.id)));

    let known: std::collections::HashSet<i64> = rows.iter().map(|m| m.id).collect();
    let mut by_parent: HashMap<Option<i64>, Vec<MenuRecord>> = HashMap::new();
    for row in rows {
        let parent = match row.pid {
            Some(pid) if known.contains(&pid) => Some(pid),
            _ => None,
        };
        by_parent.entry(parent).or_default().push(row);
    }

    attach_children(None, &mut by_parent)
}

fn attach_children(
    parent: Option<i64>,
    by_parent: &mut HashMap<Option<i64>, Vec<MenuRecord>>,
) -> Vec<MenuNode> {
    let rows = by_parent.remove(&parent).unwrap_or_default();
    rows.into_iter()
        .map(|menu| {
            let children = attach_children(Some(menu.id), by_parent);
            MenuNode { menu, children }
        })
        .collect()
}

/// Name of the first non-hidden leaf in a pre-order walk of the tree.
pub fn first_visible_leaf(nodes: &[MenuNode]) -> Option<&str> {
    for node in nodes {
        if node.children.is_empty() {
            if !node.menu.hidden {
                return Some(&node.menu.name);
            }
        } else if let Some(found) = first_visible_leaf(&node.children) {
            return Some(found);
        }
    }
    None
}
