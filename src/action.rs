//! Built-in resource actions and the include/exclude action set.

use axum::http::Method;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Find,
    Get,
    Create,
    Update,
    Delete,
    SoftDelete,
    Restore,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Find,
        Action::Get,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::SoftDelete,
        Action::Restore,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::Find => "find",
            Action::Get => "get",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::SoftDelete => "softDelete",
            Action::Restore => "restore",
        }
    }

    /// HTTP bindings as (method, path) given the resource name, its plural and the id template.
    /// `find` is bound twice: GET for query-string filters, POST for a body search.
    pub fn bindings(self, name: &str, plural: &str, id_path: &str) -> Vec<(Method, String)> {
        match self {
            Action::Find => vec![
                (Method::GET, format!("/{}", plural)),
                (Method::POST, format!("/{}", plural)),
            ],
            Action::Get => vec![(Method::GET, format!("/{}/{}", name, id_path))],
            Action::Create => vec![(Method::POST, format!("/{}", name))],
            Action::Update => vec![(Method::PATCH, format!("/{}/{}", name, id_path))],
            Action::Delete => vec![(Method::DELETE, format!("/{}/{}", name, id_path))],
            Action::SoftDelete => vec![(Method::DELETE, format!("/{}/{}/archive", name, id_path))],
            Action::Restore => vec![(Method::PATCH, format!("/{}/{}/restore", name, id_path))],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// `includes` minus `excludes`, in built-in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionSet {
    pub includes: Vec<Action>,
    pub excludes: Vec<Action>,
}

impl Default for ActionSet {
    fn default() -> Self {
        ActionSet {
            includes: Action::ALL.to_vec(),
            excludes: Vec::new(),
        }
    }
}

impl ActionSet {
    pub fn new(includes: Vec<Action>, excludes: Vec<Action>) -> Self {
        ActionSet { includes, excludes }
    }

    pub fn is_registered(&self, action: Action) -> bool {
        self.includes.contains(&action) && !self.excludes.contains(&action)
    }

    pub fn registered(&self) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|a| self.is_registered(*a))
            .collect()
    }
}
