//! Tenant projects

use serde::{Deserialize, Serialize};

/// A tenant project whose account usage is polled
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    /// Project ID, also the Swift account suffix (`AUTH_<id>`)
    pub id: String,
    /// Human readable project name
    #[serde(default)]
    pub name: String,
}

impl Project {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
