//! Registry collaborator types.
//!
//! The registry itself belongs to the host framework; this crate only
//! consumes its snapshots. A snapshot is the current service → nodes
//! relation, each node carrying a stable id and a `host:port` address.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryNode {
    pub id: String,
    /// `host:port` as published by the registry.
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub nodes: Vec<RegistryNode>,
}

impl Service {
    pub fn new(name: impl Into<String>, nodes: Vec<RegistryNode>) -> Self {
        Service {
            name: name.into(),
            nodes,
        }
    }
}

impl RegistryNode {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        RegistryNode {
            id: id.into(),
            address: address.into(),
        }
    }
}
