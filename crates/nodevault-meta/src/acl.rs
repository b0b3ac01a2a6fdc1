//! Access-control record persisted with each node.
//!
//! The engine only stores and queries this data; deciding whether a caller
//! may act on a node is left to the API layer.

use serde::{Deserialize, Serialize};

/// Per-principal right flags used when granting or revoking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl Rights {
    pub const ALL: Rights = Rights {
        read: true,
        write: true,
        delete: true,
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Acl {
    pub owner: String,
    pub read: Vec<String>,
    pub write: Vec<String>,
    pub delete: Vec<String>,
}

impl Acl {
    /// Record owned by `principal` with every right granted to it alone.
    pub fn for_owner(principal: &str) -> Self {
        let mut acl = Acl::default();
        acl.set_owner(principal);
        acl.grant(principal, Rights::ALL);
        acl
    }

    pub fn set_owner(&mut self, principal: &str) {
        self.owner = principal.to_string();
    }

    /// Add `principal` to every list whose flag is set. Idempotent.
    pub fn grant(&mut self, principal: &str, rights: Rights) {
        if rights.read {
            push_unique(&mut self.read, principal);
        }
        if rights.write {
            push_unique(&mut self.write, principal);
        }
        if rights.delete {
            push_unique(&mut self.delete, principal);
        }
    }

    /// Remove `principal` from every list whose flag is set.
    pub fn revoke(&mut self, principal: &str, rights: Rights) {
        if rights.read {
            self.read.retain(|p| p != principal);
        }
        if rights.write {
            self.write.retain(|p| p != principal);
        }
        if rights.delete {
            self.delete.retain(|p| p != principal);
        }
    }

    pub fn can_read(&self, principal: &str) -> bool {
        self.read.iter().any(|p| p == principal)
    }

    pub fn can_write(&self, principal: &str) -> bool {
        self.write.iter().any(|p| p == principal)
    }

    pub fn can_delete(&self, principal: &str) -> bool {
        self.delete.iter().any(|p| p == principal)
    }

    /// No owner and no grants: the node is publicly accessible.
    pub fn is_public(&self) -> bool {
        self.owner.is_empty() && self.read.is_empty()
    }
}

fn push_unique(list: &mut Vec<String>, principal: &str) {
    if !list.iter().any(|p| p == principal) {
        list.push(principal.to_string());
    }
}
