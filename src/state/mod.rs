//! The keeper's durable record of its own situation.

pub mod store;
pub mod text;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SerializationError;
use crate::instance::{InstanceFacts, Lsn};
use crate::monitor::AssignedState;
use crate::role::NodeRole;

pub use store::StateStore;

pub const NODE_ID_UNASSIGNED: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeeperState {
    pub node_id: i64,
    pub group_id: i32,
    /// Last role the keeper fully reached.
    pub current_role: NodeRole,
    /// Last role the monitor asked for.
    pub assigned_role: NodeRole,
    pub last_monitor_contact: Option<DateTime<Utc>>,
    pub last_known_position: Option<Lsn>,
}

impl Default for KeeperState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeeperState {
    pub fn new() -> Self {
        KeeperState {
            node_id: NODE_ID_UNASSIGNED,
            group_id: 0,
            current_role: NodeRole::Uninitialized,
            assigned_role: NodeRole::Uninitialized,
            last_monitor_contact: None,
            last_known_position: None,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.current_role == self.assigned_role
    }

    /// Record observed facts, keeping the previous position when none was
    /// observed.
    pub fn update_from_facts(&mut self, facts: &InstanceFacts) {
        if let Some(position) = facts.position {
            self.last_known_position = Some(position);
        }
    }

    pub fn apply_assignment(&mut self, assigned: &AssignedState, at: DateTime<Utc>) {
        self.node_id = assigned.node_id;
        self.group_id = assigned.group_id;
        self.assigned_role = assigned.role;
        self.last_monitor_contact = Some(at);
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        serde_json::to_string_pretty(self).map_err(|e| SerializationError::Encode {
            what: "keeper state",
            reason: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        serde_json::from_str(json).map_err(|e| SerializationError::Parse {
            what: "keeper state",
            reason: e.to_string(),
        })
    }
}
