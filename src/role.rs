use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KeeperError;

/// A node's position in the replication group lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRole {
    #[serde(rename = "no_state")]
    Uninitialized,
    #[serde(rename = "init")]
    Initializing,
    #[serde(rename = "single")]
    Single,
    #[serde(rename = "wait_primary")]
    WaitPrimary,
    #[serde(rename = "primary")]
    Primary,
    #[serde(rename = "draining")]
    Draining,
    #[serde(rename = "demote_timeout")]
    DemoteTimeout,
    #[serde(rename = "demoted")]
    Demoted,
    #[serde(rename = "wait_standby")]
    WaitStandby,
    #[serde(rename = "catchingup")]
    CatchingUp,
    #[serde(rename = "secondary")]
    Secondary,
    #[serde(rename = "prepare_promotion")]
    PreparePromotion,
    #[serde(rename = "stop_replication")]
    StopReplication,
    #[serde(rename = "maintenance")]
    Maintenance,
    /// Matches every role in monitor queries. Never assigned.
    #[serde(rename = "#any state#")]
    Any,
}

impl NodeRole {
    /// Every concrete role, excluding the `Any` wildcard.
    pub const CATALOG: [NodeRole; 14] = [
        NodeRole::Uninitialized,
        NodeRole::Initializing,
        NodeRole::Single,
        NodeRole::WaitPrimary,
        NodeRole::Primary,
        NodeRole::Draining,
        NodeRole::DemoteTimeout,
        NodeRole::Demoted,
        NodeRole::WaitStandby,
        NodeRole::CatchingUp,
        NodeRole::Secondary,
        NodeRole::PreparePromotion,
        NodeRole::StopReplication,
        NodeRole::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Uninitialized => "no_state",
            NodeRole::Initializing => "init",
            NodeRole::Single => "single",
            NodeRole::WaitPrimary => "wait_primary",
            NodeRole::Primary => "primary",
            NodeRole::Draining => "draining",
            NodeRole::DemoteTimeout => "demote_timeout",
            NodeRole::Demoted => "demoted",
            NodeRole::WaitStandby => "wait_standby",
            NodeRole::CatchingUp => "catchingup",
            NodeRole::Secondary => "secondary",
            NodeRole::PreparePromotion => "prepare_promotion",
            NodeRole::StopReplication => "stop_replication",
            NodeRole::Maintenance => "maintenance",
            NodeRole::Any => "#any state#",
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, NodeRole::Any)
    }

    /// True when `other` is matched by `self` used as a query filter.
    pub fn matches(&self, other: NodeRole) -> bool {
        self.is_wildcard() || *self == other
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if wanted == "any" {
            return Ok(NodeRole::Any);
        }
        NodeRole::CATALOG
            .iter()
            .chain(std::iter::once(&NodeRole::Any))
            .find(|role| role.as_str() == wanted)
            .copied()
            .ok_or_else(|| KeeperError::BadArgs(format!("unknown node role \"{}\"", s)))
    }
}
