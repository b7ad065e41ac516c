//! The boundary between the keeper and the database instance it manages.
//!
//! Transition actions are composed from the primitives of [`ManagedInstance`].
//! Every primitive is an `ensure_*`/`set_*` operation: calling it again once its
//! effect is in place must succeed without repeating the effect. The keeper
//! relies on this to replay an action after a crash that happened before the
//! new role was persisted.

pub mod hooks;
#[cfg(any(test, feature = "testing"))]
pub mod simulated;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{InstanceActionError, SerializationError};
use crate::monitor::NodeAddress;

/// A write-ahead log position, rendered the PostgreSQL way (`16/B374D848`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SerializationError::Parse {
            what: "lsn",
            reason: format!("\"{}\" is not of the form X/Y", s),
        };
        let (high, low) = s.trim().split_once('/').ok_or_else(invalid)?;
        let high = u32::from_str_radix(high, 16).map_err(|_| invalid())?;
        let low = u32::from_str_radix(low, 16).map_err(|_| invalid())?;
        Ok(Lsn(((high as u64) << 32) | low as u64))
    }
}

impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// What the keeper can observe about its instance right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceFacts {
    pub exists: bool,
    pub is_running: bool,
    pub is_in_recovery: bool,
    pub position: Option<Lsn>,
    /// Replication state of the attached standby, empty when none is attached.
    pub sync_state: String,
}

impl InstanceFacts {
    /// Facts to report when the instance could not be observed.
    pub fn unknown() -> Self {
        InstanceFacts::default()
    }

    pub fn reported_position(&self) -> Lsn {
        self.position.unwrap_or(Lsn::INVALID)
    }

    pub fn has_replica(&self) -> bool {
        !self.sync_state.is_empty()
    }
}

pub trait ManagedInstance {
    fn observe(&mut self) -> Result<InstanceFacts, InstanceActionError>;

    /// Create the instance's local storage unless it already exists.
    fn ensure_initialized(&mut self) -> Result<(), InstanceActionError>;
    fn ensure_started(&mut self) -> Result<(), InstanceActionError>;
    fn ensure_stopped(&mut self) -> Result<(), InstanceActionError>;
    /// Make the instance a standby streaming from `primary`, cloning or
    /// rewinding its storage as needed.
    fn ensure_standby_of(&mut self, primary: &NodeAddress) -> Result<(), InstanceActionError>;
    /// Stop streaming from the upstream node while staying read-only.
    fn ensure_detached(&mut self) -> Result<(), InstanceActionError>;
    /// Leave recovery and accept writes.
    fn ensure_promoted(&mut self) -> Result<(), InstanceActionError>;
    fn set_replication_allowed(&mut self, allowed: bool) -> Result<(), InstanceActionError>;
    fn set_synchronous_replication(&mut self, enabled: bool) -> Result<(), InstanceActionError>;
    fn set_maintenance(&mut self, enabled: bool) -> Result<(), InstanceActionError>;
}
