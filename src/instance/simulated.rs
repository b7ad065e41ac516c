use std::collections::HashSet;

use crate::error::InstanceActionError;
use crate::instance::{InstanceFacts, Lsn, ManagedInstance};
use crate::monitor::NodeAddress;

/// Observable condition of a [`SimulatedInstance`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedState {
    pub initialized: bool,
    pub running: bool,
    pub in_recovery: bool,
    pub upstream: Option<NodeAddress>,
    pub replication_allowed: bool,
    pub synchronous: bool,
    pub maintenance: bool,
    pub replica_attached: bool,
    pub position: Lsn,
}

/// An in-memory instance with deterministic behaviour and injectable failures.
#[derive(Debug, Clone, Default)]
pub struct SimulatedInstance {
    state: SimulatedState,
    failing: HashSet<&'static str>,
    calls: Vec<&'static str>,
}

impl SimulatedInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// An instance that already holds data and accepts writes.
    pub fn running_primary() -> Self {
        let mut instance = Self::new();
        instance.state.initialized = true;
        instance.state.running = true;
        instance.state.position = Lsn(0x0300_0060);
        instance
    }

    /// A running standby streaming from `primary`.
    pub fn running_standby(primary: NodeAddress) -> Self {
        let mut instance = Self::running_primary();
        instance.state.in_recovery = true;
        instance.state.upstream = Some(primary);
        instance
    }

    pub fn state(&self) -> &SimulatedState {
        &self.state
    }

    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    /// Make every call to `primitive` fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_on(&mut self, primitive: &'static str) {
        self.failing.insert(primitive);
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    pub fn attach_replica(&mut self) {
        self.state.replica_attached = true;
    }

    pub fn advance(&mut self, bytes: u64) {
        self.state.position = Lsn(self.state.position.0.saturating_add(bytes));
    }

    fn record(&mut self, primitive: &'static str) -> Result<(), InstanceActionError> {
        self.calls.push(primitive);
        if self.failing.contains(primitive) {
            return Err(InstanceActionError::Failed {
                action: primitive,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl ManagedInstance for SimulatedInstance {
    fn observe(&mut self) -> Result<InstanceFacts, InstanceActionError> {
        if self.failing.contains("observe") {
            return Err(InstanceActionError::Observe("injected failure".to_string()));
        }
        let sync_state = match (self.state.replica_attached, self.state.synchronous) {
            (false, _) => String::new(),
            (true, true) => "sync".to_string(),
            (true, false) => "async".to_string(),
        };
        Ok(InstanceFacts {
            exists: self.state.initialized,
            is_running: self.state.running,
            is_in_recovery: self.state.in_recovery,
            position: self.state.initialized.then_some(self.state.position),
            sync_state,
        })
    }

    fn ensure_initialized(&mut self) -> Result<(), InstanceActionError> {
        self.record("ensure_initialized")?;
        if !self.state.initialized {
            self.state.initialized = true;
            self.state.position = Lsn(0x0100_0028);
        }
        Ok(())
    }

    fn ensure_started(&mut self) -> Result<(), InstanceActionError> {
        self.record("ensure_started")?;
        if !self.state.initialized {
            return Err(InstanceActionError::Failed {
                action: "ensure_started",
                reason: "the instance has no data directory".to_string(),
            });
        }
        self.state.running = true;
        Ok(())
    }

    fn ensure_stopped(&mut self) -> Result<(), InstanceActionError> {
        self.record("ensure_stopped")?;
        self.state.running = false;
        self.state.replica_attached = false;
        Ok(())
    }

    fn ensure_standby_of(&mut self, primary: &NodeAddress) -> Result<(), InstanceActionError> {
        self.record("ensure_standby_of")?;
        self.state.initialized = true;
        self.state.in_recovery = true;
        self.state.upstream = Some(primary.clone());
        Ok(())
    }

    fn ensure_detached(&mut self) -> Result<(), InstanceActionError> {
        self.record("ensure_detached")?;
        self.state.upstream = None;
        Ok(())
    }

    fn ensure_promoted(&mut self) -> Result<(), InstanceActionError> {
        self.record("ensure_promoted")?;
        if !self.state.initialized {
            return Err(InstanceActionError::Failed {
                action: "ensure_promoted",
                reason: "the instance has no data directory".to_string(),
            });
        }
        self.state.in_recovery = false;
        self.state.upstream = None;
        self.state.running = true;
        Ok(())
    }

    fn set_replication_allowed(&mut self, allowed: bool) -> Result<(), InstanceActionError> {
        self.record("set_replication_allowed")?;
        self.state.replication_allowed = allowed;
        if !allowed {
            self.state.replica_attached = false;
        }
        Ok(())
    }

    fn set_synchronous_replication(&mut self, enabled: bool) -> Result<(), InstanceActionError> {
        self.record("set_synchronous_replication")?;
        self.state.synchronous = enabled;
        Ok(())
    }

    fn set_maintenance(&mut self, enabled: bool) -> Result<(), InstanceActionError> {
        self.record("set_maintenance")?;
        self.state.maintenance = enabled;
        Ok(())
    }
}
