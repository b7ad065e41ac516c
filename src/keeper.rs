use std::fmt;

use chrono::Utc;
use log::{error, info, warn};

use crate::config::KeeperConfig;
use crate::error::{ConfigError, InstanceActionError, KeeperError, StateError};
use crate::fsm::{Convergence, TransitionTable};
use crate::instance::{InstanceFacts, ManagedInstance};
use crate::monitor::{
    AssignedState, ExtensionVersion, Monitor, MonitorTransport, NodeAddress, NodeReport, ANY_ID,
    EXTENSION_VERSION,
};
use crate::role::NodeRole;
use crate::state::{text, KeeperState, StateStore};

/// Summary of one reconciliation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub before: NodeRole,
    pub after: NodeRole,
    pub hops: usize,
    /// False when the final report of the new role did not reach the monitor.
    pub reported: bool,
    pub state: KeeperState,
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ➜ {}", self.before, self.after)
    }
}

/// The reconciliation driver: one keeper, one instance, one state file.
pub struct Keeper<I, T> {
    config: KeeperConfig,
    store: StateStore,
    instance: I,
    monitor: Option<Monitor<T>>,
    table: TransitionTable,
}

impl<I, T> Keeper<I, T>
where
    I: ManagedInstance,
    T: MonitorTransport,
{
    pub fn new(
        config: KeeperConfig,
        instance: I,
        monitor: Option<Monitor<T>>,
    ) -> Result<Self, KeeperError> {
        let store = StateStore::new(config.state_path()?);
        Ok(Keeper {
            config,
            store,
            instance,
            monitor,
            table: TransitionTable::keeper().clone(),
        })
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn instance(&self) -> &I {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut I {
        &mut self.instance
    }

    pub fn monitor(&self) -> Result<&Monitor<T>, ConfigError> {
        self.monitor.as_ref().ok_or(ConfigError::MonitorDisabled)
    }

    /// Create the state file as `no_state/no_state` and return its text form.
    pub fn init_state(&mut self) -> Result<String, KeeperError> {
        if self.store.exists() {
            return Err(StateError::AlreadyExists(self.store.path().to_path_buf()).into());
        }
        let facts = self.instance.observe()?;
        let mut state = KeeperState::new();
        state.update_from_facts(&facts);
        self.store.create(&state)?;
        info!("Initialized state file {}", self.store.path().display());
        Ok(text::render(&state))
    }

    pub fn refresh_state(&mut self) -> Result<KeeperState, KeeperError> {
        let mut state = self.store.read()?;
        let facts = self.instance.observe()?;
        state.update_from_facts(&facts);
        self.store.write(&state)?;
        Ok(state)
    }

    pub fn reachable_roles(&self) -> Result<Vec<NodeRole>, KeeperError> {
        let state = self.store.read()?;
        Ok(self.table.reachable_from(state.current_role))
    }

    /// Drive the node to `goal` without asking the monitor.
    ///
    /// Nothing is written when `goal` cannot be reached from the current role.
    /// Otherwise every hop is persisted with `goal` as the assigned role, so a
    /// later round carries on toward it.
    pub fn assign(
        &mut self,
        goal: NodeRole,
        peer: Option<NodeAddress>,
    ) -> Result<Convergence, KeeperError> {
        if goal.is_wildcard() {
            return Err(KeeperError::BadArgs(format!(
                "\"{}\" cannot be assigned",
                goal
            )));
        }
        let mut state = self.store.read()?;
        self.table.path(state.current_role, goal)?;
        state.assigned_role = goal;

        let facts = self.instance.observe()?;
        let store = &self.store;
        let convergence = self.table.reach_assigned(
            &mut self.instance,
            &state,
            &facts,
            peer.as_ref(),
            |hop| store.write(hop),
        )?;
        if convergence.hops == 0 {
            self.store.write(&convergence.state)?;
        }
        Ok(convergence)
    }

    /// Drive the persisted state to its persisted assigned role.
    pub fn reach_assigned(
        &mut self,
        peer: Option<NodeAddress>,
    ) -> Result<Convergence, KeeperError> {
        let state = self.store.read()?;
        let facts = self.instance.observe()?;
        let store = &self.store;
        self.table.reach_assigned(
            &mut self.instance,
            &state,
            &facts,
            peer.as_ref(),
            |hop| store.write(hop),
        )
    }

    fn check_register_preconditions(
        &mut self,
        role: NodeRole,
    ) -> Result<Option<InstanceFacts>, KeeperError> {
        let precondition = |reason: &str| InstanceActionError::Precondition {
            role,
            reason: reason.to_string(),
        };
        let needs_running = matches!(
            role,
            NodeRole::Single | NodeRole::WaitPrimary | NodeRole::WaitStandby
        );
        if !needs_running {
            return Ok(None);
        }
        let facts = self.instance.observe()?;
        if !facts.exists {
            return Err(precondition("no local instance exists").into());
        }
        if !facts.is_running {
            return Err(precondition("the local instance is not running").into());
        }
        if role == NodeRole::WaitPrimary && facts.has_replica() {
            return Err(precondition("the local instance already has a replica attached").into());
        }
        Ok(Some(facts))
    }

    /// Register with the monitor and create the state file from its answer.
    pub async fn register(&mut self, role: NodeRole) -> Result<AssignedState, KeeperError> {
        if matches!(role, NodeRole::Uninitialized | NodeRole::Any) {
            return Err(KeeperError::BadArgs(format!(
                "cannot register as \"{}\"",
                role
            )));
        }
        if self.store.exists() {
            return Err(StateError::AlreadyExists(self.store.path().to_path_buf()).into());
        }
        self.monitor()?;
        let facts = self.check_register_preconditions(role)?;

        let monitor = self.monitor()?;
        monitor.ensure_extension_version(EXTENSION_VERSION).await?;
        let assigned = monitor
            .register(
                &self.config.formation,
                self.config.group_id,
                ANY_ID,
                &self.config.node_address(),
                role,
            )
            .await?;

        let mut state = KeeperState::new();
        state.apply_assignment(&assigned, Utc::now());
        state.current_role = match role {
            NodeRole::Initializing
            | NodeRole::Single
            | NodeRole::WaitPrimary
            | NodeRole::WaitStandby => role,
            _ => NodeRole::Uninitialized,
        };
        if let Some(facts) = facts.as_ref() {
            state.update_from_facts(facts);
        }
        self.store.create(&state)?;
        Ok(assigned)
    }

    fn best_effort_facts(&mut self) -> InstanceFacts {
        match self.instance.observe() {
            Ok(facts) => facts,
            Err(e) => {
                warn!("{}; reporting the instance as not running", e);
                InstanceFacts::unknown()
            }
        }
    }

    fn node_report(&self, state: &KeeperState, facts: &InstanceFacts) -> NodeReport {
        NodeReport {
            formation: self.config.formation.clone(),
            address: self.config.node_address(),
            node_id: state.node_id,
            group_id: state.group_id,
            current_role: state.current_role,
            is_running: facts.is_running,
            position: facts.reported_position(),
            sync_state: facts.sync_state.clone(),
        }
    }

    /// Persist a state the monitor has already seen. Failing here does not
    /// fail the round.
    fn persist_reported(&self, state: &KeeperState) {
        if let Err(e) = self.store.write(state) {
            error!(
                "Failed to record assigned role \"{}\" in {}: {}",
                state.assigned_role,
                self.store.path().display(),
                e
            );
            error!("The monitor already has this report; the next round fetches the assigned role again");
        }
    }

    /// Heartbeat: report the node, record the assigned role.
    pub async fn node_active(&mut self) -> Result<AssignedState, KeeperError> {
        let mut state = self.store.read()?;
        let facts = self.best_effort_facts();
        let report = self.node_report(&state, &facts);
        let assigned = self.monitor()?.report_active(&report).await?;

        state.apply_assignment(&assigned, Utc::now());
        state.update_from_facts(&facts);
        self.persist_reported(&state);
        Ok(assigned)
    }

    /// One full reconciliation round against the monitor.
    pub async fn step(&mut self) -> Result<RoundReport, KeeperError> {
        let mut state = self.store.read()?;
        let before = state.current_role;

        let facts = self.best_effort_facts();
        let report = self.node_report(&state, &facts);
        let assigned = self.monitor()?.report_active(&report).await?;
        state.apply_assignment(&assigned, Utc::now());
        state.update_from_facts(&facts);
        self.persist_reported(&state);

        let path = self.table.path(state.current_role, state.assigned_role)?;
        let primary = if path.iter().any(|t| t.action.needs_primary()) {
            Some(
                self.monitor()?
                    .get_primary(&self.config.formation, state.group_id)
                    .await?,
            )
        } else {
            None
        };

        let convergence = if state.is_converged() {
            Convergence {
                state: state.clone(),
                hops: 0,
            }
        } else {
            let facts = self.instance.observe()?;
            let store = &self.store;
            self.table.reach_assigned(
                &mut self.instance,
                &state,
                &facts,
                primary.as_ref(),
                |hop| store.write(hop),
            )?
        };
        let mut state = convergence.state;

        let mut reported = true;
        if convergence.hops > 0 {
            let facts = self.best_effort_facts();
            let report = self.node_report(&state, &facts);
            match self.monitor()?.report_active(&report).await {
                Ok(assigned) => {
                    state.apply_assignment(&assigned, Utc::now());
                    state.update_from_facts(&facts);
                    self.persist_reported(&state);
                }
                Err(e) => {
                    error!(
                        "Failed to report role \"{}\" to the monitor: {}",
                        state.current_role, e
                    );
                    reported = false;
                }
            }
        }

        Ok(RoundReport {
            before,
            after: state.current_role,
            hops: convergence.hops,
            reported,
            state,
        })
    }

    pub async fn primary(&self) -> Result<NodeAddress, KeeperError> {
        let group_id = match self.store.read() {
            Ok(state) => state.group_id,
            Err(KeeperError::State(StateError::Missing(_))) => self.config.group_id,
            Err(e) => return Err(e),
        };
        Ok(self
            .monitor()?
            .get_primary(&self.config.formation, group_id)
            .await?)
    }

    pub async fn others(&self, role_filter: NodeRole) -> Result<Vec<NodeAddress>, KeeperError> {
        Ok(self
            .monitor()?
            .get_others(
                &self.config.formation,
                &self.config.node_address(),
                role_filter,
            )
            .await?)
    }

    pub async fn coordinator(&self) -> Result<Option<NodeAddress>, KeeperError> {
        Ok(self
            .monitor()?
            .get_coordinator(&self.config.formation)
            .await?)
    }

    pub async fn extension_version(&self) -> Result<ExtensionVersion, KeeperError> {
        Ok(self
            .monitor()?
            .ensure_extension_version(EXTENSION_VERSION)
            .await?)
    }

    /// `formation/groupId nodename:port nodeId:groupId role`
    pub fn status_line(&self, assigned: &AssignedState) -> String {
        format!(
            "{}/{} {}:{} {}:{} {}",
            self.config.formation,
            self.config.group_id,
            self.config.nodename,
            self.config.port,
            assigned.node_id,
            assigned.group_id,
            assigned.role
        )
    }
}
