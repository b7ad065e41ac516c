use std::fmt;

use crate::error::InstanceActionError;
use crate::instance::{InstanceFacts, ManagedInstance};
use crate::monitor::NodeAddress;

/// Side effect run on the instance when a transition edge is taken.
///
/// Every action is a sequence of idempotent primitives, so replaying an action
/// whose effect is already in place is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionAction {
    None,
    InitPrimary,
    DisableReplication,
    ResumeAsPrimary,
    PromoteStandby,
    StopPostgres,
    RewindOrInit,
    PrepareReplication,
    EnableSyncRep,
    DisableSyncRep,
    InitStandby,
    MaintainReplicationSlot,
    PreparePromotion,
    StopReplication,
    StartMaintenance,
    RestartStandby,
}

impl TransitionAction {
    pub fn name(&self) -> &'static str {
        match self {
            TransitionAction::None => "none",
            TransitionAction::InitPrimary => "init_primary",
            TransitionAction::DisableReplication => "disable_replication",
            TransitionAction::ResumeAsPrimary => "resume_as_primary",
            TransitionAction::PromoteStandby => "promote_standby",
            TransitionAction::StopPostgres => "stop_postgres",
            TransitionAction::RewindOrInit => "rewind_or_init",
            TransitionAction::PrepareReplication => "prepare_replication",
            TransitionAction::EnableSyncRep => "enable_sync_rep",
            TransitionAction::DisableSyncRep => "disable_sync_rep",
            TransitionAction::InitStandby => "init_standby",
            TransitionAction::MaintainReplicationSlot => "maintain_replication_slot",
            TransitionAction::PreparePromotion => "prepare_promotion",
            TransitionAction::StopReplication => "stop_replication",
            TransitionAction::StartMaintenance => "start_maintenance",
            TransitionAction::RestartStandby => "restart_standby",
        }
    }

    /// Whether the action needs the address of the current primary.
    pub fn needs_primary(&self) -> bool {
        matches!(
            self,
            TransitionAction::InitStandby | TransitionAction::RewindOrInit
        )
    }

    pub fn apply<I: ManagedInstance + ?Sized>(
        &self,
        instance: &mut I,
        facts: &InstanceFacts,
        primary: Option<&NodeAddress>,
    ) -> Result<(), InstanceActionError> {
        let upstream = || {
            primary.ok_or(InstanceActionError::MissingPrimary {
                action: self.name(),
            })
        };
        match self {
            TransitionAction::None => Ok(()),
            TransitionAction::InitPrimary => {
                if facts.is_in_recovery {
                    return Err(InstanceActionError::Failed {
                        action: self.name(),
                        reason: "the instance is a standby, refusing to initialize it as a primary"
                            .to_string(),
                    });
                }
                instance.ensure_initialized()?;
                instance.ensure_started()
            }
            TransitionAction::DisableReplication => {
                instance.set_synchronous_replication(false)?;
                instance.set_replication_allowed(false)?;
                instance.ensure_started()
            }
            TransitionAction::ResumeAsPrimary => {
                instance.set_synchronous_replication(false)?;
                instance.ensure_started()
            }
            TransitionAction::PromoteStandby => {
                instance.ensure_promoted()?;
                instance.set_synchronous_replication(false)
            }
            TransitionAction::StopPostgres => instance.ensure_stopped(),
            TransitionAction::RewindOrInit => {
                let primary = upstream()?;
                instance.ensure_stopped()?;
                instance.ensure_standby_of(primary)?;
                instance.ensure_started()
            }
            TransitionAction::PrepareReplication => instance.set_replication_allowed(true),
            TransitionAction::EnableSyncRep => instance.set_synchronous_replication(true),
            TransitionAction::DisableSyncRep => instance.set_synchronous_replication(false),
            TransitionAction::InitStandby => {
                let primary = upstream()?;
                instance.ensure_standby_of(primary)?;
                instance.ensure_started()
            }
            TransitionAction::MaintainReplicationSlot => instance.set_replication_allowed(true),
            TransitionAction::PreparePromotion => instance.ensure_started(),
            TransitionAction::StopReplication => instance.ensure_detached(),
            TransitionAction::StartMaintenance => instance.set_maintenance(true),
            TransitionAction::RestartStandby => {
                instance.set_maintenance(false)?;
                instance.ensure_started()
            }
        }
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
