//! Moves a [`KeeperState`] toward its assigned role, one legal edge at a time.
//!
//! The action of an edge runs before `current_role` changes; a crash in between
//! leaves the previous role on disk and the next round replays the action.

pub mod action;
pub mod table;

use log::{debug, info};

use crate::error::{KeeperError, StateError};
use crate::instance::{InstanceFacts, ManagedInstance};
use crate::monitor::NodeAddress;
use crate::state::KeeperState;

pub use action::TransitionAction;
pub use table::{Transition, TransitionTable, KEEPER_FSM};

/// Outcome of a single [`TransitionTable::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: KeeperState,
    pub applied: bool,
    pub transition: Option<Transition>,
}

/// Outcome of [`TransitionTable::reach_assigned`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    pub state: KeeperState,
    pub hops: usize,
}

impl Convergence {
    pub fn applied(&self) -> bool {
        self.hops > 0
    }
}

impl TransitionTable {
    /// Take the next edge from `state.current_role` toward
    /// `state.assigned_role`. When the action fails the error is returned
    /// and no new state is produced.
    pub fn step<I: ManagedInstance + ?Sized>(
        &self,
        instance: &mut I,
        state: &KeeperState,
        facts: &InstanceFacts,
        primary: Option<&NodeAddress>,
    ) -> Result<Step, KeeperError> {
        let transition = match self.next_transition(state.current_role, state.assigned_role)? {
            Some(transition) => *transition,
            None => {
                return Ok(Step {
                    state: state.clone(),
                    applied: false,
                    transition: None,
                })
            }
        };

        debug!(
            "Applying {} for {} -> {}",
            transition.action, transition.from, transition.to
        );
        transition.action.apply(instance, facts, primary)?;
        info!(
            "Transition from \"{}\" to \"{}\": {}",
            transition.from, transition.to, transition.comment
        );

        let mut next = state.clone();
        next.update_from_facts(facts);
        next.current_role = transition.to;
        Ok(Step {
            state: next,
            applied: true,
            transition: Some(transition),
        })
    }

    /// Step until `current_role == assigned_role`, handing every new state to
    /// `persist` before taking the next edge. The instance is observed again
    /// before each edge after the first.
    pub fn reach_assigned<I, P>(
        &self,
        instance: &mut I,
        state: &KeeperState,
        facts: &InstanceFacts,
        primary: Option<&NodeAddress>,
        mut persist: P,
    ) -> Result<Convergence, KeeperError>
    where
        I: ManagedInstance + ?Sized,
        P: FnMut(&KeeperState) -> Result<(), KeeperError>,
    {
        let from = state.current_role;
        let goal = state.assigned_role;
        let mut current = state.clone();
        let mut facts = facts.clone();
        let mut hops = 0;

        loop {
            let step = self.step(instance, &current, &facts, primary)?;
            if !step.applied {
                return Ok(Convergence {
                    state: current,
                    hops,
                });
            }
            persist(&step.state)?;
            current = step.state;
            hops += 1;

            if current.current_role != goal {
                if hops >= self.max_hops() {
                    return Err(StateError::NoConvergence {
                        from,
                        to: goal,
                        hops,
                    }
                    .into());
                }
                facts = instance.observe()?;
            }
        }
    }
}
