use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write;

use lazy_static::lazy_static;

use crate::error::StateError;
use crate::fsm::action::TransitionAction;
use crate::role::NodeRole;

/// One legal edge between two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: NodeRole,
    pub to: NodeRole,
    pub comment: &'static str,
    pub action: TransitionAction,
}

const fn edge(
    from: NodeRole,
    to: NodeRole,
    comment: &'static str,
    action: TransitionAction,
) -> Transition {
    Transition {
        from,
        to,
        comment,
        action,
    }
}

use NodeRole::*;

/// The keeper's transition edges. Order matters: it breaks ties between
/// routes of equal length.
pub static KEEPER_FSM: &[Transition] = &[
    edge(Uninitialized, Initializing, "Registered, waiting for an assignment", TransitionAction::None),
    edge(Uninitialized, Single, "Start as a single node", TransitionAction::InitPrimary),
    edge(Initializing, Single, "Start as a single node", TransitionAction::InitPrimary),
    edge(Initializing, WaitStandby, "Wait until the primary accepts us", TransitionAction::None),
    edge(Primary, Single, "The standby is gone, stop replicating", TransitionAction::DisableReplication),
    edge(WaitPrimary, Single, "The standby is gone, stop replicating", TransitionAction::DisableReplication),
    edge(Demoted, Single, "Back to being the only node", TransitionAction::ResumeAsPrimary),
    edge(DemoteTimeout, Single, "Back to being the only node", TransitionAction::ResumeAsPrimary),
    edge(Draining, Single, "Back to being the only node", TransitionAction::ResumeAsPrimary),
    edge(Secondary, Single, "The primary is gone, promote", TransitionAction::PromoteStandby),
    edge(CatchingUp, Single, "The primary is gone, promote", TransitionAction::PromoteStandby),
    edge(PreparePromotion, Single, "The primary is gone, promote", TransitionAction::PromoteStandby),
    edge(StopReplication, Single, "The primary is gone, promote", TransitionAction::PromoteStandby),
    edge(Primary, Draining, "A failover started, refuse new writes", TransitionAction::StopPostgres),
    edge(Draining, Demoted, "Demoted after draining", TransitionAction::StopPostgres),
    edge(Primary, Demoted, "Demoted without draining", TransitionAction::StopPostgres),
    edge(Primary, DemoteTimeout, "Demotion forced by timeout", TransitionAction::StopPostgres),
    edge(Draining, DemoteTimeout, "Demotion forced by timeout", TransitionAction::StopPostgres),
    edge(DemoteTimeout, Demoted, "Demotion complete", TransitionAction::StopPostgres),
    edge(Demoted, CatchingUp, "Follow the new primary", TransitionAction::RewindOrInit),
    edge(Single, WaitPrimary, "A standby joined, allow replication", TransitionAction::PrepareReplication),
    edge(WaitPrimary, Primary, "The standby caught up, replicate synchronously", TransitionAction::EnableSyncRep),
    edge(Primary, WaitPrimary, "The standby fell behind, replicate asynchronously", TransitionAction::DisableSyncRep),
    edge(WaitStandby, CatchingUp, "Clone the primary and start streaming", TransitionAction::InitStandby),
    edge(CatchingUp, Secondary, "Caught up with the primary", TransitionAction::MaintainReplicationSlot),
    edge(Secondary, CatchingUp, "Fell behind the primary", TransitionAction::None),
    edge(Secondary, PreparePromotion, "Selected for promotion", TransitionAction::PreparePromotion),
    edge(CatchingUp, PreparePromotion, "Selected for promotion", TransitionAction::PreparePromotion),
    edge(PreparePromotion, StopReplication, "Detach from the failed primary", TransitionAction::StopReplication),
    edge(StopReplication, WaitPrimary, "Promoted, waiting for a standby", TransitionAction::PromoteStandby),
    edge(PreparePromotion, WaitPrimary, "Promoted, waiting for a standby", TransitionAction::PromoteStandby),
    edge(Secondary, Maintenance, "Operator maintenance", TransitionAction::StartMaintenance),
    edge(CatchingUp, Maintenance, "Operator maintenance", TransitionAction::StartMaintenance),
    edge(Maintenance, CatchingUp, "Back from maintenance", TransitionAction::RestartStandby),
];

lazy_static! {
    static ref KEEPER_TABLE: TransitionTable = TransitionTable::from_edges(KEEPER_FSM);
}

/// Transition edges plus, for every `(current, goal)` pair that has a path,
/// the index of the edge to take next.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    edges: Vec<Transition>,
    routes: HashMap<(NodeRole, NodeRole), usize>,
}

impl TransitionTable {
    pub fn keeper() -> &'static TransitionTable {
        &KEEPER_TABLE
    }

    /// Routes follow the shortest path, the first edge in table order winning
    /// between paths of the same length.
    pub fn from_edges(edges: &[Transition]) -> Self {
        let edges = edges.to_vec();
        let mut routes = HashMap::new();
        let mut sources: Vec<NodeRole> = Vec::new();
        for transition in &edges {
            if !sources.contains(&transition.from) {
                sources.push(transition.from);
            }
        }
        for from in sources {
            let mut first_edge: HashMap<NodeRole, usize> = HashMap::new();
            let mut queue = VecDeque::from([from]);
            while let Some(role) = queue.pop_front() {
                for (index, transition) in edges.iter().enumerate() {
                    if transition.from != role
                        || transition.to == from
                        || first_edge.contains_key(&transition.to)
                    {
                        continue;
                    }
                    let via = if role == from { index } else { first_edge[&role] };
                    first_edge.insert(transition.to, via);
                    queue.push_back(transition.to);
                }
            }
            for (goal, index) in first_edge {
                routes.insert((from, goal), index);
            }
        }
        TransitionTable { edges, routes }
    }

    /// Replace the route from `from` toward `goal` with the edge `from -> via`.
    pub fn with_route(
        mut self,
        from: NodeRole,
        goal: NodeRole,
        via: NodeRole,
    ) -> Result<Self, StateError> {
        let index = self
            .edges
            .iter()
            .position(|t| t.from == from && t.to == via)
            .ok_or(StateError::InvalidRoute { from, goal, via })?;
        self.routes.insert((from, goal), index);
        Ok(self)
    }

    pub fn edges(&self) -> &[Transition] {
        &self.edges
    }

    /// Upper bound on the hops of any route.
    pub fn max_hops(&self) -> usize {
        NodeRole::CATALOG.len()
    }

    /// The edge to take from `current` toward `assigned`, `None` once there.
    pub fn next_transition(
        &self,
        current: NodeRole,
        assigned: NodeRole,
    ) -> Result<Option<&Transition>, StateError> {
        if current == assigned {
            return Ok(None);
        }
        self.routes
            .get(&(current, assigned))
            .map(|&index| Some(&self.edges[index]))
            .ok_or(StateError::NoPath {
                from: current,
                to: assigned,
            })
    }

    /// Every edge taken on the way from `from` to `to`.
    pub fn path(&self, from: NodeRole, to: NodeRole) -> Result<Vec<&Transition>, StateError> {
        let mut path = Vec::new();
        let mut current = from;
        while let Some(transition) = self.next_transition(current, to)? {
            if path.len() == self.max_hops() {
                return Err(StateError::NoConvergence {
                    from,
                    to,
                    hops: path.len(),
                });
            }
            path.push(transition);
            current = transition.to;
        }
        Ok(path)
    }

    /// `role` followed by every role reachable from it, nearest first.
    pub fn reachable_from(&self, role: NodeRole) -> Vec<NodeRole> {
        let mut seen = HashSet::from([role]);
        let mut order = vec![role];
        let mut queue = VecDeque::from([role]);
        while let Some(current) = queue.pop_front() {
            for transition in self.edges.iter().filter(|t| t.from == current) {
                if seen.insert(transition.to) {
                    order.push(transition.to);
                    queue.push_back(transition.to);
                }
            }
        }
        order
    }

    pub fn to_graphviz(&self) -> String {
        let mut out = String::from("digraph keeper_fsm {\n    node [shape = doublecircle]; single;\n    node [shape = circle];\n\n");
        for transition in &self.edges {
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\" [label = \"{}\"];",
                transition.from, transition.to, transition.action
            );
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeper_table_has_no_duplicate_edges() {
        let table = TransitionTable::keeper();
        let mut pairs: Vec<(NodeRole, NodeRole)> =
            table.edges().iter().map(|t| (t.from, t.to)).collect();
        let total = pairs.len();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), total);
        assert!(table.edges().iter().all(|t| t.from != t.to));
    }

    #[test]
    fn test_shortest_route_is_taken() {
        let table = TransitionTable::keeper();
        let next = table
            .next_transition(NodeRole::Uninitialized, NodeRole::Single)
            .unwrap()
            .unwrap();
        assert_eq!(next.to, NodeRole::Single);
        assert_eq!(next.action, TransitionAction::InitPrimary);

        let path: Vec<NodeRole> = table
            .path(NodeRole::Single, NodeRole::Primary)
            .unwrap()
            .iter()
            .map(|t| t.to)
            .collect();
        assert_eq!(path, vec![NodeRole::WaitPrimary, NodeRole::Primary]);
    }

    #[test]
    fn test_ties_follow_table_order() {
        // secondary reaches wait_primary in two hops through either single or
        // prepare_promotion; secondary -> single is listed first.
        let table = TransitionTable::keeper();
        let next = table
            .next_transition(NodeRole::Secondary, NodeRole::WaitPrimary)
            .unwrap()
            .unwrap();
        assert_eq!(next.to, NodeRole::Single);

        let next = table
            .next_transition(NodeRole::Primary, NodeRole::CatchingUp)
            .unwrap()
            .unwrap();
        assert_eq!(next.to, NodeRole::Demoted);
    }

    #[test]
    fn test_with_route_must_follow_an_edge() {
        let err = TransitionTable::from_edges(KEEPER_FSM)
            .with_route(NodeRole::Single, NodeRole::Primary, NodeRole::Secondary)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidRoute { .. }));
    }

    #[test]
    fn test_graphviz_lists_every_edge() {
        let table = TransitionTable::keeper();
        let dot = table.to_graphviz();
        assert!(dot.starts_with("digraph keeper_fsm {"));
        assert!(dot.contains("\"wait_primary\" -> \"primary\" [label = \"enable_sync_rep\"];"));
        assert_eq!(dot.matches(" -> ").count(), table.edges().len());
    }
}
