//! Protobuf messages exchanged with the monitor service.
//!
//! Roles travel as their wire names (`"wait_primary"`, `"#any state#"`), WAL
//! positions in the `X/Y` text form.

use crate::error::MonitorError;
use crate::instance::Lsn;
use crate::monitor::{AssignedState, ExtensionVersion, NodeAddress, NodeRegistration, NodeReport};
use crate::role::NodeRole;

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireNodeAddress {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterNodeRequest {
    #[prost(string, tag = "1")]
    pub formation: String,
    #[prost(message, optional, tag = "2")]
    pub node: Option<WireNodeAddress>,
    #[prost(int64, tag = "3")]
    pub node_id: i64,
    #[prost(int32, tag = "4")]
    pub group_id: i32,
    #[prost(string, tag = "5")]
    pub initial_role: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeActiveRequest {
    #[prost(string, tag = "1")]
    pub formation: String,
    #[prost(message, optional, tag = "2")]
    pub node: Option<WireNodeAddress>,
    #[prost(int64, tag = "3")]
    pub node_id: i64,
    #[prost(int32, tag = "4")]
    pub group_id: i32,
    #[prost(string, tag = "5")]
    pub current_role: String,
    #[prost(bool, tag = "6")]
    pub is_running: bool,
    #[prost(string, tag = "7")]
    pub position: String,
    #[prost(string, tag = "8")]
    pub sync_state: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetPrimaryRequest {
    #[prost(string, tag = "1")]
    pub formation: String,
    #[prost(int32, tag = "2")]
    pub group_id: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetOtherNodesRequest {
    #[prost(string, tag = "1")]
    pub formation: String,
    #[prost(message, optional, tag = "2")]
    pub node: Option<WireNodeAddress>,
    #[prost(string, tag = "3")]
    pub role_filter: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetCoordinatorRequest {
    #[prost(string, tag = "1")]
    pub formation: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExtensionVersionRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateExtensionRequest {
    #[prost(string, tag = "1")]
    pub version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AssignedStateReply {
    #[prost(int64, tag = "1")]
    pub node_id: i64,
    #[prost(int32, tag = "2")]
    pub group_id: i32,
    #[prost(string, tag = "3")]
    pub role: String,
}

/// `node` is absent when the monitor has no such node.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeAddressReply {
    #[prost(message, optional, tag = "1")]
    pub node: Option<WireNodeAddress>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeListReply {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<WireNodeAddress>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExtensionVersionReply {
    #[prost(string, tag = "1")]
    pub default_version: String,
    #[prost(string, tag = "2")]
    pub installed_version: String,
}

impl From<&NodeAddress> for WireNodeAddress {
    fn from(address: &NodeAddress) -> Self {
        WireNodeAddress {
            host: address.host.clone(),
            port: address.port as u32,
        }
    }
}

impl WireNodeAddress {
    pub fn decode_for(&self, call: &'static str) -> Result<NodeAddress, MonitorError> {
        let port = u16::try_from(self.port).map_err(|_| MonitorError::Protocol {
            call,
            reason: format!("port {} is out of range", self.port),
        })?;
        if self.host.is_empty() {
            return Err(MonitorError::Protocol {
                call,
                reason: "node host is empty".to_string(),
            });
        }
        Ok(NodeAddress::new(self.host.clone(), port))
    }
}

pub fn decode_role(call: &'static str, role: &str) -> Result<NodeRole, MonitorError> {
    role.parse().map_err(|_| MonitorError::Protocol {
        call,
        reason: format!("unknown role \"{}\"", role),
    })
}

fn require_node(
    call: &'static str,
    node: &Option<WireNodeAddress>,
) -> Result<NodeAddress, MonitorError> {
    node.as_ref()
        .ok_or_else(|| MonitorError::Protocol {
            call,
            reason: "node address is missing".to_string(),
        })?
        .decode_for(call)
}

impl From<&NodeRegistration> for RegisterNodeRequest {
    fn from(registration: &NodeRegistration) -> Self {
        RegisterNodeRequest {
            formation: registration.formation.clone(),
            node: Some(WireNodeAddress::from(&registration.address)),
            node_id: registration.node_id,
            group_id: registration.group_id,
            initial_role: registration.initial_role.as_str().to_string(),
        }
    }
}

impl RegisterNodeRequest {
    pub fn registration(&self) -> Result<NodeRegistration, MonitorError> {
        Ok(NodeRegistration {
            formation: self.formation.clone(),
            group_id: self.group_id,
            node_id: self.node_id,
            address: require_node("register_node", &self.node)?,
            initial_role: decode_role("register_node", &self.initial_role)?,
        })
    }
}

impl From<&NodeReport> for NodeActiveRequest {
    fn from(report: &NodeReport) -> Self {
        NodeActiveRequest {
            formation: report.formation.clone(),
            node: Some(WireNodeAddress::from(&report.address)),
            node_id: report.node_id,
            group_id: report.group_id,
            current_role: report.current_role.as_str().to_string(),
            is_running: report.is_running,
            position: report.position.to_string(),
            sync_state: report.sync_state.clone(),
        }
    }
}

impl NodeActiveRequest {
    pub fn report(&self) -> Result<NodeReport, MonitorError> {
        let position: Lsn = self.position.parse().map_err(|_| MonitorError::Protocol {
            call: "node_active",
            reason: format!("invalid position \"{}\"", self.position),
        })?;
        Ok(NodeReport {
            formation: self.formation.clone(),
            address: require_node("node_active", &self.node)?,
            node_id: self.node_id,
            group_id: self.group_id,
            current_role: decode_role("node_active", &self.current_role)?,
            is_running: self.is_running,
            position,
            sync_state: self.sync_state.clone(),
        })
    }
}

impl GetOtherNodesRequest {
    pub fn query(&self) -> Result<(NodeAddress, NodeRole), MonitorError> {
        Ok((
            require_node("get_other_nodes", &self.node)?,
            decode_role("get_other_nodes", &self.role_filter)?,
        ))
    }
}

impl From<&AssignedState> for AssignedStateReply {
    fn from(assigned: &AssignedState) -> Self {
        AssignedStateReply {
            node_id: assigned.node_id,
            group_id: assigned.group_id,
            role: assigned.role.as_str().to_string(),
        }
    }
}

impl AssignedStateReply {
    pub fn decode_for(&self, call: &'static str) -> Result<AssignedState, MonitorError> {
        let role = decode_role(call, &self.role)?;
        if role.is_wildcard() {
            return Err(MonitorError::Protocol {
                call,
                reason: "assigned role cannot be the wildcard".to_string(),
            });
        }
        Ok(AssignedState {
            node_id: self.node_id,
            group_id: self.group_id,
            role,
        })
    }
}

impl From<Option<&NodeAddress>> for NodeAddressReply {
    fn from(node: Option<&NodeAddress>) -> Self {
        NodeAddressReply {
            node: node.map(WireNodeAddress::from),
        }
    }
}

impl NodeAddressReply {
    pub fn decode_for(&self, call: &'static str) -> Result<Option<NodeAddress>, MonitorError> {
        self.node
            .as_ref()
            .map(|node| node.decode_for(call))
            .transpose()
    }
}

impl From<&[NodeAddress]> for NodeListReply {
    fn from(nodes: &[NodeAddress]) -> Self {
        NodeListReply {
            nodes: nodes.iter().map(WireNodeAddress::from).collect(),
        }
    }
}

impl NodeListReply {
    pub fn decode_for(&self, call: &'static str) -> Result<Vec<NodeAddress>, MonitorError> {
        self.nodes.iter().map(|node| node.decode_for(call)).collect()
    }
}

impl From<&ExtensionVersion> for ExtensionVersionReply {
    fn from(version: &ExtensionVersion) -> Self {
        ExtensionVersionReply {
            default_version: version.default_version.clone(),
            installed_version: version.installed_version.clone(),
        }
    }
}

impl From<ExtensionVersionReply> for ExtensionVersion {
    fn from(reply: ExtensionVersionReply) -> Self {
        ExtensionVersion {
            default_version: reply.default_version,
            installed_version: reply.installed_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_report_survives_encoding() {
        let report = NodeReport {
            formation: "default".into(),
            address: NodeAddress::new("node-b", 6432),
            node_id: 2,
            group_id: 0,
            current_role: NodeRole::CatchingUp,
            is_running: true,
            position: Lsn(0x1_0000_0028),
            sync_state: "async".into(),
        };
        let bytes = NodeActiveRequest::from(&report).encode_to_vec();
        let decoded = NodeActiveRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.position, "1/28");
        assert_eq!(decoded.report().unwrap(), report);
    }

    #[test]
    fn test_bad_reply_is_protocol_error() {
        let reply = AssignedStateReply {
            node_id: 1,
            group_id: 0,
            role: "leader".into(),
        };
        assert!(matches!(
            reply.decode_for("node_active"),
            Err(MonitorError::Protocol { call: "node_active", .. })
        ));

        let wildcard = AssignedStateReply {
            role: "#any state#".into(),
            ..reply
        };
        assert!(wildcard.decode_for("node_active").is_err());

        let out_of_range = WireNodeAddress {
            host: "node-a".into(),
            port: 70000,
        };
        assert!(out_of_range.decode_for("get_primary").is_err());
    }

    #[test]
    fn test_absent_node_decodes_to_none() {
        let reply = NodeAddressReply::from(None);
        assert_eq!(reply.decode_for("get_coordinator").unwrap(), None);
    }
}
