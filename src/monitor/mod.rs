//! Client side of the monitor protocol.
//!
//! Every operation is a single stateless request/response exchange; all
//! continuity between calls lives in the keeper's state file. The transport is
//! pluggable through [`MonitorTransport`], and [`Monitor`] adds the per-call
//! timeout and the checks the keeper relies on.

pub mod grpc;
pub mod wire;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;
use crate::instance::Lsn;
use crate::role::NodeRole;

/// Monitor extension version this keeper speaks.
pub const EXTENSION_VERSION: &str = "1.0";

/// Desired node id or group id left to the monitor's choice.
pub const ANY_ID: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The monitor's answer to a registration or a node report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedState {
    pub node_id: i64,
    pub group_id: i32,
    pub role: NodeRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionVersion {
    pub default_version: String,
    pub installed_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistration {
    pub formation: String,
    pub group_id: i32,
    pub node_id: i64,
    pub address: NodeAddress,
    pub initial_role: NodeRole,
}

/// Liveness and position of a node, as sent with every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub formation: String,
    pub address: NodeAddress,
    pub node_id: i64,
    pub group_id: i32,
    pub current_role: NodeRole,
    pub is_running: bool,
    pub position: Lsn,
    pub sync_state: String,
}

/// Remote-call interface to the monitor. Rows come back already decoded.
#[tonic::async_trait]
pub trait MonitorTransport: Send + Sync {
    async fn register_node(
        &self,
        registration: &NodeRegistration,
    ) -> Result<AssignedState, MonitorError>;

    async fn node_active(&self, report: &NodeReport) -> Result<AssignedState, MonitorError>;

    async fn get_primary(
        &self,
        formation: &str,
        group_id: i32,
    ) -> Result<Option<NodeAddress>, MonitorError>;

    async fn get_other_nodes(
        &self,
        formation: &str,
        node: &NodeAddress,
        role_filter: NodeRole,
    ) -> Result<Vec<NodeAddress>, MonitorError>;

    async fn get_coordinator(&self, formation: &str) -> Result<Option<NodeAddress>, MonitorError>;

    async fn extension_version(&self) -> Result<ExtensionVersion, MonitorError>;

    async fn update_extension(&self, version: &str) -> Result<ExtensionVersion, MonitorError>;
}

#[tonic::async_trait]
impl<T: MonitorTransport + ?Sized> MonitorTransport for Arc<T> {
    async fn register_node(
        &self,
        registration: &NodeRegistration,
    ) -> Result<AssignedState, MonitorError> {
        (**self).register_node(registration).await
    }

    async fn node_active(&self, report: &NodeReport) -> Result<AssignedState, MonitorError> {
        (**self).node_active(report).await
    }

    async fn get_primary(
        &self,
        formation: &str,
        group_id: i32,
    ) -> Result<Option<NodeAddress>, MonitorError> {
        (**self).get_primary(formation, group_id).await
    }

    async fn get_other_nodes(
        &self,
        formation: &str,
        node: &NodeAddress,
        role_filter: NodeRole,
    ) -> Result<Vec<NodeAddress>, MonitorError> {
        (**self).get_other_nodes(formation, node, role_filter).await
    }

    async fn get_coordinator(&self, formation: &str) -> Result<Option<NodeAddress>, MonitorError> {
        (**self).get_coordinator(formation).await
    }

    async fn extension_version(&self) -> Result<ExtensionVersion, MonitorError> {
        (**self).extension_version().await
    }

    async fn update_extension(&self, version: &str) -> Result<ExtensionVersion, MonitorError> {
        (**self).update_extension(version).await
    }
}

pub struct Monitor<T> {
    transport: T,
    timeout: Duration,
}

impl<T: MonitorTransport> Monitor<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// A call that does not answer in time is a failed call: the monitor may
    /// or may not have applied it.
    async fn call<R, F>(&self, call: &'static str, request: F) -> Result<R, MonitorError>
    where
        F: Future<Output = Result<R, MonitorError>>,
    {
        debug!("Calling monitor {}", call);
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Timeout {
                call,
                timeout: self.timeout,
            }),
        }
    }

    pub async fn register(
        &self,
        formation: &str,
        group_id: i32,
        node_id: i64,
        address: &NodeAddress,
        initial_role: NodeRole,
    ) -> Result<AssignedState, MonitorError> {
        let registration = NodeRegistration {
            formation: formation.to_string(),
            group_id,
            node_id,
            address: address.clone(),
            initial_role,
        };
        let assigned = self
            .call("register_node", self.transport.register_node(&registration))
            .await?;
        info!(
            "Registered node {} ({}) with id {} in formation \"{}\", group {}, assigned role \"{}\"",
            address, initial_role, assigned.node_id, formation, assigned.group_id, assigned.role
        );
        Ok(assigned)
    }

    pub async fn report_active(&self, report: &NodeReport) -> Result<AssignedState, MonitorError> {
        let assigned = self
            .call("node_active", self.transport.node_active(report))
            .await?;
        debug!(
            "Reported {} at {} as \"{}\", monitor assigned \"{}\"",
            report.address, report.position, report.current_role, assigned.role
        );
        Ok(assigned)
    }

    pub async fn get_primary(
        &self,
        formation: &str,
        group_id: i32,
    ) -> Result<NodeAddress, MonitorError> {
        self.call("get_primary", self.transport.get_primary(formation, group_id))
            .await?
            .ok_or_else(|| MonitorError::NoPrimary {
                formation: formation.to_string(),
                group_id,
            })
    }

    pub async fn get_others(
        &self,
        formation: &str,
        node: &NodeAddress,
        role_filter: NodeRole,
    ) -> Result<Vec<NodeAddress>, MonitorError> {
        self.call(
            "get_other_nodes",
            self.transport.get_other_nodes(formation, node, role_filter),
        )
        .await
    }

    /// `None` when the formation has no coordinator ready yet.
    pub async fn get_coordinator(
        &self,
        formation: &str,
    ) -> Result<Option<NodeAddress>, MonitorError> {
        self.call("get_coordinator", self.transport.get_coordinator(formation))
            .await
    }

    /// Check that the monitor runs the extension version `expected`, asking it
    /// to update when it offers that version but has an older one installed.
    pub async fn ensure_extension_version(
        &self,
        expected: &str,
    ) -> Result<ExtensionVersion, MonitorError> {
        let version = self
            .call("extension_version", self.transport.extension_version())
            .await?;
        if version.installed_version == expected {
            return Ok(version);
        }
        if version.default_version != expected {
            return Err(MonitorError::IncompatibleVersion {
                expected: expected.to_string(),
                installed: version.installed_version,
            });
        }
        warn!(
            "Monitor extension version is {}, updating to {}",
            version.installed_version, expected
        );
        let updated = self
            .call("update_extension", self.transport.update_extension(expected))
            .await?;
        if updated.installed_version != expected {
            return Err(MonitorError::IncompatibleVersion {
                expected: expected.to_string(),
                installed: updated.installed_version,
            });
        }
        Ok(updated)
    }
}

/// Tabular rendering of node addresses, one per line under a header.
pub fn render_node_table(nodes: &[NodeAddress]) -> String {
    let width = nodes
        .iter()
        .map(|node| node.host.len())
        .chain(std::iter::once("Host".len()))
        .max()
        .unwrap_or(4);
    let mut out = format!("{:<width$} | {:>6}\n", "Host", "Port", width = width);
    out.push_str(&format!("{}-+-{}\n", "-".repeat(width), "-".repeat(6)));
    for node in nodes {
        out.push_str(&format!(
            "{:<width$} | {:>6}\n",
            node.host,
            node.port,
            width = width
        ));
    }
    out
}
