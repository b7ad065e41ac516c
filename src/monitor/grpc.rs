//! gRPC transport for the monitor protocol, client and server side.

use std::time::Duration;

use log::debug;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Response, Status};

use crate::error::{ConfigError, MonitorError};
use crate::monitor::wire::{
    AssignedStateReply, ExtensionVersionReply, ExtensionVersionRequest, GetCoordinatorRequest,
    GetOtherNodesRequest, GetPrimaryRequest, NodeActiveRequest, NodeAddressReply, NodeListReply,
    RegisterNodeRequest, UpdateExtensionRequest, WireNodeAddress,
};
use crate::monitor::{
    AssignedState, ExtensionVersion, MonitorTransport, NodeAddress, NodeRegistration, NodeReport,
};
use crate::role::NodeRole;

mod pb {
    include!(concat!(env!("OUT_DIR"), "/autokeeper.monitor.Monitor.rs"));
}

pub use pb::monitor_client::MonitorClient;
pub use pb::monitor_server::{Monitor as MonitorRpc, MonitorServer};

fn from_status(call: &'static str, status: Status) -> MonitorError {
    match status.code() {
        Code::Unavailable => MonitorError::Transport {
            call,
            reason: status.message().to_string(),
        },
        code => MonitorError::Rpc {
            call,
            code: format!("{:?}", code),
            message: status.message().to_string(),
        },
    }
}

fn to_status(err: MonitorError) -> Status {
    match err {
        MonitorError::Protocol { .. } => Status::invalid_argument(err.to_string()),
        MonitorError::NoPrimary { .. } => Status::not_found(err.to_string()),
        MonitorError::Timeout { .. } => Status::deadline_exceeded(err.to_string()),
        MonitorError::Transport { .. } => Status::unavailable(err.to_string()),
        MonitorError::Rpc { message, .. } => Status::internal(message),
        MonitorError::IncompatibleVersion { .. } => Status::failed_precondition(err.to_string()),
    }
}

/// Monitor client over a lazily connected channel: the first call dials.
#[derive(Debug, Clone)]
pub struct GrpcMonitorTransport {
    client: MonitorClient<Channel>,
}

impl GrpcMonitorTransport {
    /// Must be called from within a tokio runtime.
    pub fn connect_lazy(uri: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::from_shared(uri.to_string())
            .map_err(|e| ConfigError::Invalid(format!("monitor uri \"{}\": {}", uri, e)))?
            .connect_timeout(timeout);
        debug!("Using monitor at {}", uri);
        Ok(Self::from_channel(endpoint.connect_lazy()))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: MonitorClient::new(channel),
        }
    }
}

#[tonic::async_trait]
impl MonitorTransport for GrpcMonitorTransport {
    async fn register_node(
        &self,
        registration: &NodeRegistration,
    ) -> Result<AssignedState, MonitorError> {
        let reply = self
            .client
            .clone()
            .register_node(RegisterNodeRequest::from(registration))
            .await
            .map_err(|s| from_status("register_node", s))?;
        reply.into_inner().decode_for("register_node")
    }

    async fn node_active(&self, report: &NodeReport) -> Result<AssignedState, MonitorError> {
        let reply = self
            .client
            .clone()
            .node_active(NodeActiveRequest::from(report))
            .await
            .map_err(|s| from_status("node_active", s))?;
        reply.into_inner().decode_for("node_active")
    }

    async fn get_primary(
        &self,
        formation: &str,
        group_id: i32,
    ) -> Result<Option<NodeAddress>, MonitorError> {
        let request = GetPrimaryRequest {
            formation: formation.to_string(),
            group_id,
        };
        let reply = self
            .client
            .clone()
            .get_primary(request)
            .await
            .map_err(|s| from_status("get_primary", s))?;
        reply.into_inner().decode_for("get_primary")
    }

    async fn get_other_nodes(
        &self,
        formation: &str,
        node: &NodeAddress,
        role_filter: NodeRole,
    ) -> Result<Vec<NodeAddress>, MonitorError> {
        let request = GetOtherNodesRequest {
            formation: formation.to_string(),
            node: Some(WireNodeAddress::from(node)),
            role_filter: role_filter.as_str().to_string(),
        };
        let reply = self
            .client
            .clone()
            .get_other_nodes(request)
            .await
            .map_err(|s| from_status("get_other_nodes", s))?;
        reply.into_inner().decode_for("get_other_nodes")
    }

    async fn get_coordinator(&self, formation: &str) -> Result<Option<NodeAddress>, MonitorError> {
        let request = GetCoordinatorRequest {
            formation: formation.to_string(),
        };
        let reply = self
            .client
            .clone()
            .get_coordinator(request)
            .await
            .map_err(|s| from_status("get_coordinator", s))?;
        reply.into_inner().decode_for("get_coordinator")
    }

    async fn extension_version(&self) -> Result<ExtensionVersion, MonitorError> {
        let reply = self
            .client
            .clone()
            .extension_version(ExtensionVersionRequest {})
            .await
            .map_err(|s| from_status("extension_version", s))?;
        Ok(reply.into_inner().into())
    }

    async fn update_extension(&self, version: &str) -> Result<ExtensionVersion, MonitorError> {
        let request = UpdateExtensionRequest {
            version: version.to_string(),
        };
        let reply = self
            .client
            .clone()
            .update_extension(request)
            .await
            .map_err(|s| from_status("update_extension", s))?;
        Ok(reply.into_inner().into())
    }
}

/// Serves any [`MonitorTransport`] over gRPC.
#[derive(Debug, Clone)]
pub struct MonitorService<T>(pub T);

impl<T: MonitorTransport + 'static> MonitorService<T> {
    pub fn into_server(self) -> MonitorServer<Self> {
        MonitorServer::new(self)
    }
}

#[tonic::async_trait]
impl<T: MonitorTransport + 'static> MonitorRpc for MonitorService<T> {
    async fn register_node(
        &self,
        request: Request<RegisterNodeRequest>,
    ) -> Result<Response<AssignedStateReply>, Status> {
        let registration = request.into_inner().registration().map_err(to_status)?;
        let assigned = self.0.register_node(&registration).await.map_err(to_status)?;
        Ok(Response::new(AssignedStateReply::from(&assigned)))
    }

    async fn node_active(
        &self,
        request: Request<NodeActiveRequest>,
    ) -> Result<Response<AssignedStateReply>, Status> {
        let report = request.into_inner().report().map_err(to_status)?;
        let assigned = self.0.node_active(&report).await.map_err(to_status)?;
        Ok(Response::new(AssignedStateReply::from(&assigned)))
    }

    async fn get_primary(
        &self,
        request: Request<GetPrimaryRequest>,
    ) -> Result<Response<NodeAddressReply>, Status> {
        let request = request.into_inner();
        let primary = self
            .0
            .get_primary(&request.formation, request.group_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(NodeAddressReply::from(primary.as_ref())))
    }

    async fn get_other_nodes(
        &self,
        request: Request<GetOtherNodesRequest>,
    ) -> Result<Response<NodeListReply>, Status> {
        let request = request.into_inner();
        let (node, role_filter) = request.query().map_err(to_status)?;
        let others = self
            .0
            .get_other_nodes(&request.formation, &node, role_filter)
            .await
            .map_err(to_status)?;
        Ok(Response::new(NodeListReply::from(others.as_slice())))
    }

    async fn get_coordinator(
        &self,
        request: Request<GetCoordinatorRequest>,
    ) -> Result<Response<NodeAddressReply>, Status> {
        let coordinator = self
            .0
            .get_coordinator(&request.into_inner().formation)
            .await
            .map_err(to_status)?;
        Ok(Response::new(NodeAddressReply::from(coordinator.as_ref())))
    }

    async fn extension_version(
        &self,
        _request: Request<ExtensionVersionRequest>,
    ) -> Result<Response<ExtensionVersionReply>, Status> {
        let version = self.0.extension_version().await.map_err(to_status)?;
        Ok(Response::new(ExtensionVersionReply::from(&version)))
    }

    async fn update_extension(
        &self,
        request: Request<UpdateExtensionRequest>,
    ) -> Result<Response<ExtensionVersionReply>, Status> {
        let version = self
            .0
            .update_extension(&request.into_inner().version)
            .await
            .map_err(to_status)?;
        Ok(Response::new(ExtensionVersionReply::from(&version)))
    }
}
