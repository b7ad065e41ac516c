#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::tempdir;
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::transport::{Endpoint, Server};
    use tonic::Code;

    use crate::error::{KeeperError, MonitorError};
    use crate::instance::simulated::SimulatedInstance;
    use crate::instance::Lsn;
    use crate::keeper::Keeper;
    use crate::monitor::grpc::{GrpcMonitorTransport, MonitorClient, MonitorService};
    use crate::monitor::wire::{RegisterNodeRequest, WireNodeAddress};
    use crate::monitor::{Monitor, NodeAddress, ANY_ID, EXTENSION_VERSION};
    use crate::role::NodeRole;
    use crate::state::KeeperState;
    use crate::tests::support::{keeper_config, FakeMonitor};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Serve `fake` on an ephemeral loopback port for the rest of the test.
    async fn serve(fake: &Arc<FakeMonitor>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = MonitorService(fake.clone()).into_server();
        tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        addr
    }

    async fn remote(fake: &Arc<FakeMonitor>) -> Monitor<GrpcMonitorTransport> {
        let addr = serve(fake).await;
        let transport =
            GrpcMonitorTransport::connect_lazy(&format!("http://{}", addr), TIMEOUT).unwrap();
        Monitor::new(transport, TIMEOUT)
    }

    #[tokio::test]
    async fn test_registration_crosses_the_wire() {
        let fake = FakeMonitor::new(NodeRole::Single);
        fake.update(|s| s.node_id = 7);
        let monitor = remote(&fake).await;

        let me = NodeAddress::new("node-a", 5432);
        let assigned = monitor
            .register("default", 0, ANY_ID, &me, NodeRole::Single)
            .await
            .unwrap();
        assert_eq!(assigned.node_id, 7);
        assert_eq!(assigned.role, NodeRole::Single);

        let registrations = fake.snapshot().registrations;
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].address, me);
        assert_eq!(registrations[0].node_id, ANY_ID);
        assert_eq!(registrations[0].initial_role, NodeRole::Single);
    }

    #[tokio::test]
    async fn test_queries_cross_the_wire() {
        let fake = FakeMonitor::new(NodeRole::Secondary);
        let monitor = remote(&fake).await;
        let me = NodeAddress::new("node-a", 5432);

        assert!(matches!(
            monitor.get_primary("default", 0).await,
            Err(MonitorError::NoPrimary { .. })
        ));
        assert_eq!(monitor.get_coordinator("default").await.unwrap(), None);

        fake.update(|s| {
            s.primary = Some(NodeAddress::new("node-b", 5433));
            s.coordinator = Some(NodeAddress::new("coord", 5432));
            s.nodes = vec![
                (me.clone(), NodeRole::Secondary),
                (NodeAddress::new("node-b", 5433), NodeRole::Primary),
                (NodeAddress::new("node-c", 5434), NodeRole::Secondary),
            ];
        });
        assert_eq!(
            monitor.get_primary("default", 0).await.unwrap(),
            NodeAddress::new("node-b", 5433)
        );
        assert_eq!(
            monitor.get_coordinator("default").await.unwrap(),
            Some(NodeAddress::new("coord", 5432))
        );
        assert_eq!(
            monitor
                .get_others("default", &me, NodeRole::Secondary)
                .await
                .unwrap(),
            vec![NodeAddress::new("node-c", 5434)]
        );
        assert_eq!(
            monitor
                .get_others("default", &me, NodeRole::Any)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_extension_update_crosses_the_wire() {
        let fake = FakeMonitor::new(NodeRole::Single);
        fake.update(|s| s.installed_version = "0.9".into());
        let monitor = remote(&fake).await;

        let version = monitor
            .ensure_extension_version(EXTENSION_VERSION)
            .await
            .unwrap();
        assert_eq!(version.installed_version, EXTENSION_VERSION);
        assert_eq!(fake.calls(), vec!["extension_version", "update_extension"]);
    }

    #[tokio::test]
    async fn test_server_errors_keep_their_kind() {
        let fake = FakeMonitor::new(NodeRole::Single);
        fake.update(|s| {
            s.unreachable.insert("get_coordinator");
        });
        let monitor = remote(&fake).await;
        assert!(matches!(
            monitor.get_coordinator("default").await,
            Err(MonitorError::Transport {
                call: "get_coordinator",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_role_is_rejected_by_the_server() {
        let fake = FakeMonitor::new(NodeRole::Single);
        let addr = serve(&fake).await;
        let channel = Endpoint::from_shared(format!("http://{}", addr))
            .unwrap()
            .connect_lazy();
        let mut client = MonitorClient::new(channel);

        let status = client
            .register_node(RegisterNodeRequest {
                formation: "default".into(),
                node: Some(WireNodeAddress {
                    host: "node-a".into(),
                    port: 5432,
                }),
                node_id: ANY_ID,
                group_id: 0,
                initial_role: "leader".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_monitor_is_a_failed_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = GrpcMonitorTransport::connect_lazy(
            &format!("http://{}", addr),
            Duration::from_millis(500),
        )
        .unwrap();
        let monitor = Monitor::new(transport, Duration::from_secs(2));
        let err = monitor.get_coordinator("default").await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Transport { .. } | MonitorError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn test_keeper_round_over_grpc() -> Result<(), KeeperError> {
        let dir = tempdir().unwrap();
        let fake = FakeMonitor::new(NodeRole::WaitPrimary);
        let monitor = remote(&fake).await;
        let mut keeper = Keeper::new(
            keeper_config(dir.path()),
            SimulatedInstance::running_primary(),
            Some(monitor),
        )?;
        keeper.store().create(&KeeperState {
            node_id: 1,
            group_id: 0,
            current_role: NodeRole::Single,
            assigned_role: NodeRole::Single,
            ..KeeperState::new()
        })?;

        let round = keeper.step().await?;
        assert_eq!(round.hops, 1);
        assert!(round.reported);
        assert_eq!(keeper.store().read()?.current_role, NodeRole::WaitPrimary);

        let reports = fake.snapshot().reports;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].position, Lsn(0x0300_0060));
        assert_eq!(reports[0].address, NodeAddress::new("node-a", 5432));
        assert_eq!(reports[1].current_role, NodeRole::WaitPrimary);
        Ok(())
    }
}
