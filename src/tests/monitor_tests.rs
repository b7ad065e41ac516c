#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::MonitorError;
    use crate::monitor::{Monitor, NodeAddress, EXTENSION_VERSION};
    use crate::role::NodeRole;
    use crate::tests::support::FakeMonitor;

    fn client(fake: &Arc<FakeMonitor>) -> Monitor<Arc<FakeMonitor>> {
        Monitor::new(fake.clone(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_slow_monitor_times_out() {
        let fake = FakeMonitor::new(NodeRole::Single);
        fake.update(|s| {
            s.delay = Some(Duration::from_secs(1));
            s.primary = Some(NodeAddress::new("node-a", 5432));
        });
        let err = client(&fake).get_primary("default", 0).await.unwrap_err();
        match err {
            MonitorError::Timeout { call, timeout } => {
                assert_eq!(call, "get_primary");
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_extension_is_updated_when_offered() {
        let fake = FakeMonitor::new(NodeRole::Single);
        fake.update(|s| s.installed_version = "0.9".into());

        let version = client(&fake)
            .ensure_extension_version(EXTENSION_VERSION)
            .await
            .unwrap();
        assert_eq!(version.installed_version, EXTENSION_VERSION);
        assert_eq!(fake.calls(), vec!["extension_version", "update_extension"]);
    }

    #[tokio::test]
    async fn test_extension_mismatch_is_not_a_transport_failure() {
        let fake = FakeMonitor::new(NodeRole::Single);
        fake.update(|s| {
            s.default_version = "1.1".into();
            s.installed_version = "0.9".into();
        });

        let err = client(&fake)
            .ensure_extension_version(EXTENSION_VERSION)
            .await
            .unwrap_err();
        match err {
            MonitorError::IncompatibleVersion {
                expected,
                installed,
            } => {
                assert_eq!(expected, EXTENSION_VERSION);
                assert_eq!(installed, "0.9");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fake.calls(), vec!["extension_version"]);
    }

    #[tokio::test]
    async fn test_absent_coordinator_is_not_an_error() {
        let fake = FakeMonitor::new(NodeRole::Single);
        let monitor = client(&fake);
        assert_eq!(monitor.get_coordinator("default").await.unwrap(), None);

        fake.update(|s| s.coordinator = Some(NodeAddress::new("coord", 5432)));
        assert_eq!(
            monitor.get_coordinator("default").await.unwrap(),
            Some(NodeAddress::new("coord", 5432))
        );

        fake.update(|s| {
            s.unreachable.insert("get_coordinator");
        });
        assert!(matches!(
            monitor.get_coordinator("default").await,
            Err(MonitorError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_primary_is_reported() {
        let fake = FakeMonitor::new(NodeRole::Single);
        let err = client(&fake).get_primary("default", 2).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::NoPrimary { group_id: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_others_are_filtered_by_role() {
        let fake = FakeMonitor::new(NodeRole::Single);
        let me = NodeAddress::new("node-a", 5432);
        fake.update(|s| {
            s.nodes = vec![
                (me.clone(), NodeRole::Primary),
                (NodeAddress::new("node-b", 5432), NodeRole::Secondary),
                (NodeAddress::new("node-c", 5432), NodeRole::CatchingUp),
            ];
        });
        let monitor = client(&fake);

        let all = monitor.get_others("default", &me, NodeRole::Any).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all.contains(&me));

        let secondaries = monitor
            .get_others("default", &me, NodeRole::Secondary)
            .await
            .unwrap();
        assert_eq!(secondaries, vec![NodeAddress::new("node-b", 5432)]);
    }
}
