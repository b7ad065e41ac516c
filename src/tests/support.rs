use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::KeeperConfig;
use crate::error::MonitorError;
use crate::instance::simulated::SimulatedInstance;
use crate::keeper::Keeper;
use crate::monitor::{
    AssignedState, ExtensionVersion, Monitor, MonitorTransport, NodeAddress, NodeRegistration,
    NodeReport, EXTENSION_VERSION,
};
use crate::role::NodeRole;

/// What the fake monitor answers, and what it was asked.
#[derive(Debug, Clone)]
pub struct FakeMonitorState {
    pub node_id: i64,
    pub group_id: i32,
    pub assigned: NodeRole,
    pub primary: Option<NodeAddress>,
    pub nodes: Vec<(NodeAddress, NodeRole)>,
    pub coordinator: Option<NodeAddress>,
    pub default_version: String,
    pub installed_version: String,
    pub delay: Option<Duration>,
    pub unreachable: HashSet<&'static str>,
    /// `node_active` stops answering once this many reports were accepted.
    pub reports_before_outage: Option<usize>,
    /// Removed while a report is being handled, to make the next write fail.
    pub remove_on_report: Option<PathBuf>,
    pub calls: Vec<&'static str>,
    pub reports: Vec<NodeReport>,
    pub registrations: Vec<NodeRegistration>,
}

/// In-memory monitor double.
#[derive(Debug)]
pub struct FakeMonitor {
    state: Mutex<FakeMonitorState>,
}

impl FakeMonitor {
    pub fn new(assigned: NodeRole) -> Arc<Self> {
        Arc::new(FakeMonitor {
            state: Mutex::new(FakeMonitorState {
                node_id: 1,
                group_id: 0,
                assigned,
                primary: None,
                nodes: Vec::new(),
                coordinator: None,
                default_version: EXTENSION_VERSION.to_string(),
                installed_version: EXTENSION_VERSION.to_string(),
                delay: None,
                unreachable: HashSet::new(),
                reports_before_outage: None,
                remove_on_report: None,
                calls: Vec::new(),
                reports: Vec::new(),
                registrations: Vec::new(),
            }),
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeMonitorState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn snapshot(&self) -> FakeMonitorState {
        self.state.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.snapshot().calls
    }

    /// Record the call and decide on failure and delay; the lock is released
    /// before the caller awaits anything.
    fn begin(&self, call: &'static str) -> (Option<Duration>, Result<(), MonitorError>) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        let result = if state.unreachable.contains(call) {
            Err(MonitorError::Transport {
                call,
                reason: "connection refused".to_string(),
            })
        } else {
            Ok(())
        };
        (state.delay, result)
    }

    async fn pause(delay: Option<Duration>) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn assignment(&self) -> AssignedState {
        let state = self.state.lock().unwrap();
        AssignedState {
            node_id: state.node_id,
            group_id: state.group_id,
            role: state.assigned,
        }
    }
}

#[tonic::async_trait]
impl MonitorTransport for FakeMonitor {
    async fn register_node(
        &self,
        registration: &NodeRegistration,
    ) -> Result<AssignedState, MonitorError> {
        let (delay, result) = self.begin("register_node");
        Self::pause(delay).await;
        result?;
        self.update(|s| s.registrations.push(registration.clone()));
        Ok(self.assignment())
    }

    async fn node_active(&self, report: &NodeReport) -> Result<AssignedState, MonitorError> {
        let (delay, result) = self.begin("node_active");
        Self::pause(delay).await;
        result?;
        let snapshot = self.snapshot();
        if snapshot.reports_before_outage == Some(snapshot.reports.len()) {
            return Err(MonitorError::Transport {
                call: "node_active",
                reason: "connection reset by peer".to_string(),
            });
        }
        if let Some(dir) = snapshot.remove_on_report.as_ref() {
            std::fs::remove_dir_all(dir).unwrap();
        }
        self.update(|s| s.reports.push(report.clone()));
        Ok(self.assignment())
    }

    async fn get_primary(
        &self,
        _formation: &str,
        _group_id: i32,
    ) -> Result<Option<NodeAddress>, MonitorError> {
        let (delay, result) = self.begin("get_primary");
        Self::pause(delay).await;
        result?;
        Ok(self.snapshot().primary)
    }

    async fn get_other_nodes(
        &self,
        _formation: &str,
        node: &NodeAddress,
        role_filter: NodeRole,
    ) -> Result<Vec<NodeAddress>, MonitorError> {
        let (delay, result) = self.begin("get_other_nodes");
        Self::pause(delay).await;
        result?;
        Ok(self
            .snapshot()
            .nodes
            .into_iter()
            .filter(|(address, role)| address != node && role_filter.matches(*role))
            .map(|(address, _)| address)
            .collect())
    }

    async fn get_coordinator(&self, _formation: &str) -> Result<Option<NodeAddress>, MonitorError> {
        let (delay, result) = self.begin("get_coordinator");
        Self::pause(delay).await;
        result?;
        Ok(self.snapshot().coordinator)
    }

    async fn extension_version(&self) -> Result<ExtensionVersion, MonitorError> {
        let (delay, result) = self.begin("extension_version");
        Self::pause(delay).await;
        result?;
        let state = self.snapshot();
        Ok(ExtensionVersion {
            default_version: state.default_version,
            installed_version: state.installed_version,
        })
    }

    async fn update_extension(&self, version: &str) -> Result<ExtensionVersion, MonitorError> {
        let (delay, result) = self.begin("update_extension");
        Self::pause(delay).await;
        result?;
        self.update(|s| {
            if s.default_version == version {
                s.installed_version = version.to_string();
            }
        });
        let state = self.snapshot();
        Ok(ExtensionVersion {
            default_version: state.default_version,
            installed_version: state.installed_version,
        })
    }
}

pub type TestKeeper = Keeper<SimulatedInstance, Arc<FakeMonitor>>;

pub fn keeper_config(dir: &Path) -> KeeperConfig {
    let yaml = format!(
        "formation: default\n\
         group_id: 0\n\
         nodename: node-a\n\
         port: 5432\n\
         pgdata: {pgdata}\n\
         state_file: {state}\n\
         monitor:\n  uri: http://127.0.0.1:50051\n  timeout_ms: 200\n",
        pgdata = dir.join("pgdata").display(),
        state = dir.join("keeper.state").display(),
    );
    let mut config = KeeperConfig::from_yaml_str(&yaml).unwrap();
    config.apply_defaults();
    config.validate().unwrap();
    config
}

pub fn test_keeper(
    dir: &Path,
    instance: SimulatedInstance,
    monitor: &Arc<FakeMonitor>,
) -> TestKeeper {
    keeper_with_config(keeper_config(dir), instance, monitor)
}

pub fn keeper_with_config(
    config: KeeperConfig,
    instance: SimulatedInstance,
    monitor: &Arc<FakeMonitor>,
) -> TestKeeper {
    let monitor = Monitor::new(monitor.clone(), config.monitor_timeout());
    Keeper::new(config, instance, Some(monitor)).unwrap()
}

/// A keeper with no monitor configured.
pub fn local_keeper(dir: &Path, instance: SimulatedInstance) -> TestKeeper {
    let mut config = keeper_config(dir);
    config.monitor = None;
    Keeper::new(config, instance, None).unwrap()
}
