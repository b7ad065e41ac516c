use std::path::PathBuf;
use std::process::Command;

use log::{debug, trace};

use crate::config::InstanceHooks;
use crate::error::InstanceActionError;
use crate::instance::{InstanceFacts, Lsn, ManagedInstance};
use crate::monitor::NodeAddress;

/// Drives the instance through operator-supplied shell hooks.
///
/// Each hook runs under `sh -c` with `AUTOKEEPER_PGDATA` set, plus
/// `AUTOKEEPER_PRIMARY_HOST`/`AUTOKEEPER_PRIMARY_PORT` for `standby` and
/// `AUTOKEEPER_ENABLED=on|off` for the toggles. Hooks whose effect is already
/// observable are skipped; the others must be safe to run twice.
#[derive(Debug, Clone)]
pub struct HookInstance {
    pgdata: PathBuf,
    hooks: InstanceHooks,
}

impl HookInstance {
    pub fn new(pgdata: PathBuf, hooks: InstanceHooks) -> Self {
        Self { pgdata, hooks }
    }

    fn data_exists(&self) -> bool {
        self.pgdata.join("PG_VERSION").is_file()
    }

    fn in_recovery(&self) -> bool {
        self.pgdata.join("standby.signal").is_file()
    }

    fn is_running(&self) -> Result<bool, InstanceActionError> {
        let cmd = self
            .hooks
            .status
            .as_deref()
            .ok_or(InstanceActionError::MissingHook("status"))?;
        let status = self
            .command(cmd, &[])
            .status()
            .map_err(|e| InstanceActionError::Observe(format!("status hook: {}", e)))?;
        Ok(status.success())
    }

    fn command(&self, cmd: &str, env: &[(&str, String)]) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .env("AUTOKEEPER_PGDATA", &self.pgdata);
        for (key, value) in env {
            command.env(key, value);
        }
        command
    }

    fn run(
        &self,
        name: &'static str,
        cmd: Option<&String>,
        env: &[(&str, String)],
    ) -> Result<String, InstanceActionError> {
        let cmd = cmd.ok_or(InstanceActionError::MissingHook(name))?;
        debug!("Running {} hook: {}", name, cmd);
        let output = self
            .command(cmd, env)
            .output()
            .map_err(|e| InstanceActionError::Failed {
                action: name,
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InstanceActionError::Failed {
                action: name,
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        trace!("{} hook output: {}", name, stdout);
        Ok(stdout)
    }

    fn toggle(
        &self,
        name: &'static str,
        cmd: Option<&String>,
        enabled: bool,
    ) -> Result<(), InstanceActionError> {
        let value = if enabled { "on" } else { "off" };
        self.run(name, cmd, &[("AUTOKEEPER_ENABLED", value.to_string())])
            .map(|_| ())
    }
}

impl ManagedInstance for HookInstance {
    fn observe(&mut self) -> Result<InstanceFacts, InstanceActionError> {
        let exists = self.data_exists();
        let is_running = exists && self.is_running()?;
        let position = match (is_running, self.hooks.position.as_ref()) {
            (true, Some(cmd)) => {
                let text = self
                    .run("position", Some(cmd), &[])
                    .map_err(|e| InstanceActionError::Observe(e.to_string()))?;
                let lsn = text
                    .parse::<Lsn>()
                    .map_err(|e| InstanceActionError::Observe(e.to_string()))?;
                Some(lsn)
            }
            _ => None,
        };
        let sync_state = match (is_running, self.hooks.sync_state.as_ref()) {
            (true, Some(cmd)) => self
                .run("sync_state", Some(cmd), &[])
                .map_err(|e| InstanceActionError::Observe(e.to_string()))?,
            _ => String::new(),
        };
        Ok(InstanceFacts {
            exists,
            is_running,
            is_in_recovery: exists && self.in_recovery(),
            position,
            sync_state,
        })
    }

    fn ensure_initialized(&mut self) -> Result<(), InstanceActionError> {
        if self.data_exists() {
            return Ok(());
        }
        self.run("init", self.hooks.init.as_ref(), &[]).map(|_| ())
    }

    fn ensure_started(&mut self) -> Result<(), InstanceActionError> {
        if self.data_exists() && self.is_running()? {
            return Ok(());
        }
        self.run("start", self.hooks.start.as_ref(), &[]).map(|_| ())
    }

    fn ensure_stopped(&mut self) -> Result<(), InstanceActionError> {
        if !self.data_exists() || !self.is_running()? {
            return Ok(());
        }
        self.run("stop", self.hooks.stop.as_ref(), &[]).map(|_| ())
    }

    fn ensure_standby_of(&mut self, primary: &NodeAddress) -> Result<(), InstanceActionError> {
        let env = [
            ("AUTOKEEPER_PRIMARY_HOST", primary.host.clone()),
            ("AUTOKEEPER_PRIMARY_PORT", primary.port.to_string()),
        ];
        self.run("standby", self.hooks.standby.as_ref(), &env)
            .map(|_| ())
    }

    fn ensure_detached(&mut self) -> Result<(), InstanceActionError> {
        self.run("detach", self.hooks.detach.as_ref(), &[]).map(|_| ())
    }

    fn ensure_promoted(&mut self) -> Result<(), InstanceActionError> {
        if self.data_exists() && !self.in_recovery() {
            return Ok(());
        }
        self.run("promote", self.hooks.promote.as_ref(), &[])
            .map(|_| ())
    }

    fn set_replication_allowed(&mut self, allowed: bool) -> Result<(), InstanceActionError> {
        self.toggle("replication", self.hooks.replication.as_ref(), allowed)
    }

    fn set_synchronous_replication(&mut self, enabled: bool) -> Result<(), InstanceActionError> {
        self.toggle("sync_replication", self.hooks.sync_replication.as_ref(), enabled)
    }

    fn set_maintenance(&mut self, enabled: bool) -> Result<(), InstanceActionError> {
        self.toggle("maintenance", self.hooks.maintenance.as_ref(), enabled)
    }
}
