use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::role::NodeRole;

/// Process exit codes, one per outward error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    BadArgs = 1,
    BadConfig = 2,
    BadState = 3,
    InstanceAction = 5,
    Monitor = 6,
    Internal = 12,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("bad arguments: {0}")]
    BadArgs(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    InstanceAction(#[from] InstanceActionError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl KeeperError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            KeeperError::BadArgs(_) => ExitCode::BadArgs,
            KeeperError::Config(_) => ExitCode::BadConfig,
            KeeperError::State(_) => ExitCode::BadState,
            KeeperError::InstanceAction(_) => ExitCode::InstanceAction,
            KeeperError::Monitor(_) => ExitCode::Monitor,
            KeeperError::Serialization(_) | KeeperError::Internal(_) => ExitCode::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("the monitor is disabled in this configuration")]
    MonitorDisabled,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file {0} does not exist")]
    Missing(PathBuf),
    #[error("state file {0} already exists")]
    AlreadyExists(PathBuf),
    #[error("state file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("state file {path} has version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("failed to write state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no transition path from {from} to {to}")]
    NoPath { from: NodeRole, to: NodeRole },
    #[error("no convergence from {from} to {to} after {hops} transitions")]
    NoConvergence {
        from: NodeRole,
        to: NodeRole,
        hops: usize,
    },
    #[error("route {from} -> {via} for goal {goal} does not follow a transition edge")]
    InvalidRoute {
        from: NodeRole,
        goal: NodeRole,
        via: NodeRole,
    },
}

#[derive(Debug, Error)]
pub enum InstanceActionError {
    #[error("{action} failed: {reason}")]
    Failed { action: &'static str, reason: String },
    #[error("{action} needs the address of the primary node, none is known")]
    MissingPrimary { action: &'static str },
    #[error("no {0} hook is configured")]
    MissingHook(&'static str),
    #[error("failed to observe the local instance: {0}")]
    Observe(String),
    #[error("precondition for registering as {role} failed: {reason}")]
    Precondition { role: NodeRole, reason: String },
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to reach the monitor for {call}: {reason}")]
    Transport { call: &'static str, reason: String },
    #[error("monitor call {call} timed out after {timeout:?}")]
    Timeout {
        call: &'static str,
        timeout: Duration,
    },
    #[error("monitor rejected {call}: {message} ({code})")]
    Rpc {
        call: &'static str,
        code: String,
        message: String,
    },
    #[error("monitor sent an invalid reply to {call}: {reason}")]
    Protocol { call: &'static str, reason: String },
    #[error("monitor has no primary node for {formation}/{group_id}")]
    NoPrimary { formation: String, group_id: i32 },
    #[error("monitor extension version {installed} is incompatible, expected {expected}")]
    IncompatibleVersion { expected: String, installed: String },
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        let errors = vec![
            KeeperError::BadArgs("x".into()),
            KeeperError::Config(ConfigError::MonitorDisabled),
            KeeperError::State(StateError::Missing(PathBuf::from("/tmp/x"))),
            KeeperError::InstanceAction(InstanceActionError::MissingHook("start")),
            KeeperError::Monitor(MonitorError::NoPrimary {
                formation: "default".into(),
                group_id: 0,
            }),
            KeeperError::Internal("x".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code().code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_serialization_maps_to_internal() {
        let err = KeeperError::from(SerializationError::Encode {
            what: "state",
            reason: "boom".into(),
        });
        assert_eq!(err.exit_code(), ExitCode::Internal);
    }
}
