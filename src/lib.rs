//! Autokeeper drives one database instance through the roles a remote monitor
//! assigns to it, persisting its progress so a restarted keeper resumes where
//! it left off.

pub mod config;
pub mod error;
pub mod fsm;
pub mod instance;
pub mod keeper;
pub mod monitor;
pub mod role;
pub mod state;

pub use config::KeeperConfig;
pub use error::{ExitCode, KeeperError};
pub use keeper::{Keeper, RoundReport};
pub use role::NodeRole;
pub use state::{KeeperState, StateStore};

#[cfg(test)]
mod tests;
