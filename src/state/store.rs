use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use log::{debug, trace};
use tempfile::NamedTempFile;

use crate::error::{KeeperError, SerializationError, StateError};
use crate::state::{text, KeeperState};

pub const STATE_FILE_MAGIC: &[u8; 4] = b"AKST";
pub const STATE_FILE_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
}

/// Durable home of the [`KeeperState`].
///
/// Every write goes to a temporary file in the same directory which is synced
/// and then renamed over the state file, so readers see either the previous
/// record or the new one.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the first record. Refuses to replace an existing state file.
    pub fn create(&self, state: &KeeperState) -> Result<(), KeeperError> {
        if self.exists() {
            return Err(StateError::AlreadyExists(self.path.clone()).into());
        }
        let bytes = encode(state)?;
        self.write_atomic(|file| file.write_all(&bytes), false)?;
        debug!("Created state file {}", self.path.display());
        Ok(())
    }

    pub fn read(&self) -> Result<KeeperState, KeeperError> {
        let bytes = fs::read(&self.path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StateError::Missing(self.path.clone()),
            _ => StateError::Io {
                path: self.path.clone(),
                source,
            },
        })?;
        Ok(decode(&self.path, &bytes)?)
    }

    pub fn write(&self, state: &KeeperState) -> Result<(), KeeperError> {
        let bytes = encode(state)?;
        self.write_atomic(|file| file.write_all(&bytes), true)?;
        trace!(
            "Wrote state {} / {} to {}",
            state.current_role,
            state.assigned_role,
            self.path.display()
        );
        Ok(())
    }

    /// Key/value text form, for operators and logs.
    pub fn serialize(state: &KeeperState) -> String {
        text::render(state)
    }

    pub(crate) fn write_atomic<F>(&self, fill: F, clobber: bool) -> Result<(), StateError>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let io_error = |source: io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_error)?;
        fill(tmp.as_file_mut()).map_err(io_error)?;
        tmp.as_file().sync_all().map_err(io_error)?;

        if clobber {
            tmp.persist(&self.path).map_err(|e| io_error(e.error))?;
        } else {
            tmp.persist_noclobber(&self.path).map_err(|e| {
                if e.error.kind() == io::ErrorKind::AlreadyExists {
                    StateError::AlreadyExists(self.path.clone())
                } else {
                    io_error(e.error)
                }
            })?;
        }

        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            debug!("Could not sync directory {}: {}", dir.display(), e);
        }
        Ok(())
    }
}

pub fn encode(state: &KeeperState) -> Result<Vec<u8>, SerializationError> {
    let payload = codec()
        .serialize(state)
        .map_err(|e| SerializationError::Encode {
            what: "keeper state",
            reason: e.to_string(),
        })?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(STATE_FILE_MAGIC);
    bytes.extend_from_slice(&STATE_FILE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

pub fn decode(path: &Path, bytes: &[u8]) -> Result<KeeperState, StateError> {
    let corrupt = |reason: String| StateError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!("{} bytes is shorter than the header", bytes.len())));
    }
    if &bytes[..4] != STATE_FILE_MAGIC {
        return Err(corrupt("not a keeper state file".to_string()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..HEADER_LEN]);
    let version = u32::from_le_bytes(version);
    if version != STATE_FILE_VERSION {
        return Err(StateError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
            expected: STATE_FILE_VERSION,
        });
    }
    let state: KeeperState = codec()
        .deserialize(&bytes[HEADER_LEN..])
        .map_err(|e| corrupt(e.to_string()))?;
    if state.current_role.is_wildcard() || state.assigned_role.is_wildcard() {
        return Err(corrupt("wildcard role recorded".to_string()));
    }
    Ok(state)
}
