//! The per-device voter identifier and where it is kept.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use chrono::Utc;
use rand::{distributions::Uniform, Rng};
use thiserror::Error;
use tracing::{debug, info};

use crate::data::VoterIdentifier;

const APP_DIR: &str = "ballot";
const VOTER_ID_FILE: &str = "voter_id";
const RANDOM_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Error, Debug)]
pub enum VoterStoreError {
    #[error("could not determine a data directory for the voter identifier")]
    NoDataDir,
    #[error("could not access the voter identifier at {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl VoterIdentifier {
    /// Generates a fresh identifier of the form
    /// `voter_<unix millis>_<9 base36 characters>`.
    pub fn generate() -> Self {
        VoterIdentifier::from(format!(
            "voter_{}_{}",
            Utc::now().timestamp_millis(),
            random_base36(RANDOM_SUFFIX_LEN)
        ))
    }
}

/// Random lowercase base36 characters.
pub(crate) fn random_base36(len: usize) -> String {
    let range = Uniform::from(0..BASE36.len());
    rand::thread_rng()
        .sample_iter(range)
        .take(len)
        .map(|i| BASE36[i] as char)
        .collect()
}

/// Keeps the voter identifier of this device in a file.
#[derive(Debug, Clone)]
pub struct VoterStore {
    path: PathBuf,
}

impl VoterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A store in the per-user data directory, e.g.
    /// `~/.local/share/ballot/voter_id` on Linux.
    pub fn default_location() -> Result<Self, VoterStoreError> {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or(VoterStoreError::NoDataDir)?;
        path.push(APP_DIR);
        path.push(VOTER_ID_FILE);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored identifier, generating and storing one first if
    /// there is none yet. A missing file is created exclusively, so if another
    /// process creates it first its identifier wins. An empty file holds no
    /// identifier and is overwritten.
    pub fn load_or_create(&self) -> Result<VoterIdentifier, VoterStoreError> {
        if let Some(identifier) = self.load()? {
            return Ok(identifier);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| self.io_error(source))?;
        }

        let identifier = VoterIdentifier::generate();
        let created = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path);
        match created {
            Ok(mut file) => {
                file.write_all(identifier.as_str().as_bytes())
                    .map_err(|source| self.io_error(source))?;
                info!(path = %self.path.display(), "created voter identifier");
                Ok(identifier)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match self.load()? {
                Some(stored) => {
                    debug!("voter identifier was created concurrently, using the stored one");
                    Ok(stored)
                }
                None => self.replace_empty(identifier),
            },
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn replace_empty(
        &self,
        identifier: VoterIdentifier,
    ) -> Result<VoterIdentifier, VoterStoreError> {
        fs::write(&self.path, identifier.as_str())
            .map_err(|source| self.io_error(source))?;
        info!(path = %self.path.display(), "replaced empty voter identifier");
        // a concurrent writer may have replaced it too; the file has the last word
        Ok(self.load()?.unwrap_or(identifier))
    }

    fn load(&self) -> Result<Option<VoterIdentifier>, VoterStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let contents = contents.trim();
                if contents.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(VoterIdentifier::from(contents)))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: io::Error) -> VoterStoreError {
        VoterStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
