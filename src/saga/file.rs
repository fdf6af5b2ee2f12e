//! Durable saga store backed by a single snapshot file.
//!
//! File layout:
//! - magic `SGA\0`, format version (1 byte)
//! - saga type name (u16 length + UTF-8 bytes)
//! - body length (u64) + MessagePack-encoded saga list
//! - CRC32 of the body
//!
//! The whole file is rewritten after every mutation through a temporary
//! file and a rename. A sibling `.lock` file is held exclusively while the
//! store is open.

use super::state::{Saga, SagaState};
use super::store::{transition_in, SagaStore};
use crate::error::{Result, SyncError};
use crate::types::CorrelationId;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for saga store files.
const SAGA_FILE_MAGIC: &[u8; 4] = b"SGA\0";

/// Current saga store format version.
const SAGA_FILE_VERSION: u8 = 1;

/// Saga store that persists every change to disk.
pub struct FileSagaStore<S: Saga> {
    path: PathBuf,
    sagas: RwLock<HashMap<CorrelationId, S>>,
    _lock_file: File,
}

impl<S: Saga> FileSagaStore<S> {
    /// Open the store at `path`, loading existing sagas if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = Self::acquire_lock(&path)?;

        let sagas = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            HashMap::new()
        };

        debug!(
            saga_type = S::SAGA_TYPE,
            path = %path.display(),
            count = sagas.len(),
            "opened saga store"
        );

        Ok(Self {
            path,
            sagas: RwLock::new(sagas),
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.with_extension("lock"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| SyncError::Locked)?;

        Ok(lock_file)
    }

    /// Write the full saga set to disk.
    fn save(&self, sagas: &HashMap<CorrelationId, S>) -> Result<()> {
        let mut ordered: Vec<&S> = sagas.values().collect();
        ordered.sort_by_key(|saga| saga.correlation_id());
        let body = rmp_serde::to_vec(&ordered)?;

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(SAGA_FILE_MAGIC)?;
            file.write_all(&[SAGA_FILE_VERSION])?;

            let type_name = S::SAGA_TYPE.as_bytes();
            file.write_all(&(type_name.len() as u16).to_le_bytes())?;
            file.write_all(type_name)?;

            file.write_all(&(body.len() as u64).to_le_bytes())?;
            file.write_all(&body)?;
            file.write_all(&crc32fast::hash(&body).to_le_bytes())?;

            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn load_from_file(path: &Path) -> Result<HashMap<CorrelationId, S>> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != SAGA_FILE_MAGIC {
            return Err(SyncError::InvalidFormat("Invalid saga store magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != SAGA_FILE_VERSION {
            return Err(SyncError::InvalidFormat(format!(
                "Unsupported saga store version: {}",
                version[0]
            )));
        }

        let mut name_len = [0u8; 2];
        reader.read_exact(&mut name_len)?;
        let mut name = vec![0u8; u16::from_le_bytes(name_len) as usize];
        reader.read_exact(&mut name)?;
        if name != S::SAGA_TYPE.as_bytes() {
            return Err(SyncError::InvalidFormat(format!(
                "Saga type mismatch: expected {}, found {}",
                S::SAGA_TYPE,
                String::from_utf8_lossy(&name)
            )));
        }

        let mut len_bytes = [0u8; 8];
        reader.read_exact(&mut len_bytes)?;
        let body_len = u64::from_le_bytes(len_bytes);

        // Magic, version, name length, name, body length; CRC trails the body.
        let header_len = (SAGA_FILE_MAGIC.len() + 1 + 2 + name.len() + 8) as u64;
        let available = file_len.saturating_sub(header_len + 4);
        if body_len > available {
            return Err(SyncError::InvalidFormat(format!(
                "body length {} exceeds file size ({} bytes available)",
                body_len, available
            )));
        }

        let mut body = vec![0u8; body_len as usize];
        reader.read_exact(&mut body)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&body);
        if stored != computed {
            return Err(SyncError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let list: Vec<S> = rmp_serde::from_slice(&body)?;
        Ok(list
            .into_iter()
            .map(|saga| (saga.correlation_id(), saga))
            .collect())
    }
}

impl<S: Saga> SagaStore<S> for FileSagaStore<S> {
    fn create(&self, saga: S) -> Result<()> {
        let id = saga.correlation_id();
        let mut sagas = self.sagas.write();
        if sagas.contains_key(&id) {
            return Err(SyncError::SagaExists(id));
        }
        sagas.insert(id, saga);

        if let Err(e) = self.save(&sagas) {
            sagas.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, id: &CorrelationId) -> Result<Option<S>> {
        Ok(self.sagas.read().get(id).cloned())
    }

    fn transition(&self, id: &CorrelationId, to: SagaState) -> Result<S> {
        let mut sagas = self.sagas.write();
        let previous = sagas.get(id).cloned();
        let updated = transition_in(&mut sagas, id, to)?;

        if let Err(e) = self.save(&sagas) {
            if let Some(previous) = previous {
                sagas.insert(*id, previous);
            }
            return Err(e);
        }
        Ok(updated)
    }

    fn query(&self, predicate: &dyn Fn(&S) -> bool) -> Result<Vec<S>> {
        Ok(self
            .sagas
            .read()
            .values()
            .filter(|saga| predicate(saga))
            .cloned()
            .collect())
    }

    fn len(&self) -> usize {
        self.sagas.read().len()
    }
}
