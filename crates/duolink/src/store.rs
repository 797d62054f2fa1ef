// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pairing persistence.
//!
//! The persisted tuple is {remote address, primary key, local key, optional
//! remote name}. Two backend families exist:
//!
//! - raw byte-addressable (EEPROM-like): a fixed 42-byte blob
//!   `address | primary | local | CRC32(preceding)`, big-endian CRC. A bad
//!   CRC reads as "no pairing". The name is not persisted on this backend.
//! - key/value (preferences-like): one key per field under a fixed
//!   namespace; an absent key reads as "no pairing".
//!
//! Read failures are never surfaced: they mean "no pairing" and therefore a
//! fresh pairing cycle. Write failures do not block a session; it is simply
//! not remembered.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::config::{
    KEY_LEN, MAC_LEN, PAIRING_ADDRESS_OFFSET, PAIRING_BLOB_LEN, PAIRING_CRC_OFFSET,
    PAIRING_LOCAL_OFFSET, PAIRING_PRIMARY_OFFSET, STORE_NAMESPACE,
};
use crate::error::{Error, Result};
use crate::protocol::crc;

const KEY_ADDRESS: &str = "address";
const KEY_PRIMARY: &str = "primary";
const KEY_LOCAL: &str = "local";
const KEY_NAME: &str = "name";

/// The persisted pairing tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRecord {
    pub remote_address: [u8; MAC_LEN],
    pub primary_key: [u8; KEY_LEN],
    pub local_key: [u8; KEY_LEN],
    pub remote_name: Option<String>,
}

/// Backend-agnostic interface to the persisted pairing.
///
/// # Implementations
///
/// - [`RawStore`] -- CRC-protected blob on a byte-addressable backend
/// - [`KvStore`] -- field-per-key on a key/value backend
pub trait PairingStore {
    /// Load the persisted pairing; `None` means no (usable) pairing.
    fn load(&mut self) -> Option<PairingRecord>;

    /// Persist the pairing. Succeeds only if every field committed.
    fn save(&mut self, record: &PairingRecord) -> Result<()>;

    /// Remove the persisted pairing.
    fn erase(&mut self) -> Result<()>;
}

/// Byte-addressable non-volatile backend (EEPROM-like).
pub trait RawNv {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
    /// Flush staged writes to the medium.
    fn commit(&mut self) -> Result<()>;
}

/// Key/value non-volatile backend (preferences-like).
pub trait KvNv {
    /// Read `key` under `namespace` into `buf`; `Ok(None)` when absent.
    fn get(&mut self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<Option<usize>>;
    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;
    /// Removing an absent key is not an error.
    fn remove(&mut self, namespace: &str, key: &str) -> Result<()>;
}

/// Pairing store over a raw byte-addressable backend.
pub struct RawStore<E: RawNv> {
    backend: E,
}

impl<E: RawNv> RawStore<E> {
    pub fn new(backend: E) -> Self {
        Self { backend }
    }
}

impl<E: RawNv> PairingStore for RawStore<E> {
    fn load(&mut self) -> Option<PairingRecord> {
        let mut blob = [0u8; PAIRING_BLOB_LEN];
        if let Err(e) = self.backend.read(0, &mut blob) {
            log::debug!("[RawStore::load] backend read failed: {}", e);
            return None;
        }
        if !crc::verify(&blob) {
            log::debug!("[RawStore::load] CRC mismatch, treating as unpaired");
            return None;
        }
        let mut record = PairingRecord {
            remote_address: [0u8; MAC_LEN],
            primary_key: [0u8; KEY_LEN],
            local_key: [0u8; KEY_LEN],
            remote_name: None,
        };
        record
            .remote_address
            .copy_from_slice(&blob[PAIRING_ADDRESS_OFFSET..PAIRING_ADDRESS_OFFSET + MAC_LEN]);
        record
            .primary_key
            .copy_from_slice(&blob[PAIRING_PRIMARY_OFFSET..PAIRING_PRIMARY_OFFSET + KEY_LEN]);
        record
            .local_key
            .copy_from_slice(&blob[PAIRING_LOCAL_OFFSET..PAIRING_LOCAL_OFFSET + KEY_LEN]);
        if record.remote_address == [0u8; MAC_LEN] {
            // All-zero address is the unbound sentinel.
            return None;
        }
        Some(record)
    }

    fn save(&mut self, record: &PairingRecord) -> Result<()> {
        let mut blob = [0u8; PAIRING_BLOB_LEN];
        blob[PAIRING_ADDRESS_OFFSET..PAIRING_ADDRESS_OFFSET + MAC_LEN]
            .copy_from_slice(&record.remote_address);
        blob[PAIRING_PRIMARY_OFFSET..PAIRING_PRIMARY_OFFSET + KEY_LEN]
            .copy_from_slice(&record.primary_key);
        blob[PAIRING_LOCAL_OFFSET..PAIRING_LOCAL_OFFSET + KEY_LEN]
            .copy_from_slice(&record.local_key);
        crc::append(&mut blob, PAIRING_CRC_OFFSET);
        self.backend.write(0, &blob)?;
        self.backend.commit()
    }

    fn erase(&mut self) -> Result<()> {
        // Zeros carry a mismatching CRC, so the blob reads back as unpaired.
        self.backend.write(0, &[0u8; PAIRING_BLOB_LEN])?;
        self.backend.commit()
    }
}

/// Pairing store over a key/value backend.
pub struct KvStore<K: KvNv> {
    backend: K,
}

impl<K: KvNv> KvStore<K> {
    pub fn new(backend: K) -> Self {
        Self { backend }
    }

    fn get_exact(&mut self, key: &str, buf: &mut [u8]) -> Option<()> {
        match self.backend.get(STORE_NAMESPACE, key, buf) {
            Ok(Some(n)) if n == buf.len() => Some(()),
            Ok(_) => None,
            Err(e) => {
                log::debug!("[KvStore::load] get '{}' failed: {}", key, e);
                None
            }
        }
    }
}

impl<K: KvNv> PairingStore for KvStore<K> {
    fn load(&mut self) -> Option<PairingRecord> {
        let mut record = PairingRecord {
            remote_address: [0u8; MAC_LEN],
            primary_key: [0u8; KEY_LEN],
            local_key: [0u8; KEY_LEN],
            remote_name: None,
        };
        let mut address = [0u8; MAC_LEN];
        self.get_exact(KEY_ADDRESS, &mut address)?;
        self.get_exact(KEY_PRIMARY, &mut record.primary_key)?;
        self.get_exact(KEY_LOCAL, &mut record.local_key)?;
        record.remote_address = address;
        let mut name = [0u8; u8::MAX as usize];
        if let Ok(Some(n)) = self.backend.get(STORE_NAMESPACE, KEY_NAME, &mut name) {
            if n > 0 {
                record.remote_name = Some(String::from_utf8_lossy(&name[..n]).into_owned());
            }
        }
        if record.remote_address == [0u8; MAC_LEN] {
            return None;
        }
        Some(record)
    }

    fn save(&mut self, record: &PairingRecord) -> Result<()> {
        self.backend
            .put(STORE_NAMESPACE, KEY_ADDRESS, &record.remote_address)?;
        self.backend
            .put(STORE_NAMESPACE, KEY_PRIMARY, &record.primary_key)?;
        self.backend
            .put(STORE_NAMESPACE, KEY_LOCAL, &record.local_key)?;
        if let Some(name) = &record.remote_name {
            self.backend
                .put(STORE_NAMESPACE, KEY_NAME, name.as_bytes())?;
        }
        Ok(())
    }

    fn erase(&mut self) -> Result<()> {
        self.backend.remove(STORE_NAMESPACE, KEY_ADDRESS)?;
        self.backend.remove(STORE_NAMESPACE, KEY_PRIMARY)?;
        self.backend.remove(STORE_NAMESPACE, KEY_LOCAL)?;
        self.backend.remove(STORE_NAMESPACE, KEY_NAME)?;
        Ok(())
    }
}

/// In-memory byte-addressable backend for hosts and tests.
pub struct MemoryEeprom {
    cells: [u8; PAIRING_BLOB_LEN],
}

impl Default for MemoryEeprom {
    fn default() -> Self {
        Self {
            cells: [0u8; PAIRING_BLOB_LEN],
        }
    }
}

impl MemoryEeprom {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawNv for MemoryEeprom {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len();
        if end > self.cells.len() {
            return Err(Error::PersistenceFailed);
        }
        buf.copy_from_slice(&self.cells[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset + data.len();
        if end > self.cells.len() {
            return Err(Error::PersistenceFailed);
        }
        self.cells[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// File-backed byte-addressable backend for hosts.
pub struct FileEeprom {
    path: PathBuf,
}

impl FileEeprom {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RawNv for FileEeprom {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let mut file = fs::File::open(&self.path).map_err(|_| Error::PersistenceFailed)?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| Error::PersistenceFailed)?;
        file.read_exact(buf).map_err(|_| Error::PersistenceFailed)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)
            .map_err(|_| Error::PersistenceFailed)?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|_| Error::PersistenceFailed)?;
        file.write_all(data).map_err(|_| Error::PersistenceFailed)
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory key/value backend for hosts and tests.
#[derive(Default)]
pub struct MemoryPreferences {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryPreferences {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvNv for MemoryPreferences {
    fn get(&mut self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.entries.get(&format!("{}/{}", namespace, key)) {
            Some(value) => {
                if value.len() > buf.len() {
                    return Err(Error::PersistenceFailed);
                }
                buf[..value.len()].copy_from_slice(value);
                Ok(Some(value.len()))
            }
            None => Ok(None),
        }
    }

    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .insert(format!("{}/{}", namespace, key), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<()> {
        self.entries.remove(&format!("{}/{}", namespace, key));
        Ok(())
    }
}
