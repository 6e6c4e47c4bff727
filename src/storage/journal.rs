//! File-backed merge journal.
//!
//! Merges are the only destructive operation in the engine, so they are
//! the only thing journaled. Every entry is written and synced to disk
//! before the merge executor touches any row, which makes a half-applied
//! merge recoverable by replay.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY: version 1B | length 4B LE | JSON | crc32 4B LE]
//! [ENTRY ...]
//! ```
//!
//! A torn final entry (crash mid-append) is tolerated: replay stops at
//! the first undecodable frame and the file is truncated back to the
//! last valid entry on open.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Read, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

use crate::entity::EntityId;
use crate::mergelog::{MergeLogEntry, MergeLogId};
use crate::storage::traits::{MergeLog, StorageError};

/// Magic bytes identifying a merge journal file.
pub const MAGIC: [u8; 4] = *b"CMRG";

/// Current frame format version.
const FORMAT_VERSION: u8 = 1;

/// Reject unreasonably large frames (corrupt length prefix).
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let len = data.len() as u32;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != FORMAT_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported journal version: {} (expected {FORMAT_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x}"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FORMAT_VERSION])?;
    Ok(())
}

fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}

fn io_err(e: IoError) -> StorageError {
    StorageError::BackendError(e.to_string())
}

fn lock_err() -> StorageError {
    StorageError::BackendError("journal lock poisoned".to_string())
}

/// Append-only merge journal backed by a file.
///
/// All entries are kept in memory for reads; the file is the durable
/// copy. Every append is fsynced before returning.
pub struct FileMergeLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    entries: RwLock<Vec<MergeLogEntry>>,
}

impl FileMergeLog {
    /// Open or create a journal file, replaying any existing entries.
    ///
    /// A torn final frame is discarded and the file truncated back to
    /// the end of the last valid entry.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let exists = path.exists() && std::fs::metadata(path).map_err(io_err)?.len() >= 5;

        let (entries, valid_len) = if exists {
            Self::replay(path).map_err(io_err)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(io_err)?;
            write_header(&mut file).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
            (Vec::new(), (MAGIC.len() + 1) as u64)
        };

        let file_len = std::fs::metadata(path).map_err(io_err)?.len();
        if file_len > valid_len {
            // Crash mid-append left a torn tail. Drop it.
            let file = OpenOptions::new().write(true).open(path).map_err(io_err)?;
            file.set_len(valid_len).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        let file = OpenOptions::new().append(true).open(path).map_err(io_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            entries: RwLock::new(entries),
        })
    }

    /// Journal file size in bytes.
    pub fn size_bytes(&self) -> Result<u64, StorageError> {
        Ok(std::fs::metadata(&self.path).map_err(io_err)?.len())
    }

    fn replay(path: &Path) -> IoResult<(Vec<MergeLogEntry>, u64)> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let _version = read_header(&mut reader)?;

        let mut entries = Vec::new();
        let mut valid_end = (MAGIC.len() + 1) as u64;
        loop {
            match decode::<MergeLogEntry>(&mut reader) {
                Ok(entry) => {
                    entries.push(entry);
                    valid_end = reader.stream_position()?;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(_) => break, // torn or corrupt tail, replay stops here
            }
        }
        Ok((entries, valid_end))
    }
}

impl MergeLog for FileMergeLog {
    fn append(&self, entry: MergeLogEntry) -> Result<(), StorageError> {
        let encoded = encode(&entry).map_err(io_err)?;
        {
            let mut writer = self.writer.lock().map_err(|_| lock_err())?;
            writer.write_all(&encoded).map_err(io_err)?;
            writer.flush().map_err(io_err)?;
            // Destructive merge steps run only after this returns.
            writer.get_ref().sync_all().map_err(io_err)?;
        }
        let mut entries = self.entries.write().map_err(|_| lock_err())?;
        entries.push(entry);
        Ok(())
    }

    fn get(&self, id: MergeLogId) -> Result<Option<MergeLogEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err())?;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    fn entries(&self) -> Result<Vec<MergeLogEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err())?;
        Ok(entries.clone())
    }

    fn entries_for(&self, entity_id: EntityId) -> Result<Vec<MergeLogEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err())?;
        Ok(entries
            .iter()
            .filter(|e| e.kept == entity_id || e.absorbed == entity_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::CanonicalEntity;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn sample_entry() -> MergeLogEntry {
        let mut snapshot = CanonicalEntity::new();
        snapshot.email = Some("absorbed@example.com".to_string());
        MergeLogEntry::new(EntityId::new(), snapshot, None, "tester")
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let entry = sample_entry();
        let encoded = encode(&entry).unwrap();
        let decoded: MergeLogEntry = decode(&mut Cursor::new(&encoded)).unwrap();
        assert_eq!(decoded.id, entry.id);
        assert_eq!(decoded.snapshot.email, entry.snapshot.email);
    }

    #[test]
    fn test_decode_detects_corruption() {
        let entry = sample_entry();
        let mut encoded = encode(&entry).unwrap();
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xFF;
        let result: IoResult<MergeLogEntry> = decode(&mut Cursor::new(&encoded));
        assert!(result.is_err());
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merges.journal");

        let first = sample_entry();
        let second = sample_entry();
        {
            let log = FileMergeLog::open(&path).unwrap();
            log.append(first.clone()).unwrap();
            log.append(second.clone()).unwrap();
            assert_eq!(log.entries().unwrap().len(), 2);
        }

        let log = FileMergeLog::open(&path).unwrap();
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first.id);
        assert_eq!(entries[1].id, second.id);
        assert_eq!(log.get(second.id).unwrap().unwrap().kept, second.kept);
    }

    #[test]
    fn test_entries_for_matches_both_sides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merges.journal");
        let log = FileMergeLog::open(&path).unwrap();

        let entry = sample_entry();
        let kept = entry.kept;
        let absorbed = entry.absorbed;
        log.append(entry).unwrap();

        assert_eq!(log.entries_for(kept).unwrap().len(), 1);
        assert_eq!(log.entries_for(absorbed).unwrap().len(), 1);
        assert!(log.entries_for(EntityId::new()).unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merges.journal");

        let entry = sample_entry();
        {
            let log = FileMergeLog::open(&path).unwrap();
            log.append(entry.clone()).unwrap();
        }
        let clean_len = std::fs::metadata(&path).unwrap().len();

        // Simulate a crash mid-append: half a frame at the tail.
        let tail = encode(&sample_entry()).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&tail[..tail.len() / 2]).unwrap();
        }

        let log = FileMergeLog::open(&path).unwrap();
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry.id);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);

        // Appends after recovery land on the truncated tail.
        let next = sample_entry();
        log.append(next.clone()).unwrap();
        drop(log);
        let log = FileMergeLog::open(&path).unwrap();
        assert_eq!(log.entries().unwrap().len(), 2);
        assert_eq!(log.entries().unwrap()[1].id, next.id);
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-journal");
        std::fs::write(&path, b"XXXX\x01garbage").unwrap();
        assert!(FileMergeLog::open(&path).is_err());
    }
}
