//! Per-tenant record store: a memory-mapped vector column plus a JSON-lines
//! metadata column.
//!
//! Records are append-only. Ids are assigned `1..` in insertion order, so a
//! record's slot in the vector file is `id - 1` and lookups are O(1).
//! Deletions are tombstones; ids are never reused.
//!
//! # Storage Format
//!
//! `vectors.vec`:
//! - Header (16 bytes): magic, version, dimension, record count
//! - Records: `id: u32` followed by `dimension` f32 values, little-endian
//!
//! `records.jsonl`: one `{"id": .., "metadata": {..}}` object per line, in
//! the same order as the vector file.
//!
//! `tombstones.json`: sorted array of deleted ids.
//!
//! The header count is written last, after both columns are flushed. On
//! open, bytes past the header count in either column are leftovers of an
//! interrupted append and are truncated away.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::vector::codec::put_u32;
use crate::vector::filter::Metadata;
use crate::vector::types::{RecordId, VectorDimension};

pub const VECTORS_FILE: &str = "vectors.vec";
pub const RECORDS_FILE: &str = "records.jsonl";
pub const TOMBSTONES_FILE: &str = "tombstones.json";

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify vector storage files.
const MAGIC_BYTES: &[u8; 4] = b"RVEC";

const BYTES_PER_F32: usize = 4;
const BYTES_PER_ID: usize = 4;

/// Byte offset of the record count inside the header.
const COUNT_OFFSET: u64 = 12;

/// One line of the metadata column.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataRow {
    id: RecordId,
    metadata: Metadata,
}

/// A record about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// File lengths captured before an append, used to undo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendMark {
    vectors_len: u64,
    records_len: u64,
    count: usize,
}

impl AppendMark {
    /// Number of records that existed when the mark was taken.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Append-only record store of one tenant.
#[derive(Debug)]
pub struct RecordStore {
    dir: PathBuf,
    dimension: VectorDimension,
    /// Always mapped; remapped after every append or rollback.
    mmap: Mmap,
    count: usize,
    metadata: Vec<Metadata>,
    tombstones: BTreeSet<RecordId>,
    records_len: u64,
}

impl RecordStore {
    /// Opens the store in `dir`, creating empty column files if needed.
    ///
    /// An existing store with a different dimension fails with
    /// `DimensionMismatch`.
    pub fn open_or_create(dir: impl AsRef<Path>, dimension: VectorDimension) -> RagResult<Self> {
        let dir = dir.as_ref();
        match Self::open(dir)? {
            Some(store) if store.dimension != dimension => Err(RagError::DimensionMismatch {
                expected: store.dimension.get(),
                actual: dimension.get(),
            }),
            Some(store) => Ok(store),
            None => {
                fs::create_dir_all(dir).map_err(|e| RagError::storage(dir, e))?;
                let vectors_path = dir.join(VECTORS_FILE);
                let mut header = Vec::with_capacity(HEADER_SIZE);
                header.extend_from_slice(MAGIC_BYTES);
                put_u32(&mut header, STORAGE_VERSION);
                put_u32(&mut header, dimension.get() as u32);
                put_u32(&mut header, 0);
                fs::write(&vectors_path, &header).map_err(|e| RagError::storage(&vectors_path, e))?;

                let records_path = dir.join(RECORDS_FILE);
                File::create(&records_path).map_err(|e| RagError::storage(&records_path, e))?;

                Self::open(dir)?.ok_or_else(|| RagError::corrupted(dir, "store vanished after create"))
            }
        }
    }

    /// Opens an existing store. Returns `Ok(None)` if `dir` holds no store.
    pub fn open(dir: impl AsRef<Path>) -> RagResult<Option<Self>> {
        let dir = dir.as_ref().to_path_buf();
        let vectors_path = dir.join(VECTORS_FILE);
        if !vectors_path.exists() {
            return Ok(None);
        }

        let (dimension, count) = read_header(&vectors_path)?;
        let slot = slot_size(dimension);
        let expected_len = (HEADER_SIZE + count * slot) as u64;
        let actual_len = fs::metadata(&vectors_path)
            .map_err(|e| RagError::storage(&vectors_path, e))?
            .len();
        if actual_len < expected_len {
            return Err(RagError::corrupted(
                &vectors_path,
                format!("header claims {count} records but file holds {actual_len} bytes"),
            ));
        }
        if actual_len > expected_len {
            tracing::warn!(
                "Truncating {} bytes of an interrupted append in {}",
                actual_len - expected_len,
                vectors_path.display()
            );
            truncate(&vectors_path, expected_len)?;
        }

        let (metadata, records_len) = read_metadata(&dir.join(RECORDS_FILE), count)?;
        let tombstones = read_tombstones(&dir.join(TOMBSTONES_FILE))?;
        let mmap = map(&vectors_path)?;

        Ok(Some(Self {
            dir,
            dimension,
            mmap,
            count,
            metadata,
            tombstones,
            records_len,
        }))
    }

    /// Captures the current file lengths so a later append can be undone.
    #[must_use]
    pub fn mark(&self) -> AppendMark {
        AppendMark {
            vectors_len: (HEADER_SIZE + self.count * slot_size(self.dimension)) as u64,
            records_len: self.records_len,
            count: self.count,
        }
    }

    /// Appends a batch of records, all-or-nothing.
    ///
    /// Every embedding is validated before anything is written; on an I/O
    /// failure the files are restored to their pre-append state.
    pub fn append_batch(&mut self, records: &[NewRecord]) -> RagResult<Vec<RecordId>> {
        for record in records {
            self.dimension.validate_vector(&record.embedding)?;
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let first = self.count + 1;
        let last = self.count + records.len();
        if last > u32::MAX as usize {
            return Err(RagError::corrupted(self.vectors_path(), "record id space exhausted"));
        }

        let ids: Vec<RecordId> = (first..=last)
            .map(|i| RecordId::new_unchecked(i as u32))
            .collect();
        let mark = self.mark();

        // Everything fallible happens before the in-memory state changes, and
        // any failure restores the files to `mark`.
        let committed = self
            .write_columns(&ids, records)
            .and_then(|records_len| Ok((records_len, map(&self.vectors_path())?)));
        let (records_len, mmap) = match committed {
            Ok(committed) => committed,
            Err(e) => {
                if let Err(rollback_err) = self.truncate_to(mark) {
                    tracing::error!("Rollback after failed append also failed: {rollback_err}");
                }
                return Err(e);
            }
        };

        self.count = last;
        self.records_len += records_len;
        self.metadata
            .extend(records.iter().map(|r| r.metadata.clone()));
        self.mmap = mmap;

        Ok(ids)
    }

    /// Undoes every append made after `mark` was taken.
    pub fn rollback(&mut self, mark: AppendMark) -> RagResult<()> {
        if mark.count > self.count {
            return Err(RagError::corrupted(
                self.vectors_path(),
                format!("rollback mark at {} is ahead of {} records", mark.count, self.count),
            ));
        }
        self.truncate_to(mark)?;
        self.count = mark.count;
        self.records_len = mark.records_len;
        self.metadata.truncate(mark.count);
        self.tombstones.retain(|id| id.get() as usize <= mark.count);
        self.mmap = map(&self.vectors_path())?;
        Ok(())
    }

    /// Tombstones `ids`, returning how many were newly deleted.
    ///
    /// Unknown and already-deleted ids are ignored.
    pub fn delete(&mut self, ids: &[RecordId]) -> RagResult<usize> {
        let mut next = self.tombstones.clone();
        let deleted = ids
            .iter()
            .filter(|id| (id.get() as usize) <= self.count && next.insert(**id))
            .count();
        if deleted == 0 {
            return Ok(0);
        }

        let path = self.dir.join(TOMBSTONES_FILE);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(&next)
            .map_err(|e| RagError::corrupted(&path, format!("serialize tombstones: {e}")))?;
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| RagError::storage(&path, e))?;

        self.tombstones = next;
        Ok(deleted)
    }

    /// Reads the raw embedding of `id`.
    #[must_use]
    pub fn read_vector(&self, id: RecordId) -> Option<Vec<f32>> {
        let slot = self.slot_bytes(id)?;
        Some(
            slot[BYTES_PER_ID..]
                .chunks_exact(BYTES_PER_F32)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    #[must_use]
    pub fn metadata(&self, id: RecordId) -> Option<&Metadata> {
        self.metadata.get(id.get() as usize - 1)
    }

    #[must_use]
    pub fn is_deleted(&self, id: RecordId) -> bool {
        self.tombstones.contains(&id)
    }

    /// Whether `id` exists and is not tombstoned.
    #[must_use]
    pub fn is_live(&self, id: RecordId) -> bool {
        (id.get() as usize) <= self.count && !self.is_deleted(id)
    }

    /// Live record ids in ascending order.
    pub fn live_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        (1..=self.count as u32)
            .map(RecordId::new_unchecked)
            .filter(|id| !self.tombstones.contains(id))
    }

    /// Live records with their embeddings, in ascending id order.
    pub fn live_vectors(&self) -> Vec<(RecordId, Vec<f32>)> {
        self.live_ids()
            .filter_map(|id| self.read_vector(id).map(|v| (id, v)))
            .collect()
    }

    /// Live ids greater than `after`, the unindexed tail.
    pub fn live_ids_after(&self, after: u32) -> impl Iterator<Item = RecordId> + '_ {
        self.live_ids().skip_while(move |id| id.get() <= after)
    }

    /// Total records ever appended, tombstoned ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.count - self.tombstones.len()
    }

    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.tombstones.len()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Private helper methods

    fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    fn slot_bytes(&self, id: RecordId) -> Option<&[u8]> {
        let index = id.get() as usize - 1;
        if index >= self.count {
            return None;
        }
        let slot = slot_size(self.dimension);
        let start = HEADER_SIZE + index * slot;
        let bytes = self.mmap.get(start..start + slot)?;
        let stored = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        (stored == id.get()).then_some(bytes)
    }

    /// Writes both columns and commits the header count. Returns the number
    /// of metadata bytes appended.
    fn write_columns(&self, ids: &[RecordId], records: &[NewRecord]) -> RagResult<u64> {
        let vectors_path = self.vectors_path();
        let records_path = self.dir.join(RECORDS_FILE);

        let mut vector_bytes = Vec::with_capacity(records.len() * slot_size(self.dimension));
        let mut row_bytes = Vec::new();
        for (id, record) in ids.iter().zip(records) {
            vector_bytes.extend_from_slice(&id.to_bytes());
            for value in &record.embedding {
                vector_bytes.extend_from_slice(&value.to_le_bytes());
            }
            let row = MetadataRow {
                id: *id,
                metadata: record.metadata.clone(),
            };
            serde_json::to_writer(&mut row_bytes, &row)
                .map_err(|e| RagError::corrupted(&records_path, format!("serialize row: {e}")))?;
            row_bytes.push(b'\n');
        }

        append(&vectors_path, &vector_bytes)?;
        append(&records_path, &row_bytes)?;
        write_count(&vectors_path, self.count + records.len())?;
        Ok(row_bytes.len() as u64)
    }

    fn truncate_to(&self, mark: AppendMark) -> RagResult<()> {
        let vectors_path = self.vectors_path();
        write_count(&vectors_path, mark.count)?;
        truncate(&vectors_path, mark.vectors_len)?;
        truncate(&self.dir.join(RECORDS_FILE), mark.records_len)
    }
}

fn slot_size(dimension: VectorDimension) -> usize {
    BYTES_PER_ID + dimension.get() * BYTES_PER_F32
}

fn map(path: &Path) -> RagResult<Mmap> {
    let file = File::open(path).map_err(|e| RagError::storage(path, e))?;
    // The store is the only writer of its files and remaps after each change.
    unsafe { MmapOptions::new().map(&file) }.map_err(|e| RagError::storage(path, e))
}

fn append(path: &Path, bytes: &[u8]) -> RagResult<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| RagError::storage(path, e))?;
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|e| RagError::storage(path, e))
}

fn truncate(path: &Path, len: u64) -> RagResult<()> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(len))
        .map_err(|e| RagError::storage(path, e))
}

fn write_count(path: &Path, count: usize) -> RagResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| RagError::storage(path, e))?;
    file.seek(SeekFrom::Start(COUNT_OFFSET))
        .and_then(|_| file.write_all(&(count as u32).to_le_bytes()))
        .and_then(|()| file.flush())
        .map_err(|e| RagError::storage(path, e))
}

fn read_header(path: &Path) -> RagResult<(VectorDimension, usize)> {
    let mut bytes = [0u8; HEADER_SIZE];
    let mut file = File::open(path).map_err(|e| RagError::storage(path, e))?;
    file.read_exact(&mut bytes).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            RagError::corrupted(path, "file too small to contain header")
        }
        _ => RagError::storage(path, e),
    })?;
    if &bytes[0..4] != MAGIC_BYTES {
        return Err(RagError::corrupted(path, "invalid magic bytes"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != STORAGE_VERSION {
        return Err(RagError::corrupted(
            path,
            format!("unsupported storage version {version}, expected {STORAGE_VERSION}"),
        ));
    }
    let dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let dimension =
        VectorDimension::new(dim).map_err(|_| RagError::corrupted(path, "zero dimension"))?;
    let count = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    Ok((dimension, count))
}

/// Reads the first `count` metadata rows, truncating anything after them.
fn read_metadata(path: &Path, count: usize) -> RagResult<(Vec<Metadata>, u64)> {
    let file = File::open(path).map_err(|e| RagError::storage(path, e))?;
    let mut reader = BufReader::new(file);
    let mut rows = Vec::with_capacity(count);
    let mut consumed = 0u64;
    let mut line = String::new();

    while rows.len() < count {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| RagError::storage(path, e))?;
        if read == 0 || !line.ends_with('\n') {
            return Err(RagError::corrupted(
                path,
                format!("expected {count} metadata rows, found {}", rows.len()),
            ));
        }
        consumed += read as u64;

        let row: MetadataRow = serde_json::from_str(&line)
            .map_err(|e| RagError::corrupted(path, format!("row {}: {e}", rows.len() + 1)))?;
        if row.id.get() as usize != rows.len() + 1 {
            return Err(RagError::corrupted(
                path,
                format!("row {} has id {}", rows.len() + 1, row.id),
            ));
        }
        rows.push(row.metadata);
    }

    let total = fs::metadata(path)
        .map_err(|e| RagError::storage(path, e))?
        .len();
    if total > consumed {
        tracing::warn!(
            "Truncating {} bytes of an interrupted append in {}",
            total - consumed,
            path.display()
        );
        truncate(path, consumed)?;
    }

    Ok((rows, consumed))
}

fn read_tombstones(path: &Path) -> RagResult<BTreeSet<RecordId>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| RagError::corrupted(path, format!("invalid tombstones: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(RagError::storage(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::filter::MetadataValue;
    use tempfile::TempDir;

    fn record(embedding: Vec<f32>, tag: &str) -> NewRecord {
        let mut metadata = Metadata::new();
        metadata.insert("tag".to_string(), MetadataValue::from(tag));
        NewRecord {
            embedding,
            metadata,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(3).unwrap();
        let mut store = RecordStore::open_or_create(temp_dir.path(), dim).unwrap();
        assert!(store.is_empty());

        let ids = store
            .append_batch(&[record(vec![1.0, 2.0, 3.0], "a"), record(vec![4.0, 5.0, 6.0], "b")])
            .unwrap();
        assert_eq!(ids.iter().map(|id| id.get()).collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(store.read_vector(ids[1]).unwrap(), vec![4.0, 5.0, 6.0]);
        assert_eq!(store.metadata(ids[0]).unwrap()["tag"], MetadataValue::from("a"));
        assert!(store.read_vector(RecordId::new_unchecked(3)).is_none());
    }

    #[test]
    fn test_dimension_mismatch_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();
        let mut store = RecordStore::open_or_create(temp_dir.path(), dim).unwrap();
        store.append_batch(&[record(vec![1.0, 1.0], "ok")]).unwrap();
        let before = fs::read(temp_dir.path().join(VECTORS_FILE)).unwrap();

        let result = store.append_batch(&[record(vec![0.0, 0.0], "ok"), record(vec![1.0], "bad")]);
        assert!(matches!(result, Err(RagError::DimensionMismatch { expected: 2, actual: 1 })));
        assert_eq!(store.len(), 1);
        assert_eq!(fs::read(temp_dir.path().join(VECTORS_FILE)).unwrap(), before);
    }

    #[test]
    fn test_non_finite_embedding_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();
        let mut store = RecordStore::open_or_create(temp_dir.path(), dim).unwrap();
        store.append_batch(&[record(vec![1.0, 0.0], "ok")]).unwrap();

        let result = store.append_batch(&[
            record(vec![0.5, 0.5], "ok"),
            record(vec![f32::INFINITY, 0.0], "bad"),
        ]);
        assert!(matches!(result, Err(RagError::NonFiniteComponent { position: 0 })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_tracks_metadata_length() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();
        let mut store = RecordStore::open_or_create(temp_dir.path(), dim).unwrap();
        store.append_batch(&[record(vec![1.0, 0.0], "first")]).unwrap();
        store
            .append_batch(&[record(vec![0.0, 1.0], "second"), record(vec![1.0, 1.0], "third")])
            .unwrap();

        let on_disk = fs::metadata(temp_dir.path().join(RECORDS_FILE)).unwrap().len();
        assert_eq!(store.mark().records_len, on_disk);

        // A rollback to that mark after a further append restores it exactly.
        let mark = store.mark();
        store.append_batch(&[record(vec![2.0, 2.0], "undo")]).unwrap();
        store.rollback(mark).unwrap();
        let reopened = RecordStore::open(temp_dir.path()).unwrap().unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(fs::metadata(temp_dir.path().join(RECORDS_FILE)).unwrap().len(), on_disk);
    }

    #[test]
    fn test_short_header_is_corrupted() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();
        drop(RecordStore::open_or_create(temp_dir.path(), dim).unwrap());
        fs::write(temp_dir.path().join(VECTORS_FILE), b"RVEC").unwrap();

        assert!(matches!(
            RecordStore::open(temp_dir.path()),
            Err(RagError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_rollback_restores_previous_state() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();
        let mut store = RecordStore::open_or_create(temp_dir.path(), dim).unwrap();
        store.append_batch(&[record(vec![1.0, 0.0], "keep")]).unwrap();

        let mark = store.mark();
        store
            .append_batch(&[record(vec![0.0, 1.0], "drop"), record(vec![2.0, 2.0], "drop")])
            .unwrap();
        assert_eq!(store.len(), 3);

        store.rollback(mark).unwrap();
        assert_eq!(store.len(), 1);
        drop(store);

        let reopened = RecordStore::open(temp_dir.path()).unwrap().unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.live_ids().count(), 1);
        assert!(reopened.metadata(RecordId::new_unchecked(2)).is_none());
    }

    #[test]
    fn test_interrupted_append_is_truncated_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();
        {
            let mut store = RecordStore::open_or_create(temp_dir.path(), dim).unwrap();
            store.append_batch(&[record(vec![1.0, 2.0], "a")]).unwrap();
        }
        // Simulate a crash after the columns were written but before the count.
        append(&temp_dir.path().join(VECTORS_FILE), &[0u8; 12]).unwrap();
        append(&temp_dir.path().join(RECORDS_FILE), b"{\"id\":2,\"meta").unwrap();

        let store = RecordStore::open(temp_dir.path()).unwrap().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.read_vector(RecordId::new_unchecked(1)).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_tombstones_persist_and_ids_are_not_reused() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(1).unwrap();
        {
            let mut store = RecordStore::open_or_create(temp_dir.path(), dim).unwrap();
            store
                .append_batch(&[record(vec![1.0], "a"), record(vec![2.0], "b")])
                .unwrap();
            let one = RecordId::new_unchecked(1);
            assert_eq!(store.delete(&[one, one, RecordId::new_unchecked(9)]).unwrap(), 1);
            assert!(!store.is_live(one));
        }

        let mut store = RecordStore::open(temp_dir.path()).unwrap().unwrap();
        assert_eq!(store.live_count(), 1);
        assert_eq!(store.live_ids().map(|id| id.get()).collect::<Vec<_>>(), vec![2]);

        let ids = store.append_batch(&[record(vec![3.0], "c")]).unwrap();
        assert_eq!(ids[0].get(), 3);
        assert_eq!(
            store.live_ids_after(2).map(|id| id.get()).collect::<Vec<_>>(),
            vec![3]
        );
    }

    #[test]
    fn test_reopen_with_other_dimension_fails() {
        let temp_dir = TempDir::new().unwrap();
        RecordStore::open_or_create(temp_dir.path(), VectorDimension::new(4).unwrap()).unwrap();
        let result = RecordStore::open_or_create(temp_dir.path(), VectorDimension::new(8).unwrap());
        assert!(matches!(result, Err(RagError::DimensionMismatch { .. })));
        assert!(RecordStore::open(temp_dir.path().join("none")).unwrap().is_none());
    }
}
