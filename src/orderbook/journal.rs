//! Journal-backed persistent book
//!
//! Each book is an in-memory ordered image plus an append-only journal file.
//!
//! # Record format (fixed 45 bytes)
//! ```text
//! [op: u8][key: 32 bytes][value: 8 bytes][checksum: u32 BE]  // CRC32C over op+key+value
//! ```
//!
//! A write is appended to the journal before the image changes, so a failed write
//! leaves the book untouched. A failed append is cut back off the file, so it is
//! never replayed. On open the journal is replayed; a torn final record
//! is cut off, any other bad record is reported as corruption.

use crc32c::crc32c;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::orderbook::codec::{KEY_LEN, VALUE_LEN};
use crate::orderbook::store::{MemoryStore, OrderBookStore, OrderedStore, StoreError, StoredValue};
use crate::orderbook::types::OrderKey;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;
const BODY_LEN: usize = 1 + KEY_LEN + VALUE_LEN;
pub const RECORD_LEN: usize = BODY_LEN + 4;

pub const BID_JOURNAL: &str = "bids.journal";
pub const ASK_JOURNAL: &str = "asks.journal";

fn encode_record(op: u8, key: &OrderKey, value: &StoredValue) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    record[0] = op;
    record[1..1 + KEY_LEN].copy_from_slice(key.as_bytes());
    record[1 + KEY_LEN..BODY_LEN].copy_from_slice(value);
    let checksum = crc32c(&record[..BODY_LEN]);
    record[BODY_LEN..].copy_from_slice(&checksum.to_be_bytes());
    record
}

/// Outcome of replaying a journal file.
struct Replay {
    image: MemoryStore,
    valid_len: u64,
    records: u64,
}

fn replay(data: &[u8]) -> Result<Replay, StoreError> {
    let mut image = MemoryStore::new();
    let mut records = 0u64;
    let mut offset = 0usize;

    while offset + RECORD_LEN <= data.len() {
        let record = &data[offset..offset + RECORD_LEN];
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&record[BODY_LEN..]);
        let is_last = offset + RECORD_LEN == data.len();

        if crc32c(&record[..BODY_LEN]) != u32::from_be_bytes(stored) {
            if is_last {
                // crash mid-append
                break;
            }
            return Err(StoreError::Corrupt {
                offset: offset as u64,
                reason: "checksum mismatch".to_string(),
            });
        }

        let key = OrderKey::from_slice(&record[1..1 + KEY_LEN]).map_err(|e| StoreError::Corrupt {
            offset: offset as u64,
            reason: e.to_string(),
        })?;
        let mut value = [0u8; VALUE_LEN];
        value.copy_from_slice(&record[1 + KEY_LEN..BODY_LEN]);

        match record[0] {
            OP_PUT => image.apply_put(key, value),
            OP_DELETE => {
                image.apply_delete(&key);
            }
            op => {
                return Err(StoreError::Corrupt {
                    offset: offset as u64,
                    reason: format!("unknown op {}", op),
                })
            }
        }
        records += 1;
        offset += RECORD_LEN;
    }

    Ok(Replay {
        image,
        valid_len: offset as u64,
        records,
    })
}

/// Persistent ordered book.
pub struct JournalStore {
    image: MemoryStore,
    file: File,
    path: PathBuf,
    sync_writes: bool,
    records: u64,
}

impl JournalStore {
    /// Opens (or creates) the journal at `path` and replays it.
    pub fn open(path: impl Into<PathBuf>, sync_writes: bool) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let replay = replay(&data)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        if replay.valid_len < data.len() as u64 {
            warn!(
                "Dropping {} trailing bytes from torn journal {}",
                data.len() as u64 - replay.valid_len,
                path.display()
            );
            file.set_len(replay.valid_len)?;
        }

        info!(
            "Opened journal {} with {} live entries ({} records)",
            path.display(),
            replay.image.len(),
            replay.records
        );

        Ok(Self {
            image: replay.image,
            file,
            path,
            sync_writes,
            records: replay.records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records currently in the journal file, live or superseded.
    pub fn journal_records(&self) -> u64 {
        self.records
    }

    /// Length of the journal holding exactly the records applied to the image.
    fn committed_len(&self) -> u64 {
        self.records * RECORD_LEN as u64
    }

    fn append(&mut self, op: u8, key: &OrderKey, value: &StoredValue) -> Result<(), StoreError> {
        let record = encode_record(op, key, value);
        let written = self.file.write_all(&record).and_then(|_| {
            if self.sync_writes {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = written {
            self.truncate_to_committed();
            return Err(e.into());
        }
        self.records += 1;
        Ok(())
    }

    /// Drops whatever part of a failed append reached the file.
    fn truncate_to_committed(&self) {
        let committed = self.committed_len();
        let result = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|file| file.set_len(committed));
        if let Err(e) = result {
            warn!(
                "Could not cut journal {} back to {} bytes: {}",
                self.path.display(),
                committed,
                e
            );
        }
    }

    /// Rewrites the journal so it holds one record per live entry.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for (key, value) in self.image.iter() {
                tmp.write_all(&encode_record(OP_PUT, key, value))?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;

        debug!(
            "Compacted journal {} from {} to {} records",
            self.path.display(),
            self.records,
            self.image.len()
        );
        self.records = self.image.len() as u64;
        Ok(())
    }
}

impl OrderedStore for JournalStore {
    fn put(&mut self, key: OrderKey, value: StoredValue) -> Result<(), StoreError> {
        self.append(OP_PUT, &key, &value)?;
        self.image.apply_put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &OrderKey) -> Result<(), StoreError> {
        if !self.image.contains(key) {
            return Ok(());
        }
        self.append(OP_DELETE, key, &[0u8; VALUE_LEN])?;
        self.image.apply_delete(key);
        Ok(())
    }

    fn get(&self, key: &OrderKey) -> Option<StoredValue> {
        self.image.get(key)
    }

    fn first_after(&self, bound: Bound<&OrderKey>) -> Option<(OrderKey, StoredValue)> {
        self.image.first_after(bound)
    }

    fn last_before(&self, bound: Bound<&OrderKey>) -> Option<(OrderKey, StoredValue)> {
        self.image.last_before(bound)
    }

    fn len(&self) -> usize {
        self.image.len()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Opens `bids.journal` and `asks.journal` under `dir`.
pub fn open_books(
    dir: &Path,
    sync_writes: bool,
    compact: bool,
) -> Result<OrderBookStore<JournalStore>, StoreError> {
    let mut bids = JournalStore::open(dir.join(BID_JOURNAL), sync_writes)?;
    let mut asks = JournalStore::open(dir.join(ASK_JOURNAL), sync_writes)?;
    if compact {
        bids.compact()?;
        asks.compact()?;
    }
    Ok(OrderBookStore::new(bids, asks))
}
