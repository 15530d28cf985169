//! Append-only record logs and the persistent multimaps built on them.
//!
//! A log is a sequence of `u32` little-endian length prefixes, each followed
//! by one `bincode` record. Logs are replayed into memory on first access; a
//! truncated or undecodable record is a corruption error.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::IndexError;

/// Upper bound for one record; anything larger is treated as corruption.
const MAX_RECORD_BYTES: u64 = 1024 * 1024;

fn bincode_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

#[derive(Debug, Clone)]
pub(crate) struct RecordLog {
    path: PathBuf,
}

impl RecordLog {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn writer(&self) -> Result<RecordWriter, IndexError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| IndexError::io(&self.path, err))?;
        Ok(RecordWriter {
            path: self.path.clone(),
            out: BufWriter::new(file),
        })
    }

    /// Every record in the log. A missing file is an empty log.
    pub(crate) fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, IndexError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(IndexError::io(&self.path, err)),
        };

        let mut records = Vec::new();
        let mut rest = bytes.as_slice();
        while !rest.is_empty() {
            let Some((len, tail)) = rest.split_first_chunk::<4>() else {
                return Err(self.corrupt("truncated length prefix"));
            };
            let len = u32::from_le_bytes(*len) as u64;
            if len > MAX_RECORD_BYTES {
                return Err(self.corrupt(format!("record of {len} bytes exceeds the limit")));
            }
            let len = len as usize;
            if tail.len() < len {
                return Err(self.corrupt("truncated record"));
            }
            let (record, tail) = tail.split_at(len);
            let record = bincode_options()
                .with_limit(MAX_RECORD_BYTES)
                .deserialize(record)
                .map_err(|err| self.corrupt(err.to_string()))?;
            records.push(record);
            rest = tail;
        }
        Ok(records)
    }

    fn corrupt(&self, message: impl Into<String>) -> IndexError {
        IndexError::Corrupt {
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

pub(crate) struct RecordWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl RecordWriter {
    pub(crate) fn push<T: Serialize>(&mut self, record: &T) -> Result<(), IndexError> {
        let bytes = bincode_options().serialize(record)?;
        let len = u32::try_from(bytes.len())
            .ok()
            .filter(|len| u64::from(*len) <= MAX_RECORD_BYTES)
            .ok_or_else(|| IndexError::Corrupt {
                path: self.path.clone(),
                message: format!("record of {} bytes exceeds the limit", bytes.len()),
            })?;
        self.out
            .write_all(&len.to_le_bytes())
            .and_then(|()| self.out.write_all(&bytes))
            .map_err(|err| IndexError::io(&self.path, err))
    }

    pub(crate) fn flush(&mut self) -> Result<(), IndexError> {
        self.out
            .flush()
            .map_err(|err| IndexError::io(&self.path, err))
    }

    /// Flush and fsync.
    pub(crate) fn finish(mut self) -> Result<(), IndexError> {
        self.flush()?;
        self.out
            .get_ref()
            .sync_all()
            .map_err(|err| IndexError::io(&self.path, err))
    }
}

/// `key -> {value}` map persisted as a log of `(key, value)` pairs.
pub(crate) struct PersistentMap {
    log: RecordLog,
    entries: Option<BTreeMap<String, BTreeSet<String>>>,
    writer: Option<RecordWriter>,
}

impl PersistentMap {
    /// A map whose log is replayed on first access.
    pub(crate) fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            log: RecordLog::new(path),
            entries: None,
            writer: None,
        }
    }

    /// A new, empty map. The log file is created right away.
    pub(crate) fn create(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let log = RecordLog::new(path);
        let writer = log.writer()?;
        Ok(Self {
            log,
            entries: Some(BTreeMap::new()),
            writer: Some(writer),
        })
    }

    fn entries(&mut self) -> Result<&mut BTreeMap<String, BTreeSet<String>>, IndexError> {
        let entries = match self.entries.take() {
            Some(entries) => entries,
            None => {
                let mut entries: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
                for (key, value) in self.log.read_all::<(String, String)>()? {
                    entries.entry(key).or_default().insert(value);
                }
                entries
            }
        };
        Ok(self.entries.insert(entries))
    }

    pub(crate) fn contains_key(&mut self, key: &str) -> Result<bool, IndexError> {
        Ok(self.entries()?.contains_key(key))
    }

    pub(crate) fn contains(&mut self, key: &str, value: &str) -> Result<bool, IndexError> {
        Ok(self
            .entries()?
            .get(key)
            .is_some_and(|values| values.contains(value)))
    }

    pub(crate) fn get(&mut self, key: &str) -> Result<BTreeSet<String>, IndexError> {
        Ok(self.entries()?.get(key).cloned().unwrap_or_default())
    }

    pub(crate) fn keys(&mut self) -> Result<BTreeSet<String>, IndexError> {
        Ok(self.entries()?.keys().cloned().collect())
    }

    /// Add `value` under `key`; only new pairs reach the log. Returns whether
    /// the pair was new.
    pub(crate) fn insert(&mut self, key: &str, value: &str) -> Result<bool, IndexError> {
        if self.contains(key, value)? {
            return Ok(false);
        }
        if self.writer.is_none() {
            self.writer = Some(self.log.writer()?);
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.push(&(key, value))?;
        }
        self.entries()?
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string());
        Ok(true)
    }

    pub(crate) fn flush(&mut self) -> Result<(), IndexError> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Flush, fsync and release the log file. Later inserts reopen it.
    pub(crate) fn sync(&mut self) -> Result<(), IndexError> {
        match self.writer.take() {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }
}
