//! On-disk persistence: the append-only journal and the snapshot file.
//!
//! The journal is the write-ahead log: one record per committed mutation,
//! flushed and fsynced before the mutation is reported durable. The
//! snapshot is a full dump of all items in index order, written to a temp
//! file and renamed into place. Integers in both formats are host-endian;
//! this is a single-device store, not a portable interchange format.

use crate::error::{DbError, Result};
use crate::store::{MAX_ITEM, MAX_KEY};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Format version written as the first two bytes of the journal.
pub(crate) const JOURNAL_VERSION: u16 = 1;

/// Format version written as the first two bytes of the snapshot.
pub(crate) const SNAPSHOT_VERSION: u16 = 1;

/// Size of the version header.
const HEADER: u64 = 2;

/// Sanity bound for journal string fields (cmd and model names).
const MAX_NAME: usize = 256;

/// A change record replayed from the journal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JournalRecord {
    pub cmd: String,
    pub model: String,
    pub value: String,
}

/// The append-only change log.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    size: u64,
    /// When the current journal generation started (epoch ms).
    created: u64,
    /// A write failed; the next opportunity must snapshot instead.
    pub errored: bool,
}

impl Journal {
    /// Open the journal for appending, writing a fresh header if the file
    /// is new or empty.
    pub fn open(path: &Path, now: u64) -> Result<Journal> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| DbError::CantOpen {
                path: path.display().to_string(),
                source: e,
            })?;
        let size = file
            .metadata()
            .map_err(|e| DbError::CantRead {
                path: path.display().to_string(),
                source: e,
            })?
            .len();
        let mut journal = Journal {
            path: path.to_path_buf(),
            file,
            size,
            created: now,
            errored: false,
        };
        if size < HEADER {
            journal.write_header()?;
        }
        Ok(journal)
    }

    /// Append one change record, flushed and fsynced.
    pub fn append(&mut self, cmd: &str, model: &str, value: &str) -> Result<()> {
        if value.len() + 1 > MAX_ITEM {
            return Err(DbError::WontFit {
                size: value.len(),
                limit: MAX_ITEM,
            });
        }
        let mut buf = Vec::with_capacity(16 + cmd.len() + model.len() + value.len() + 3);
        let cmd_len = cmd.len() + 1;
        let model_len = model.len() + 1;
        let value_len = value.len() + 1;
        let total = 12 + cmd_len + model_len + value_len;
        buf.extend_from_slice(&(total as i32).to_ne_bytes());
        buf.extend_from_slice(&(cmd_len as i32).to_ne_bytes());
        buf.extend_from_slice(cmd.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&(model_len as i32).to_ne_bytes());
        buf.extend_from_slice(model.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&(value_len as i32).to_ne_bytes());
        buf.extend_from_slice(value.as_bytes());
        buf.push(0);

        self.write_synced(&buf).inspect_err(|_| {
            self.errored = true;
        })?;
        self.size += buf.len() as u64;
        Ok(())
    }

    /// Truncate back to a bare header, starting a new generation.
    pub fn reset(&mut self, now: u64) -> Result<()> {
        self.file.set_len(0).map_err(|e| self.write_err(e))?;
        self.size = 0;
        self.write_header()?;
        self.created = now;
        self.errored = false;
        Ok(())
    }

    /// True when no records follow the header.
    pub fn is_empty(&self) -> bool {
        self.size <= HEADER
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// When this journal generation started (epoch ms).
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Milliseconds since this journal generation started.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created)
    }

    fn write_header(&mut self) -> Result<()> {
        self.write_synced(&JOURNAL_VERSION.to_ne_bytes())?;
        self.size = HEADER;
        Ok(())
    }

    fn write_synced(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf).map_err(|e| self.write_err(e))?;
        self.file.flush().map_err(|e| self.write_err(e))?;
        self.file.sync_all().map_err(|e| self.write_err(e))?;
        Ok(())
    }

    fn write_err(&self, source: std::io::Error) -> DbError {
        DbError::CantWrite {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Read every well-formed record from a journal file. A malformed tail
/// stops the read; whatever parsed before it is returned along with a
/// description of the damage.
pub(crate) fn read_journal(path: &Path) -> Result<(Vec<JournalRecord>, Option<String>)> {
    let file = File::open(path).map_err(|e| DbError::CantOpen {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; 2];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(_) => return Ok((Vec::new(), None)),
    }
    let version = u16::from_ne_bytes(header);
    if version != JOURNAL_VERSION {
        return Err(DbError::BadFormat(format!(
            "journal version {version}, expected {JOURNAL_VERSION}"
        )));
    }

    let mut records = Vec::new();
    loop {
        let total = match read_i32(&mut reader) {
            Some(n) => n,
            None => break,
        };
        let parsed = read_record(&mut reader, total);
        match parsed {
            Some(record) => records.push(record),
            None => {
                let index = records.len();
                return Ok((
                    records,
                    Some(format!("malformed journal record at index {}", index)),
                ));
            }
        }
    }
    Ok((records, None))
}

fn read_record(reader: &mut impl Read, total: i32) -> Option<JournalRecord> {
    if total < 12 || total as usize > 12 + 2 * MAX_NAME + MAX_ITEM {
        return None;
    }
    let cmd = read_field(reader, MAX_NAME)?;
    let model = read_field(reader, MAX_NAME)?;
    let value = read_field(reader, MAX_ITEM)?;
    if 12 + cmd.len() + model.len() + value.len() + 3 != total as usize {
        return None;
    }
    Some(JournalRecord { cmd, model, value })
}

/// One NUL-terminated length-prefixed string.
fn read_field(reader: &mut impl Read, max: usize) -> Option<String> {
    let len = read_i32(reader)?;
    if len < 1 || len as usize > max {
        return None;
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).ok()?;
    if buf.pop() != Some(0) {
        return None;
    }
    String::from_utf8(buf).ok()
}

fn read_i32(reader: &mut impl Read) -> Option<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).ok()?;
    Some(i32::from_ne_bytes(buf))
}

fn read_i64(reader: &mut impl Read) -> Option<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).ok()?;
    Some(i64::from_ne_bytes(buf))
}

/// Write a snapshot of `items` (key, serialized value, in index order) to
/// `path.save`, then rename it over `path`. Death before the rename
/// leaves the previous snapshot intact.
pub(crate) fn write_snapshot<'a>(
    path: &Path,
    items: impl Iterator<Item = (&'a str, &'a str)>,
) -> Result<()> {
    let save = save_path(path);
    let file = File::create(&save).map_err(|e| DbError::CantOpen {
        path: save.display().to_string(),
        source: e,
    })?;
    let write_err = |e| DbError::CantWrite {
        path: save.display().to_string(),
        source: e,
    };

    let mut writer = BufWriter::new(file);
    writer
        .write_all(&SNAPSHOT_VERSION.to_ne_bytes())
        .map_err(write_err)?;
    for (key, value) in items {
        if key.len() > MAX_KEY {
            return Err(DbError::BadState(format!("key too long: {key}")));
        }
        if value.len() > MAX_ITEM {
            return Err(DbError::WontFit {
                size: value.len(),
                limit: MAX_ITEM,
            });
        }
        writer
            .write_all(&(key.len() as i64).to_ne_bytes())
            .map_err(write_err)?;
        writer.write_all(key.as_bytes()).map_err(write_err)?;
        writer
            .write_all(&(value.len() as i64).to_ne_bytes())
            .map_err(write_err)?;
        writer.write_all(value.as_bytes()).map_err(write_err)?;
    }
    writer.flush().map_err(write_err)?;
    writer
        .into_inner()
        .map_err(|e| write_err(e.into_error()))?
        .sync_all()
        .map_err(write_err)?;

    std::fs::rename(&save, path).map_err(|e| DbError::CantWrite {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load all `(key, serialized value)` records from a snapshot file.
pub(crate) fn read_snapshot(path: &Path) -> Result<Vec<(String, String)>> {
    let file = File::open(path).map_err(|e| DbError::CantOpen {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; 2];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(_) => return Ok(Vec::new()),
    }
    let version = u16::from_ne_bytes(header);
    if version != SNAPSHOT_VERSION {
        return Err(DbError::BadFormat(format!(
            "snapshot version {version}, expected {SNAPSHOT_VERSION}"
        )));
    }

    let mut items = Vec::new();
    loop {
        let key = match read_sized(&mut reader, MAX_KEY, items.len())? {
            Some(key) => key,
            None => break,
        };
        let value = read_sized(&mut reader, MAX_ITEM, items.len())?.ok_or_else(|| {
            DbError::BadFormat(format!("snapshot truncated at record {}", items.len()))
        })?;
        items.push((key, value));
    }
    Ok(items)
}

fn read_sized(reader: &mut impl Read, max: usize, index: usize) -> Result<Option<String>> {
    let len = match read_i64(reader) {
        Some(len) => len,
        None => return Ok(None),
    };
    if len < 0 || len as usize > max {
        return Err(DbError::BadFormat(format!(
            "snapshot record {index}: length {len} out of bounds"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).map_err(|_| {
        DbError::BadFormat(format!("snapshot truncated at record {index}"))
    })?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| DbError::BadFormat(format!("snapshot record {index}: invalid utf-8")))
}

/// The temp file used while writing a snapshot.
pub(crate) fn save_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".save");
    PathBuf::from(name)
}

/// The journal that shadows a snapshot path.
pub(crate) fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".jnl");
    PathBuf::from(name)
}
