//! File-based stores for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::{EventStore, OffsetStore};
use actusync_protocol::ActuationEvent;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based event store.
///
/// Events are appended to a JSON-lines log, one event per line. The set of
/// stored ids is loaded on open and kept in memory so duplicate inserts are
/// rejected without touching the file.
///
/// # Durability
///
/// Every successful `insert` ends with `File::sync_data()`. A batch torn by
/// a crash leaves an unterminated last line, which is discarded on the next
/// open. Any other unreadable line is reported as corruption.
///
/// # Example
///
/// ```no_run
/// use actusync_storage::{EventStore, FileEventStore};
/// use std::path::Path;
///
/// let store = FileEventStore::open(Path::new("events.jsonl")).unwrap();
/// println!("{} events stored", store.len().unwrap());
/// ```
#[derive(Debug)]
pub struct FileEventStore {
    path: PathBuf,
    inner: Mutex<EventLog>,
}

#[derive(Debug)]
struct EventLog {
    file: File,
    size: u64,
    ids: HashSet<String>,
    poisoned: bool,
}

impl FileEventStore {
    /// Opens or creates an event log at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a complete line in
    /// it is not a valid event.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let complete = match contents.rfind('\n') {
            Some(pos) => pos + 1,
            None => 0,
        };
        if complete < contents.len() {
            // Torn tail from an interrupted append.
            file.set_len(complete as u64)?;
            file.sync_all()?;
        }

        let mut ids = HashSet::new();
        for (index, line) in contents[..complete].lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: ActuationEvent = serde_json::from_str(line).map_err(|e| {
                StorageError::Corrupted(format!("{}: line {}: {e}", path.display(), index + 1))
            })?;
            ids.insert(event.id);
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(EventLog {
                file,
                size: complete as u64,
                ids,
                poisoned: false,
            }),
        })
    }

    /// Opens or creates an event log, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the log cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every stored event back from disk, in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or decoded.
    pub fn load_all(&self) -> StorageResult<Vec<ActuationEvent>> {
        let contents = fs::read_to_string(&self.path)?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }
}

impl EventStore for FileEventStore {
    fn insert(&self, events: &[ActuationEvent]) -> StorageResult<usize> {
        let mut log = self.inner.lock();
        if log.poisoned {
            return Err(StorageError::Corrupted(format!(
                "{}: a failed batch could not be rolled back, reopen the log",
                self.path.display()
            )));
        }

        let mut batch_ids = HashSet::new();
        let mut buffer = Vec::new();
        for event in events {
            if log.ids.contains(&event.id) || !batch_ids.insert(event.id.clone()) {
                continue;
            }
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }

        if batch_ids.is_empty() {
            return Ok(0);
        }

        let start = log.size;
        if let Err(err) = append_at(&mut log.file, start, &buffer) {
            // Drop whatever part of the batch reached the file. If that
            // fails too, the tail past `start` is unknown and no later
            // batch may be appended over it.
            if log.file.set_len(start).is_err() {
                log.poisoned = true;
            }
            return Err(err.into());
        }

        log.size += buffer.len() as u64;
        let inserted = batch_ids.len();
        log.ids.extend(batch_ids);
        Ok(inserted)
    }

    fn contains(&self, id: &str) -> StorageResult<bool> {
        Ok(self.inner.lock().ids.contains(id))
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.inner.lock().ids.len())
    }
}

fn append_at(file: &mut File, start: u64, buffer: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(start))?;
    file.write_all(buffer)?;
    file.sync_data()
}

/// A file-based offset store.
///
/// The cursor is kept as a decimal number in a small text file. Writes go to
/// a sibling temporary file which is synced and then renamed over the
/// original, so a crash leaves either the old or the new value.
#[derive(Debug)]
pub struct FileOffsetStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileOffsetStore {
    /// Creates a store backed by the given path.
    ///
    /// The file is created on the first write; until then the cursor reads as `0`.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl OffsetStore for FileOffsetStore {
    fn read(&self) -> StorageResult<u64> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let value = contents.trim();
        value.parse::<u64>().map_err(|e| {
            StorageError::Corrupted(format!(
                "{}: invalid offset {value:?}: {e}",
                self.path.display()
            ))
        })
    }

    fn write(&self, offset: u64) -> StorageResult<()> {
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            writeln!(file, "{offset}")?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        // Make the rename itself durable.
        #[cfg(unix)]
        {
            let dir = match self.path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            File::open(dir)?.sync_all()?;
        }

        Ok(())
    }
}
