// File-backed document store: one JSON-lines file per collection, guarded by advisory locks.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::document::{Document, Documents, Filter};
use crate::core::error::{Error, ErrorKind};
use crate::core::key::{DocumentKey, KeyGenerator};
use crate::core::store::{DocumentStore, duplicate_error, unique_conflict, validate_name};

const COLLECTION_EXT: &str = "jsonl";
const INDEX_SUFFIX: &str = ".index.json";

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    keys: KeyGenerator,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct IndexManifest {
    unique: Vec<String>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to prepare store directory")
                .with_path(&root)
                .with_source(err)
        })?;
        let meta = fs::metadata(&root).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_path(&root)
                .with_source(err)
        })?;
        if !meta.is_dir() {
            return Err(Error::new(ErrorKind::Io)
                .with_message("store root is not a directory")
                .with_path(&root));
        }
        Ok(Self {
            root,
            keys: KeyGenerator::new()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn database_dir(&self, database: &str) -> Result<PathBuf, Error> {
        validate_name("database", database)?;
        Ok(self.root.join(database))
    }

    fn collection_path(&self, database: &str, collection: &str) -> Result<PathBuf, Error> {
        validate_name("collection", collection)?;
        Ok(self
            .database_dir(database)?
            .join(format!("{collection}.{COLLECTION_EXT}")))
    }

    fn index_path(&self, database: &str, collection: &str) -> Result<PathBuf, Error> {
        validate_name("collection", collection)?;
        Ok(self
            .database_dir(database)?
            .join(format!("{collection}{INDEX_SUFFIX}")))
    }

    /// Opens (creating if needed) the collection file and takes the exclusive writer lock.
    fn lock_for_write(&self, database: &str, collection: &str) -> Result<WriteLock, Error> {
        let dir = self.database_dir(database)?;
        fs::create_dir_all(&dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to create database directory")
                .with_path(&dir)
                .with_source(err)
        })?;
        let path = self.collection_path(database, collection)?;
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to open collection")
                    .with_path(&path)
                    .with_source(err)
            })?;
        file.lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock collection")
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(WriteLock { file, path })
    }
}

impl DocumentStore for FileStore {
    fn describe(&self) -> String {
        format!("file:{}", self.root.display())
    }

    fn list_collections(&self, database: &str) -> Result<Vec<String>, Error> {
        let dir = self.database_dir(database)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::new(io_error_kind(&err))
                    .with_message("failed to read database directory")
                    .with_path(&dir)
                    .with_source(err));
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read database directory entry")
                    .with_path(&dir)
                    .with_source(err)
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(COLLECTION_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_collection(&self, database: &str, collection: &str) -> Result<(), Error> {
        let dir = self.database_dir(database)?;
        let path = self.collection_path(database, collection)?;
        fs::create_dir_all(&dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to create database directory")
                .with_path(&dir)
                .with_source(err)
        })?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file.sync_all().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to sync new collection")
                    .with_path(&path)
                    .with_source(err)
            }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::new(ErrorKind::Conflict)
                    .with_message(format!("collection {database}.{collection} already exists"))
                    .with_path(&path))
            }
            Err(err) => Err(Error::new(io_error_kind(&err))
                .with_message("failed to create collection")
                .with_path(&path)
                .with_source(err)),
        }
    }

    fn create_unique_index(
        &self,
        database: &str,
        collection: &str,
        field: &str,
    ) -> Result<(), Error> {
        let lock = self.lock_for_write(database, collection)?;
        let index_path = self.index_path(database, collection)?;
        let mut manifest = read_index(&index_path)?;
        if manifest.unique.iter().any(|existing| existing == field) {
            return Ok(());
        }

        let wanted = vec![field.to_string()];
        let mut seen: Vec<Document> = Vec::new();
        for document in scan(lock.reopen()?, &lock.path) {
            let document = document?;
            if seen
                .iter()
                .any(|earlier| unique_conflict(&wanted, earlier, &document.body).is_some())
            {
                return Err(Error::new(ErrorKind::Conflict)
                    .with_message(format!(
                        "existing documents share a value for {field:?}; cannot build unique index"
                    ))
                    .with_path(&lock.path));
            }
            seen.push(document);
        }

        manifest.unique.push(field.to_string());
        write_index(&index_path, &manifest)
    }

    fn find(&self, database: &str, collection: &str, filter: Filter) -> Result<Documents, Error> {
        let path = self.collection_path(database, collection)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Documents::from_vec(Vec::new()));
            }
            Err(err) => {
                return Err(Error::new(io_error_kind(&err))
                    .with_message("failed to open collection")
                    .with_path(&path)
                    .with_source(err));
            }
        };
        file.lock_shared().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock collection for reading")
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(Documents::new(scan(file, &path)).filtered(filter))
    }

    fn insert_one(
        &self,
        database: &str,
        collection: &str,
        body: Map<String, Value>,
    ) -> Result<DocumentKey, Error> {
        let mut lock = self.lock_for_write(database, collection)?;
        let manifest = read_index(&self.index_path(database, collection)?)?;
        if !manifest.unique.is_empty() {
            for existing in scan(lock.reopen()?, &lock.path) {
                let existing = existing?;
                if let Some(field) = unique_conflict(&manifest.unique, &existing, &body) {
                    return Err(duplicate_error(field, &body).with_path(&lock.path));
                }
            }
        }

        let document = Document::new(self.keys.next_key(), body);
        let mut line = serde_json::to_vec(&document.to_json()).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode document")
                .with_source(err)
        })?;
        line.push(b'\n');
        lock.append(&line)?;
        Ok(document.key)
    }
}

struct WriteLock {
    file: File,
    path: PathBuf,
}

impl WriteLock {
    /// Independent read handle; the exclusive lock stays with `self.file`.
    fn reopen(&self) -> Result<File, Error> {
        File::open(&self.path).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to reopen collection")
                .with_path(&self.path)
                .with_source(err)
        })
    }

    fn append(&mut self, line: &[u8]) -> Result<(), Error> {
        let io_err = |err: io::Error, path: &Path| {
            Error::new(ErrorKind::Io)
                .with_message("failed to append document")
                .with_path(path)
                .with_source(err)
        };
        let len = self
            .file
            .metadata()
            .map_err(|err| io_err(err, &self.path))?
            .len();
        let end = complete_len(&mut self.file, len).map_err(|err| io_err(err, &self.path))?;
        let mut pending = Vec::with_capacity(line.len() + 1);
        if end < len {
            // Same rule as `Scan`: an unterminated tail that parses is a record readers
            // already see, so it only needs its newline. Anything else is torn.
            let mut tail = vec![0u8; (len - end) as usize];
            self.file
                .seek(SeekFrom::Start(end))
                .and_then(|_| self.file.read_exact(&mut tail))
                .map_err(|err| io_err(err, &self.path))?;
            if parse_line(trim_line(&tail)).is_ok() {
                tracing::warn!(
                    path = %self.path.display(),
                    offset = end,
                    "terminating unterminated trailing record"
                );
                pending.push(b'\n');
            } else {
                tracing::warn!(
                    path = %self.path.display(),
                    offset = end,
                    "truncating torn trailing record"
                );
                self.file
                    .set_len(end)
                    .map_err(|err| io_err(err, &self.path))?;
            }
        }
        pending.extend_from_slice(line);
        self.file
            .write_all(&pending)
            .and_then(|_| self.file.sync_data())
            .map_err(|err| io_err(err, &self.path))
    }
}

/// Length of the prefix of the file that ends in a newline.
fn complete_len(file: &mut File, len: u64) -> io::Result<u64> {
    let mut end = len;
    let mut chunk = [0u8; 4096];
    while end > 0 {
        let start = end.saturating_sub(chunk.len() as u64);
        let window = &mut chunk[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(window)?;
        if let Some(pos) = window.iter().rposition(|b| *b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Line scanner over a collection file. Holds the file (and any lock on it) until dropped.
struct Scan {
    reader: BufReader<File>,
    path: PathBuf,
    offset: u64,
    buf: Vec<u8>,
    done: bool,
}

fn scan(file: File, path: &Path) -> Scan {
    Scan {
        reader: BufReader::new(file),
        path: path.to_path_buf(),
        offset: 0,
        buf: Vec::new(),
        done: false,
    }
}

impl Iterator for Scan {
    type Item = Result<Document, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            let line_offset = self.offset;
            let read = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(read) => read,
                Err(err) => {
                    self.done = true;
                    return Some(Err(Error::new(ErrorKind::Io)
                        .with_message("failed to read collection")
                        .with_path(&self.path)
                        .with_offset(line_offset)
                        .with_source(err)));
                }
            };
            if read == 0 {
                self.done = true;
                break;
            }
            self.offset += read as u64;
            let terminated = self.buf.last() == Some(&b'\n');
            let line = trim_line(&self.buf);
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(document) => return Some(Ok(document)),
                Err(_) if !terminated => {
                    tracing::warn!(
                        path = %self.path.display(),
                        offset = line_offset,
                        "skipping torn trailing record"
                    );
                    self.done = true;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.with_path(&self.path).with_offset(line_offset)));
                }
            }
        }
        None
    }
}

impl Drop for Scan {
    fn drop(&mut self) {
        let _ = self.reader.get_ref().unlock();
    }
}

fn parse_line(line: &[u8]) -> Result<Document, Error> {
    serde_json::from_slice::<Value>(line)
        .map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("unreadable document line")
                .with_source(err)
        })
        .and_then(Document::from_json)
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &buf[..end]
}

fn read_index(path: &Path) -> Result<IndexManifest, Error> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(IndexManifest::default()),
        Err(err) => {
            return Err(Error::new(io_error_kind(&err))
                .with_message("failed to read index manifest")
                .with_path(path)
                .with_source(err));
        }
    };
    serde_json::from_slice(&bytes).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("invalid index manifest")
            .with_path(path)
            .with_source(err)
    })
}

fn write_index(path: &Path, manifest: &IndexManifest) -> Result<(), Error> {
    let bytes = serde_json::to_vec_pretty(manifest).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode index manifest")
            .with_source(err)
    })?;
    let tmp = path.with_extension("json.tmp");
    let write = || -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|err| {
        Error::new(io_error_kind(&err))
            .with_message("failed to write index manifest")
            .with_path(path)
            .with_source(err)
    })
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    io_error_kind(err)
}
