//! A keyed JSON document persisted in a single file.
//!
//! The whole document (one JSON object, key → value) lives in memory under a
//! reader/writer lock; a separate mutex serializes physical file writes and
//! reloads so they can never interleave destructively. Writes are
//! deep-equality checked: setting a key to its current value touches neither
//! the disk nor the change channel, which keeps external watchers and our
//! own reload cycle from feeding back on no-op writes.
//!
//! External modifications are reconciled through [`DocumentFile::reload`],
//! gated on the file's modification time. The post-persist mtime is recorded
//! so a reload triggered by our own write reads as "no change".

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::infra::error::InfraError;
use crate::infra::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "infra::file::document";
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Keys added, removed, or changed by one write or reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

struct FileState {
    last_modified: Option<SystemTime>,
}

pub struct DocumentFile {
    path: PathBuf,
    doc: RwLock<BTreeMap<String, Value>>,
    file_lock: Mutex<FileState>,
    changes: broadcast::Sender<ChangeSet>,
}

impl DocumentFile {
    /// Load the document from `path`. A missing or empty file is an empty
    /// store; a file that exists but does not parse is a fatal error, left
    /// to the caller to treat as a startup failure.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, InfraError> {
        let path = path.into();
        let doc = read_document(&path)?.unwrap_or_default();
        let last_modified = modification_time(&path);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            path,
            doc: RwLock::new(doc),
            file_lock: Mutex::new(FileState { last_modified }),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe to the structured diffs emitted by writes and reloads.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes.subscribe()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, InfraError> {
        let doc = rw_read(&self.doc, SOURCE, "get");
        match doc.get(key) {
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|err| {
                InfraError::serialization(format!("value under `{key}` is malformed: {err}"))
            }),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        rw_read(&self.doc, SOURCE, "contains_key").contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        rw_read(&self.doc, SOURCE, "keys").keys().cloned().collect()
    }

    /// Snapshot of every `(key, value)` pair.
    pub fn entries(&self) -> Vec<(String, Value)> {
        rw_read(&self.doc, SOURCE, "entries")
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.doc, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upsert one key. Returns whether anything was actually written.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<bool, InfraError> {
        let value = serde_json::to_value(value)
            .map_err(|err| InfraError::serialization(err.to_string()))?;
        let changes = self.set_many(vec![(key.to_string(), value)])?;
        Ok(!changes.is_empty())
    }

    /// Upsert a batch of keys with a single persist and a single aggregated
    /// notification. Unchanged values are skipped.
    pub fn set_many(&self, pairs: Vec<(String, Value)>) -> Result<ChangeSet, InfraError> {
        let mut state = mutex_lock(&self.file_lock, SOURCE, "set_many");

        let mut changeset = ChangeSet::default();
        {
            let mut doc = rw_write(&self.doc, SOURCE, "set_many");
            for (key, value) in pairs {
                match doc.get(&key) {
                    Some(existing) if *existing == value => {}
                    Some(_) => {
                        doc.insert(key.clone(), value);
                        changeset.changed.push(key);
                    }
                    None => {
                        doc.insert(key.clone(), value);
                        changeset.added.push(key);
                    }
                }
            }
        }

        if changeset.is_empty() {
            return Ok(changeset);
        }

        self.persist_locked(&mut state)?;
        let _ = self.changes.send(changeset.clone());
        Ok(changeset)
    }

    /// Remove one key if present. Returns whether it was.
    pub fn remove(&self, key: &str) -> Result<bool, InfraError> {
        let changes = self.remove_many(&[key.to_string()])?;
        Ok(!changes.is_empty())
    }

    /// Remove a batch of keys with a single persist. Absent keys are
    /// ignored.
    pub fn remove_many(&self, keys: &[String]) -> Result<ChangeSet, InfraError> {
        let mut state = mutex_lock(&self.file_lock, SOURCE, "remove_many");

        let mut changeset = ChangeSet::default();
        {
            let mut doc = rw_write(&self.doc, SOURCE, "remove_many");
            for key in keys {
                if doc.remove(key).is_some() {
                    changeset.removed.push(key.clone());
                }
            }
        }

        if changeset.is_empty() {
            return Ok(changeset);
        }

        self.persist_locked(&mut state)?;
        let _ = self.changes.send(changeset.clone());
        Ok(changeset)
    }

    /// Reconcile with the file on disk.
    ///
    /// Unless `force`d, a file whose mtime has not advanced past the last
    /// load is skipped. A missing or unreadable file, or one mid-rewrite by
    /// another process, counts as "no change this cycle" and will be
    /// retried on the next poll. When the parsed document differs from the
    /// in-memory one, the swap is atomic under the writer lock and the diff
    /// is broadcast.
    pub fn reload(&self, force: bool) -> ChangeSet {
        let mut state = mutex_lock(&self.file_lock, SOURCE, "reload");

        let modified = modification_time(&self.path);
        if !force {
            if let (Some(modified), Some(last)) = (modified, state.last_modified) {
                if modified <= last {
                    return ChangeSet::default();
                }
            }
        }

        let new_doc = match read_document(&self.path) {
            Ok(Some(doc)) => doc,
            Ok(None) => return ChangeSet::default(),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "reload failed; treating as no change this cycle"
                );
                return ChangeSet::default();
            }
        };
        state.last_modified = modified;

        let changeset = {
            let doc = rw_read(&self.doc, SOURCE, "reload.diff");
            diff_documents(&doc, &new_doc)
        };
        if changeset.is_empty() {
            return changeset;
        }

        *rw_write(&self.doc, SOURCE, "reload.swap") = new_doc;
        debug!(
            path = %self.path.display(),
            added = changeset.added.len(),
            removed = changeset.removed.len(),
            changed = changeset.changed.len(),
            "reloaded externally modified content file"
        );
        let _ = self.changes.send(changeset.clone());
        changeset
    }

    /// Write the whole document to disk. Callers must hold `file_lock`; the
    /// recorded post-write mtime is what keeps the next poll from treating
    /// our own write as an external change.
    fn persist_locked(&self, state: &mut FileState) -> Result<(), InfraError> {
        let snapshot = rw_read(&self.doc, SOURCE, "persist").clone();

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(tmp.as_file(), &snapshot)
            .map_err(|err| InfraError::serialization(err.to_string()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| InfraError::Io(err.error))?;

        state.last_modified = modification_time(&self.path);
        Ok(())
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn read_document(path: &Path) -> Result<Option<BTreeMap<String, Value>>, InfraError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| InfraError::malformed_document(path.display().to_string(), err.to_string()))
}

fn diff_documents(old: &BTreeMap<String, Value>, new: &BTreeMap<String, Value>) -> ChangeSet {
    let mut changeset = ChangeSet::default();
    for (key, value) in new {
        match old.get(key) {
            None => changeset.added.push(key.clone()),
            Some(existing) if existing != value => changeset.changed.push(key.clone()),
            Some(_) => {}
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changeset.removed.push(key.clone());
        }
    }
    changeset
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn temp_doc() -> (tempfile::TempDir, DocumentFile) {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc = DocumentFile::open(dir.path().join("content.json")).expect("open");
        (dir, doc)
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let (_dir, doc) = temp_doc();
        assert!(doc.is_empty());
        assert_eq!(doc.get::<Value>("anything").expect("get"), None);
    }

    #[test]
    fn malformed_file_fails_at_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("content.json");
        fs::write(&path, b"{not json").expect("write");
        assert!(matches!(
            DocumentFile::open(&path),
            Err(InfraError::MalformedDocument { .. })
        ));
    }

    #[test]
    fn set_persists_and_notifies() {
        let (_dir, doc) = temp_doc();
        let mut changes = doc.subscribe();

        assert!(doc.set("home/title", &json!({"content": "Hi"})).expect("set"));
        assert!(doc.contains_key("home/title"));

        let event = changes.try_recv().expect("change event");
        assert_eq!(event.added, vec!["home/title"]);

        let on_disk: BTreeMap<String, Value> =
            serde_json::from_slice(&fs::read(doc.path()).expect("read")).expect("parse");
        assert_eq!(on_disk["home/title"]["content"], "Hi");
    }

    #[test]
    fn unchanged_set_is_a_no_op() {
        let (_dir, doc) = temp_doc();
        doc.set("k", &json!({"content": "same"})).expect("set");
        let before = fs::read(doc.path()).expect("read");

        let mut changes = doc.subscribe();
        assert!(!doc.set("k", &json!({"content": "same"})).expect("set"));

        assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(fs::read(doc.path()).expect("read"), before);
    }

    #[test]
    fn remove_is_a_no_op_on_absent_keys() {
        let (_dir, doc) = temp_doc();
        doc.set("k", &json!(1)).expect("set");

        assert!(doc.remove("k").expect("remove"));
        assert!(!doc.remove("k").expect("remove"));
        assert!(!doc.contains_key("k"));
    }

    #[test]
    fn own_writes_do_not_read_as_external_changes() {
        let (_dir, doc) = temp_doc();
        doc.set("k", &json!(1)).expect("set");
        assert!(doc.reload(false).is_empty());
    }

    #[test]
    fn reload_reports_a_structured_diff() {
        let (_dir, doc) = temp_doc();
        doc.set_many(vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
        ])
        .expect("seed");

        fs::write(doc.path(), r#"{"b": 3, "c": 4}"#).expect("external edit");

        let changes = doc.reload(true);
        assert_eq!(changes.added, vec!["c"]);
        assert_eq!(changes.removed, vec!["a"]);
        assert_eq!(changes.changed, vec!["b"]);

        assert_eq!(doc.get::<i64>("b").expect("get"), Some(3));
        assert_eq!(doc.get::<i64>("a").expect("get"), None);
    }

    #[test]
    fn reload_of_identical_content_is_silent() {
        let (_dir, doc) = temp_doc();
        doc.set("k", &json!({"content": "x"})).expect("set");

        let raw = fs::read(doc.path()).expect("read");
        fs::write(doc.path(), raw).expect("rewrite");

        let mut changes = doc.subscribe();
        assert!(doc.reload(true).is_empty());
        assert_eq!(changes.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn reload_tolerates_a_transiently_unreadable_file() {
        let (_dir, doc) = temp_doc();
        doc.set("k", &json!(1)).expect("set");

        fs::write(doc.path(), b"{half a docu").expect("corrupt");
        assert!(doc.reload(true).is_empty());

        // The in-memory document is untouched.
        assert_eq!(doc.get::<i64>("k").expect("get"), Some(1));
    }
}
