//! File-system object store.
//!
//! Layout under the root directory: one directory per type name segment, and
//! per object
//!
//! * `<uid>`: committed copy
//! * `<uid>.shadow`: uncommitted copy
//! * `<uid>.hidden`: hidden committed copy
//! * `<uid>.<kind>.tmp`: write in progress, never read
//!
//! Every write lands in a temp file that is synced and then renamed over its
//! target, and a commit is a rename of the shadow over the committed copy. A
//! crash at any point therefore leaves either the old or the new file, never a
//! mixture. Temp files left by a crash are removed by [`FileObjectStore::open`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use durabletx_common::{InputObjectState, OutputObjectState, Result, TxError, Uid};

use crate::seal;
use crate::store::{ObjectStore, StateKind, StoreState};

const SHADOW_SUFFIX: &str = ".shadow";
const HIDDEN_SUFFIX: &str = ".hidden";
const TMP_SUFFIX: &str = ".tmp";

/// Options for the file store.
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// fsync files and directories after every write.
    pub sync_writes: bool,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self { sync_writes: true }
    }
}

/// Object store backed by a directory tree.
#[derive(Debug)]
pub struct FileObjectStore {
    root: PathBuf,
    options: FileStoreOptions,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> TxError + '_ {
    move |e| TxError::store_io(path.display().to_string(), e)
}

impl FileObjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, options: FileStoreOptions) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_error(&root))?;
        let store = Self { root, options };
        let swept = store.sweep_temp_files(&store.root)?;
        if swept > 0 {
            warn!(root = %store.root.display(), swept, "Removed interrupted writes");
        }
        info!(root = %store.root.display(), "File object store opened");
        Ok(store)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sweep_temp_files(&self, dir: &Path) -> Result<usize> {
        let mut swept = 0;
        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let entry = entry.map_err(io_error(dir))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(io_error(&path))?;
            if file_type.is_dir() {
                swept += self.sweep_temp_files(&path)?;
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TMP_SUFFIX))
            {
                fs::remove_file(&path).map_err(io_error(&path))?;
                swept += 1;
            }
        }
        Ok(swept)
    }

    fn type_dir(&self, type_name: &str) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        let mut segments = 0;
        for segment in type_name.split('/').filter(|s| !s.is_empty()) {
            if segment == "."
                || segment == ".."
                || segment.contains('\\')
                || segment.contains('\0')
                || segment.contains('.')
            {
                return Err(TxError::Configuration(format!(
                    "invalid type name segment {segment:?} in {type_name:?}"
                )));
            }
            dir.push(segment);
            segments += 1;
        }
        if segments == 0 {
            return Err(TxError::Configuration(format!(
                "invalid type name {type_name:?}"
            )));
        }
        Ok(dir)
    }

    fn file_path(&self, uid: Uid, type_name: &str, suffix: &str) -> Result<PathBuf> {
        Ok(self.type_dir(type_name)?.join(format!("{uid}{suffix}")))
    }

    fn kind_suffix(kind: StateKind) -> &'static str {
        match kind {
            StateKind::Shadow => SHADOW_SUFFIX,
            StateKind::Committed => "",
        }
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let dir = target
            .parent()
            .ok_or_else(|| TxError::Internal(format!("no parent for {}", target.display())))?;
        fs::create_dir_all(dir).map_err(io_error(dir))?;

        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp_name);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io_error(&tmp))?;
        file.write_all(bytes).map_err(io_error(&tmp))?;
        if self.options.sync_writes {
            file.sync_all().map_err(io_error(&tmp))?;
        }
        drop(file);

        fs::rename(&tmp, target).map_err(io_error(target))?;
        self.sync_dir(dir)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<bool> {
        match fs::rename(from, to) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(TxError::store_io(from.display().to_string(), e)),
        }
        if let Some(dir) = to.parent() {
            self.sync_dir(dir)?;
        }
        Ok(true)
    }

    fn sync_dir(&self, dir: &Path) -> Result<()> {
        if !self.options.sync_writes {
            return Ok(());
        }
        #[cfg(unix)]
        {
            File::open(dir)
                .and_then(|d| d.sync_all())
                .map_err(io_error(dir))?;
        }
        Ok(())
    }

    fn read_file(&self, path: &Path, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TxError::store_io(path.display().to_string(), e)),
        };
        let payload = seal::unseal(&bytes, uid, type_name)?;
        Ok(Some(InputObjectState::from_bytes(uid, type_name, payload)))
    }

    fn collect_types(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        let mut holds_objects = false;
        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let entry = entry.map_err(io_error(dir))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map_err(io_error(&path))?.is_dir() {
                self.collect_types(&path, &format!("{prefix}/{name}"), out)?;
            } else if !name.ends_with(TMP_SUFFIX) {
                let stem = name.split('.').next().unwrap_or_default();
                if Uid::parse(stem).is_ok() {
                    holds_objects = true;
                }
            }
        }
        if holds_objects && !prefix.is_empty() {
            out.push(prefix.to_string());
        }
        Ok(())
    }
}

impl ObjectStore for FileObjectStore {
    fn name(&self) -> &str {
        "file"
    }

    fn write(
        &self,
        uid: Uid,
        type_name: &str,
        state: &OutputObjectState,
        kind: StateKind,
    ) -> Result<bool> {
        if kind == StateKind::Committed && self.file_path(uid, type_name, HIDDEN_SUFFIX)?.exists() {
            warn!(uid = %uid, type_name, "Refusing committed write over hidden state");
            return Ok(false);
        }
        let target = self.file_path(uid, type_name, Self::kind_suffix(kind))?;
        let sealed = seal::seal(uid, type_name, state.buffer());
        self.write_atomic(&target, &sealed)?;
        debug!(uid = %uid, type_name, kind = %kind, bytes = state.size(), "State written");
        Ok(true)
    }

    fn read(&self, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>> {
        let path = self.file_path(uid, type_name, "")?;
        self.read_file(&path, uid, type_name)
    }

    fn read_shadow(&self, uid: Uid, type_name: &str) -> Result<Option<InputObjectState>> {
        let path = self.file_path(uid, type_name, SHADOW_SUFFIX)?;
        self.read_file(&path, uid, type_name)
    }

    fn commit(&self, uid: Uid, type_name: &str) -> Result<bool> {
        let shadow = self.file_path(uid, type_name, SHADOW_SUFFIX)?;
        let committed = self.file_path(uid, type_name, "")?;
        let promoted = self.rename(&shadow, &committed)?;
        debug!(uid = %uid, type_name, promoted, "Shadow commit");
        Ok(promoted)
    }

    fn hide(&self, uid: Uid, type_name: &str) -> Result<bool> {
        let committed = self.file_path(uid, type_name, "")?;
        let hidden = self.file_path(uid, type_name, HIDDEN_SUFFIX)?;
        self.rename(&committed, &hidden)
    }

    fn reveal(&self, uid: Uid, type_name: &str) -> Result<bool> {
        let committed = self.file_path(uid, type_name, "")?;
        let hidden = self.file_path(uid, type_name, HIDDEN_SUFFIX)?;
        self.rename(&hidden, &committed)
    }

    fn remove(&self, uid: Uid, type_name: &str, kind: StateKind) -> Result<bool> {
        let path = self.file_path(uid, type_name, Self::kind_suffix(kind))?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(uid = %uid, type_name, kind = %kind, "State removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TxError::store_io(path.display().to_string(), e)),
        }
    }

    fn all_ids(&self, type_name: &str) -> Result<Vec<Uid>> {
        let dir = self.type_dir(type_name)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TxError::store_io(dir.display().to_string(), e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&dir))?;
            let name = entry.file_name();
            if let Some(uid) = name.to_str().and_then(|n| Uid::parse(n).ok()) {
                ids.push(uid);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn all_types(&self) -> Result<Vec<String>> {
        let mut types = Vec::new();
        self.collect_types(&self.root, "", &mut types)?;
        types.sort();
        Ok(types)
    }

    fn current_state(&self, uid: Uid, type_name: &str) -> Result<StoreState> {
        let shadow = self.file_path(uid, type_name, SHADOW_SUFFIX)?.exists();
        let hidden = self.file_path(uid, type_name, HIDDEN_SUFFIX)?.exists();
        let state = match (shadow, hidden) {
            (true, true) => StoreState::UncommittedHidden,
            (true, false) => StoreState::Uncommitted,
            (false, true) => StoreState::Hidden,
            (false, false) if self.file_path(uid, type_name, "")?.exists() => {
                StoreState::Committed
            }
            (false, false) => StoreState::Unknown,
        };
        Ok(state)
    }
}
