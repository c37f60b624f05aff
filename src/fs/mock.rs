// src/fs/mock.rs

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};

use super::FileSystem;

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    executables: BTreeSet<PathBuf>,
}

impl MockState {
    /// Register `dir` and all of its ancestors.
    fn add_dir_chain(&mut self, dir: &Path) {
        let mut current = Some(dir);
        while let Some(d) = current {
            let d = if d.as_os_str().is_empty() { Path::new(".") } else { d };
            if !self.dirs.insert(d.to_path_buf()) {
                break;
            }
            current = d.parent();
        }
    }
}

/// In-memory filesystem for tests.
///
/// Clones share one tree, so a test can hand a clone to the code under test
/// and inspect what was written afterwards. Parent directories of every file
/// exist implicitly.
#[derive(Debug, Clone)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.dirs.insert(PathBuf::from("."));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // Poisoned only if another test thread panicked mid-write.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut state = self.state();
        if let Some(parent) = path.parent() {
            state.add_dir_chain(parent);
        }
        state.files.insert(path.to_path_buf(), content.into());
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.state().add_dir_chain(path.as_ref());
    }

    /// Contents of a file as UTF-8, if it exists.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state()
            .files
            .get(path.as_ref())
            .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
    }

    /// All file paths currently stored, sorted.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.state().files.keys().cloned().collect()
    }

    pub fn is_executable(&self, path: impl AsRef<Path>) -> bool {
        self.state().executables.contains(path.as_ref())
    }

    fn bytes(&self, path: &Path) -> Result<Vec<u8>> {
        let state = self.state();
        match state.files.get(path) {
            Some(bytes) => Ok(bytes.clone()),
            None if state.dirs.contains(path) => Err(anyhow!("{path:?} is a directory")),
            None => Err(anyhow!("no such file: {path:?}")),
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        String::from_utf8(self.bytes(path)?).map_err(|e| anyhow!("{path:?} is not UTF-8: {e}"))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.bytes(path)?)))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if self.is_dir(path) {
            bail!("cannot write {path:?}: is a directory");
        }
        self.add_file(path, contents);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.is_file(path) {
            bail!("cannot create directory {path:?}: a file is in the way");
        }
        self.add_dir(path);
        Ok(())
    }

    fn set_executable(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        if !state.files.contains_key(path) {
            bail!("no such file: {path:?}");
        }
        state.executables.insert(path.to_path_buf());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.state().files.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state().dirs.contains(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state();
        if !state.dirs.contains(path) {
            bail!("not a directory: {path:?}");
        }
        let is_child = |p: &&PathBuf| {
            let parent = match p.parent() {
                Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
                Some(parent) => parent,
                None => return false,
            };
            parent == path && p.as_path() != path
        };
        Ok(state
            .dirs
            .iter()
            .filter(is_child)
            .chain(state.files.keys().filter(is_child))
            .cloned()
            .collect())
    }
}
