//! # Data Model
//!
//! The surface this runtime expects from the forensic content library: a
//! tree of items per data source, raw content reads, and persistence of the
//! per-item analyzed mark. `DirStore` is a directory-backed implementation
//! used by the CLI runner and the integration tests.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown item: {0}")]
    UnknownItem(ItemId),
    #[error("store error: {0}")]
    Store(String),
}

/// Stable identity of one item within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The top-level unit submitted for analysis.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub id: ItemId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Directory,
    UnallocatedBlocks,
    Virtual,
}

#[derive(Debug, Clone)]
pub struct FileMeta {
    pub id: ItemId,
    pub name: String,
    pub kind: ItemKind,
    pub size: u64,
    pub has_children: bool,
}

impl FileMeta {
    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Directory
    }
}

/// A data artifact posted by a module mid-run.
#[derive(Debug, Clone)]
pub struct ArtifactMeta {
    pub id: ItemId,
    pub type_name: String,
    pub source_item: ItemId,
}

/// An analysis result posted by a module mid-run.
#[derive(Debug, Clone)]
pub struct ResultMeta {
    pub id: ItemId,
    pub type_name: String,
    pub source_item: ItemId,
}

/// Content access contract. Implementations must be safe to call from any
/// worker thread; the scheduler resolves children and the pipelines read
/// file bytes concurrently.
pub trait ContentStore: Send + Sync {
    fn item(&self, id: ItemId) -> Result<FileMeta, ContentError>;

    /// Top-level items of a data source: file system root directory
    /// contents, layout files, virtual directories.
    fn top_level_items(&self, data_source: ItemId) -> Result<Vec<FileMeta>, ContentError>;

    fn children(&self, id: ItemId) -> Result<Vec<FileMeta>, ContentError>;

    fn read_at(&self, id: ItemId, offset: u64, buf: &mut [u8]) -> Result<usize, ContentError>;

    /// Persists the fully-analyzed mark for an item after its file pipeline
    /// run finished without cancellation.
    fn mark_analyzed(&self, id: ItemId) -> Result<(), ContentError>;

    /// Estimated number of non-directory items under a data source. The
    /// default walks the tree; stores with a catalog should override.
    fn file_count(&self, data_source: ItemId) -> Result<u64, ContentError> {
        let mut count = 0u64;
        let mut stack = self.top_level_items(data_source)?;
        while let Some(item) = stack.pop() {
            if item.is_dir() {
                stack.extend(self.children(item.id)?);
            } else {
                count += 1;
            }
        }
        Ok(count)
    }
}

struct DirEntryRecord {
    path: PathBuf,
    meta: FileMeta,
}

struct DirStoreInner {
    next_id: u64,
    entries: HashMap<ItemId, DirEntryRecord>,
    by_path: HashMap<PathBuf, ItemId>,
    analyzed: HashSet<ItemId>,
}

/// Directory-backed store: the data source is a local directory, items are
/// its files and subdirectories. Ids are assigned on first sight and stay
/// stable for the lifetime of the store.
pub struct DirStore {
    root: PathBuf,
    data_source: DataSource,
    inner: Mutex<DirStoreInner>,
}

impl DirStore {
    pub fn open(root: &Path) -> Result<Self, ContentError> {
        let meta = std::fs::metadata(root)?;
        if !meta.is_dir() {
            return Err(ContentError::Store(format!(
                "data source path is not a directory: {}",
                root.display()
            )));
        }
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        let data_source = DataSource {
            id: ItemId(0),
            name,
        };
        Ok(Self {
            root: root.to_path_buf(),
            data_source,
            inner: Mutex::new(DirStoreInner {
                next_id: 1,
                entries: HashMap::new(),
                by_path: HashMap::new(),
                analyzed: HashSet::new(),
            }),
        })
    }

    pub fn data_source(&self) -> DataSource {
        self.data_source.clone()
    }

    pub fn analyzed_count(&self) -> usize {
        self.inner.lock().unwrap().analyzed.len()
    }

    fn intern(inner: &mut DirStoreInner, path: PathBuf) -> Result<FileMeta, ContentError> {
        if let Some(id) = inner.by_path.get(&path) {
            return Ok(inner.entries[id].meta.clone());
        }
        let fs_meta = std::fs::metadata(&path)?;
        let id = ItemId(inner.next_id);
        inner.next_id += 1;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let meta = FileMeta {
            id,
            name,
            kind: if fs_meta.is_dir() {
                ItemKind::Directory
            } else {
                ItemKind::File
            },
            size: if fs_meta.is_dir() { 0 } else { fs_meta.len() },
            has_children: fs_meta.is_dir(),
        };
        inner.by_path.insert(path.clone(), id);
        inner.entries.insert(id, DirEntryRecord {
            path,
            meta: meta.clone(),
        });
        Ok(meta)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<FileMeta>, ContentError> {
        let mut inner = self.inner.lock().unwrap();
        let mut items = Vec::new();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        paths.sort();
        for path in paths {
            items.push(Self::intern(&mut inner, path)?);
        }
        Ok(items)
    }
}

impl ContentStore for DirStore {
    fn item(&self, id: ItemId) -> Result<FileMeta, ContentError> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(&id)
            .map(|e| e.meta.clone())
            .ok_or(ContentError::UnknownItem(id))
    }

    fn top_level_items(&self, data_source: ItemId) -> Result<Vec<FileMeta>, ContentError> {
        if data_source != self.data_source.id {
            return Err(ContentError::UnknownItem(data_source));
        }
        self.list_dir(&self.root)
    }

    fn children(&self, id: ItemId) -> Result<Vec<FileMeta>, ContentError> {
        let path = {
            let inner = self.inner.lock().unwrap();
            let entry = inner.entries.get(&id).ok_or(ContentError::UnknownItem(id))?;
            if !entry.meta.is_dir() {
                return Ok(Vec::new());
            }
            entry.path.clone()
        };
        self.list_dir(&path)
    }

    fn read_at(&self, id: ItemId, offset: u64, buf: &mut [u8]) -> Result<usize, ContentError> {
        let path = {
            let inner = self.inner.lock().unwrap();
            inner
                .entries
                .get(&id)
                .map(|e| e.path.clone())
                .ok_or(ContentError::UnknownItem(id))?
        };
        let file = File::open(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(file.read_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut f = file;
            f.seek(SeekFrom::Start(offset))?;
            Ok(f.read(buf)?)
        }
    }

    fn mark_analyzed(&self, id: ItemId) -> Result<(), ContentError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.entries.contains_key(&id) {
            return Err(ContentError::UnknownItem(id));
        }
        inner.analyzed.insert(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn dir_store_lists_and_reads() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"hello").expect("write");
        fs::create_dir(temp.path().join("sub")).expect("mkdir");
        fs::write(temp.path().join("sub/b.txt"), b"world").expect("write");

        let store = DirStore::open(temp.path()).expect("open");
        let ds = store.data_source();
        let top = store.top_level_items(ds.id).expect("top level");
        assert_eq!(top.len(), 2);

        let sub = top.iter().find(|i| i.is_dir()).expect("subdir");
        let children = store.children(sub.id).expect("children");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "b.txt");

        let file = top.iter().find(|i| !i.is_dir()).expect("file");
        let mut buf = [0u8; 5];
        let n = store.read_at(file.id, 0, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"hello");

        store.mark_analyzed(file.id).expect("mark");
        assert_eq!(store.analyzed_count(), 1);
    }

    #[test]
    fn file_count_walks_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a"), b"1").expect("write");
        fs::create_dir(temp.path().join("d")).expect("mkdir");
        fs::write(temp.path().join("d/b"), b"2").expect("write");
        fs::write(temp.path().join("d/c"), b"3").expect("write");

        let store = DirStore::open(temp.path()).expect("open");
        let ds = store.data_source();
        assert_eq!(store.file_count(ds.id).expect("count"), 3);
    }
}
