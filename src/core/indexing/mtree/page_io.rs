//! Page files: keyed persistence of M-Tree nodes by node id.
//!
//! A page file assigns a node its id on the first write and returns a full,
//! independent copy of the node on every read. All parent/child links in the
//! tree are node ids resolved through the page file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, trace};

use crate::core::common::{MTreeError, NodeId, NO_ID};
use crate::core::config::MTreeConfig;
use crate::core::distance::{Distance, IndexedObject};
use crate::core::indexing::mtree::node::{MTreeNode, NODE_HEADER_SIZE};

/// Magic bytes at the start of a persistent page file.
pub const PAGE_FILE_MAGIC: [u8; 8] = *b"MTREEPF1";

/// magic (8) + page_size (u32) + root id (i32) + next id (i32)
pub const METADATA_SIZE: usize = 8 + 4 + 4 + 4;

/// Length prefix in front of the node bytes of every page frame.
const FRAME_PREFIX_SIZE: usize = 4;

/// Smallest page that holds the metadata and a framed node header.
const MIN_FRAME_SIZE: usize = if METADATA_SIZE > FRAME_PREFIX_SIZE + NODE_HEADER_SIZE {
    METADATA_SIZE
} else {
    FRAME_PREFIX_SIZE + NODE_HEADER_SIZE
};

/// I/O counters of a page file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFileStatistics {
    pub reads: u64,
    pub writes: u64,
    pub pages: usize,
}

/// Keyed node storage consumed by the tree.
pub trait PageFile<O, D> {
    /// Persists the full state of `node`. A node without an id is assigned a
    /// fresh, stable one first; writing a node that has an id overwrites its page.
    fn write_page(&mut self, node: &mut MTreeNode<O, D>) -> Result<NodeId, MTreeError>;

    /// Returns the node last written under `id`, or `NodeNotFound`.
    fn read_page(&self, id: NodeId) -> Result<MTreeNode<O, D>, MTreeError>;

    /// Id of the current root node, if a tree has been created in this file.
    fn root_id(&self) -> Option<NodeId>;

    fn set_root_id(&mut self, id: NodeId) -> Result<(), MTreeError>;

    fn statistics(&self) -> PageFileStatistics;

    /// Flushes buffered pages to durable storage.
    fn sync(&self) -> Result<(), MTreeError> {
        Ok(())
    }
}

fn next_node_id(next: &mut NodeId) -> Result<NodeId, MTreeError> {
    let id = *next;
    *next = id.checked_add(1).ok_or_else(|| MTreeError::StorageFailure {
        context: "node id space exhausted".to_string(),
        source: None,
    })?;
    Ok(id)
}

/// Page file keeping serialized pages in memory.
#[derive(Debug)]
pub struct MemoryPageFile<O, D> {
    pages: HashMap<NodeId, Vec<u8>>,
    next_id: NodeId,
    root_id: Option<NodeId>,
    reads: AtomicU64,
    writes: u64,
    _marker: PhantomData<fn() -> (O, D)>,
}

impl<O, D> MemoryPageFile<O, D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            next_id: 0,
            root_id: None,
            reads: AtomicU64::new(0),
            writes: 0,
            _marker: PhantomData,
        }
    }

    /// Drops the page stored under `id`; later reads fail with `NodeNotFound`.
    pub fn invalidate(&mut self, id: NodeId) -> bool {
        self.pages.remove(&id).is_some()
    }
}

impl<O, D> Default for MemoryPageFile<O, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: IndexedObject, D: Distance> PageFile<O, D> for MemoryPageFile<O, D> {
    fn write_page(&mut self, node: &mut MTreeNode<O, D>) -> Result<NodeId, MTreeError> {
        let id = match node.node_id() {
            Some(id) => id,
            None => {
                let id = next_node_id(&mut self.next_id)?;
                node.set_node_id(id);
                id
            }
        };
        let bytes = node.to_bytes()?;
        trace!("write page {} ({} bytes)", id, bytes.len());
        self.pages.insert(id, bytes);
        self.writes += 1;
        Ok(id)
    }

    fn read_page(&self, id: NodeId) -> Result<MTreeNode<O, D>, MTreeError> {
        let bytes = self.pages.get(&id).ok_or(MTreeError::NodeNotFound(id))?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        MTreeNode::from_bytes(bytes)
    }

    fn root_id(&self) -> Option<NodeId> {
        self.root_id
    }

    fn set_root_id(&mut self, id: NodeId) -> Result<(), MTreeError> {
        self.root_id = Some(id);
        Ok(())
    }

    fn statistics(&self) -> PageFileStatistics {
        PageFileStatistics {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes,
            pages: self.pages.len(),
        }
    }
}

/// File-backed page file with fixed-size pages.
///
/// Layout: a metadata page followed by one page per node id. Each page frame
/// holds a big-endian `u32` length and the node bytes, zero padded.
#[derive(Debug)]
pub struct PersistentPageFile<O, D> {
    path: PathBuf,
    file_handle: Mutex<File>,
    page_size: usize,
    root_id: Option<NodeId>,
    next_id: NodeId,
    reads: AtomicU64,
    writes: u64,
    _marker: PhantomData<fn() -> (O, D)>,
}

fn io_failure(context: String) -> impl FnOnce(io::Error) -> MTreeError {
    move |e| MTreeError::storage_failure(context, MTreeError::Io(e))
}

impl<O, D> PersistentPageFile<O, D> {
    /// Creates (or truncates) a page file at `path`.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self, MTreeError> {
        let path = path.as_ref().to_path_buf();
        if page_size < MIN_FRAME_SIZE {
            return Err(MTreeError::Configuration(format!("page size {} is too small", page_size)));
        }
        if u32::try_from(page_size).is_err() {
            return Err(MTreeError::Configuration(format!("page size {} is too large", page_size)));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(io_failure(format!("creating page file {}", path.display())))?;
        let mut pf = Self {
            path,
            file_handle: Mutex::new(file),
            page_size,
            root_id: None,
            next_id: 0,
            reads: AtomicU64::new(0),
            writes: 0,
            _marker: PhantomData,
        };
        pf.write_metadata()?;
        debug!("Created page file {} with page size {}", pf.path.display(), page_size);
        Ok(pf)
    }

    /// Creates a page file with the page size of a validated `config`.
    pub fn create_with_config(path: impl AsRef<Path>, config: &MTreeConfig) -> Result<Self, MTreeError> {
        config.validate()?;
        Self::create(path, config.page_size)
    }

    /// Opens an existing page file, restoring its page size, root and id counter.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MTreeError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_failure(format!("opening page file {}", path.display())))?;

        let mut buf = [0u8; METADATA_SIZE];
        file.read_exact(&mut buf).map_err(|e| {
            MTreeError::CorruptData(format!("page file {} has no metadata: {}", path.display(), e))
        })?;
        if buf[0..8] != PAGE_FILE_MAGIC {
            return Err(MTreeError::CorruptData(format!("{} is not an M-Tree page file", path.display())));
        }
        let page_size = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        if page_size < MIN_FRAME_SIZE {
            return Err(MTreeError::CorruptData(format!(
                "page file {} has page size {}, below the minimum of {}",
                path.display(),
                page_size,
                MIN_FRAME_SIZE
            )));
        }
        let root = i32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let next_id = i32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        if next_id < 0 || (root != NO_ID && !(0..next_id).contains(&root)) {
            return Err(MTreeError::CorruptData(format!(
                "page file {} has root {} and next id {}",
                path.display(),
                root,
                next_id
            )));
        }

        debug!("Opened page file {} (root {}, {} pages)", path.display(), root, next_id);
        Ok(Self {
            path,
            file_handle: Mutex::new(file),
            page_size,
            root_id: (root != NO_ID).then_some(root),
            next_id,
            reads: AtomicU64::new(0),
            writes: 0,
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    fn lock_file(&self, context: &str) -> Result<std::sync::MutexGuard<'_, File>, MTreeError> {
        self.file_handle.lock().map_err(|e| MTreeError::StorageFailure {
            context: format!("page file lock poisoned during {}: {}", context, e),
            source: None,
        })
    }

    fn page_offset(&self, id: NodeId) -> u64 {
        // Page 0 of the file holds the metadata.
        (u64::try_from(id).unwrap_or(0) + 1) * self.page_size as u64
    }

    fn write_metadata(&mut self) -> Result<(), MTreeError> {
        let mut buf = Vec::with_capacity(METADATA_SIZE);
        buf.extend_from_slice(&PAGE_FILE_MAGIC);
        buf.extend_from_slice(&u32::try_from(self.page_size).unwrap_or(u32::MAX).to_be_bytes());
        buf.extend_from_slice(&self.root_id.unwrap_or(NO_ID).to_be_bytes());
        buf.extend_from_slice(&self.next_id.to_be_bytes());

        let mut file = self.lock_file("write_metadata")?;
        let context = || format!("writing metadata of {}", self.path.display());
        file.seek(SeekFrom::Start(0)).map_err(io_failure(context()))?;
        file.write_all(&buf).map_err(io_failure(context()))?;
        file.flush().map_err(io_failure(context()))?;
        Ok(())
    }
}

impl<O: IndexedObject, D: Distance> PageFile<O, D> for PersistentPageFile<O, D> {
    fn write_page(&mut self, node: &mut MTreeNode<O, D>) -> Result<NodeId, MTreeError> {
        // The header has a fixed width, so the size does not depend on the id.
        let frame_len = FRAME_PREFIX_SIZE + node.to_bytes()?.len();
        if frame_len > self.page_size {
            return Err(MTreeError::StorageFailure {
                context: format!(
                    "Serialized node {} size {} exceeds page size {}",
                    node.id(),
                    frame_len,
                    self.page_size
                ),
                source: None,
            });
        }

        let id = match node.node_id() {
            Some(id) => id,
            None => {
                let id = next_node_id(&mut self.next_id)?;
                self.write_metadata()?;
                node.set_node_id(id);
                id
            }
        };
        let node_bytes = node.to_bytes()?;

        let mut frame = Vec::with_capacity(self.page_size);
        let len = u32::try_from(node_bytes.len()).unwrap_or(u32::MAX);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&node_bytes);
        frame.resize(self.page_size, 0); // Pad with zeros to fill the page

        let offset = self.page_offset(id);
        let mut file = self.lock_file("write_page")?;
        let context = || format!("writing page {} of {}", id, self.path.display());
        file.seek(SeekFrom::Start(offset)).map_err(io_failure(context()))?;
        file.write_all(&frame).map_err(io_failure(context()))?;
        file.flush().map_err(io_failure(context()))?;
        drop(file);

        trace!("write page {} ({} bytes)", id, node_bytes.len());
        self.writes += 1;
        Ok(id)
    }

    fn read_page(&self, id: NodeId) -> Result<MTreeNode<O, D>, MTreeError> {
        if id < 0 || id >= self.next_id {
            return Err(MTreeError::NodeNotFound(id));
        }
        let mut frame = vec![0u8; self.page_size];
        {
            let offset = self.page_offset(id);
            let mut file = self.lock_file("read_page")?;
            let context = || format!("reading page {} of {}", id, self.path.display());
            file.seek(SeekFrom::Start(offset)).map_err(io_failure(context()))?;
            match file.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(MTreeError::NodeNotFound(id));
                }
                Err(e) => return Err(io_failure(context())(e)),
            }
        }
        self.reads.fetch_add(1, Ordering::Relaxed);

        let prefix: [u8; FRAME_PREFIX_SIZE] = frame
            .get(..FRAME_PREFIX_SIZE)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| MTreeError::CorruptData(format!("page {} is shorter than its frame prefix", id)))?;
        let len = u32::from_be_bytes(prefix) as usize;
        if len == 0 {
            return Err(MTreeError::NodeNotFound(id));
        }
        let body = frame
            .get(FRAME_PREFIX_SIZE..FRAME_PREFIX_SIZE + len)
            .ok_or_else(|| MTreeError::CorruptData(format!("page {} declares {} bytes", id, len)))?;
        let node = MTreeNode::from_bytes(body)?;
        if node.node_id() != Some(id) {
            return Err(MTreeError::CorruptData(format!(
                "page {} holds node {}",
                id,
                node.id()
            )));
        }
        Ok(node)
    }

    fn root_id(&self) -> Option<NodeId> {
        self.root_id
    }

    fn set_root_id(&mut self, id: NodeId) -> Result<(), MTreeError> {
        self.root_id = Some(id);
        self.write_metadata()
    }

    fn statistics(&self) -> PageFileStatistics {
        PageFileStatistics {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes,
            pages: usize::try_from(self.next_id).unwrap_or(0),
        }
    }

    fn sync(&self) -> Result<(), MTreeError> {
        let file = self.lock_file("sync")?;
        file.sync_all().map_err(io_failure(format!("syncing {}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::indexing::mtree::entry::LeafEntry;
    use crate::core::types::FeatureVector;
    use tempfile::tempdir;

    type Node = MTreeNode<FeatureVector, f64>;

    fn leaf_with(ids: &[u64]) -> Node {
        let mut node = Node::new_leaf(8);
        for &id in ids {
            node.add_leaf_entry(LeafEntry::new(FeatureVector::new(id, vec![id as f64, 0.5]), None))
                .unwrap();
        }
        node
    }

    fn check_write_assigns_ids<P: PageFile<FeatureVector, f64>>(file: &mut P) {
        let mut a = leaf_with(&[1]);
        let mut b = leaf_with(&[2]);
        let id_a = file.write_page(&mut a).unwrap();
        let id_b = file.write_page(&mut b).unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(a.node_id(), Some(id_a));

        // Re-writing keeps the id and replaces the contents.
        a.add_leaf_entry(LeafEntry::new(FeatureVector::new(3, vec![3.0]), None)).unwrap();
        assert_eq!(file.write_page(&mut a).unwrap(), id_a);
        let stored = file.read_page(id_a).unwrap();
        assert_eq!(stored.check_identity(&a), Ok(true));
        assert_eq!(stored.num_entries(), 2);

        assert!(matches!(file.read_page(999), Err(MTreeError::NodeNotFound(999))));
    }

    #[test]
    fn test_memory_page_file_write_and_read() {
        let mut file = MemoryPageFile::new();
        check_write_assigns_ids(&mut file);
        let stats = file.statistics();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.writes, 3);
        assert_eq!(stats.reads, 1);
    }

    #[test]
    fn test_memory_page_file_reads_are_copies() {
        let mut file = MemoryPageFile::new();
        let mut node = leaf_with(&[1, 2]);
        let id = file.write_page(&mut node).unwrap();
        let mut copy = file.read_page(id).unwrap();
        copy.add_leaf_entry(LeafEntry::new(FeatureVector::new(9, vec![]), None)).unwrap();
        assert_eq!(file.read_page(id).unwrap().num_entries(), 2);
    }

    #[test]
    fn test_memory_page_file_invalidate() {
        let mut file = MemoryPageFile::new();
        let mut node = leaf_with(&[1]);
        let id = file.write_page(&mut node).unwrap();
        assert!(file.invalidate(id));
        assert!(matches!(file.read_page(id), Err(MTreeError::NodeNotFound(_))));
    }

    #[test]
    fn test_persistent_page_file_write_and_read() {
        let dir = tempdir().unwrap();
        let mut file = PersistentPageFile::create(dir.path().join("tree.pages"), 1024).unwrap();
        check_write_assigns_ids(&mut file);
    }

    #[test]
    fn test_persistent_page_file_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.pages");
        let id;
        {
            let mut file: PersistentPageFile<FeatureVector, f64> =
                PersistentPageFile::create(&path, 512).unwrap();
            let mut node = leaf_with(&[4, 5, 6]);
            id = file.write_page(&mut node).unwrap();
            file.set_root_id(id).unwrap();
            file.sync().unwrap();
        }
        let file: PersistentPageFile<FeatureVector, f64> = PersistentPageFile::open(&path).unwrap();
        assert_eq!(file.page_size(), 512);
        assert_eq!(file.root_id(), Some(id));
        let node = file.read_page(id).unwrap();
        let ids: Vec<u64> = node.children().map(|e| e.routing_object().id).collect();
        assert_eq!(ids, vec![4, 5, 6]);
    }

    #[test]
    fn test_persistent_page_file_rejects_oversized_node() {
        let dir = tempdir().unwrap();
        let mut file = PersistentPageFile::create(dir.path().join("small.pages"), 64).unwrap();
        let mut node = leaf_with(&[1, 2, 3, 4, 5]);
        let result = file.write_page(&mut node);
        assert!(matches!(result, Err(MTreeError::StorageFailure { .. })));
        assert_eq!(node.node_id(), None);
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.pages");
        std::fs::write(&path, b"definitely not a page file").unwrap();
        let result: Result<PersistentPageFile<FeatureVector, f64>, _> = PersistentPageFile::open(&path);
        assert!(matches!(result, Err(MTreeError::CorruptData(_))));
    }

    #[test]
    fn test_open_rejects_tiny_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.pages");
        {
            let mut file: PersistentPageFile<FeatureVector, f64> = PersistentPageFile::create(&path, 512).unwrap();
            file.write_page(&mut leaf_with(&[1, 2])).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8..12].copy_from_slice(&2u32.to_be_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let result: Result<PersistentPageFile<FeatureVector, f64>, _> = PersistentPageFile::open(&path);
        assert!(matches!(result, Err(MTreeError::CorruptData(_))));
    }

    #[test]
    fn test_create_with_config_uses_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("configured.pages");
        let config = MTreeConfig::builder().page_size(1024).build().unwrap();
        let mut file: PersistentPageFile<FeatureVector, f64> =
            PersistentPageFile::create_with_config(&path, &config).unwrap();
        assert_eq!(file.page_size(), 1024);
        let id = file.write_page(&mut leaf_with(&[4])).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 1024);
        assert_eq!(file.read_page(id).unwrap().num_entries(), 1);

        let invalid = MTreeConfig { page_size: 8, ..MTreeConfig::default() };
        let result: Result<PersistentPageFile<FeatureVector, f64>, _> =
            PersistentPageFile::create_with_config(&path, &invalid);
        assert!(matches!(result, Err(MTreeError::Configuration(_))));
    }
}
