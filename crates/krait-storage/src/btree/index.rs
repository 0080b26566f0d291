//! Disk-backed B+ tree secondary index over a heap relation.
//!
//! An index maps the values of one fixed-width attribute to the record IDs
//! where they occur and answers range scans in key order. The index lives in
//! its own page file named `"<relation>.<attr_byte_offset>"`: page 1 holds
//! the metadata, page 2 the initial root leaf, and further pages are
//! allocated as nodes split. All page access goes through the buffer manager
//! under a strict pin/unpin discipline carried by [`PageGuard`]s.

use crate::bufmgr::BufferManager;
use crate::btree::key::{DoubleKey, IndexKey, KeyType, KeyValue, TextKey, STRING_SIZE};
use crate::btree::meta::IndexMetaInfo;
use crate::btree::node::{LeafNode, NonLeafNode};
use crate::btree::scan::ScanState;
use crate::heap::HeapFile;
use krait_common::page::{PageId, RecordId};
use krait_common::{KraitError, Result};
use std::sync::Arc;

/// Page number of the index header page.
pub const HEADER_PAGE_NUM: u32 = 1;

/// Page number of the root leaf in a freshly created index.
///
/// While the root stays at this page the tree is a single leaf.
pub const INITIAL_ROOT_PAGE_NUM: u32 = 2;

/// A B+ tree index over one attribute of a heap relation.
pub struct BTreeIndex {
    pub(crate) mgr: Arc<BufferManager>,
    pub(crate) file_id: u32,
    index_name: String,
    pub(crate) key_type: KeyType,
    attr_byte_offset: usize,
    pub(crate) root_page_num: u32,
    pub(crate) only_root: bool,
    pub(crate) scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Opens the index for `relation` on the attribute at `attr_byte_offset`.
    ///
    /// If the index file already exists its metadata is validated against the
    /// arguments and the root is restored from the header page. Otherwise the
    /// file is created with a header page and an empty root leaf, and every
    /// record of the relation is inserted (bulk load), followed by a flush.
    pub fn open(
        relation: &HeapFile,
        attr_byte_offset: usize,
        key_type: KeyType,
    ) -> Result<BTreeIndex> {
        if attr_byte_offset + key_type.key_width() > relation.record_size() {
            return Err(KraitError::BadIndexMeta(format!(
                "attribute at offset {} ({}) extends past {}-byte records",
                attr_byte_offset,
                key_type,
                relation.record_size()
            )));
        }

        let mgr = Arc::clone(relation.buffer_manager());
        let index_name = format!("{}.{}", relation.name(), attr_byte_offset);
        let exists = mgr.disk().file_exists(&index_name);
        let file_id = mgr.disk().open_file(&index_name)?;

        if exists {
            Self::open_existing(mgr, relation, index_name, file_id, attr_byte_offset, key_type)
        } else {
            Self::create(mgr, relation, index_name, file_id, attr_byte_offset, key_type)
        }
    }

    fn open_existing(
        mgr: Arc<BufferManager>,
        relation: &HeapFile,
        index_name: String,
        file_id: u32,
        attr_byte_offset: usize,
        key_type: KeyType,
    ) -> Result<BTreeIndex> {
        let meta = {
            let header = mgr.fetch_page(PageId::new(file_id, HEADER_PAGE_NUM))?;
            let data = header.read();
            IndexMetaInfo::read_from(&data[..])?
        };

        if !meta.names_relation(relation.name()) {
            return Err(KraitError::BadIndexMeta(format!(
                "index {} belongs to relation {}",
                index_name,
                meta.relation_name()
            )));
        }
        if meta.attr_byte_offset != attr_byte_offset as i32 {
            return Err(KraitError::BadIndexMeta(format!(
                "index {} covers attribute offset {}",
                index_name, meta.attr_byte_offset
            )));
        }
        if meta.key_type != key_type {
            return Err(KraitError::BadIndexMeta(format!(
                "index {} holds {} keys",
                index_name, meta.key_type
            )));
        }

        Ok(BTreeIndex {
            mgr,
            file_id,
            index_name,
            key_type,
            attr_byte_offset,
            root_page_num: meta.root_page_no,
            only_root: meta.root_page_no == INITIAL_ROOT_PAGE_NUM,
            scan: None,
        })
    }

    fn create(
        mgr: Arc<BufferManager>,
        relation: &HeapFile,
        index_name: String,
        file_id: u32,
        attr_byte_offset: usize,
        key_type: KeyType,
    ) -> Result<BTreeIndex> {
        // Header page, then the root leaf right after it
        let (header_num, header_guard) = mgr.alloc_page(file_id)?;
        let (root_num, root_guard) = mgr.alloc_page(file_id)?;
        debug_assert_eq!(header_num, HEADER_PAGE_NUM);
        debug_assert_eq!(root_num, INITIAL_ROOT_PAGE_NUM);

        let meta = IndexMetaInfo::new(
            relation.name(),
            attr_byte_offset as i32,
            key_type,
            root_num,
        );
        meta.write_to(&mut header_guard.write()[..]);
        drop(header_guard);

        // A zeroed page already is an empty leaf with no right sibling
        root_guard.mark_dirty();
        drop(root_guard);

        let mut index = BTreeIndex {
            mgr,
            file_id,
            index_name,
            key_type,
            attr_byte_offset,
            root_page_num: root_num,
            only_root: true,
            scan: None,
        };

        index.bulk_load(relation)?;
        index.flush()?;
        Ok(index)
    }

    /// Inserts one entry per record of the relation.
    fn bulk_load(&mut self, relation: &HeapFile) -> Result<()> {
        let mut scan = relation.scan();
        loop {
            let rid = match scan.scan_next() {
                Ok(rid) => rid,
                Err(KraitError::EndOfFile) => break,
                Err(e) => return Err(e),
            };
            let record = scan.record()?;
            let key = self.key_from_record(&record);
            self.insert(key, rid)?;
        }
        Ok(())
    }

    /// Extracts the indexed attribute from raw record bytes.
    fn key_from_record(&self, record: &[u8]) -> KeyValue {
        let off = self.attr_byte_offset;
        match self.key_type {
            KeyType::Integer => KeyValue::Integer(i32::from_le_bytes([
                record[off],
                record[off + 1],
                record[off + 2],
                record[off + 3],
            ])),
            KeyType::Double => KeyValue::Double(f64::from_le_bytes([
                record[off],
                record[off + 1],
                record[off + 2],
                record[off + 3],
                record[off + 4],
                record[off + 5],
                record[off + 6],
                record[off + 7],
            ])),
            KeyType::Text => KeyValue::Text(TextKey::from_slice(&record[off..off + STRING_SIZE])),
        }
    }

    /// Returns the index file name (`"<relation>.<attr_byte_offset>"`).
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the key type this index was created with.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Returns the byte offset of the indexed attribute.
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    /// Converts a tagged value into the typed key this index stores.
    pub(crate) fn typed_key<K: IndexKey>(&self, key: &KeyValue) -> Result<K> {
        K::from_value(key).ok_or_else(|| KraitError::KeyTypeMismatch {
            expected: self.key_type.to_string(),
            actual: key.key_type().to_string(),
        })
    }

    /// Inserts a `(key, rid)` entry.
    ///
    /// Duplicate keys are allowed; nothing is ever deleted.
    pub fn insert(&mut self, key: KeyValue, rid: RecordId) -> Result<()> {
        match self.key_type {
            KeyType::Integer => {
                let k: i32 = self.typed_key(&key)?;
                self.insert_typed(k, rid)
            }
            KeyType::Double => {
                let k: DoubleKey = self.typed_key(&key)?;
                self.insert_typed(k, rid)
            }
            KeyType::Text => {
                let k: TextKey = self.typed_key(&key)?;
                self.insert_typed(k, rid)
            }
        }
    }

    fn insert_typed<K: IndexKey>(&mut self, key: K, rid: RecordId) -> Result<()> {
        // The root stays pinned for the whole operation so it cannot be
        // evicted mid-insert.
        let root_guard = self
            .mgr
            .fetch_page(PageId::new(self.file_id, self.root_page_num))?;

        if self.only_root {
            // The root is the only leaf
            let mut leaf = LeafNode::<K>::from_bytes(&root_guard.read());
            if !leaf.is_full() {
                leaf.insert(key, rid);
                root_guard.write()[..].copy_from_slice(leaf.as_bytes());
            } else {
                let old_root = self.root_page_num;
                let (new_page_no, promoted) = self.split_leaf(&mut leaf, key, rid)?;
                root_guard.write()[..].copy_from_slice(leaf.as_bytes());
                self.create_new_root(old_root, new_page_no, promoted, 1)?;
            }
            return Ok(());
        }

        let root_level = NonLeafNode::<K>::from_bytes(&root_guard.read()).level();
        let split = self.insert_descend::<K>(self.root_page_num, key, rid)?;
        if let Some((new_page_no, promoted)) = split {
            // The root itself split: grow the tree by one level
            let old_root = self.root_page_num;
            self.create_new_root(old_root, new_page_no, promoted, root_level + 1)?;
        }
        Ok(())
    }

    /// Recursive descent below a non-leaf page.
    ///
    /// Returns the `(page_no, separator)` of a split this node's parent must
    /// absorb, or None when the subtree absorbed the insert by itself.
    fn insert_descend<K: IndexKey>(
        &mut self,
        page_num: u32,
        key: K,
        rid: RecordId,
    ) -> Result<Option<(u32, K)>> {
        let page_id = PageId::new(self.file_id, page_num);
        let guard = self.mgr.fetch_page(page_id)?;
        let mut node = NonLeafNode::<K>::from_bytes(&guard.read());
        let child = node.page_no_at(node.child_index_for(&key));

        if node.level() == 1 {
            // The child is a leaf
            let child_guard = self.mgr.fetch_page(PageId::new(self.file_id, child))?;
            let mut leaf = LeafNode::<K>::from_bytes(&child_guard.read());

            if !leaf.is_full() {
                leaf.insert(key, rid);
                child_guard.write()[..].copy_from_slice(leaf.as_bytes());
                return Ok(None);
            }

            let (new_leaf_no, promoted) = self.split_leaf(&mut leaf, key, rid)?;
            child_guard.write()[..].copy_from_slice(leaf.as_bytes());
            drop(child_guard);

            if !node.is_full() {
                node.insert(promoted, new_leaf_no);
                guard.write()[..].copy_from_slice(node.as_bytes());
                return Ok(None);
            }
            let (new_node_no, node_promoted) = self.split_non_leaf(&mut node, promoted, new_leaf_no)?;
            guard.write()[..].copy_from_slice(node.as_bytes());
            return Ok(Some((new_node_no, node_promoted)));
        }

        // Interior step: this node is only pinned while it is being examined;
        // the recursion re-reads it if a split must be absorbed.
        drop(guard);
        let child_split = self.insert_descend::<K>(child, key, rid)?;
        let Some((split_page_no, split_key)) = child_split else {
            return Ok(None);
        };

        let guard = self.mgr.fetch_page(page_id)?;
        let mut node = NonLeafNode::<K>::from_bytes(&guard.read());
        if !node.is_full() {
            node.insert(split_key, split_page_no);
            guard.write()[..].copy_from_slice(node.as_bytes());
            return Ok(None);
        }
        let (new_node_no, node_promoted) =
            self.split_non_leaf(&mut node, split_key, split_page_no)?;
        guard.write()[..].copy_from_slice(node.as_bytes());
        Ok(Some((new_node_no, node_promoted)))
    }

    /// Splits a full leaf into a newly allocated sibling page.
    ///
    /// The sibling page is written and released here; the caller writes back
    /// the mutated left node. Returns the sibling's page number and the
    /// separator for the parent.
    fn split_leaf<K: IndexKey>(
        &self,
        leaf: &mut LeafNode<K>,
        key: K,
        rid: RecordId,
    ) -> Result<(u32, K)> {
        let (new_page_no, new_guard) = self.mgr.alloc_page(self.file_id)?;
        let (promoted, new_leaf) = leaf.split(new_page_no, key, rid);
        new_guard.write()[..].copy_from_slice(new_leaf.as_bytes());
        Ok((new_page_no, promoted))
    }

    /// Splits a full non-leaf node into a newly allocated page.
    fn split_non_leaf<K: IndexKey>(
        &self,
        node: &mut NonLeafNode<K>,
        key: K,
        child_page_no: u32,
    ) -> Result<(u32, K)> {
        let (new_page_no, new_guard) = self.mgr.alloc_page(self.file_id)?;
        let (promoted, new_node) = node.split(key, child_page_no);
        new_guard.write()[..].copy_from_slice(new_node.as_bytes());
        Ok((new_page_no, promoted))
    }

    /// Installs a new root above `left` and `right` and records it in the
    /// header page.
    fn create_new_root<K: IndexKey>(
        &mut self,
        left: u32,
        right: u32,
        key: K,
        level: u32,
    ) -> Result<()> {
        let (new_root_no, guard) = self.mgr.alloc_page(self.file_id)?;
        let mut root = NonLeafNode::<K>::new(level);
        root.set_page_no(0, left);
        root.set_page_no(1, right);
        root.set_key(0, key);
        guard.write()[..].copy_from_slice(root.as_bytes());
        drop(guard);

        self.root_page_num = new_root_no;
        self.only_root = false;
        self.write_meta_root()
    }

    /// Rewrites the header page's root pointer.
    fn write_meta_root(&self) -> Result<()> {
        let guard = self
            .mgr
            .fetch_page(PageId::new(self.file_id, HEADER_PAGE_NUM))?;
        let mut meta = IndexMetaInfo::read_from(&guard.read()[..])?;
        meta.root_page_no = self.root_page_num;
        meta.write_to(&mut guard.write()[..]);
        Ok(())
    }

    /// Writes every dirty index page to disk.
    pub fn flush(&self) -> Result<usize> {
        self.mgr.flush_file(self.file_id)
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        // Release any scan pins, then persist
        self.scan = None;
        let _ = self.mgr.flush_file(self.file_id);
    }
}
