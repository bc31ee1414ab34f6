use anyhow::Result;

use crate::buffer_pool::{ArcBufferPool, BufferPoolManager};
use crate::pages::index_page::{
    internal_capacity, leaf_capacity, BTreeNodePage, InternalPage, LeafPage,
};
use crate::pages::index_roots_page::IndexRootsPage;
use crate::pages::{PageId, INDEX_ROOTS_PAGE_ID, INVALID_PAGE_ID};
use crate::record::key::KeyManager;
use crate::record::RowId;

use super::btree_iterator::BTreeIterator;

/// Fan-outs derived from the page and key sizes unless the caller pins
/// them.
pub const UNDEFINED_SIZE: i32 = 0;

/// Disk-resident B+ tree over serialized row keys. Unique keys only; the
/// comparator comes from the [`KeyManager`]. The root's id is mirrored in
/// the index-roots directory page on every change.
pub struct BPlusTree {
    index_id: u32,
    root_page_id: PageId,
    bpm: ArcBufferPool,
    km: KeyManager,
    leaf_max_size: i32,
    internal_max_size: i32,
}

impl BPlusTree {
    pub fn new(index_id: u32, bpm: ArcBufferPool, km: KeyManager) -> Result<Self> {
        Self::with_max_sizes(index_id, bpm, km, UNDEFINED_SIZE, UNDEFINED_SIZE)
    }

    pub fn with_max_sizes(
        index_id: u32,
        bpm: ArcBufferPool,
        km: KeyManager,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> Result<Self> {
        let leaf_max_size = if leaf_max_size == UNDEFINED_SIZE {
            leaf_capacity(km.key_size())
        } else {
            leaf_max_size
        };
        let internal_max_size = if internal_max_size == UNDEFINED_SIZE {
            internal_capacity(km.key_size())
        } else {
            internal_max_size
        };

        // reattach to a persisted root when the directory already has one
        let root_page_id = {
            let mut guard = bpm.lock();
            let bpm = &mut *guard;
            let roots: IndexRootsPage = bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?.writer().into();
            let root = if roots.is_initialized() {
                roots.get_root_id(index_id).unwrap_or(INVALID_PAGE_ID)
            } else {
                INVALID_PAGE_ID
            };
            bpm.unpin_page(INDEX_ROOTS_PAGE_ID, false);
            root
        };

        Ok(Self {
            index_id,
            root_page_id,
            bpm,
            km,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    pub fn get_root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.km
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RowId>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut guard = self.bpm.lock();
        let bpm = &mut *guard;

        let leaf_id = self.find_leaf(bpm, Some(key))?;
        let leaf: LeafPage = bpm.fetch_page(leaf_id)?.writer().into();
        let result = leaf.lookup(key, &self.km);
        bpm.unpin_page(leaf_id, false);
        Ok(result)
    }

    /// Insert a unique key. Returns false when the key is already present.
    pub fn insert(&mut self, key: &[u8], rid: RowId) -> Result<bool> {
        let bpm_arc = self.bpm.clone();
        let mut guard = bpm_arc.lock();
        let bpm = &mut *guard;

        if self.is_empty() {
            self.start_new_tree(bpm, key, rid)?;
            return Ok(true);
        }
        self.insert_into_leaf(bpm, key, rid)
    }

    /// Remove a key; a missing key is a no-op.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        let bpm_arc = self.bpm.clone();
        let mut guard = bpm_arc.lock();
        let bpm = &mut *guard;

        if self.is_empty() {
            return Ok(());
        }

        let leaf_id = self.find_leaf(bpm, Some(key))?;
        let mut leaf: LeafPage = bpm.fetch_page(leaf_id)?.writer().into();
        if !leaf.remove_record(key, &self.km) {
            bpm.unpin_page(leaf_id, false);
            return Ok(());
        }

        let size = leaf.get_size();
        let min_size = leaf.min_size();
        let is_root = leaf.is_root();
        bpm.unpin_page(leaf_id, true);

        if is_root {
            if size == 0 {
                self.adjust_root(bpm, leaf_id)?;
            }
        } else if size < min_size {
            self.coalesce_or_redistribute(bpm, leaf_id)?;
        }
        Ok(())
    }

    /// Ordered iteration from the smallest key.
    pub fn iter(&self) -> Result<BTreeIterator> {
        if self.is_empty() {
            return Ok(BTreeIterator::exhausted(self.bpm.clone(), self.km.clone()));
        }
        let mut guard = self.bpm.lock();
        let bpm = &mut *guard;
        let leaf_id = self.find_leaf(bpm, None)?;
        bpm.fetch_page(leaf_id)?; // the iterator owns this pin
        Ok(BTreeIterator::new(
            self.bpm.clone(),
            self.km.clone(),
            leaf_id,
            0,
        ))
    }

    /// Ordered iteration from the first key >= `key`.
    pub fn iter_from(&self, key: &[u8]) -> Result<BTreeIterator> {
        if self.is_empty() {
            return Ok(BTreeIterator::exhausted(self.bpm.clone(), self.km.clone()));
        }
        let mut guard = self.bpm.lock();
        let bpm = &mut *guard;
        let leaf_id = self.find_leaf(bpm, Some(key))?;
        let leaf: LeafPage = bpm.fetch_page(leaf_id)?.writer().into();
        let index = match leaf.key_index(key, &self.km) {
            Ok(index) => index,
            Err(index) => index,
        };
        Ok(BTreeIterator::new(
            self.bpm.clone(),
            self.km.clone(),
            leaf_id,
            index,
        ))
    }

    /// Tear the whole tree down, returning its pages to the disk manager
    /// and dropping the directory entry.
    pub fn destroy(&mut self) -> Result<()> {
        let bpm_arc = self.bpm.clone();
        let mut guard = bpm_arc.lock();
        let bpm = &mut *guard;

        if !self.is_empty() {
            self.destroy_subtree(bpm, self.root_page_id)?;
            self.root_page_id = INVALID_PAGE_ID;
        }

        let mut roots: IndexRootsPage = bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?.writer().into();
        if roots.is_initialized() {
            roots.delete(self.index_id);
        }
        bpm.unpin_page(INDEX_ROOTS_PAGE_ID, true);
        Ok(())
    }

    fn destroy_subtree(&self, bpm: &mut BufferPoolManager, page_id: PageId) -> Result<()> {
        let node: InternalPage = bpm.fetch_page(page_id)?.writer().into();
        let children = if node.is_leaf() {
            vec![]
        } else {
            node.values()
        };
        bpm.unpin_page(page_id, false);

        for child in children {
            self.destroy_subtree(bpm, child)?;
        }
        bpm.delete_page(page_id)?;
        Ok(())
    }

    /// Descend to the leaf covering `key` (or the leftmost leaf when no key
    /// is given). Every page on the way down is released before moving on.
    fn find_leaf(&self, bpm: &mut BufferPoolManager, key: Option<&[u8]>) -> Result<PageId> {
        let mut current = self.root_page_id;
        loop {
            let node: InternalPage = bpm.fetch_page(current)?.writer().into();
            if node.is_leaf() {
                bpm.unpin_page(current, false);
                return Ok(current);
            }
            let child = match key {
                Some(key) => node.lookup(key, &self.km),
                None => node.value_at(0),
            };
            bpm.unpin_page(current, false);
            current = child;
        }
    }

    fn start_new_tree(
        &mut self,
        bpm: &mut BufferPoolManager,
        key: &[u8],
        rid: RowId,
    ) -> Result<()> {
        let frame = bpm.new_page()?;
        let page_id = frame.reader().get_page_id();
        let mut leaf: LeafPage = frame.writer().into();
        leaf.init(page_id, INVALID_PAGE_ID, self.km.key_size(), self.leaf_max_size);
        leaf.insert(key, rid, &self.km);
        bpm.unpin_page(page_id, true);

        self.root_page_id = page_id;
        self.update_root_page_id(bpm, true)
    }

    fn insert_into_leaf(
        &mut self,
        bpm: &mut BufferPoolManager,
        key: &[u8],
        rid: RowId,
    ) -> Result<bool> {
        let leaf_id = self.find_leaf(bpm, Some(key))?;
        let mut leaf: LeafPage = bpm.fetch_page(leaf_id)?.writer().into();

        if leaf.lookup(key, &self.km).is_some() {
            bpm.unpin_page(leaf_id, false);
            return Ok(false);
        }

        let new_size = leaf.insert(key, rid, &self.km);
        if new_size <= self.leaf_max_size {
            bpm.unpin_page(leaf_id, true);
            return Ok(true);
        }

        // overflow: split the upper half into a fresh leaf
        let frame = bpm.new_page()?;
        let new_leaf_id = frame.reader().get_page_id();
        let mut new_leaf: LeafPage = frame.writer().into();
        new_leaf.init(
            new_leaf_id,
            leaf.get_parent_page_id(),
            self.km.key_size(),
            self.leaf_max_size,
        );
        leaf.move_half_to(&mut new_leaf);

        let separator = new_leaf.key_at(0).to_vec();
        self.insert_into_parent(bpm, leaf_id, new_leaf_id, &separator)?;

        bpm.unpin_page(new_leaf_id, true);
        bpm.unpin_page(leaf_id, true);
        Ok(true)
    }

    fn insert_into_parent(
        &mut self,
        bpm: &mut BufferPoolManager,
        old_id: PageId,
        new_id: PageId,
        key: &[u8],
    ) -> Result<()> {
        let parent_id = {
            let old: BTreeNodePage = bpm.fetch_page(old_id)?.writer().into();
            let parent_id = old.get_parent_page_id();
            bpm.unpin_page(old_id, false);
            parent_id
        };

        if parent_id == INVALID_PAGE_ID {
            // the split reached the root: grow the tree by one level
            let frame = bpm.new_page()?;
            let root_id = frame.reader().get_page_id();
            let mut root: InternalPage = frame.writer().into();
            root.init(root_id, INVALID_PAGE_ID, self.km.key_size(), self.internal_max_size);
            root.populate_new_root(old_id, key, new_id);
            bpm.unpin_page(root_id, true);

            self.set_parent(bpm, old_id, root_id)?;
            self.set_parent(bpm, new_id, root_id)?;

            self.root_page_id = root_id;
            return self.update_root_page_id(bpm, false);
        }

        let mut parent: InternalPage = bpm.fetch_page(parent_id)?.writer().into();
        let new_size = parent.insert_node_after(old_id, key, new_id);
        self.set_parent(bpm, new_id, parent_id)?;

        if new_size <= self.internal_max_size {
            bpm.unpin_page(parent_id, true);
            return Ok(());
        }

        // parent overflows as well: split it and push a separator further up
        let frame = bpm.new_page()?;
        let new_internal_id = frame.reader().get_page_id();
        let mut new_internal: InternalPage = frame.writer().into();
        new_internal.init(
            new_internal_id,
            parent.get_parent_page_id(),
            self.km.key_size(),
            self.internal_max_size,
        );

        let moved = parent.move_half_to(&mut new_internal);
        for child in moved {
            self.set_parent(bpm, child, new_internal_id)?;
        }

        let separator = new_internal.key_at(0).to_vec();
        self.insert_into_parent(bpm, parent_id, new_internal_id, &separator)?;

        bpm.unpin_page(new_internal_id, true);
        bpm.unpin_page(parent_id, true);
        Ok(())
    }

    /// Underflow repair: borrow from a sibling when the pair can spare an
    /// entry, merge otherwise. Recurses up when the parent underflows.
    fn coalesce_or_redistribute(
        &mut self,
        bpm: &mut BufferPoolManager,
        node_id: PageId,
    ) -> Result<()> {
        let (parent_id, node_is_leaf) = {
            let node: BTreeNodePage = bpm.fetch_page(node_id)?.writer().into();
            let info = (node.get_parent_page_id(), node.is_leaf());
            bpm.unpin_page(node_id, false);
            info
        };

        if parent_id == INVALID_PAGE_ID {
            return self.adjust_root(bpm, node_id);
        }

        let mut parent: InternalPage = bpm.fetch_page(parent_id)?.writer().into();
        let index = parent
            .value_index(node_id)
            .expect("underflowed node missing from its parent");
        // prefer the left sibling; the leftmost child borrows from the right
        let sibling_index = if index == 0 { 1 } else { index - 1 };
        let sibling_id = parent.value_at(sibling_index);

        let merged = if node_is_leaf {
            self.repair_leaf(bpm, &mut parent, node_id, sibling_id, index)?
        } else {
            self.repair_internal(bpm, &mut parent, node_id, sibling_id, index)?
        };

        if !merged {
            bpm.unpin_page(parent_id, true);
            return Ok(());
        }

        let parent_size = parent.get_size();
        let parent_min = parent.min_size();
        let parent_is_root = parent.is_root();
        bpm.unpin_page(parent_id, true);

        if parent_is_root {
            if parent_size == 1 {
                self.adjust_root(bpm, parent_id)?;
            }
        } else if parent_size < parent_min {
            self.coalesce_or_redistribute(bpm, parent_id)?;
        }
        Ok(())
    }

    /// Returns true when the pages were merged (the parent lost a child).
    fn repair_leaf(
        &mut self,
        bpm: &mut BufferPoolManager,
        parent: &mut InternalPage,
        node_id: PageId,
        sibling_id: PageId,
        index: i32,
    ) -> Result<bool> {
        let mut node: LeafPage = bpm.fetch_page(node_id)?.writer().into();
        let mut sibling: LeafPage = bpm.fetch_page(sibling_id)?.writer().into();

        if node.get_size() + sibling.get_size() >= node.get_max_size() {
            if index == 0 {
                sibling.move_first_to_end_of(&mut node);
                parent.set_key_at(1, sibling.key_at(0));
            } else {
                sibling.move_last_to_front_of(&mut node);
                parent.set_key_at(index, node.key_at(0));
            }
            bpm.unpin_page(node_id, true);
            bpm.unpin_page(sibling_id, true);
            return Ok(false);
        }

        // merge into the left-adjacent page and drop the right one
        let (mut left, mut right, right_id, removed_index) = if index == 0 {
            (node, sibling, sibling_id, 1)
        } else {
            (sibling, node, node_id, index)
        };
        right.move_all_to(&mut left);

        bpm.unpin_page(node_id, true);
        bpm.unpin_page(sibling_id, true);
        bpm.delete_page(right_id)?;

        parent.remove(removed_index);
        Ok(true)
    }

    fn repair_internal(
        &mut self,
        bpm: &mut BufferPoolManager,
        parent: &mut InternalPage,
        node_id: PageId,
        sibling_id: PageId,
        index: i32,
    ) -> Result<bool> {
        let mut node: InternalPage = bpm.fetch_page(node_id)?.writer().into();
        let mut sibling: InternalPage = bpm.fetch_page(sibling_id)?.writer().into();

        if node.get_size() + sibling.get_size() >= node.get_max_size() {
            let moved_child = if index == 0 {
                let middle_key = parent.key_at(1).to_vec();
                let child = sibling.move_first_to_end_of(&mut node, &middle_key);
                parent.set_key_at(1, sibling.key_at(0));
                child
            } else {
                let middle_key = parent.key_at(index).to_vec();
                let separator = sibling.last_key().to_vec();
                let child = sibling.move_last_to_front_of(&mut node, &middle_key);
                parent.set_key_at(index, &separator);
                child
            };
            bpm.unpin_page(node_id, true);
            bpm.unpin_page(sibling_id, true);
            self.set_parent(bpm, moved_child, node_id)?;
            return Ok(false);
        }

        let (mut left, mut right, left_id, right_id, removed_index) = if index == 0 {
            (node, sibling, node_id, sibling_id, 1)
        } else {
            (sibling, node, sibling_id, node_id, index)
        };
        let middle_key = parent.key_at(removed_index).to_vec();
        let moved = right.move_all_to(&mut left, &middle_key);

        bpm.unpin_page(node_id, true);
        bpm.unpin_page(sibling_id, true);
        for child in moved {
            self.set_parent(bpm, child, left_id)?;
        }
        bpm.delete_page(right_id)?;

        parent.remove(removed_index);
        Ok(true)
    }

    /// Shrink at the top: promote a lone child, or mark the tree empty when
    /// the last key left the root leaf.
    fn adjust_root(&mut self, bpm: &mut BufferPoolManager, root_id: PageId) -> Result<()> {
        let mut root: InternalPage = bpm.fetch_page(root_id)?.writer().into();

        if !root.is_leaf() && root.get_size() == 1 {
            let child = root.remove_and_return_only_child();
            bpm.unpin_page(root_id, true);
            bpm.delete_page(root_id)?;

            self.set_parent(bpm, child, INVALID_PAGE_ID)?;
            self.root_page_id = child;
            return self.update_root_page_id(bpm, false);
        }

        if root.is_leaf() && root.get_size() == 0 {
            bpm.unpin_page(root_id, false);
            bpm.delete_page(root_id)?;

            self.root_page_id = INVALID_PAGE_ID;
            return self.update_root_page_id(bpm, false);
        }

        bpm.unpin_page(root_id, false);
        Ok(())
    }

    fn set_parent(
        &self,
        bpm: &mut BufferPoolManager,
        page_id: PageId,
        parent_id: PageId,
    ) -> Result<()> {
        let mut node: BTreeNodePage = bpm.fetch_page(page_id)?.writer().into();
        node.set_parent_page_id(parent_id);
        bpm.unpin_page(page_id, true);
        Ok(())
    }

    /// Mirror the root id into the index-roots directory; `insert` on first
    /// creation, update afterwards.
    fn update_root_page_id(&self, bpm: &mut BufferPoolManager, insert: bool) -> Result<()> {
        let mut roots: IndexRootsPage = bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?.writer().into();
        if !roots.is_initialized() {
            roots.init(INDEX_ROOTS_PAGE_ID);
        }
        if insert && !roots.insert(self.index_id, self.root_page_id) {
            // a collapsed tree left its old entry behind
            roots.update(self.index_id, self.root_page_id);
        } else if !insert && !roots.update(self.index_id, self.root_page_id) {
            roots.insert(self.index_id, self.root_page_id);
        }
        bpm.unpin_page(INDEX_ROOTS_PAGE_ID, true);
        Ok(())
    }

    /// Structural audit used by the tests: size bounds on every non-root
    /// node, ascending keys inside each leaf, and a next-pointer chain that
    /// enumerates exactly the leaves, left to right.
    #[cfg(test)]
    pub(crate) fn check_integrity(&self) -> Result<()> {
        use anyhow::ensure;
        use std::cmp::Ordering;

        if self.is_empty() {
            return Ok(());
        }
        let mut guard = self.bpm.lock();
        let bpm = &mut *guard;

        let mut queue = vec![self.root_page_id];
        let mut leaves_in_order = vec![];
        while let Some(page_id) = queue.pop() {
            // LeafPage derefs to the shared header, so one view serves both
            // the checks and the leaf reads
            let leaf: LeafPage = bpm.fetch_page(page_id)?.writer().into();
            let is_root = page_id == self.root_page_id;

            ensure!(leaf.get_size() <= leaf.get_max_size(), "node overflow");
            if !is_root {
                ensure!(leaf.get_size() >= leaf.min_size(), "node underflow");
            }

            if leaf.is_leaf() {
                for i in 1..leaf.get_size() {
                    ensure!(
                        self.km.compare(leaf.key_at(i - 1), leaf.key_at(i)) == Ordering::Less,
                        "leaf keys out of order"
                    );
                }
                leaves_in_order.push(page_id);
                bpm.unpin_page(page_id, false);
            } else {
                bpm.unpin_page(page_id, false);
                let internal: InternalPage = bpm.fetch_page(page_id)?.writer().into();
                let children = internal.values();
                bpm.unpin_page(page_id, false);

                for &child in &children {
                    let child_node: BTreeNodePage = bpm.fetch_page(child)?.writer().into();
                    ensure!(
                        child_node.get_parent_page_id() == page_id,
                        "broken parent pointer"
                    );
                    bpm.unpin_page(child, false);
                }
                // depth-first, rightmost first, so leaves pop left to right
                queue.extend(children.into_iter().rev());
            }
        }

        // the next-pointer chain must enumerate the same leaves
        let mut chained = vec![];
        let mut current = *leaves_in_order.first().unwrap();
        while current != INVALID_PAGE_ID {
            chained.push(current);
            let leaf: LeafPage = bpm.fetch_page(current)?.writer().into();
            let next = leaf.get_next_page_id();
            bpm.unpin_page(current, false);
            current = next;
        }
        ensure!(chained == leaves_in_order, "leaf chain mismatch");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::tests::test_arc_bpm;
    use crate::record::schema::{Column, Schema};
    use crate::record::types::TypeId;
    use crate::record::{Field, Row};
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn int_key_manager() -> KeyManager {
        KeyManager::new(Schema::new(vec![Column::new(
            "id",
            TypeId::Int,
            0,
            false,
            true,
        )]))
    }

    /// Fresh pool with logical pages 0 and 1 claimed, the way the catalog
    /// reserves them for its meta page and the index-roots directory.
    fn test_bpm_with_reserved_pages(size: usize) -> ArcBufferPool {
        let bpm = test_arc_bpm(size);
        {
            let mut guard = bpm.lock();
            for expected in 0..2 {
                let page_id = guard.new_page().unwrap().reader().get_page_id();
                assert_eq!(expected, page_id);
                guard.unpin_page(page_id, false);
            }
        }
        bpm
    }

    fn test_tree(bpm: &ArcBufferPool, leaf_max: i32, internal_max: i32) -> BPlusTree {
        BPlusTree::with_max_sizes(0, bpm.clone(), int_key_manager(), leaf_max, internal_max)
            .unwrap()
    }

    fn key(tree: &BPlusTree, v: i32) -> Vec<u8> {
        tree.key_manager()
            .key_from_row(&Row::new(vec![Field::Int(v)]))
            .unwrap()
    }

    fn key_value(row: &Row) -> i32 {
        match row.get_field(0) {
            Field::Int(v) => *v,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_insert_then_get() -> Result<()> {
        let bpm = test_bpm_with_reserved_pages(64);
        let mut tree = test_tree(&bpm, 4, 4);

        assert!(tree.is_empty());
        assert_eq!(None, tree.get_value(&key(&tree, 1))?);

        for v in 1..=50 {
            assert!(tree.insert(&key(&tree, v), RowId::new(1, v as u32))?);
        }
        tree.check_integrity()?;

        for v in 1..=50 {
            assert_eq!(
                Some(RowId::new(1, v as u32)),
                tree.get_value(&key(&tree, v))?
            );
        }
        assert_eq!(None, tree.get_value(&key(&tree, 51))?);

        // unique keys only
        assert!(!tree.insert(&key(&tree, 25), RowId::new(9, 9))?);

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_shuffled_insert_keeps_shape() -> Result<()> {
        let bpm = test_bpm_with_reserved_pages(64);
        let mut tree = test_tree(&bpm, 4, 4);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);

        let mut values: Vec<i32> = (0..200).collect();
        values.shuffle(&mut rng);
        for (i, &v) in values.iter().enumerate() {
            tree.insert(&key(&tree, v), RowId::new(1, v as u32))?;
            if i % 20 == 0 {
                tree.check_integrity()?;
            }
        }
        tree.check_integrity()?;

        let scanned: Vec<i32> = tree.iter()?.map(|(row, _)| key_value(&row)).collect();
        let expected: Vec<i32> = (0..200).collect();
        assert_eq!(expected, scanned);

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_range_scan() -> Result<()> {
        let bpm = test_bpm_with_reserved_pages(256);
        let mut tree = test_tree(&bpm, UNDEFINED_SIZE, UNDEFINED_SIZE);

        for v in 1..=10_000 {
            assert!(tree.insert(&key(&tree, v), RowId::new(1, v as u32))?);
        }
        tree.check_integrity()?;

        let mut expected = 4000;
        for (row, rid) in tree.iter_from(&key(&tree, 4000))? {
            assert_eq!(expected, key_value(&row));
            assert_eq!(RowId::new(1, expected as u32), rid);
            expected += 1;
        }
        assert_eq!(10_001, expected);

        tree.remove(&key(&tree, 5000))?;
        assert_eq!(None, tree.get_value(&key(&tree, 5000))?);
        assert_eq!(
            Some(RowId::new(1, 5001)),
            tree.get_value(&key(&tree, 5001))?
        );

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_remove_until_empty() -> Result<()> {
        let bpm = test_bpm_with_reserved_pages(64);
        let mut tree = test_tree(&bpm, 4, 4);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xDEAD);

        let mut values: Vec<i32> = (0..100).collect();
        values.shuffle(&mut rng);
        for &v in &values {
            tree.insert(&key(&tree, v), RowId::new(1, v as u32))?;
        }

        // removing a missing key is a no-op
        tree.remove(&key(&tree, 1000))?;
        tree.check_integrity()?;

        values.shuffle(&mut rng);
        for (i, &v) in values.iter().enumerate() {
            tree.remove(&key(&tree, v))?;
            assert_eq!(None, tree.get_value(&key(&tree, v))?);
            if i % 10 == 0 {
                tree.check_integrity()?;
            }
        }

        assert!(tree.is_empty());
        assert_eq!(None, tree.get_value(&key(&tree, values[0]))?);

        // the tree grows again after full collapse
        tree.insert(&key(&tree, 1), RowId::new(1, 1))?;
        assert_eq!(Some(RowId::new(1, 1)), tree.get_value(&key(&tree, 1))?);

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_root_reattaches_from_directory() -> Result<()> {
        let bpm = test_bpm_with_reserved_pages(64);

        {
            let mut tree = BPlusTree::with_max_sizes(7, bpm.clone(), int_key_manager(), 4, 4)?;
            for v in 0..50 {
                tree.insert(&key(&tree, v), RowId::new(1, v as u32))?;
            }
        }

        // a new handle over the same pool finds the root through page 1
        let tree = BPlusTree::with_max_sizes(7, bpm.clone(), int_key_manager(), 4, 4)?;
        assert!(!tree.is_empty());
        for v in 0..50 {
            assert_eq!(
                Some(RowId::new(1, v as u32)),
                tree.get_value(&key(&tree, v))?
            );
        }

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_destroy_releases_pages() -> Result<()> {
        let bpm = test_bpm_with_reserved_pages(64);
        let mut tree = test_tree(&bpm, 4, 4);

        for v in 0..100 {
            tree.insert(&key(&tree, v), RowId::new(1, v as u32))?;
        }
        tree.destroy()?;

        assert!(tree.is_empty());
        assert_eq!(None, tree.get_value(&key(&tree, 5))?);
        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }
}
