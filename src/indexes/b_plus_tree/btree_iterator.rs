use crate::buffer_pool::ArcBufferPool;
use crate::pages::index_page::LeafPage;
use crate::pages::{PageId, INVALID_PAGE_ID};
use crate::record::key::KeyManager;
use crate::record::{Row, RowId};

/// Ordered (key row, RowId) walk over the leaf chain. Exactly one leaf is
/// pinned at a time; the pin travels with the iterator and is released on
/// drop.
pub struct BTreeIterator {
    bpm: ArcBufferPool,
    km: KeyManager,
    page_id: PageId,
    index: i32,
}

impl BTreeIterator {
    /// The caller hands over a pinned leaf; the iterator owns that pin.
    pub(super) fn new(bpm: ArcBufferPool, km: KeyManager, page_id: PageId, index: i32) -> Self {
        Self {
            bpm,
            km,
            page_id,
            index,
        }
    }

    pub(super) fn exhausted(bpm: ArcBufferPool, km: KeyManager) -> Self {
        Self {
            bpm,
            km,
            page_id: INVALID_PAGE_ID,
            index: 0,
        }
    }

    fn release(&mut self) {
        if self.page_id != INVALID_PAGE_ID {
            self.bpm.lock().unpin_page(self.page_id, false);
            self.page_id = INVALID_PAGE_ID;
        }
    }
}

impl Iterator for BTreeIterator {
    type Item = (Row, RowId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }

            let mut guard = self.bpm.lock();
            let bpm = &mut *guard;
            let leaf: LeafPage = bpm
                .fetch_page(self.page_id)
                .expect("iterator leaf should be fetchable")
                .writer()
                .into();
            // drop the transient pin; the traveling pin keeps the leaf
            bpm.unpin_page(self.page_id, false);

            if self.index < leaf.get_size() {
                let key_row = self
                    .km
                    .row_from_key(leaf.key_at(self.index))
                    .expect("stored index key should deserialize");
                let rid = leaf.rid_at(self.index);
                self.index += 1;
                return Some((key_row, rid));
            }

            // leaf exhausted: move the pin along the chain
            let next = leaf.get_next_page_id();
            bpm.unpin_page(self.page_id, false);
            if next != INVALID_PAGE_ID {
                bpm.fetch_page(next)
                    .expect("chained leaf should be fetchable");
            }
            self.page_id = next;
            self.index = 0;
        }
    }
}

impl Drop for BTreeIterator {
    fn drop(&mut self) {
        self.release();
    }
}
