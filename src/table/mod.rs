pub mod freespace_map;
pub mod table_iterator;

use anyhow::{bail, Result};

use crate::buffer_pool::ArcBufferPool;
use crate::errors::Error;
use crate::pages::table_page::{TablePage, UpdateOutcome, MAX_TUPLE_SIZE, SLOT_SIZE};
use crate::pages::{PageId, INVALID_PAGE_ID};
use crate::record::schema::Schema;
use crate::record::{ByteReader, Row, RowId};
use freespace_map::FreeSpaceMap;
use table_iterator::TableIterator;

/// Variable-length records across a singly linked chain of slotted pages.
/// Inserts go through the free-space directory instead of walking the
/// chain.
pub struct TableHeap {
    bpm: ArcBufferPool,
    schema: Schema,
    first_page_id: PageId,
    last_page_id: PageId,
    freespace_map: FreeSpaceMap,
}

impl TableHeap {
    /// Create an empty heap with one fresh page.
    pub fn new(bpm: ArcBufferPool, schema: Schema) -> Result<Self> {
        let first_page_id = {
            let mut guard = bpm.lock();
            let frame = guard.new_page()?;
            let page_id = frame.reader().get_page_id();
            let mut page: TablePage = frame.writer().into();
            page.init(page_id);
            guard.unpin_page(page_id, true);
            page_id
        };

        let mut freespace_map = FreeSpaceMap::new(bpm.clone())?;
        {
            let mut guard = bpm.lock();
            let page: TablePage = guard.fetch_page(first_page_id)?.writer().into();
            let free = page.get_free_space() as u32;
            guard.unpin_page(first_page_id, false);
            drop(guard);
            freespace_map.set_new_pair(first_page_id, free)?;
        }

        Ok(Self {
            bpm,
            schema,
            first_page_id,
            last_page_id: first_page_id,
            freespace_map,
        })
    }

    /// Reattach a persisted heap, rebuilding the free-space directory from
    /// the page chain.
    pub fn open(bpm: ArcBufferPool, first_page_id: PageId, schema: Schema) -> Result<Self> {
        let mut freespace_map = FreeSpaceMap::new(bpm.clone())?;

        let mut last_page_id = first_page_id;
        let mut current = first_page_id;
        while current != INVALID_PAGE_ID {
            let (free, next) = {
                let mut guard = bpm.lock();
                let page: TablePage = guard.fetch_page(current)?.writer().into();
                let pair = (page.get_free_space() as u32, page.get_next_page_id());
                guard.unpin_page(current, false);
                pair
            };
            freespace_map.set_new_pair(current, free)?;
            last_page_id = current;
            current = next;
        }

        Ok(Self {
            bpm,
            schema,
            first_page_id,
            last_page_id,
            freespace_map,
        })
    }

    pub fn get_first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn get_schema(&self) -> &Schema {
        &self.schema
    }

    /// Insert a row, preferring the first page the free-space directory
    /// reports as large enough. Rows bigger than a page are refused.
    pub fn insert(&mut self, row: &Row) -> Result<RowId> {
        let size = row.serialized_size(&self.schema);
        if size > MAX_TUPLE_SIZE {
            bail!(Error::RowTooBig(MAX_TUPLE_SIZE, size));
        }

        let mut buf = Vec::with_capacity(size);
        row.serialize_to(&mut buf, &self.schema)?;

        // a fresh slot costs SLOT_SIZE on top of the payload
        let need = (size + SLOT_SIZE) as u32;

        let mut candidate = self.freespace_map.get_begin(need)?;
        while let Some(page_id) = candidate {
            let mut guard = self.bpm.lock();
            let mut page: TablePage = guard.fetch_page(page_id)?.writer().into();
            if let Some(slot) = page.insert_tuple(&buf) {
                let free = page.get_free_space() as u32;
                guard.unpin_page(page_id, true);
                drop(guard);
                self.freespace_map.set_free_space(page_id, free)?;
                return Ok(RowId::new(page_id, slot));
            }
            guard.unpin_page(page_id, false);
            drop(guard);
            candidate = self.freespace_map.get_next(need)?;
        }

        // no page fits, grow the chain
        let mut guard = self.bpm.lock();
        let frame = guard.new_page()?;
        let page_id = frame.reader().get_page_id();
        let mut page: TablePage = frame.writer().into();
        page.init(page_id);
        let slot = page
            .insert_tuple(&buf)
            .expect("fresh page rejected a row within the size limit");
        let free = page.get_free_space() as u32;
        guard.unpin_page(page_id, true);

        let mut tail: TablePage = guard.fetch_page(self.last_page_id)?.writer().into();
        tail.set_next_page_id(page_id);
        guard.unpin_page(self.last_page_id, true);
        drop(guard);

        self.last_page_id = page_id;
        self.freespace_map.set_new_pair(page_id, free)?;

        Ok(RowId::new(page_id, slot))
    }

    /// Tombstone a row; the space is reclaimed by [`Self::apply_delete`].
    pub fn mark_delete(&mut self, rid: RowId) -> Result<bool> {
        let mut guard = self.bpm.lock();
        let frame = guard.fetch_page(rid.get_page_id())?;
        let latch = frame.reader().get_latch();
        let mut page: TablePage = frame.writer().into();

        latch.wlock();
        let marked = page.mark_delete(rid.get_slot());
        latch.wunlock();

        guard.unpin_page(rid.get_page_id(), marked);
        Ok(marked)
    }

    /// Physically reclaim a tombstoned row (commit) or a rolled-back
    /// insert.
    pub fn apply_delete(&mut self, rid: RowId) -> Result<()> {
        let free = {
            let mut guard = self.bpm.lock();
            let frame = guard.fetch_page(rid.get_page_id())?;
            let latch = frame.reader().get_latch();
            let mut page: TablePage = frame.writer().into();

            latch.wlock();
            page.apply_delete(rid.get_slot());
            latch.wunlock();

            let free = page.get_free_space() as u32;
            guard.unpin_page(rid.get_page_id(), true);
            free
        };
        self.freespace_map.set_free_space(rid.get_page_id(), free)?;
        Ok(())
    }

    /// Clear a tombstone on abort.
    pub fn rollback_delete(&mut self, rid: RowId) -> Result<()> {
        let mut guard = self.bpm.lock();
        let frame = guard.fetch_page(rid.get_page_id())?;
        let latch = frame.reader().get_latch();
        let mut page: TablePage = frame.writer().into();

        latch.wlock();
        page.rollback_delete(rid.get_slot());
        latch.wunlock();

        guard.unpin_page(rid.get_page_id(), true);
        Ok(())
    }

    /// In-place update. On `InsufficientSpace` the caller deletes and
    /// reinserts.
    pub fn update(&mut self, row: &Row, rid: RowId) -> Result<UpdateOutcome> {
        let mut buf = vec![];
        row.serialize_to(&mut buf, &self.schema)?;

        let (outcome, free) = {
            let mut guard = self.bpm.lock();
            let frame = guard.fetch_page(rid.get_page_id())?;
            let latch = frame.reader().get_latch();
            let mut page: TablePage = frame.writer().into();

            latch.wlock();
            let outcome = page.update_tuple(&buf, rid.get_slot());
            latch.wunlock();

            let free = page.get_free_space() as u32;
            guard.unpin_page(rid.get_page_id(), outcome == UpdateOutcome::Ok);
            (outcome, free)
        };

        if outcome == UpdateOutcome::Ok {
            self.freespace_map.set_free_space(rid.get_page_id(), free)?;
        }
        Ok(outcome)
    }

    /// Read a live row; tombstoned rows read as `None`.
    pub fn get(&self, rid: RowId) -> Result<Option<Row>> {
        let mut guard = self.bpm.lock();
        let page: TablePage = guard.fetch_page(rid.get_page_id())?.writer().into();

        let row = match page.get_tuple(rid.get_slot()) {
            Some(bytes) => {
                let mut reader = ByteReader::new(bytes);
                let mut row = Row::deserialize_from(&mut reader, &self.schema)?;
                row.set_rid(rid);
                Some(row)
            }
            None => None,
        };

        guard.unpin_page(rid.get_page_id(), false);
        Ok(row)
    }

    /// Live rows in physical page order.
    pub fn iter(&self) -> TableIterator {
        TableIterator::new(self)
    }

    pub(crate) fn bpm(&self) -> &ArcBufferPool {
        &self.bpm
    }

    /// Release every page of the heap and its free-space directory back to
    /// the disk manager.
    pub fn free_heap(mut self) -> Result<()> {
        let mut current = self.first_page_id;
        while current != INVALID_PAGE_ID {
            let mut guard = self.bpm.lock();
            let page: TablePage = guard.fetch_page(current)?.writer().into();
            let next = page.get_next_page_id();
            guard.unpin_page(current, false);
            guard.delete_page(current)?;
            current = next;
        }
        self.freespace_map.free_pages()?;
        Ok(())
    }
}
