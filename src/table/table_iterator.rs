use crate::pages::table_page::TablePage;
use crate::pages::{PageId, INVALID_PAGE_ID};
use crate::record::{ByteReader, Row, RowId};

use super::TableHeap;

/// Walks the heap in physical order, skipping tombstones. Exactly one page
/// is pinned at a time; dropping the iterator releases it.
pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    page: Option<TablePage>,
    page_id: PageId,
    current_slot: Option<u32>,
}

impl<'a> TableIterator<'a> {
    pub(super) fn new(heap: &'a TableHeap) -> Self {
        let page_id = heap.get_first_page_id();
        let page: TablePage = heap
            .bpm()
            .lock()
            .fetch_page(page_id)
            .expect("first heap page should be fetchable")
            .writer()
            .into();

        TableIterator {
            heap,
            page: Some(page),
            page_id,
            current_slot: None,
        }
    }

    fn release(&mut self) {
        if self.page.take().is_some() {
            self.heap.bpm().lock().unpin_page(self.page_id, false);
        }
    }
}

impl Iterator for TableIterator<'_> {
    type Item = (RowId, Row);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page = self.page.as_ref()?;

            if let Some(slot) = page.get_next_tuple_slot(self.current_slot) {
                self.current_slot = Some(slot);
                let bytes = page.get_tuple(slot).expect("live slot should read");
                let mut reader = ByteReader::new(bytes);
                let mut row = Row::deserialize_from(&mut reader, self.heap.get_schema())
                    .expect("stored row should deserialize");
                let rid = RowId::new(self.page_id, slot);
                row.set_rid(rid);
                return Some((rid, row));
            }

            // page exhausted, move along the chain
            let next = page.get_next_page_id();
            self.release();
            if next == INVALID_PAGE_ID {
                return None;
            }

            self.page_id = next;
            self.page = Some(
                self.heap
                    .bpm()
                    .lock()
                    .fetch_page(next)
                    .expect("chained heap page should be fetchable")
                    .writer()
                    .into(),
            );
            self.current_slot = None;
        }
    }
}

impl Drop for TableIterator<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::buffer_pool::tests::test_arc_bpm;
    use crate::record::schema::{Column, Schema};
    use crate::record::types::TypeId;
    use crate::record::{Field, Row};
    use crate::table::TableHeap;

    fn test_schema() -> Schema {
        Schema::new(vec![Column::new("id", TypeId::Int, 0, false, false)])
    }

    fn int_row(id: i32) -> Row {
        Row::new(vec![Field::Int(id)])
    }

    #[test]
    fn test_skips_deleted() -> Result<()> {
        let bpm = test_arc_bpm(8);
        let mut heap = TableHeap::new(bpm.clone(), test_schema())?;

        heap.insert(&int_row(1))?;
        let rid = heap.insert(&int_row(2))?;
        heap.insert(&int_row(3))?;
        heap.mark_delete(rid)?;

        let ids: Vec<i32> = heap
            .iter()
            .map(|(_, row)| match row.get_field(0) {
                Field::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(vec![1, 3], ids);

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_walks_page_chain() -> Result<()> {
        let bpm = test_arc_bpm(8);
        let mut heap = TableHeap::new(bpm.clone(), test_schema())?;

        // int rows are 16 bytes + slot; several pages worth
        const ROWS: i32 = 600;
        for id in 0..ROWS {
            heap.insert(&int_row(id))?;
        }

        let mut expected = 0;
        for (rid, row) in heap.iter() {
            assert_eq!(&Field::Int(expected), row.get_field(0));
            assert_eq!(rid, row.get_rid());
            expected += 1;
        }
        assert_eq!(ROWS, expected);

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_early_drop_unpins() -> Result<()> {
        let bpm = test_arc_bpm(8);
        let mut heap = TableHeap::new(bpm.clone(), test_schema())?;
        heap.insert(&int_row(1))?;
        heap.insert(&int_row(2))?;

        let mut iter = heap.iter();
        let _ = iter.next();
        drop(iter);

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }
}
