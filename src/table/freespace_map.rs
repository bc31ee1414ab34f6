use anyhow::Result;

use crate::buffer_pool::ArcBufferPool;
use crate::pages::freespace_map_page::FreeSpaceMapPage;
use crate::pages::{PageId, INVALID_PAGE_ID};

/// Free-space directory for one table heap: a chain of map pages holding
/// (page_id, free_space) pairs so an insert never scans the heap itself.
/// `get_begin`/`get_next` keep a cursor so a probe can resume where the
/// previous one stopped.
pub struct FreeSpaceMap {
    bpm: ArcBufferPool,
    first_page_id: PageId,

    // cursor of the last successful probe
    page_index: PageId,
    internal_index: u32,
}

impl FreeSpaceMap {
    pub fn new(bpm: ArcBufferPool) -> Result<Self> {
        let first_page_id = {
            let mut guard = bpm.lock();
            let frame = guard.new_page()?;
            let page_id = frame.reader().get_page_id();
            let mut map_page: FreeSpaceMapPage = frame.writer().into();
            map_page.init(page_id);
            guard.unpin_page(page_id, true);
            page_id
        };

        Ok(Self {
            bpm,
            first_page_id,
            page_index: first_page_id,
            internal_index: 0,
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Append a pair for a newly created heap page, chaining a fresh map
    /// page when the tail is full.
    pub fn set_new_pair(&mut self, page_id: PageId, free_space: u32) -> Result<()> {
        let mut guard = self.bpm.lock();

        let mut current = self.first_page_id;
        loop {
            let mut map_page: FreeSpaceMapPage = guard.fetch_page(current)?.writer().into();
            if !map_page.is_full() {
                map_page.new_pair(page_id, free_space);
                guard.unpin_page(current, true);
                return Ok(());
            }

            let next = map_page.get_next_page_id();
            guard.unpin_page(current, false);

            if next == INVALID_PAGE_ID {
                let frame = guard.new_page()?;
                let next = frame.reader().get_page_id();
                let mut new_map: FreeSpaceMapPage = frame.writer().into();
                new_map.init(next);
                guard.unpin_page(next, true);

                let mut map_page: FreeSpaceMapPage = guard.fetch_page(current)?.writer().into();
                map_page.set_next_page_id(next);
                guard.unpin_page(current, true);
                current = next;
            } else {
                current = next;
            }
        }
    }

    /// Update the recorded free space of an existing heap page.
    pub fn set_free_space(&mut self, page_id: PageId, free_space: u32) -> Result<bool> {
        let mut guard = self.bpm.lock();

        let mut current = self.first_page_id;
        while current != INVALID_PAGE_ID {
            let mut map_page: FreeSpaceMapPage = guard.fetch_page(current)?.writer().into();
            let pair_count = map_page.get_pair_count();
            for i in 0..pair_count {
                if map_page.get_pair_page_id(i) == page_id {
                    map_page.set_free_space(i, free_space);
                    guard.unpin_page(current, true);
                    return Ok(true);
                }
            }
            let next = map_page.get_next_page_id();
            guard.unpin_page(current, false);
            current = next;
        }
        Ok(false)
    }

    /// First page with at least `need_space` free, scanning from the head.
    pub fn get_begin(&mut self, need_space: u32) -> Result<Option<PageId>> {
        self.scan_from(self.first_page_id, 0, need_space)
    }

    /// Continue the scan right after the cursor.
    pub fn get_next(&mut self, need_space: u32) -> Result<Option<PageId>> {
        self.scan_from(self.page_index, self.internal_index + 1, need_space)
    }

    /// Release every map page back to the disk manager.
    pub fn free_pages(&mut self) -> Result<()> {
        let mut current = self.first_page_id;
        while current != INVALID_PAGE_ID {
            let mut guard = self.bpm.lock();
            let map_page: FreeSpaceMapPage = guard.fetch_page(current)?.writer().into();
            let next = map_page.get_next_page_id();
            guard.unpin_page(current, false);
            guard.delete_page(current)?;
            current = next;
        }
        self.first_page_id = INVALID_PAGE_ID;
        Ok(())
    }

    fn scan_from(
        &mut self,
        start_page: PageId,
        start_index: u32,
        need_space: u32,
    ) -> Result<Option<PageId>> {
        let mut guard = self.bpm.lock();

        let mut current = start_page;
        let mut index = start_index;
        while current != INVALID_PAGE_ID {
            let map_page: FreeSpaceMapPage = guard.fetch_page(current)?.writer().into();
            let pair_count = map_page.get_pair_count();

            for i in index..pair_count {
                if map_page.get_free_space(i) >= need_space {
                    let found = map_page.get_pair_page_id(i);
                    guard.unpin_page(current, false);
                    self.page_index = current;
                    self.internal_index = i;
                    return Ok(Some(found));
                }
            }

            let next = map_page.get_next_page_id();
            guard.unpin_page(current, false);
            current = next;
            index = 0;
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::tests::test_arc_bpm;
    use crate::pages::freespace_map_page::MAX_PAIR;

    #[test]
    fn test_cursor_walk() -> Result<()> {
        let bpm = test_arc_bpm(8);
        let mut map = FreeSpaceMap::new(bpm.clone())?;

        map.set_new_pair(1, 10)?;
        map.set_new_pair(2, 100)?;
        map.set_new_pair(3, 1000)?;

        assert_eq!(Some(1), map.get_begin(5)?);
        assert_eq!(Some(2), map.get_next(5)?);
        assert_eq!(Some(3), map.get_next(5)?);

        assert_eq!(Some(2), map.get_begin(50)?);
        assert_eq!(Some(3), map.get_next(500)?);

        assert_eq!(Some(3), map.get_begin(5000)?);
        assert_eq!(None, map.get_next(5000)?);

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_never_selects_small_page() -> Result<()> {
        let bpm = test_arc_bpm(8);
        let mut map = FreeSpaceMap::new(bpm)?;

        map.set_new_pair(1, 64)?;
        map.set_new_pair(2, 128)?;

        assert_eq!(Some(2), map.get_begin(100)?);
        assert_eq!(None, map.get_begin(1000)?);
        Ok(())
    }

    #[test]
    fn test_set_free_space() -> Result<()> {
        let bpm = test_arc_bpm(8);
        let mut map = FreeSpaceMap::new(bpm)?;

        map.set_new_pair(1, 10)?;
        map.set_new_pair(2, 20)?;

        assert!(map.set_free_space(1, 500)?);
        assert!(!map.set_free_space(9, 1)?);

        assert_eq!(Some(1), map.get_begin(400)?);
        Ok(())
    }

    #[test]
    fn test_spills_to_second_map_page() -> Result<()> {
        let bpm = test_arc_bpm(8);
        let mut map = FreeSpaceMap::new(bpm.clone())?;

        for i in 0..(MAX_PAIR as u32 + 5) {
            map.set_new_pair(i as PageId + 100, i)?;
        }

        // the spilled entries are still reachable
        let need = MAX_PAIR as u32 + 2;
        assert_eq!(
            Some(need as PageId + 100),
            map.get_begin(need)?
        );
        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }
}
