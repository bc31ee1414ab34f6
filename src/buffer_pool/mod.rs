mod frame;
mod replacer;

use std::collections::{HashMap, LinkedList};
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::FairMutex;

use crate::disk_manager::DiskManager;
use crate::errors::Error;
#[cfg(debug_assertions)]
use crate::get_caller_name;
use crate::pages::traits::Serialize;
use crate::pages::{PageId, PAGE_SIZE};
use crate::printdbg;
pub use frame::Frame;
use replacer::Replacer;

pub const DEFAULT_POOL_SIZE: usize = 4096;

pub type FrameId = usize;
pub type ArcBufferPool = Arc<FairMutex<BufferPoolManager>>;

/// Fixed array of frames caching disk pages. A single latch (the FairMutex
/// in [`ArcBufferPool`]) protects the page table, free list and replacer;
/// the caller's pin keeps a returned frame stable after the latch drops.
pub struct BufferPoolManager {
    disk_manager: DiskManager,

    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_frames: LinkedList<FrameId>,
    replacer: Box<dyn Replacer>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_file: &str) -> Result<Self> {
        let frames = (0..pool_size).map(|_| Frame::new()).collect::<Vec<_>>();
        let disk_manager = DiskManager::new(db_file)?;

        Ok(Self {
            disk_manager,
            frames,
            page_table: HashMap::new(),
            free_frames: LinkedList::from_iter(0..pool_size),
            replacer: Box::new(replacer::LRU::new(pool_size)),
        })
    }

    /// Grab a frame: the free list wins, eviction second. The victim's old
    /// page is written back when dirty.
    fn find_free_frame(&mut self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_frames.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.victim() else {
            bail!(Error::NoFreeFrames);
        };

        let frame = &mut self.frames[frame_id];
        assert!(frame.get_pin_count() == 0);
        let old_page_id = frame.reader().get_page_id();

        printdbg!(
            "page {} (frame: {frame_id}) chosen for eviction, is dirty: {}",
            old_page_id,
            frame.reader().is_dirty()
        );

        if frame.reader().is_dirty() {
            let buf: [u8; PAGE_SIZE] = frame.reader().as_bytes().try_into().unwrap();
            self.disk_manager.write_page(old_page_id, &buf)?;
            self.frames[frame_id].writer().mark_clean();
        }

        self.page_table.remove(&old_page_id);
        Ok(frame_id)
    }

    pub fn fetch_page(&mut self, page_id: PageId) -> Result<&mut Frame> {
        let frame_id = if let Some(frame_id) = self.page_table.get(&page_id) {
            *frame_id
        } else {
            let frame_id = self.find_free_frame()?;

            let mut buf = [0u8; PAGE_SIZE];
            self.disk_manager.read_page(page_id, &mut buf)?;

            let frame = &mut self.frames[frame_id];
            frame.reset();
            let page = frame.writer();
            page.write_bytes(0, &buf);
            page.mark_clean();
            page.set_page_id(page_id);

            self.page_table.insert(page_id, frame_id);
            frame_id
        };

        let frame = &mut self.frames[frame_id];
        frame.pin();
        self.replacer.pin(frame_id);

        printdbg!(
            "{} fetched page {page_id} (frame: {frame_id}) with pin count {}",
            get_caller_name!(),
            frame.get_pin_count()
        );

        Ok(frame)
    }

    /// Allocate a fresh logical page and cache it zeroed and pinned.
    pub fn new_page(&mut self) -> Result<&mut Frame> {
        let page_id = self.disk_manager.allocate_page()?;

        let frame_id = match self.find_free_frame() {
            Ok(frame_id) => frame_id,
            Err(e) => {
                // don't leak the allocation when every frame is pinned
                self.disk_manager.deallocate_page(page_id)?;
                return Err(e);
            }
        };

        let frame = &mut self.frames[frame_id];
        frame.reset();
        frame.writer().init_header(page_id);
        frame.pin();

        self.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        printdbg!("created page {} (frame: {frame_id})", page_id);

        Ok(frame)
    }

    pub fn unpin_page(&mut self, page_id: PageId, dirty: bool) {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            printdbg!("unpin of uncached page {}", page_id);
            return;
        };

        let frame = &mut self.frames[frame_id];
        assert!(
            frame.get_pin_count() > 0,
            "page {} has pin count 0, but an unpin was attempted",
            page_id
        );
        frame.unpin();
        if dirty {
            frame.writer().mark_dirty();
        }

        printdbg!(
            "{} page {page_id} (frame: {frame_id}) unpinned, pin count: {}",
            get_caller_name!(),
            frame.get_pin_count()
        );

        if frame.get_pin_count() == 0 {
            self.replacer.unpin(frame_id);
        }
    }

    /// Write a cached page back and clear its dirty flag; uncached pages
    /// are a no-op.
    pub fn flush_page(&mut self, page_id: PageId) -> Result<()> {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            return Ok(());
        };

        let frame = &mut self.frames[frame_id];
        let buf: [u8; PAGE_SIZE] = frame.reader().as_bytes().try_into().unwrap();
        self.disk_manager.write_page(page_id, &buf)?;
        frame.writer().mark_clean();
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<()> {
        let cached: Vec<PageId> = self.page_table.keys().copied().collect();
        for page_id in cached {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and the disk. Fails (returns false) only
    /// when the page is cached and pinned.
    pub fn delete_page(&mut self, page_id: PageId) -> Result<bool> {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            self.disk_manager.deallocate_page(page_id)?;
            return Ok(true);
        };

        if self.frames[frame_id].get_pin_count() > 0 {
            return Ok(false);
        }

        self.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        self.frames[frame_id].reset();
        self.free_frames.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Every fetch must have been matched by an unpin.
    pub fn check_all_unpinned(&self) -> bool {
        self.frames
            .iter()
            .enumerate()
            .inspect(|(i, f)| {
                if f.get_pin_count() != 0 {
                    printdbg!(
                        "frame {} (page {}) has pin count {}",
                        i,
                        f.reader().get_page_id(),
                        f.get_pin_count()
                    );
                }
            })
            .all(|(_, f)| f.get_pin_count() == 0)
    }

    pub fn allocated_page_count(&mut self) -> u32 {
        self.disk_manager.allocated_pages()
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u16> {
        let frame_id = *self.page_table.get(&page_id)?;
        Some(self.frames[frame_id].get_pin_count())
    }

    pub fn close(&mut self) -> Result<()> {
        self.flush_all()?;
        self.disk_manager.close()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::disk_manager::test_path;

    pub fn test_arc_bpm(size: usize) -> ArcBufferPool {
        Arc::new(FairMutex::new(
            BufferPoolManager::new(size, &test_path()).unwrap(),
        ))
    }

    #[test]
    fn test_round_trip_through_small_pool() -> Result<()> {
        let mut bpm = BufferPoolManager::new(4, &test_path())?;

        let mut page_ids = vec![];
        for i in 0..10u8 {
            let page = bpm.new_page()?.writer();
            page.write_bytes(100, &[i; 16]);
            let page_id = page.get_page_id();
            bpm.unpin_page(page_id, true);
            page_ids.push(page_id);
        }

        for (i, &page_id) in page_ids.iter().enumerate() {
            let page = bpm.fetch_page(page_id)?.reader();
            assert_eq!(&[i as u8; 16], page.read_bytes(100, 116));
            assert_eq!(page_id, page.get_page_id());
            bpm.unpin_page(page_id, false);
        }

        assert!(bpm.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_dont_evict_pinned() -> Result<()> {
        let mut bpm = BufferPoolManager::new(2, &test_path())?;

        let p1 = bpm.new_page()?.reader().get_page_id();
        let p2 = bpm.new_page()?.reader().get_page_id();

        // both frames pinned, nothing to evict
        assert!(bpm.new_page().is_err());

        bpm.unpin_page(p1, false);
        let p3 = bpm.new_page()?.reader().get_page_id();

        assert!(bpm.fetch_page(p2).is_ok());
        assert!(bpm.new_page().is_err());

        bpm.unpin_page(p2, false);
        bpm.unpin_page(p2, false);
        bpm.unpin_page(p3, false);

        assert!(bpm.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_delete_page() -> Result<()> {
        let mut bpm = BufferPoolManager::new(2, &test_path())?;

        let p1 = bpm.new_page()?.reader().get_page_id();

        // pinned pages can't be deleted
        assert!(!bpm.delete_page(p1)?);

        bpm.unpin_page(p1, false);
        assert!(bpm.delete_page(p1)?);

        // deleting an uncached page still frees it on disk
        let p2 = bpm.new_page()?.reader().get_page_id();
        bpm.unpin_page(p2, false);
        let _ = bpm.new_page()?;
        let _ = bpm.new_page()?;
        assert!(bpm.delete_page(p2)?);

        Ok(())
    }

    #[test]
    fn test_dirty_eviction_persists() -> Result<()> {
        let mut bpm = BufferPoolManager::new(2, &test_path())?;

        let p1 = bpm.new_page()?.writer();
        p1.write_bytes(0, &[0xAA; 8]);
        let p1_id = p1.get_page_id();
        bpm.unpin_page(p1_id, true);

        // churn through enough pages to evict p1
        for _ in 0..4 {
            let id = bpm.new_page()?.reader().get_page_id();
            bpm.unpin_page(id, false);
        }

        let page = bpm.fetch_page(p1_id)?.reader();
        assert_eq!(&[0xAA; 8], page.read_bytes(0, 8));
        bpm.unpin_page(p1_id, false);

        Ok(())
    }
}
