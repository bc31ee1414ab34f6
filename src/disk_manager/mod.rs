use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::errors::Error;
use crate::pages::bitmap_page::{BitmapPage, BITMAP_CAPACITY};
use crate::pages::disk_meta_page::{DiskMetaPage, MAX_EXTENTS};
use crate::pages::traits::Serialize;
use crate::pages::{Page, PageId, PAGE_SIZE};
use crate::printdbg;

pub const DISK_STORAGE: &str = "data/minirel.db";

#[cfg(test)]
pub fn test_path() -> String {
    use uuid::Uuid;

    let id = Uuid::new_v4();
    format!("data/test/test_{}.db", id)
}

/// Single-file paged store. The file interleaves bookkeeping and data
/// pages: the meta page at physical 0, then per extent one bitmap page
/// followed by [`BITMAP_CAPACITY`] data pages. Callers only ever see
/// logical ids; bitmap and meta pages are not addressable.
pub struct DiskManager {
    file: File,
    file_size: u64,
    /// Disk file meta page, physical page 0, written through on every
    /// allocation change.
    meta: Page,
}

fn physical_page_id(logical: PageId) -> u64 {
    let extent = logical as u64 / BITMAP_CAPACITY as u64;
    let index = logical as u64 % BITMAP_CAPACITY as u64;
    extent * (BITMAP_CAPACITY as u64 + 1) + index + 2
}

fn bitmap_physical_page_id(extent: u32) -> u64 {
    extent as u64 * (BITMAP_CAPACITY as u64 + 1) + 1
}

impl DiskManager {
    pub fn new(db_file: &str) -> Result<Self> {
        let path = Path::new(db_file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening {}", db_file))?;

        let file_size = file.metadata()?.len();

        let mut manager = Self {
            file,
            file_size,
            meta: Page::new(),
        };

        let mut meta_buf = [0u8; PAGE_SIZE];
        manager.read_physical(0, &mut meta_buf)?;
        manager.meta = Page::from_bytes(&meta_buf);

        Ok(manager)
    }

    pub fn close(&mut self) -> Result<()> {
        let meta_buf: [u8; PAGE_SIZE] = self.meta.as_bytes().try_into().unwrap();
        self.write_physical(0, &meta_buf)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Allocate a logical page: first extent with a free slot wins, a new
    /// extent is opened when every tracked one is full.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let meta: DiskMetaPage = (&mut self.meta).into();

        let mut extent = meta.extent_count();
        for i in 0..meta.extent_count() {
            if meta.extent_used_count(i) < BITMAP_CAPACITY as u32 {
                extent = i;
                break;
            }
        }

        let grows = extent == meta.extent_count();
        if grows && meta.extent_count() as usize == MAX_EXTENTS {
            bail!(Error::OutOfSpace);
        }

        let mut bitmap_buf = [0u8; PAGE_SIZE];
        self.read_physical(bitmap_physical_page_id(extent), &mut bitmap_buf)?;
        let mut bitmap_page = Page::from_bytes(&bitmap_buf);

        let mut bitmap: BitmapPage = (&mut bitmap_page).into();
        let offset = bitmap
            .allocate_page()
            .ok_or(Error::Internal("bitmap out of sync with meta page".into()))?;

        let bitmap_buf: [u8; PAGE_SIZE] = bitmap_page.as_bytes().try_into().unwrap();
        self.write_physical(bitmap_physical_page_id(extent), &bitmap_buf)?;

        // counters move only after the bitmap write went through
        let mut meta: DiskMetaPage = (&mut self.meta).into();
        if grows {
            meta.set_extent_count(extent + 1);
        }
        meta.set_extent_used_count(extent, meta.extent_used_count(extent) + 1);
        meta.set_page_count(meta.page_count() + 1);

        let meta_buf: [u8; PAGE_SIZE] = self.meta.as_bytes().try_into().unwrap();
        self.write_physical(0, &meta_buf)?;

        Ok(extent as PageId * BITMAP_CAPACITY as PageId + offset as PageId)
    }

    pub fn deallocate_page(&mut self, logical: PageId) -> Result<()> {
        let extent = logical as u32 / BITMAP_CAPACITY as u32;
        let offset = logical as u32 % BITMAP_CAPACITY as u32;

        let mut bitmap_buf = [0u8; PAGE_SIZE];
        self.read_physical(bitmap_physical_page_id(extent), &mut bitmap_buf)?;
        let mut bitmap_page = Page::from_bytes(&bitmap_buf);

        let mut bitmap: BitmapPage = (&mut bitmap_page).into();
        if !bitmap.deallocate_page(offset) {
            printdbg!("deallocate of free logical page {}", logical);
            return Ok(());
        }

        let bitmap_buf: [u8; PAGE_SIZE] = bitmap_page.as_bytes().try_into().unwrap();
        self.write_physical(bitmap_physical_page_id(extent), &bitmap_buf)?;

        let mut meta: DiskMetaPage = (&mut self.meta).into();
        meta.set_extent_used_count(extent, meta.extent_used_count(extent) - 1);
        meta.set_page_count(meta.page_count() - 1);

        let meta_buf: [u8; PAGE_SIZE] = self.meta.as_bytes().try_into().unwrap();
        self.write_physical(0, &meta_buf)?;

        Ok(())
    }

    pub fn is_page_free(&mut self, logical: PageId) -> Result<bool> {
        let extent = logical as u32 / BITMAP_CAPACITY as u32;
        let offset = logical as u32 % BITMAP_CAPACITY as u32;

        let mut bitmap_buf = [0u8; PAGE_SIZE];
        self.read_physical(bitmap_physical_page_id(extent), &mut bitmap_buf)?;
        let mut bitmap_page = Page::from_bytes(&bitmap_buf);

        let bitmap: BitmapPage = (&mut bitmap_page).into();
        Ok(bitmap.is_page_free(offset))
    }

    pub fn read_page(&mut self, logical: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        assert!(logical >= 0, "invalid page id {}", logical);
        self.read_physical(physical_page_id(logical), buf)
    }

    pub fn write_page(&mut self, logical: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        assert!(logical >= 0, "invalid page id {}", logical);
        self.write_physical(physical_page_id(logical), buf)
    }

    pub fn allocated_pages(&mut self) -> u32 {
        let meta: DiskMetaPage = (&mut self.meta).into();
        meta.page_count()
    }

    /// Reads past the end of the file zero-fill instead of failing.
    fn read_physical(&mut self, physical: u64, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let offset = physical * PAGE_SIZE as u64;
        if offset >= self.file_size {
            buf.fill(0);
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let read = self.file.read(buf).context("reading page")?;
        if read < PAGE_SIZE {
            buf[read..].fill(0);
        }
        Ok(())
    }

    fn write_physical(&mut self, physical: u64, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = physical * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf).context("writing page")?;
        self.file.flush()?;
        self.file_size = self.file_size.max(offset + PAGE_SIZE as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::remove_file;

    #[test]
    fn test_allocate_in_order() -> Result<()> {
        let path = test_path();
        let mut disk = DiskManager::new(&path)?;

        for expected in 0..32 {
            assert_eq!(expected, disk.allocate_page()?);
        }
        assert_eq!(32, disk.allocated_pages());
        assert!(!disk.is_page_free(5)?);

        remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let path = test_path();
        let mut disk = DiskManager::new(&path)?;

        let page_id = disk.allocate_page()?;
        let mut buf = [0u8; PAGE_SIZE];
        buf[0] = 0xAB;
        buf[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(page_id, &buf)?;

        let mut read_buf = [0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut read_buf)?;
        assert_eq!(buf, read_buf);

        remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_read_past_eof_zero_fills() -> Result<()> {
        let path = test_path();
        let mut disk = DiskManager::new(&path)?;

        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(1000, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 0));

        remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_deallocate_then_reuse() -> Result<()> {
        let path = test_path();
        let mut disk = DiskManager::new(&path)?;

        for _ in 0..10 {
            disk.allocate_page()?;
        }

        disk.deallocate_page(3)?;
        assert!(disk.is_page_free(3)?);
        assert_eq!(9, disk.allocated_pages());

        assert_eq!(3, disk.allocate_page()?);
        assert_eq!(10, disk.allocate_page()?);

        remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_persistence_across_reopen() -> Result<()> {
        let path = test_path();

        let page_id = {
            let mut disk = DiskManager::new(&path)?;
            let page_id = disk.allocate_page()?;
            let mut buf = [0u8; PAGE_SIZE];
            buf[100] = 0x42;
            disk.write_page(page_id, &buf)?;
            disk.close()?;
            page_id
        };

        let mut disk = DiskManager::new(&path)?;
        assert_eq!(1, disk.allocated_pages());
        assert!(!disk.is_page_free(page_id)?);

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut buf)?;
        assert_eq!(0x42, buf[100]);

        remove_file(path)?;
        Ok(())
    }
}
