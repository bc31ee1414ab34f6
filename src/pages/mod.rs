pub(crate) mod bitmap_page;
pub(crate) mod disk_meta_page;
pub(crate) mod freespace_map_page;
pub(crate) mod index_page;
pub(crate) mod index_roots_page;
pub(crate) mod table_page;
pub(crate) mod traits;

use std::sync::Arc;

use crate::latch::Latch;
use traits::Serialize;

pub const PAGE_SIZE: usize = 4096; // 4 KBs
pub const INVALID_PAGE_ID: PageId = -1;
pub const INVALID_LSN: Lsn = -1;

pub type PageId = i32;
pub type Lsn = i32;

/// Logical page id of the catalog meta data.
pub const CATALOG_META_PAGE_ID: PageId = 0;
/// Logical page id of the index roots directory.
pub const INDEX_ROOTS_PAGE_ID: PageId = 1;

/// Byte offsets of the header every logical page starts with.
pub(crate) const OFFSET_PAGE_ID: usize = 0;
pub(crate) const OFFSET_LSN: usize = 4;

/// A generic page with an underlying array of [`PAGE_SIZE`] bytes.
/// Typed views ([`table_page::TablePage`], [`index_page::LeafPage`], ...)
/// reinterpret the byte range of a pinned page.
#[derive(Debug)]
pub struct Page {
    /// Underlying block of memory of size [`PAGE_SIZE`]
    data: [u8; PAGE_SIZE],
    is_dirty: bool,
    page_id: PageId,
    latch: Arc<Latch>,
}

impl Serialize for Page {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), PAGE_SIZE);
        let mut page = Page::new();
        page.data.copy_from_slice(bytes);
        page
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}

impl Page {
    pub fn new() -> Self {
        Page {
            data: [0u8; PAGE_SIZE],
            is_dirty: false,
            page_id: INVALID_PAGE_ID,
            latch: Arc::new(Latch::new()),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn get_page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }

    pub fn get_latch(&self) -> Arc<Latch> {
        self.latch.clone()
    }

    pub fn get_lsn(&self) -> Lsn {
        self.read_i32(OFFSET_LSN)
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.write_i32(OFFSET_LSN, lsn);
    }

    /// Stamp the on-page header. Called whenever a page is (re)initialized.
    pub fn init_header(&mut self, page_id: PageId) {
        self.page_id = page_id;
        self.write_i32(OFFSET_PAGE_ID, page_id);
        self.write_i32(OFFSET_LSN, INVALID_LSN);
    }

    pub fn reset(&mut self) {
        self.data = [0u8; PAGE_SIZE];
        self.is_dirty = false;
        self.page_id = INVALID_PAGE_ID;
    }

    pub fn read_bytes(&self, start: usize, end: usize) -> &[u8] {
        &self.data[start..end]
    }

    pub fn write_bytes(&mut self, start: usize, bytes: &[u8]) {
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.is_dirty = true;
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_ne_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_ne_bytes());
    }

    pub fn read_i32(&self, offset: usize) -> i32 {
        i32::from_ne_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    pub fn write_i32(&mut self, offset: usize, value: i32) {
        self.write_bytes(offset, &value.to_ne_bytes());
    }
}
