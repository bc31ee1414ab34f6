use super::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

const OFFSET_NEXT_PAGE_ID: usize = 8;
const OFFSET_PAIR_COUNT: usize = 12;
const FREESPACE_MAP_PAGE_HEADER_SIZE: usize = 16;

/// Pair = (page_id i32, free_space u32).
const PAIR_SIZE: usize = 8;

pub const MAX_PAIR: usize = (PAGE_SIZE - FREESPACE_MAP_PAGE_HEADER_SIZE) / PAIR_SIZE;

/// One page of the free-space directory: a packed (page_id, free_space)
/// array, chained through `next_page_id`.
pub struct FreeSpaceMapPage {
    page: *mut Page,
}

impl From<&mut Page> for FreeSpaceMapPage {
    fn from(page: &mut Page) -> Self {
        Self { page }
    }
}

impl FreeSpaceMapPage {
    fn page(&self) -> &Page {
        unsafe { &*self.page }
    }

    fn page_mut(&mut self) -> &mut Page {
        unsafe { &mut *self.page }
    }

    pub fn init(&mut self, page_id: PageId) {
        self.page_mut().init_header(page_id);
        self.set_next_page_id(INVALID_PAGE_ID);
        self.set_pair_count(0);
    }

    pub fn get_page_id(&self) -> PageId {
        self.page().get_page_id()
    }

    pub fn get_next_page_id(&self) -> PageId {
        self.page().read_i32(OFFSET_NEXT_PAGE_ID)
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        self.page_mut().write_i32(OFFSET_NEXT_PAGE_ID, next);
    }

    pub fn get_pair_count(&self) -> u32 {
        self.page().read_u32(OFFSET_PAIR_COUNT)
    }

    pub fn set_pair_count(&mut self, count: u32) {
        self.page_mut().write_u32(OFFSET_PAIR_COUNT, count);
    }

    pub fn is_full(&self) -> bool {
        self.get_pair_count() as usize >= MAX_PAIR
    }

    fn pair_base(index: u32) -> usize {
        FREESPACE_MAP_PAGE_HEADER_SIZE + index as usize * PAIR_SIZE
    }

    pub fn get_pair_page_id(&self, index: u32) -> PageId {
        self.page().read_i32(Self::pair_base(index))
    }

    pub fn get_free_space(&self, index: u32) -> u32 {
        self.page().read_u32(Self::pair_base(index) + 4)
    }

    pub fn set_free_space(&mut self, index: u32, free_space: u32) {
        self.page_mut()
            .write_u32(Self::pair_base(index) + 4, free_space);
    }

    /// Append a pair. The caller checks [`Self::is_full`] first.
    pub fn new_pair(&mut self, page_id: PageId, free_space: u32) -> u32 {
        let index = self.get_pair_count();
        self.page_mut().write_i32(Self::pair_base(index), page_id);
        self.set_free_space(index, free_space);
        self.set_pair_count(index + 1);
        index
    }
}
