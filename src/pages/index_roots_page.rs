use super::{Page, PageId, PAGE_SIZE};

pub const INDEX_ROOTS_MAGIC: u32 = 0x5254_5053;

const OFFSET_MAGIC: usize = 8;
const OFFSET_COUNT: usize = 12;
const INDEX_ROOTS_HEADER_SIZE: usize = 16;

/// Pair = (index_id u32, root_page_id i32).
const PAIR_SIZE: usize = 8;

pub const MAX_ROOTS: usize = (PAGE_SIZE - INDEX_ROOTS_HEADER_SIZE) / PAIR_SIZE;

/// Directory of every index's root page, kept at logical page 1 so the
/// catalog can reattach B+ trees after a restart.
pub struct IndexRootsPage {
    page: *mut Page,
}

impl From<&mut Page> for IndexRootsPage {
    fn from(page: &mut Page) -> Self {
        Self { page }
    }
}

impl IndexRootsPage {
    fn page(&self) -> &Page {
        unsafe { &*self.page }
    }

    fn page_mut(&mut self) -> &mut Page {
        unsafe { &mut *self.page }
    }

    pub fn init(&mut self, page_id: PageId) {
        self.page_mut().init_header(page_id);
        self.page_mut().write_u32(OFFSET_MAGIC, INDEX_ROOTS_MAGIC);
        self.set_count(0);
    }

    pub fn is_initialized(&self) -> bool {
        self.page().read_u32(OFFSET_MAGIC) == INDEX_ROOTS_MAGIC
    }

    fn count(&self) -> u32 {
        self.page().read_u32(OFFSET_COUNT)
    }

    fn set_count(&mut self, count: u32) {
        self.page_mut().write_u32(OFFSET_COUNT, count);
    }

    fn pair_base(index: u32) -> usize {
        INDEX_ROOTS_HEADER_SIZE + index as usize * PAIR_SIZE
    }

    fn position_of(&self, index_id: u32) -> Option<u32> {
        (0..self.count()).find(|&i| self.page().read_u32(Self::pair_base(i)) == index_id)
    }

    pub fn get_root_id(&self, index_id: u32) -> Option<PageId> {
        self.position_of(index_id)
            .map(|i| self.page().read_i32(Self::pair_base(i) + 4))
    }

    pub fn insert(&mut self, index_id: u32, root_page_id: PageId) -> bool {
        if self.position_of(index_id).is_some() || self.count() as usize >= MAX_ROOTS {
            return false;
        }
        let i = self.count();
        self.page_mut().write_u32(Self::pair_base(i), index_id);
        self.page_mut()
            .write_i32(Self::pair_base(i) + 4, root_page_id);
        self.set_count(i + 1);
        true
    }

    pub fn update(&mut self, index_id: u32, root_page_id: PageId) -> bool {
        match self.position_of(index_id) {
            Some(i) => {
                self.page_mut()
                    .write_i32(Self::pair_base(i) + 4, root_page_id);
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, index_id: u32) -> bool {
        let Some(position) = self.position_of(index_id) else {
            return false;
        };
        let last = self.count() - 1;
        if position != last {
            let moved_id = self.page().read_u32(Self::pair_base(last));
            let moved_root = self.page().read_i32(Self::pair_base(last) + 4);
            self.page_mut().write_u32(Self::pair_base(position), moved_id);
            self.page_mut()
                .write_i32(Self::pair_base(position) + 4, moved_root);
        }
        self.set_count(last);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_update_delete() {
        let mut page = Page::new();
        let mut roots: IndexRootsPage = (&mut page).into();
        roots.init(1);
        assert!(roots.is_initialized());

        assert!(roots.insert(0, 14));
        assert!(roots.insert(1, 20));
        // duplicate index id is refused
        assert!(!roots.insert(0, 99));

        assert_eq!(Some(14), roots.get_root_id(0));
        assert_eq!(Some(20), roots.get_root_id(1));
        assert_eq!(None, roots.get_root_id(2));

        assert!(roots.update(0, 35));
        assert_eq!(Some(35), roots.get_root_id(0));
        assert!(!roots.update(5, 1));

        assert!(roots.delete(0));
        assert_eq!(None, roots.get_root_id(0));
        assert_eq!(Some(20), roots.get_root_id(1));
        assert!(!roots.delete(0));
    }
}
