use super::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

const OFFSET_NEXT_PAGE_ID: usize = 8;
const OFFSET_FREE_SPACE_POINTER: usize = 12;
const OFFSET_TUPLE_COUNT: usize = 16;
pub const TABLE_PAGE_HEADER_SIZE: usize = 20;

/// Slot = (tuple offset, tuple size), both u32.
pub const SLOT_SIZE: usize = 8;

/// High bit of the slot size marks a tuple that is deleted but not yet
/// compacted away.
const DELETE_MASK: u32 = 1 << 31;

/// Largest tuple a fresh page can take: one slot plus the payload.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - TABLE_PAGE_HEADER_SIZE - SLOT_SIZE;

#[derive(Debug, PartialEq)]
pub enum UpdateOutcome {
    Ok,
    NotFound,
    Tombstone,
    InsufficientSpace,
}

/// Slotted page view: a growing slot array after the header, tuple payloads
/// packed from the end of the page.
pub struct TablePage {
    page: *mut Page,
}

impl From<&mut Page> for TablePage {
    fn from(page: &mut Page) -> Self {
        Self { page }
    }
}

pub fn is_deleted(tuple_size: u32) -> bool {
    tuple_size & DELETE_MASK != 0
}

fn unmask(tuple_size: u32) -> u32 {
    tuple_size & !DELETE_MASK
}

impl TablePage {
    fn page(&self) -> &Page {
        unsafe { &*self.page }
    }

    fn page_mut(&mut self) -> &mut Page {
        unsafe { &mut *self.page }
    }

    pub fn init(&mut self, page_id: PageId) {
        self.page_mut().init_header(page_id);
        self.set_next_page_id(INVALID_PAGE_ID);
        self.page_mut()
            .write_u32(OFFSET_FREE_SPACE_POINTER, PAGE_SIZE as u32);
        self.page_mut().write_u32(OFFSET_TUPLE_COUNT, 0);
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

    fn free_space_pointer(&self) -> usize {
        self.page().read_u32(OFFSET_FREE_SPACE_POINTER) as usize
    }

    fn set_free_space_pointer(&mut self, pointer: usize) {
        self.page_mut()
            .write_u32(OFFSET_FREE_SPACE_POINTER, pointer as u32);
    }

    pub fn get_tuple_count(&self) -> u32 {
        self.page().read_u32(OFFSET_TUPLE_COUNT)
    }

    fn set_tuple_count(&mut self, count: u32) {
        self.page_mut().write_u32(OFFSET_TUPLE_COUNT, count);
    }

    fn slot_base(slot: u32) -> usize {
        TABLE_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE
    }

    fn get_tuple_offset(&self, slot: u32) -> usize {
        self.page().read_u32(Self::slot_base(slot)) as usize
    }

    fn set_tuple_offset(&mut self, slot: u32, offset: usize) {
        self.page_mut()
            .write_u32(Self::slot_base(slot), offset as u32);
    }

    /// Raw slot size, delete mask included.
    pub fn get_tuple_size(&self, slot: u32) -> u32 {
        self.page().read_u32(Self::slot_base(slot) + 4)
    }

    fn set_tuple_size(&mut self, slot: u32, size: u32) {
        self.page_mut().write_u32(Self::slot_base(slot) + 4, size);
    }

    /// Bytes left for a new tuple, slot entry not yet accounted for.
    pub fn get_free_space(&self) -> usize {
        self.free_space_pointer()
            - TABLE_PAGE_HEADER_SIZE
            - SLOT_SIZE * self.get_tuple_count() as usize
    }

    pub fn insert_tuple(&mut self, tuple: &[u8]) -> Option<u32> {
        // reuse a compacted-away slot when one exists
        let count = self.get_tuple_count();
        let mut slot = count;
        for i in 0..count {
            if unmask(self.get_tuple_size(i)) == 0 && !is_deleted(self.get_tuple_size(i)) {
                slot = i;
                break;
            }
        }

        let slot_cost = if slot == count { SLOT_SIZE } else { 0 };
        if self.get_free_space() < tuple.len() + slot_cost {
            return None;
        }

        let pointer = self.free_space_pointer() - tuple.len();
        self.set_free_space_pointer(pointer);
        self.page_mut().write_bytes(pointer, tuple);

        if slot == count {
            self.set_tuple_count(count + 1);
        }
        self.set_tuple_offset(slot, pointer);
        self.set_tuple_size(slot, tuple.len() as u32);

        Some(slot)
    }

    pub fn mark_delete(&mut self, slot: u32) -> bool {
        if slot >= self.get_tuple_count() {
            return false;
        }
        let size = self.get_tuple_size(slot);
        if is_deleted(size) || unmask(size) == 0 {
            return false;
        }
        self.set_tuple_size(slot, size | DELETE_MASK);
        true
    }

    pub fn rollback_delete(&mut self, slot: u32) {
        if slot >= self.get_tuple_count() {
            return;
        }
        let size = self.get_tuple_size(slot);
        self.set_tuple_size(slot, unmask(size));
    }

    /// Physically remove the tuple, compacting the payload area.
    pub fn apply_delete(&mut self, slot: u32) {
        if slot >= self.get_tuple_count() {
            return;
        }
        let size = unmask(self.get_tuple_size(slot)) as usize;
        if size == 0 {
            return;
        }
        let offset = self.get_tuple_offset(slot);
        let pointer = self.free_space_pointer();

        let moved = self.page().read_bytes(pointer, offset).to_vec();
        self.page_mut().write_bytes(pointer + size, &moved);
        self.set_free_space_pointer(pointer + size);

        for i in 0..self.get_tuple_count() {
            if i == slot {
                continue;
            }
            let other = self.get_tuple_offset(i);
            if other < offset {
                self.set_tuple_offset(i, other + size);
            }
        }

        self.set_tuple_offset(slot, 0);
        self.set_tuple_size(slot, 0);
    }

    pub fn update_tuple(&mut self, new_tuple: &[u8], slot: u32) -> UpdateOutcome {
        if slot >= self.get_tuple_count() {
            return UpdateOutcome::NotFound;
        }
        let raw_size = self.get_tuple_size(slot);
        if is_deleted(raw_size) {
            return UpdateOutcome::Tombstone;
        }
        let old_size = unmask(raw_size) as usize;
        if old_size == 0 {
            return UpdateOutcome::NotFound;
        }
        if self.get_free_space() + old_size < new_tuple.len() {
            return UpdateOutcome::InsufficientSpace;
        }

        let offset = self.get_tuple_offset(slot);
        let pointer = self.free_space_pointer();
        let new_pointer = (pointer + old_size) - new_tuple.len();

        // slide everything below the tuple, then write the new payload
        let moved = self.page().read_bytes(pointer, offset).to_vec();
        self.page_mut()
            .write_bytes(new_pointer, &moved);
        self.set_free_space_pointer(new_pointer);

        let new_offset = (offset + old_size) - new_tuple.len();
        self.page_mut().write_bytes(new_offset, new_tuple);
        self.set_tuple_offset(slot, new_offset);
        self.set_tuple_size(slot, new_tuple.len() as u32);

        for i in 0..self.get_tuple_count() {
            if i == slot {
                continue;
            }
            let other = self.get_tuple_offset(i);
            if other < offset {
                self.set_tuple_offset(i, (other + old_size) - new_tuple.len());
            }
        }

        UpdateOutcome::Ok
    }

    /// Read a live tuple. Tombstoned and compacted slots return `None`.
    pub fn get_tuple(&self, slot: u32) -> Option<&[u8]> {
        if slot >= self.get_tuple_count() {
            return None;
        }
        let size = self.get_tuple_size(slot);
        if is_deleted(size) || unmask(size) == 0 {
            return None;
        }
        let offset = self.get_tuple_offset(slot);
        Some(self.page().read_bytes(offset, offset + unmask(size) as usize))
    }

    pub fn get_first_tuple_slot(&self) -> Option<u32> {
        self.get_next_tuple_slot(None)
    }

    /// Next live slot strictly after `current`, or the first one when
    /// `current` is `None`.
    pub fn get_next_tuple_slot(&self, current: Option<u32>) -> Option<u32> {
        let start = current.map(|s| s + 1).unwrap_or(0);
        (start..self.get_tuple_count()).find(|&slot| {
            let size = self.get_tuple_size(slot);
            !is_deleted(size) && unmask(size) > 0
        })
    }
}
