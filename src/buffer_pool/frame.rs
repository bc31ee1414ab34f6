use crate::pages::Page;

/// One slot of the buffer pool: a page image and its pin count.
pub struct Frame {
    page: Page,
    pin_count: u16,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page: Page::new(),
            pin_count: 0,
        }
    }

    pub(super) fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub(super) fn unpin(&mut self) {
        debug_assert!(self.pin_count > 0);
        self.pin_count -= 1;
    }

    pub fn get_pin_count(&self) -> u16 {
        self.pin_count
    }

    pub fn reader(&self) -> &Page {
        &self.page
    }

    pub fn writer(&mut self) -> &mut Page {
        &mut self.page
    }

    pub(super) fn reset(&mut self) {
        self.page.reset();
        self.pin_count = 0;
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new()
    }
}
