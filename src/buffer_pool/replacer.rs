use core::fmt::Debug;

use priority_queue::PriorityQueue;

use super::FrameId;
use crate::printdbg;

/// Victim policy over the evictable (pin count zero) frames. Two
/// interchangeable implementations below.
pub(super) trait Replacer: Send + Sync + Debug {
    /// Pick a frame to evict and drop it from the pool.
    fn victim(&mut self) -> Option<FrameId>;
    /// A frame went back into active use; out-of-pool ids are ignored.
    fn pin(&mut self, frame_id: FrameId);
    /// A frame became evictable; already-evictable ids are ignored.
    fn unpin(&mut self, frame_id: FrameId);
    /// Count of evictable frames.
    fn size(&self) -> usize;
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug)]
pub(super) struct LRU {
    timestamp: i64,
    /// Evictable frames, priority = negated unpin timestamp so the pop
    /// yields the least recently unpinned.
    heap: PriorityQueue<FrameId, i64>,
}

impl LRU {
    pub fn new(size: usize) -> Self {
        Self {
            timestamp: 0,
            heap: PriorityQueue::with_capacity(size),
        }
    }
}

impl Replacer for LRU {
    fn victim(&mut self) -> Option<FrameId> {
        self.heap.pop().map(|(frame_id, _)| frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.heap.remove(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.heap.get(&frame_id).is_some() {
            printdbg!("frame {} is already evictable", frame_id);
            return;
        }
        self.timestamp += 1;
        self.heap.push(frame_id, -self.timestamp);
    }

    fn size(&self) -> usize {
        self.heap.len()
    }
}

#[derive(Debug)]
pub(super) struct Clock {
    in_pool: Vec<bool>,
    ref_bit: Vec<bool>,
    hand: usize,
    size: usize,
}

impl Clock {
    pub fn new(size: usize) -> Self {
        Self {
            in_pool: vec![false; size],
            ref_bit: vec![false; size],
            hand: 0,
            size: 0,
        }
    }
}

impl Replacer for Clock {
    /// Sweep clearing reference bits until an unset one is found, bounded
    /// to two full rotations.
    fn victim(&mut self) -> Option<FrameId> {
        if self.size == 0 {
            return None;
        }
        for _ in 0..2 * self.in_pool.len() {
            let frame_id = self.hand;
            self.hand = (self.hand + 1) % self.in_pool.len();

            if !self.in_pool[frame_id] {
                continue;
            }
            if self.ref_bit[frame_id] {
                self.ref_bit[frame_id] = false;
            } else {
                self.in_pool[frame_id] = false;
                self.size -= 1;
                return Some(frame_id);
            }
        }
        None
    }

    fn pin(&mut self, frame_id: FrameId) {
        if frame_id >= self.in_pool.len() {
            printdbg!("pin of out-of-range frame {}", frame_id);
            return;
        }
        if self.in_pool[frame_id] {
            self.in_pool[frame_id] = false;
            self.ref_bit[frame_id] = false;
            self.size -= 1;
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if frame_id >= self.in_pool.len() {
            printdbg!("unpin of out-of-range frame {}", frame_id);
            return;
        }
        if self.in_pool[frame_id] {
            printdbg!("frame {} is already evictable", frame_id);
            return;
        }
        self.in_pool[frame_id] = true;
        self.ref_bit[frame_id] = true;
        self.size += 1;
    }

    fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_evicts_oldest_unpin() {
        let mut replacer = LRU::new(4);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        assert_eq!(3, replacer.size());

        // 1 goes back into use and returns later
        replacer.pin(1);
        assert_eq!(2, replacer.size());
        replacer.unpin(1);

        assert_eq!(Some(2), replacer.victim());
        assert_eq!(Some(3), replacer.victim());
        assert_eq!(Some(1), replacer.victim());
        assert_eq!(None, replacer.victim());
    }

    #[test]
    fn test_lru_double_unpin_ignored() {
        let mut replacer = LRU::new(2);
        replacer.unpin(0);
        replacer.unpin(0);
        assert_eq!(1, replacer.size());

        assert_eq!(Some(0), replacer.victim());
        assert_eq!(None, replacer.victim());
    }

    #[test]
    fn test_clock_second_chance() {
        let mut replacer = Clock::new(4);
        replacer.unpin(0);
        replacer.unpin(1);
        replacer.unpin(2);

        // first sweep clears every reference bit, second evicts in hand order
        assert_eq!(Some(0), replacer.victim());
        assert_eq!(Some(1), replacer.victim());

        // 1 comes back with its bit set and survives the next sweep start
        replacer.unpin(1);
        assert_eq!(Some(2), replacer.victim());
        assert_eq!(Some(1), replacer.victim());
        assert_eq!(None, replacer.victim());
        assert_eq!(0, replacer.size());
    }

    #[test]
    fn test_clock_pin_removes() {
        let mut replacer = Clock::new(3);
        replacer.unpin(0);
        replacer.unpin(1);
        replacer.pin(0);
        // out-of-range ids are ignored
        replacer.pin(9);
        replacer.unpin(9);

        assert_eq!(1, replacer.size());
        assert_eq!(Some(1), replacer.victim());
        assert_eq!(None, replacer.victim());
    }
}
