use std::{cmp, ptr::NonNull};

use crate::{
    block::{Block, BLOCK_HEADER_SIZE},
    header::Header,
};

/// This is used to carry reallocation state around the code as we don't
/// want to pass the same parameters over and over again. The precondition
/// helpers answer whether absorbing physical neighbors would make the block
/// big enough, which is what the cheap reallocation strategies hinge on.
/// For the real reallocation business, see [`crate::allocator`].
pub(crate) struct Realloc {
    /// Source block, or the block whose contents we are trying to
    /// reallocate.
    pub block: NonNull<Header<Block>>,
    /// Current user pointer, which points at the payload of `block`.
    pub address: NonNull<u8>,
    /// Requested payload size, already rounded to payload alignment.
    pub new_size: usize,
}

impl Realloc {
    /// Builds a new [`Realloc`] for the block behind `address`. Caller must
    /// ensure that `address` is a payload address we previously handed out.
    pub unsafe fn new(address: NonNull<u8>, new_size: usize) -> Self {
        let block = Header::<Block>::from_payload_address(address);

        Self {
            block,
            address,
            new_size,
        }
    }

    /// Payload size of the source block.
    pub unsafe fn old_size(&self) -> usize {
        self.block.as_ref().size()
    }

    /// Number of payload bytes that must survive the move: whatever fits in
    /// both the old and the new allocation.
    pub unsafe fn bytes_to_copy(&self) -> usize {
        cmp::min(self.old_size(), self.new_size)
    }

    /// The block already holds enough payload.
    pub unsafe fn fits_in_place(&self) -> bool {
        self.new_size <= self.old_size()
    }

    /// Absorbing the previous block (free, adjacent, plus its reclaimed
    /// header) would make the block big enough.
    pub unsafe fn fits_after_merging_prev(&self) -> bool {
        match self.block.as_ref().prev {
            Some(prev) if prev.as_ref().is_free() => {
                self.old_size() + prev.as_ref().size() + BLOCK_HEADER_SIZE >= self.new_size
            }
            _ => false,
        }
    }

    /// Absorbing the next block would make the block big enough.
    pub unsafe fn fits_after_merging_next(&self) -> bool {
        match self.block.as_ref().next {
            Some(next) if next.as_ref().is_free() => {
                self.old_size() + next.as_ref().size() + BLOCK_HEADER_SIZE >= self.new_size
            }
            _ => false,
        }
    }

    /// Absorbing both neighbors at once (two reclaimed headers) would make
    /// the block big enough.
    pub unsafe fn fits_after_merging_both(&self) -> bool {
        match (self.block.as_ref().prev, self.block.as_ref().next) {
            (Some(prev), Some(next)) if prev.as_ref().is_free() && next.as_ref().is_free() => {
                self.old_size()
                    + prev.as_ref().size()
                    + next.as_ref().size()
                    + 2 * BLOCK_HEADER_SIZE
                    >= self.new_size
            }
            _ => false,
        }
    }
}
