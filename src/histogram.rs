use std::{cmp, ptr::NonNull};

use crate::{block::Block, header::Header, Pointer};

/// Width of one histogram bucket in bytes.
pub(crate) const BUCKET_WIDTH: usize = 1024;

/// Number of histogram buckets.
pub(crate) const BUCKET_COUNT: usize = 128;

/// Largest payload that is still served from the heap. Anything strictly
/// larger (after rounding) is backed by its own page mapping instead.
pub(crate) const MAX_HEAP_ALLOC: usize = BUCKET_WIDTH * BUCKET_COUNT - 1;

/// One bucket of the size histogram: a doubly linked list of free heap
/// blocks threaded through their `bucket_prev`/`bucket_next` header fields,
/// kept sorted by non-decreasing size.
#[derive(Clone, Copy)]
struct Bucket {
    count: usize,
    head: Pointer<Header<Block>>,
    tail: Pointer<Header<Block>>,
}

impl Bucket {
    const fn new() -> Self {
        Self {
            count: 0,
            head: None,
            tail: None,
        }
    }
}

/// Size histogram over all free heap blocks. Bucket `i` holds the free
/// blocks whose payload size is in `[i * 1024, (i + 1) * 1024)`, except the
/// last bucket which also takes everything above the heap ceiling (merging
/// can grow a free block past it). Because each bucket is sorted, the first
/// fitting block of the first non-empty candidate bucket is the best fit
/// over the whole free set.
///
/// ```text
/// bucket[0]   -> 48 -> 104 -> 960
/// bucket[1]   -> 1024 -> 2040
/// bucket[2]   -> (empty)
/// ...
/// bucket[127] -> 130048 -> 131064 -> 262192
/// ```
///
/// The histogram never owns block memory; it only threads the headers the
/// allocator already tracks on the address list.
pub(crate) struct Histogram {
    buckets: [Bucket; BUCKET_COUNT],
}

impl Histogram {
    pub const fn new() -> Self {
        const EMPTY: Bucket = Bucket::new();
        Self {
            buckets: [EMPTY; BUCKET_COUNT],
        }
    }

    /// Bucket index for a block of `size` payload bytes. Sizes at or above
    /// the top of the range are clamped into the last bucket.
    #[inline]
    fn index_of(size: usize) -> usize {
        cmp::min(size / BUCKET_WIDTH, BUCKET_COUNT - 1)
    }

    /// Links `block` into its size bucket, keeping the bucket sorted by
    /// non-decreasing size. Blocks of equal size are inserted before their
    /// peers, which makes the scan stop as early as possible.
    ///
    /// # Safety
    ///
    /// `block` must be a valid free heap block that is not currently linked
    /// into any bucket.
    pub unsafe fn insert(&mut self, mut block: NonNull<Header<Block>>) {
        let size = block.as_ref().size();
        let bucket = &mut self.buckets[Self::index_of(size)];

        bucket.count += 1;

        // Find the first resident that is at least as big; the new block
        // goes right before it.
        let mut candidate = bucket.head;
        while let Some(resident) = candidate {
            if size <= resident.as_ref().size() {
                break;
            }
            candidate = resident.as_ref().data.bucket_next;
        }

        match candidate {
            Some(mut resident) => {
                let before = resident.as_ref().data.bucket_prev;
                block.as_mut().data.bucket_next = Some(resident);
                block.as_mut().data.bucket_prev = before;
                resident.as_mut().data.bucket_prev = Some(block);
                match before {
                    Some(mut before) => before.as_mut().data.bucket_next = Some(block),
                    None => bucket.head = Some(block),
                }
            }
            None => {
                block.as_mut().data.bucket_next = None;
                block.as_mut().data.bucket_prev = bucket.tail;
                match bucket.tail {
                    Some(mut tail) => tail.as_mut().data.bucket_next = Some(block),
                    None => bucket.head = Some(block),
                }
                bucket.tail = Some(block);
            }
        }
    }

    /// Unlinks `block` from its bucket in constant time using the block's
    /// own bucket pointers.
    ///
    /// # Safety
    ///
    /// `block` must currently be linked into the bucket matching its size.
    /// Callers that are about to resize a block must remove it first, since
    /// the bucket is found through the size.
    pub unsafe fn remove(&mut self, mut block: NonNull<Header<Block>>) {
        let bucket = &mut self.buckets[Self::index_of(block.as_ref().size())];

        debug_assert!(bucket.count > 0);
        bucket.count -= 1;

        let prev = block.as_ref().data.bucket_prev;
        let next = block.as_ref().data.bucket_next;

        match prev {
            Some(mut prev) => prev.as_mut().data.bucket_next = next,
            None => bucket.head = next,
        }

        match next {
            Some(mut next) => next.as_mut().data.bucket_prev = prev,
            None => bucket.tail = prev,
        }

        block.as_mut().data.bucket_next = None;
        block.as_mut().data.bucket_prev = None;
    }

    /// Best-fit lookup: the smallest free block that can hold `size` bytes,
    /// or `None` if no free block fits or the request is beyond the heap
    /// ceiling. Starts at the bucket the request itself would land in, since
    /// everything below is too small by construction.
    pub unsafe fn find(&self, size: usize) -> Pointer<Header<Block>> {
        if size > MAX_HEAP_ALLOC {
            return None;
        }

        for bucket in &self.buckets[Self::index_of(size)..] {
            if bucket.count == 0 {
                continue;
            }

            let mut candidate = bucket.head;
            while let Some(block) = candidate {
                if block.as_ref().size() >= size {
                    return Some(block);
                }
                candidate = block.as_ref().data.bucket_next;
            }
        }

        None
    }

    /// Number of blocks currently linked, across all buckets.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.count).sum()
    }

    /// Whether `block` is linked into the bucket matching its size.
    #[cfg(test)]
    pub unsafe fn contains(&self, block: NonNull<Header<Block>>) -> bool {
        let bucket = &self.buckets[Self::index_of(block.as_ref().size())];
        let mut candidate = bucket.head;
        while let Some(resident) = candidate {
            if resident == block {
                return true;
            }
            candidate = resident.as_ref().data.bucket_next;
        }
        false
    }

    /// Checks that every bucket is sorted by non-decreasing size and that
    /// its count matches the chain length.
    #[cfg(test)]
    pub unsafe fn assert_sorted(&self) {
        for bucket in &self.buckets {
            let mut chained = 0;
            let mut previous_size = 0;
            let mut candidate = bucket.head;
            while let Some(block) = candidate {
                assert!(block.as_ref().size() >= previous_size);
                previous_size = block.as_ref().size();
                chained += 1;
                candidate = block.as_ref().data.bucket_next;
            }
            assert_eq!(chained, bucket.count);
        }
    }
}
