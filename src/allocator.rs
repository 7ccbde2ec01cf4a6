use std::ptr::{self, NonNull};

use crate::{
    align,
    block::{Block, BlockOrigin, BLOCK_HEADER_SIZE, MIN_SPLIT_PAYLOAD},
    header::Header,
    histogram::{Histogram, MAX_HEAP_ALLOC},
    list::LinkedList,
    platform::{self, ProgramBreak},
    realloc::Realloc,
    stats::Stats,
    AllocError, AllocResult,
};

/// Program break allocator. Once you've read [`crate::header`],
/// [`crate::block`], [`crate::list`] and [`crate::histogram`], this is where
/// the circle gets completed:
///
/// ```text
///            heap (one contiguous region, grows with the break)
///            +-------+    +-------+    +-------+    +------------+
/// heap.head  | Alloc | -> | Free  | -> | Alloc | -> | Wilderness |  <- heap.tail
///            +-------+    +---|---+    +-------+    +-----|------+
///                             |                           | (free)
///                             |     size histogram        |
///                             +-> bucket[0]: 104 -> 960 <-+
///                                 bucket[1]: (empty)
///                                 ...
///
///             +-------+    +-------+
/// mapped.head | 200KB | -> | 1MB   |   (one anonymous mapping each)
///             +-------+    +-------+
/// ```
///
/// Heap blocks are doubly linked in address order, so the physical
/// neighbors of any block are one pointer away and coalescing on free never
/// searches. Free heap blocks additionally sit in the size histogram, which
/// serves best-fit lookups. The wilderness block (the address list tail) is
/// grown in place by moving the break when nothing else fits, so the top of
/// the heap doesn't shred into fragments. Blocks larger than the heap
/// ceiling get their own anonymous mapping and a slot on the `mapped` list,
/// and go back to the kernel as soon as they are freed; heap memory is
/// never returned.
///
/// All four operations keep six running counters in sync, exposed through
/// the `num_*` probes.
///
/// The allocator assumes a single caller; it needs `&mut self` for
/// everything, so the borrow checker enforces that for you unless you opt
/// into sharing with interior mutability, in which case you provide the
/// lock.
pub struct Brkalloc {
    /// Heap blocks in ascending address order. The tail is the wilderness.
    heap: LinkedList<Block>,
    /// Size histogram over the free heap blocks.
    histogram: Histogram,
    /// Blocks backed by their own page mappings, unordered.
    mapped: LinkedList<Block>,
    /// Handle on the program break.
    brk: ProgramBreak,
    /// Running counters behind the statistics probes.
    stats: Stats,
}

impl Brkalloc {
    /// Largest request, in bytes, the allocator accepts at all.
    pub const MAX_REQUEST: usize = 100_000_000;

    /// Creates an allocator that owns no memory yet. The first allocation
    /// touches the kernel.
    pub const fn new() -> Self {
        Self {
            heap: LinkedList::new(),
            histogram: Histogram::new(),
            mapped: LinkedList::new(),
            brk: ProgramBreak::new(),
            stats: Stats::new(),
        }
    }

    /// Returns an 8-byte-aligned writable payload of at least `size` bytes.
    ///
    /// Requests up to 128 KiB - 1 (after rounding to the payload alignment)
    /// are served from the heap, preferring the smallest free block that
    /// fits, then growing the wilderness, then extending the heap. Larger
    /// requests get a dedicated anonymous mapping.
    pub fn allocate(&mut self, size: usize) -> AllocResult {
        if size == 0 || size > Self::MAX_REQUEST {
            return Err(AllocError::InvalidSize);
        }

        let size = align::round_up(size);

        unsafe {
            if size > MAX_HEAP_ALLOC {
                self.allocate_mapped(size)
            } else {
                let block = self.allocate_heap_block(size)?;
                Ok(Header::payload_address_of(block))
            }
        }
    }

    /// Allocates room for `count` elements of `size` bytes each and zeroes
    /// it. Mapped blocks are skipped in the zeroing pass because the kernel
    /// hands anonymous pages over already zero-filled.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> AllocResult {
        let total = count.checked_mul(size).ok_or(AllocError::InvalidSize)?;

        let address = self.allocate(total)?;

        let rounded = align::round_up(total);
        if rounded <= MAX_HEAP_ALLOC {
            unsafe { address.as_ptr().write_bytes(0, rounded) };
        }

        Ok(address)
    }

    /// Releases a payload previously returned by this allocator. `None` and
    /// payloads whose block is already free are silent no-ops. Freed heap
    /// blocks merge with whichever physical neighbors are free and become
    /// reusable; mapped blocks go straight back to the kernel.
    ///
    /// # Safety
    ///
    /// `address` must be `None` or a payload address obtained from this
    /// allocator. A mapped block must not be freed twice: its header is
    /// unmapped together with the payload, so the second call has nothing
    /// left to inspect.
    pub unsafe fn deallocate(&mut self, address: Option<NonNull<u8>>) {
        let Some(address) = address else { return };

        let block = Header::<Block>::from_payload_address(address);

        if block.as_ref().is_free() {
            return;
        }

        match block.as_ref().data.origin {
            BlockOrigin::Heap => self.free_heap_block(block),
            BlockOrigin::Mapped => self.free_mapped_block(block),
        }
    }

    /// Resizes the allocation at `address` to at least `new_size` bytes,
    /// preserving the first `min(old size, new size)` payload bytes. The
    /// returned address may differ from the given one, in which case the
    /// old block has been released. On error the old allocation is left
    /// untouched.
    ///
    /// `None` behaves like [`Self::allocate`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::deallocate`]: the address must come from
    /// this allocator and must still be live.
    pub unsafe fn reallocate(&mut self, address: Option<NonNull<u8>>, new_size: usize) -> AllocResult {
        if new_size == 0 || new_size > Self::MAX_REQUEST {
            return Err(AllocError::InvalidSize);
        }

        let Some(address) = address else {
            return self.allocate(new_size);
        };

        let realloc = Realloc::new(address, align::round_up(new_size));

        match realloc.block.as_ref().data.origin {
            BlockOrigin::Heap => self.reallocate_heap_block(realloc),
            BlockOrigin::Mapped => self.reallocate_mapped_block(realloc),
        }
    }

    /// Number of free heap blocks.
    pub fn num_free_blocks(&self) -> usize {
        self.stats.free_blocks
    }

    /// Total payload bytes sitting in free heap blocks.
    pub fn num_free_bytes(&self) -> usize {
        self.stats.free_bytes
    }

    /// Number of blocks the allocator tracks, free or not, heap or mapped.
    pub fn num_allocated_blocks(&self) -> usize {
        self.stats.allocated_blocks
    }

    /// Total payload bytes over all blocks, headers excluded.
    pub fn num_allocated_bytes(&self) -> usize {
        self.stats.allocated_bytes
    }

    /// Total bytes spent on block headers.
    pub fn num_metadata_bytes(&self) -> usize {
        self.stats.meta_bytes
    }

    /// Size of a single block header in bytes.
    pub fn metadata_size(&self) -> usize {
        BLOCK_HEADER_SIZE
    }

    /// Serves a heap request of `size` rounded bytes: best fit first, then
    /// growing the wilderness, then extending the heap with a new block.
    unsafe fn allocate_heap_block(
        &mut self,
        size: usize,
    ) -> Result<NonNull<Header<Block>>, AllocError> {
        debug_assert!(size <= MAX_HEAP_ALLOC && size % align::PAYLOAD_ALIGNMENT == 0);

        if self.heap.is_empty() {
            return self.extend_heap(size);
        }

        if let Some(block) = self.histogram.find(size) {
            self.claim(block);
            self.split_if_worthwhile(block, size);
            return Ok(block);
        }

        if self.heap.last().unwrap().as_ref().is_free() {
            self.extend_wilderness(size)
        } else {
            self.extend_heap(size)
        }
    }

    /// Maps a dedicated region for a block of `size` payload bytes and
    /// tracks it on the mapped list.
    unsafe fn allocate_mapped(&mut self, size: usize) -> AllocResult {
        let length = BLOCK_HEADER_SIZE + size;

        let Some(address) = platform::request_pages(length) else {
            return Err(AllocError::Exhausted);
        };

        let block = self
            .mapped
            .push_front(Block::allocated(size, BlockOrigin::Mapped), address);

        self.stats.created(size);

        Ok(Header::payload_address_of(block))
    }

    /// Pushes the break up by one header plus `size` bytes and appends the
    /// new block at the top of the heap, making it the wilderness.
    unsafe fn extend_heap(&mut self, size: usize) -> Result<NonNull<Header<Block>>, AllocError> {
        let Some(address) = self.brk.extend(BLOCK_HEADER_SIZE + size) else {
            return Err(AllocError::Exhausted);
        };

        let block = self
            .heap
            .append(Block::allocated(size, BlockOrigin::Heap), address);

        self.stats.created(size);

        Ok(block)
    }

    /// Makes the wilderness block hold exactly the request: the break moves
    /// up by the deficit only, so no new block and no new header is needed
    /// at the top of the heap. A wilderness that is already big enough is
    /// claimed and split instead of grown.
    unsafe fn extend_wilderness(
        &mut self,
        size: usize,
    ) -> Result<NonNull<Header<Block>>, AllocError> {
        let mut wilderness = self.heap.last().unwrap();
        let old_size = wilderness.as_ref().size();

        if size > old_size {
            // Extend before touching any bookkeeping so that a refusal
            // leaves the allocator exactly as it was.
            if self.brk.extend(size - old_size).is_none() {
                return Err(AllocError::Exhausted);
            }
        }

        if wilderness.as_ref().is_free() {
            self.claim(wilderness);
        }

        if size > old_size {
            wilderness.as_mut().data.size = size;
            self.stats.wilderness_grew(size - old_size);
        }

        self.split_if_worthwhile(wilderness, size);

        Ok(wilderness)
    }

    /// Takes a free block out of the histogram and marks it allocated.
    unsafe fn claim(&mut self, mut block: NonNull<Header<Block>>) {
        debug_assert!(block.as_ref().is_free());

        self.histogram.remove(block);
        block.as_mut().data.is_free = false;
        self.stats.claimed(block.as_ref().size());
    }

    /// Carves a free remainder off the tail of the allocated `block` if
    /// keeping `in_use` bytes leaves enough behind for a header plus a
    /// usable payload. The remainder joins the histogram; if it lands next
    /// to a block that is already free, the two are folded together so that
    /// adjacent free blocks never survive a call.
    unsafe fn split_if_worthwhile(&mut self, mut block: NonNull<Header<Block>>, in_use: usize) {
        debug_assert!(!block.as_ref().is_free());
        debug_assert!(in_use <= block.as_ref().size());

        if block.as_ref().size() - in_use < BLOCK_HEADER_SIZE + MIN_SPLIT_PAYLOAD {
            return;
        }

        let remainder_size = block.as_ref().size() - in_use - BLOCK_HEADER_SIZE;
        let address =
            NonNull::new_unchecked(Header::payload_address_of(block).as_ptr().add(in_use));

        let remainder = self.heap.insert_after(
            block,
            Block {
                size: remainder_size,
                is_free: true,
                origin: BlockOrigin::Heap,
                bucket_next: None,
                bucket_prev: None,
            },
            address,
        );

        block.as_mut().data.size = in_use;
        self.stats.split_carved(remainder_size);

        // Shrinking a block in the middle of the heap can drop the
        // remainder right before an older free block.
        if remainder.as_ref().next.is_some_and(|next| next.as_ref().is_free()) {
            let next = remainder.as_ref().next.unwrap();
            self.histogram.remove(next);
            self.absorb_next(remainder);
            self.stats.merged_free_neighbor();
        }

        self.histogram.insert(remainder);
    }

    /// Folds the physical successor of `block` into it. Purely mechanical:
    /// the successor must already be out of the histogram, and the caller
    /// settles the statistics.
    unsafe fn absorb_next(&mut self, mut block: NonNull<Header<Block>>) {
        let next = block.as_ref().next.unwrap();

        self.heap.remove(next);
        block.as_mut().data.size += next.as_ref().total_size();
    }

    /// Marks a heap block free, merges it with whichever physical neighbors
    /// are free, and files the survivor in the histogram.
    unsafe fn free_heap_block(&mut self, mut block: NonNull<Header<Block>>) {
        block.as_mut().data.is_free = true;
        self.stats.freed(block.as_ref().size());

        let block = self.coalesce(block);

        self.histogram.insert(block);
    }

    /// Merges the free `block` (not yet in the histogram) with its free
    /// neighbors. Returns the surviving block: the lowest-addressed
    /// participant, still out of the histogram. If any participant was the
    /// wilderness the survivor ends up as the address list tail, so the
    /// wilderness follows the merge on its own.
    unsafe fn coalesce(&mut self, mut block: NonNull<Header<Block>>) -> NonNull<Header<Block>> {
        if block.as_ref().next.is_some_and(|next| next.as_ref().is_free()) {
            let next = block.as_ref().next.unwrap();
            self.histogram.remove(next);
            self.absorb_next(block);
            self.stats.merged_free_neighbor();
        }

        if block.as_ref().prev.is_some_and(|prev| prev.as_ref().is_free()) {
            block = block.as_ref().prev.unwrap();
            self.histogram.remove(block);
            self.absorb_next(block);
            self.stats.merged_free_neighbor();
        }

        block
    }

    /// Unlinks a mapped block and returns its pages to the kernel.
    unsafe fn free_mapped_block(&mut self, block: NonNull<Header<Block>>) {
        let size = block.as_ref().size();
        let length = block.as_ref().total_size();

        self.mapped.remove(block);
        self.stats.destroyed(size);

        platform::return_pages(block.cast(), length);
    }

    /// Reallocation decision tree for heap blocks, cheapest strategy first:
    ///
    /// 1. Shrink or reuse in place; the payload does not move.
    /// 2. Absorb the free previous neighbor and slide the payload down.
    /// 3. Absorb the free next neighbor; the payload stays put.
    /// 4. Absorb both neighbors and slide the payload down.
    /// 5. The block is the wilderness: grow it in place, no copy at all.
    /// 6. The wilderness is free: grow it and move the payload there.
    /// 7. Claim any fitting free block and move the payload there.
    /// 8. Extend the heap with a fresh block and move the payload there.
    ///
    /// Strategies 2 and 4 copy between overlapping ranges (the payload
    /// slides down within the merged block), the rest copy between
    /// disjoint blocks.
    unsafe fn reallocate_heap_block(&mut self, realloc: Realloc) -> AllocResult {
        let block = realloc.block;
        let address = realloc.address;
        let new_size = realloc.new_size;

        if realloc.fits_in_place() {
            self.split_if_worthwhile(block, new_size);
            return Ok(address);
        }

        if realloc.fits_after_merging_prev() {
            let old_size = realloc.old_size();
            let merged = self.merge_into_prev(block);
            let destination = Header::payload_address_of(merged);
            ptr::copy(address.as_ptr(), destination.as_ptr(), old_size);
            self.split_if_worthwhile(merged, new_size);
            return Ok(destination);
        }

        if realloc.fits_after_merging_next() {
            self.merge_with_next(block);
            self.split_if_worthwhile(block, new_size);
            return Ok(address);
        }

        if realloc.fits_after_merging_both() {
            let old_size = realloc.old_size();
            let merged = self.merge_into_prev(block);
            self.merge_with_next(merged);
            let destination = Header::payload_address_of(merged);
            ptr::copy(address.as_ptr(), destination.as_ptr(), old_size);
            self.split_if_worthwhile(merged, new_size);
            return Ok(destination);
        }

        if Some(block) == self.heap.last() {
            let wilderness = self.extend_wilderness(new_size)?;
            return Ok(Header::payload_address_of(wilderness));
        }

        if self.heap.last().unwrap().as_ref().is_free() {
            let old_size = realloc.old_size();
            let wilderness = self.extend_wilderness(new_size)?;
            let destination = Header::payload_address_of(wilderness);
            ptr::copy_nonoverlapping(address.as_ptr(), destination.as_ptr(), old_size);
            self.free_heap_block(block);
            return Ok(destination);
        }

        let destination_block = self.allocate_heap_block(new_size)?;
        let destination = Header::payload_address_of(destination_block);
        ptr::copy_nonoverlapping(
            address.as_ptr(),
            destination.as_ptr(),
            realloc.bytes_to_copy(),
        );
        self.free_heap_block(block);

        Ok(destination)
    }

    /// Mapped blocks are never resized in place: an unchanged rounded size
    /// keeps the old payload, anything else becomes a fresh allocation plus
    /// a copy. The fresh one may well live on the heap if the new size
    /// allows it.
    unsafe fn reallocate_mapped_block(&mut self, realloc: Realloc) -> AllocResult {
        if realloc.new_size == realloc.old_size() {
            return Ok(realloc.address);
        }

        let destination = self.allocate(realloc.new_size)?;

        ptr::copy_nonoverlapping(
            realloc.address.as_ptr(),
            destination.as_ptr(),
            realloc.bytes_to_copy(),
        );

        self.free_mapped_block(realloc.block);

        Ok(destination)
    }

    /// Absorbs `block` into its free previous neighbor for a reallocation.
    /// The survivor takes over `block`'s allocated status; the caller still
    /// has to move the payload down.
    unsafe fn merge_into_prev(&mut self, block: NonNull<Header<Block>>) -> NonNull<Header<Block>> {
        let mut prev = block.as_ref().prev.unwrap();
        debug_assert!(prev.as_ref().is_free());

        self.histogram.remove(prev);
        self.stats.merged_into_allocated(prev.as_ref().size());
        prev.as_mut().data.is_free = false;

        self.absorb_next(prev);

        prev
    }

    /// Absorbs the free next neighbor into the allocated `block` for a
    /// reallocation. The payload stays where it is.
    unsafe fn merge_with_next(&mut self, block: NonNull<Header<Block>>) {
        let next = block.as_ref().next.unwrap();
        debug_assert!(next.as_ref().is_free());

        self.histogram.remove(next);
        self.stats.merged_into_allocated(next.as_ref().size());

        self.absorb_next(block);
    }
}

impl Default for Brkalloc {
    fn default() -> Self {
        Self::new()
    }
}
