use std::ptr::NonNull;

use crate::Pointer;

/// The two page primitives the allocator consumes for its large blocks,
/// implemented per target so the rest of the crate never names a syscall.
trait PlatformSpecificMemory {
    /// Maps `length` bytes of fresh pages. The kernel hands them over
    /// zero-filled.
    unsafe fn request_pages(length: usize) -> Pointer<u8>;

    /// Unmaps `length` bytes at `address`; `length` must be the exact value
    /// the region was requested with.
    unsafe fn return_pages(address: NonNull<u8>, length: usize);
}

/// Zero sized dispatcher for the current target's
/// [`PlatformSpecificMemory`] impl.
pub(crate) struct Platform;

#[inline]
pub(crate) unsafe fn request_pages(length: usize) -> Pointer<u8> {
    Platform::request_pages(length)
}

#[inline]
pub(crate) unsafe fn return_pages(address: NonNull<u8>, length: usize) {
    Platform::return_pages(address, length)
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_pages(length: usize) -> Pointer<u8> {
            // Private anonymous read-write pages; with no file backing the
            // kernel zero-fills them, which the zeroed-allocation path
            // counts on.
            let address = libc::mmap(
                ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );

            if address == libc::MAP_FAILED {
                return None;
            }

            Some(NonNull::new_unchecked(address).cast())
        }

        unsafe fn return_pages(address: NonNull<u8>, length: usize) {
            // munmap only rejects base/length pairs that were never mapped,
            // and deallocation has no error channel to report through.
            let result = libc::munmap(address.cast().as_ptr(), length);
            debug_assert_eq!(result, 0);
        }
    }
}

#[cfg(miri)]
mod miri {
    //! Miri has no FFI, so the page primitives run through the host
    //! allocator instead. `alloc_zeroed` preserves the zero-filled-pages
    //! guarantee, and Miri's leak checker then flags any mapping the
    //! allocator forgets to return.

    use std::{alloc, ptr::NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    fn to_layout(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, 4096).unwrap()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_pages(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc_zeroed(to_layout(length)))
        }

        unsafe fn return_pages(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), to_layout(length));
        }
    }
}

/// The program break primitive behind heap extension. Each allocator owns
/// one; the heap grows through it and never contracts.
#[cfg(not(any(miri, test)))]
pub(crate) struct ProgramBreak;

#[cfg(not(any(miri, test)))]
impl ProgramBreak {
    pub const fn new() -> Self {
        Self
    }

    /// Moves the program break up by `increment` bytes and returns the
    /// previous break, which is where the new bytes start. Returns `None`
    /// if the kernel refuses.
    ///
    /// # Safety
    ///
    /// The process break is global state; nothing else in the process may
    /// move it between calls, or the heap stops being contiguous.
    pub unsafe fn extend(&mut self, increment: usize) -> Pointer<u8> {
        let previous = libc::sbrk(increment as libc::intptr_t);

        if previous == usize::MAX as *mut libc::c_void {
            return None;
        }

        Some(NonNull::new_unchecked(previous).cast())
    }
}

/// In test builds the break is simulated inside a private fixed capacity
/// segment. The real break is shared with the C library allocator and with
/// every other test thread, which would break the contiguity the wilderness
/// logic depends on. Running out of the segment doubles as a reproducible
/// out-of-memory condition.
#[cfg(any(miri, test))]
pub(crate) struct ProgramBreak {
    segment: Pointer<u8>,
    brk: usize,
    limit: usize,
}

#[cfg(any(miri, test))]
impl ProgramBreak {
    /// Capacity of the simulated heap segment.
    const SEGMENT_SIZE: usize = 4 * 1024 * 1024;

    pub const fn new() -> Self {
        Self {
            segment: None,
            brk: 0,
            limit: 0,
        }
    }

    pub unsafe fn extend(&mut self, increment: usize) -> Pointer<u8> {
        if self.segment.is_none() {
            self.segment = request_pages(Self::SEGMENT_SIZE);
            self.limit = Self::SEGMENT_SIZE;
        }

        let segment = self.segment?;

        if self.limit - self.brk < increment {
            return None;
        }

        let previous = NonNull::new_unchecked(segment.as_ptr().add(self.brk));
        self.brk += increment;

        Some(previous)
    }
}

#[cfg(any(miri, test))]
impl Drop for ProgramBreak {
    fn drop(&mut self) {
        if let Some(segment) = self.segment {
            unsafe { return_pages(segment, self.limit) };
        }
    }
}
