//! Heap allocator built on the program break, with an `mmap` fallback for
//! large requests.
//!
//! Small and medium requests are carved out of a single contiguous heap
//! obtained by moving the program break upwards. Every block on the heap is
//! linked twice: once into an address-ordered list (so freed blocks can be
//! merged with their physical neighbors in constant time) and, while free,
//! once into one of 128 size-bucketed free lists (so allocation can find the
//! best fitting block without scanning the whole free set). The block at the
//! top of the heap, called the wilderness, is special because it is the
//! only one that can grow in place by pushing the break further. Requests
//! too large for the heap are served by anonymous page mappings and tracked
//! on a separate list.
//!
//! The allocator targets a single caller at a time; wrap it in a lock if
//! multiple threads need it.
//!
//! ```no_run
//! use brkalloc::Brkalloc;
//!
//! let mut allocator = Brkalloc::new();
//!
//! let address = allocator.allocate(64).unwrap();
//! unsafe {
//!     address.as_ptr().write_bytes(0xAB, 64);
//!     allocator.deallocate(Some(address));
//! }
//! ```

use std::ptr::NonNull;

use thiserror::Error;

mod align;
mod allocator;
mod block;
mod header;
mod histogram;
mod list;
mod platform;
mod realloc;
mod stats;

/// Nullable link. Preferred over `*mut T` throughout the crate so that
/// every null check is an explicit `None` arm the compiler insists on.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

/// Shorter syntax for allocation/reallocation return types.
pub type AllocResult = Result<NonNull<u8>, AllocError>;

/// Why an allocation request could not be satisfied. Callers that want the
/// classic `malloc` shape can collapse both variants into a null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The requested size is zero or exceeds [`Brkalloc::MAX_REQUEST`].
    #[error("requested size is zero or exceeds the maximum request size")]
    InvalidSize,
    /// The kernel refused to extend the heap or map new pages.
    #[error("the kernel could not provide more memory")]
    Exhausted,
}

pub use allocator::Brkalloc;
