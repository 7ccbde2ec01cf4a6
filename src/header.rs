use std::ptr::NonNull;

use crate::list::Node;

/// Block headers double as their own list nodes: the neighbor pointers live
/// in [`Node<T>`] and the block fields in its `data`. This alias is for code
/// that means the header, not the list mechanics.
pub(crate) type Header<T> = Node<T>;

impl<T> Header<T> {
    /// Recovers the header sitting immediately below a payload address.
    /// The sole inverse of [`Self::payload_address_of`]; nothing else in
    /// the crate converts in this direction.
    ///
    /// # Safety
    ///
    /// `address` must be a payload address this allocator handed out, so a
    /// live `Header<T>` actually precedes it.
    #[inline]
    pub unsafe fn from_payload_address(address: NonNull<u8>) -> NonNull<Self> {
        NonNull::new_unchecked(address.as_ptr().cast::<Self>().offset(-1))
    }

    /// First address past the header, where the payload begins. Writable up
    /// to the block's `size` bytes.
    ///
    /// # Safety
    ///
    /// `header` must point at a live `Header<T>`. Kept as an associated
    /// function rather than a method: the payload aliases with pointers the
    /// user holds, and going through `&self` here creates intermediate
    /// references that Miri's Stacked Borrows rejects.
    #[inline]
    pub unsafe fn payload_address_of(header: NonNull<Self>) -> NonNull<u8> {
        NonNull::new_unchecked(header.as_ptr().offset(1)).cast()
    }
}
