/// Payload alignment in bytes. Every address we hand out is a multiple of
/// this, and every heap block size is rounded up to it, which keeps block
/// headers aligned as well because the header size is itself a multiple of 8.
pub(crate) const PAYLOAD_ALIGNMENT: usize = 8;

/// Rounds `size` up to the next multiple of [`PAYLOAD_ALIGNMENT`].
#[inline]
pub(crate) const fn round_up(size: usize) -> usize {
    (size + PAYLOAD_ALIGNMENT - 1) & !(PAYLOAD_ALIGNMENT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_payload_alignment() {
        assert_eq!(round_up(0), 0);
        for size in 1..=8 {
            assert_eq!(round_up(size), 8);
        }
        assert_eq!(round_up(9), 16);
        assert_eq!(round_up(100), 104);
        assert_eq!(round_up(131071), 131072);
        assert_eq!(round_up(200_000), 200_000);
    }
}
