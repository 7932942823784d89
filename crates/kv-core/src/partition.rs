//! Partition id derivation.
//!
//! The wire-format key digest is produced outside this crate (it is the
//! encoder/decoder's job, out of scope per the purpose statement); this
//! module only implements the mapping from a 20-byte digest to one of the
//! 4096 logical partitions.

/// Fixed protocol constant: number of logical partitions per namespace.
pub const PARTITION_COUNT: u16 = 4096;

/// `partitionId = little-endian-u32(digest[0..4]) mod 4096`.
///
/// # Panics
/// Panics if `digest` has fewer than 4 bytes — callers always pass a
/// full-width digest (20 bytes for the reference hash), so this is a
/// programmer error, not a runtime condition to recover from.
pub fn partition_id(digest: &[u8]) -> u16 {
    let word = u32::from_le_bytes(digest[0..4].try_into().expect("digest must be >= 4 bytes"));
    (word % PARTITION_COUNT as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_digest_maps_to_partition_zero() {
        let digest = [0u8; 20];
        assert_eq!(partition_id(&digest), 0);
    }

    #[test]
    fn all_ones_maps_to_last_partition() {
        let digest = [0xFFu8; 20];
        assert_eq!(partition_id(&digest), PARTITION_COUNT - 1);
    }

    #[test]
    fn little_endian_interpretation() {
        // 0x00000001 little-endian => partition 1.
        let mut digest = [0u8; 20];
        digest[0] = 1;
        assert_eq!(partition_id(&digest), 1);
    }

    #[test]
    fn wraps_modulo_partition_count() {
        // u32::MAX mod 4096 == 4095.
        let digest = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(partition_id(&digest), 4095);
    }
}
