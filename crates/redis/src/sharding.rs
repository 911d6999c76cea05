//! Deterministic shard selection.
//!
//! Channel and group names map to exactly one host of a multi-host layer by
//! hashing the routable portion of the name. The hash is CRC-32 (IEEE, as
//! computed by `crc32fast`) so that every process — and every language
//! implementation sharing the bus — picks the same shard for the same name.

use wirebus_core::names::non_local_part;

/// Shard index for `name` among `shard_count` hosts.
///
/// Channel names hash their non-local portion (after the last `!`) so that
/// the shard identity travels inside the name itself; group names have no
/// separator and hash whole.
pub fn shard_index(name: &str, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    if shard_count == 1 {
        return 0;
    }
    let digest = crc32fast::hash(non_local_part(name).as_bytes());
    digest as usize % shard_count
}
