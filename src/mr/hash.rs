/// FNV-1a 32-bit offset basis, matching `fnv.New32a()` in the original
/// `ihash` (`examples/original_source/mr/worker.go`).
const FNV_OFFSET_BASIS_32: u32 = 0x811c_9dc5;
/// FNV-1a 32-bit prime, same source.
const FNV_PRIME_32: u32 = 0x0100_0193;

/// Stable hash used to assign an intermediate key to a reducer shard.
///
/// A genuine 32-bit FNV-1a computation (`h = offset_basis; for each byte:
/// h ^= byte; h *= prime`), not a truncation of a wider hash — truncating
/// a 64-bit FNV-1a state would be a different function, with different
/// mixing, and would not honor the cross-worker partitioning contract this
/// is specified over. Masked to a non-negative value so shard assignment
/// can't depend on signed-integer quirks.
pub fn ihash(key: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS_32;
    for byte in key.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME_32);
    }
    hash & 0x7fff_ffff
}

/// Shard index in `[0, n_reduce)` that a key is partitioned into.
pub fn shard_for_key(key: &str, n_reduce: i64) -> i64 {
    (ihash(key) as i64) % n_reduce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihash_is_deterministic() {
        assert_eq!(ihash("the"), ihash("the"));
        assert_eq!(ihash("cat"), ihash("cat"));
    }

    #[test]
    fn ihash_is_non_negative() {
        for key in ["the", "cat", "sat", "dog", "ran", ""] {
            assert!(ihash(key) <= 0x7fff_ffff);
        }
    }

    #[test]
    fn shard_for_key_is_in_range() {
        for key in ["the", "cat", "sat", "dog", "ran"] {
            let shard = shard_for_key(key, 4);
            assert!((0..4).contains(&shard));
        }
    }

    #[test]
    fn partitioning_is_stable_across_calls() {
        let keys = ["the", "quick", "brown", "fox", "jumps"];
        let first: Vec<i64> = keys.iter().map(|k| shard_for_key(k, 5)).collect();
        let second: Vec<i64> = keys.iter().map(|k| shard_for_key(k, 5)).collect();
        assert_eq!(first, second);
    }
}
