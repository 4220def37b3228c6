use std::collections::HashMap as OriginalHashMap;
use std::hash::{BuildHasherDefault, Hasher};
use twox_hash::XxHash64;
use nohash_hasher::{IntMap, IntSet};

/// Arbitrary HashMap using more performant hashing algorithm
pub type FullHashMap<K, V> = OriginalHashMap<K, V, BuildHasherDefault<XxHash64>>;

/// HashMap for id types, keys are hashed as is
pub type HashMap<K,V> = IntMap<K,V>;

/// HashSet for id types, keys are hashed as is
pub type IdSet<K> = IntSet<K>;


/// Fingerprint of a sparse generator.
///
/// Values are hashed by their bit pattern after normalising `-0.0`,
/// so two generators with equal entries always collide.
pub fn fingerprint(block: usize, is_ray: bool, entries: &[(usize, f64)]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write_usize(block);
    hasher.write_u8(u8::from(is_ray));
    for (idx, val) in entries {
        hasher.write_usize(*idx);
        let val = if *val == 0.0 { 0.0 } else { *val };
        hasher.write_u64(val.to_bits());
    }
    hasher.finish()
}
