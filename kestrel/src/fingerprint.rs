#![doc(hidden)]

//! Stable hashes of serialized values.
//!
//! Reads recorded by the incremental engine and checkpoint store keys are compared by
//! fingerprint rather than by value, so they don't need to keep old states alive.

use ahash::RandomState;
use serde::Serialize;
use std::hash::{BuildHasher, Hasher};

const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

fn hasher() -> impl Hasher {
    RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]).build_hasher()
}

/// Canonical bytes of a value. Values that fail to serialize map to an empty encoding.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).unwrap_or_default()
}

pub fn of_bytes(bytes: &[u8]) -> u64 {
    let mut state = hasher();
    state.write(bytes);
    state.finish()
}

pub fn of_serialized<T: Serialize + ?Sized>(value: &T) -> u64 {
    of_bytes(&encode(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_within_process() {
        assert_eq!(of_serialized(&(1u32, "a")), of_serialized(&(1u32, "a")));
        assert_ne!(of_serialized(&(1u32, "a")), of_serialized(&(2u32, "a")));
    }
}
