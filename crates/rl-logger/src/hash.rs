// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stable hashing and the deterministic pseudo random stream used for dropping events.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// MurmurHash3 (x86, 32 bit) of `data`, widened to 64 bits.
pub fn uniform_hash(data: &[u8], seed: u64) -> u64 {
    let mut h1 = seed as u32;
    let mut blocks = data.chunks_exact(4);

    for block in &mut blocks {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    let mut k1: u32 = 0;
    if tail.len() >= 3 {
        k1 ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        k1 ^= u32::from(tail[0]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    u64::from(fmix32(h1))
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

fn merand48(state: &mut u64) -> f32 {
    const A: u64 = 0xeece_66d5_deec_e66d;
    const C: u64 = 2_147_483_647;
    const BIAS: u32 = 127 << 23;

    *state = A.wrapping_mul(*state).wrapping_add(C);
    let bits = ((*state >> 25) & 0x7F_FFFF) as u32 | BIAS;
    f32::from_bits(bits) - 1.0
}

/// Uniform value in `[0, 1)` derived from `seed`; the second draw of the stream.
pub fn uniform_random_merand48(seed: u64) -> f32 {
    let mut state = seed;
    merand48(&mut state);
    merand48(&mut state)
}

/// Deterministic drop value of event `id` for a given drop pass.
pub fn drop_value(id: &str, drop_pass: u32) -> f32 {
    let seed = format!("{id}{drop_pass}");
    uniform_random_merand48(uniform_hash(seed.as_bytes(), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_murmur3_reference_values() {
        assert_eq!(uniform_hash(b"", 0), 0);
        assert_eq!(uniform_hash(b"hello", 0), 0x248b_fa47);
    }

    #[test]
    fn test_identical_bytes_collide() {
        let context = br#"{"a":{"x":1},"b":{"x":1}}"#;
        assert_eq!(uniform_hash(&context[5..12], 0), uniform_hash(&context[17..24], 0));
        assert_ne!(uniform_hash(b"abc", 0), uniform_hash(b"abd", 0));
    }

    #[test]
    fn test_drop_value_depends_on_pass() {
        assert_eq!(drop_value("event-1", 0), drop_value("event-1", 0));
        assert_ne!(drop_value("event-1", 0), drop_value("event-1", 1));
    }

    proptest! {
        #[test]
        fn test_merand48_in_unit_interval(seed in any::<u64>()) {
            let value = uniform_random_merand48(seed);
            prop_assert!((0.0..1.0).contains(&value));
        }
    }
}
