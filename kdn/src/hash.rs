//! Hashing consistent with form equality
//!
//! Longs fold their high and low words so `1` and `4294967296` land on
//! the same hash. Text hashes go through murmur3.

use std::io::Cursor;

use murmur3::murmur3_32;

const SEED: u32 = 0;
const GOLDEN: i32 = 0x9e3779b9_u32 as i32;

fn murmur(bytes: &[u8]) -> i32 {
    // Reading from an in-memory cursor cannot fail.
    murmur3_32(&mut Cursor::new(bytes), SEED).unwrap_or(0) as i32
}

pub fn hash_long(n: i64) -> i32 {
    (n ^ ((n as u64) >> 32) as i64) as i32
}

pub fn hash_double(d: f64) -> i32 {
    // -0.0 and 0.0 are equal, so they must hash alike
    if d == 0.0 {
        return 0;
    }
    hash_long(d.to_bits() as i64)
}

pub fn hash_bool(b: bool) -> i32 {
    if b {
        1231
    } else {
        1237
    }
}

pub fn hash_str(s: &str) -> i32 {
    murmur(s.as_bytes())
}

pub fn hash_symbol(ns: Option<&str>, name: &str) -> i32 {
    hash_combine(hash_str(name), ns.map(hash_str).unwrap_or(0))
}

pub fn hash_keyword(ns: Option<&str>, name: &str) -> i32 {
    hash_symbol(ns, name).wrapping_add(GOLDEN)
}

pub fn hash_combine(seed: i32, hash: i32) -> i32 {
    let seed = seed as u32;
    let hash = hash as u32;
    (seed
        ^ hash
            .wrapping_add(GOLDEN as u32)
            .wrapping_add(seed << 6)
            .wrapping_add(seed >> 2)) as i32
}

/// Order-sensitive combination (lists, vectors)
pub fn hash_ordered(hashes: impl Iterator<Item = i32>) -> i32 {
    let mut h: i32 = 1;
    let mut n: u32 = 0;
    for x in hashes {
        h = h.wrapping_mul(31).wrapping_add(x);
        n += 1;
    }
    finalize(h, n)
}

/// Order-insensitive combination (sets, maps)
pub fn hash_unordered(hashes: impl Iterator<Item = i32>) -> i32 {
    let mut h: i32 = 0;
    let mut n: u32 = 0;
    for x in hashes {
        h = h.wrapping_add(x);
        n += 1;
    }
    finalize(h, n)
}

fn finalize(h: i32, n: u32) -> i32 {
    let mut x = (h as u32) ^ n;
    x ^= x >> 16;
    x = x.wrapping_mul(0x85eb_ca6b);
    x ^= x >> 13;
    x = x.wrapping_mul(0xc2b2_ae35);
    x ^= x >> 16;
    x as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_fold_collides() {
        assert_eq!(hash_long(1), hash_long(4294967296));
        assert_ne!(hash_long(1), hash_long(2));
    }

    #[test]
    fn test_text_hash_is_stable() {
        assert_eq!(hash_str("abc"), hash_str("abc"));
        assert_ne!(hash_str("abc"), hash_str("abd"));
        assert_ne!(hash_keyword(None, "a"), hash_symbol(None, "a"));
    }

    #[test]
    fn test_unordered_ignores_order() {
        let a = hash_unordered([1, 2, 3].into_iter());
        let b = hash_unordered([3, 1, 2].into_iter());
        assert_eq!(a, b);
        let c = hash_ordered([1, 2, 3].into_iter());
        let d = hash_ordered([3, 1, 2].into_iter());
        assert_ne!(c, d);
    }
}
