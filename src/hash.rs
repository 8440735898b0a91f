//! Key hashing and producer-side routing.
//!
//! Every key is a nonzero 64-bit word. The table only relies on the
//! hash having decent lower-bit avalanche (bucket index is `hash &
//! mask`); routing additionally remixes through a CRC so that the
//! fastrange reduction sees well-distributed upper bits.

use crate::constants::TERMINATOR;

/// Selectable 64-bit hash over the 8-byte key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// CRC32 of the key bytes, widened. Cheapest, weakest upper bits.
    Crc,
    /// XXH3 64-bit.
    Xxh3,
    /// CityHash64 (8-byte closed form).
    City,
}

impl Default for HashKind {
    fn default() -> Self {
        HashKind::Xxh3
    }
}

/// Hash one key under the selected scheme.
#[inline(always)]
pub fn hash_key(kind: HashKind, key: u64) -> u64 {
    match kind {
        HashKind::Crc => crc32fast::hash(&key.to_le_bytes()) as u64,
        HashKind::Xxh3 => xxhash_rust::xxh3::xxh3_64(&key.to_le_bytes()),
        HashKind::City => city64(key),
    }
}

// CityHash64 constant for the 8..16 byte range.
const CITY_K2: u64 = 0x9ae1_6a3b_2f90_404f;

/// CityHash64 of an 8-byte little-endian buffer, closed form.
#[inline(always)]
fn city64(key: u64) -> u64 {
    let mul = CITY_K2.wrapping_add(16);
    let a = key.wrapping_add(CITY_K2);
    let b = key;
    let c = b.rotate_right(37).wrapping_mul(mul).wrapping_add(a);
    let d = a.rotate_right(25).wrapping_add(b).wrapping_mul(mul);
    city_mix(c, d, mul)
}

#[inline(always)]
fn city_mix(u: u64, v: u64, mul: u64) -> u64 {
    let mut a = (u ^ v).wrapping_mul(mul);
    a ^= a >> 47;
    let mut b = (v ^ a).wrapping_mul(mul);
    b ^= b >> 47;
    b.wrapping_mul(mul)
}

/// Map a hash value to the owning consumer id.
///
/// The low 32 hash bits are remixed through CRC32 and reduced with the
/// fastrange multiply-shift, so any `n_cons` (not just powers of two)
/// gets an even split without a divide.
#[inline(always)]
pub fn route_to_consumer(hash: u64, n_cons: u32) -> u32 {
    let remix = crc32fast::hash(&(hash as u32).to_le_bytes());
    (((remix as u64) * (n_cons as u64)) >> 32) as u32
}

/// Producer-side routing: consumer selection plus the wire encoding of
/// the key.
#[derive(Debug, Clone, Copy)]
pub struct KeyRouter {
    kind: HashKind,
    n_cons: u32,
    fold_hash: bool,
}

impl KeyRouter {
    pub fn new(kind: HashKind, n_cons: u32, fold_hash: bool) -> Self {
        Self {
            kind,
            n_cons,
            fold_hash,
        }
    }

    /// Route one key: `(consumer id, transmitted word)`.
    ///
    /// In fold mode the low 32 hash bits ride in the upper half of the
    /// transmitted word and the table keys on the folded word; insert
    /// and find paths go through the same fold, so lookups stay
    /// consistent.
    #[inline(always)]
    pub fn route(&self, key: u64) -> (u32, u64) {
        let hash = hash_key(self.kind, key);
        let cons = route_to_consumer(hash, self.n_cons);
        let wire = if self.fold_hash {
            (key & 0xffff_ffff) | (hash << 32)
        } else {
            key
        };
        debug_assert_ne!(wire, 0, "keys must stay nonzero on the wire");
        debug_assert_ne!(wire, TERMINATOR, "key collides with the terminator");
        (cons, wire)
    }

    pub fn consumers(&self) -> u32 {
        self.n_cons
    }
}
