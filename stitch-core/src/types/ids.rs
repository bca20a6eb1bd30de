//! Fixed-width span and trace identifiers.
//!
//! Kernel-observed identifiers render as big-endian hex (the network
//! convention); application-observed identifiers render as decimal.
//! Both encodings are always derivable from the numeric value, and
//! parsing never panics on malformed input.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Multiplier for the deterministic sampling hash.
///
/// 2^64 / phi, the usual Fibonacci-hashing constant.
const SAMPLING_HASH_MUL: u64 = 0x9E37_79B9_7F4A_7C15;

/// A 64-bit span or parent identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id64(u64);

impl Id64 {
    /// Create an identifier from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The unassigned identifier.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Check whether this identifier has been assigned.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Big-endian hex encoding, zero-padded to 16 characters.
    #[must_use]
    pub fn string_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// Decimal encoding, the application-instrumentation convention.
    #[must_use]
    pub fn string_dec(&self) -> String {
        self.0.to_string()
    }

    /// Parse a hex encoding. Returns `None` on malformed input.
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.len() > 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Self)
    }

    /// Parse a decimal encoding. Returns `None` on malformed input.
    pub fn from_dec(s: &str) -> Option<Self> {
        s.trim().parse::<u64>().ok().map(Self)
    }
}

impl fmt::Display for Id64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_hex())
    }
}

impl From<u64> for Id64 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A 128-bit trace or network-flow identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Id128 {
    /// Low 64 bits.
    pub low: u64,
    /// High 64 bits.
    pub high: u64,
}

impl Id128 {
    /// Create an identifier from its two halves.
    #[must_use]
    pub const fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    /// The unassigned identifier.
    #[must_use]
    pub const fn zero() -> Self {
        Self { low: 0, high: 0 }
    }

    /// Check whether this identifier has been assigned.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }

    /// Reinterpret 16 big-endian bytes (e.g. a digest) as an identifier.
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&bytes[..8]);
        low.copy_from_slice(&bytes[8..]);
        Self {
            high: u64::from_be_bytes(high),
            low: u64::from_be_bytes(low),
        }
    }

    /// Big-endian hex encoding, zero-padded to 32 characters.
    #[must_use]
    pub fn string_hex(&self) -> String {
        format!("{:016x}{:016x}", self.high, self.low)
    }

    /// Decimal encoding, the application-instrumentation convention.
    ///
    /// Identifiers whose high half is unset render as the plain decimal
    /// of the low half, matching 64-bit app tracers.
    #[must_use]
    pub fn string_dec(&self) -> String {
        if self.high == 0 {
            self.low.to_string()
        } else {
            format!("{}{}", self.high, self.low)
        }
    }

    /// Parse a hex encoding of up to 32 characters. Returns `None` on
    /// malformed input.
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.len() > 32 {
            return None;
        }
        let value = u128::from_str_radix(s, 16).ok()?;
        Some(Self {
            low: value as u64,
            high: (value >> 64) as u64,
        })
    }

    /// Deterministic sampling predicate.
    ///
    /// Pure function of `(id, rate)`: repeated calls with the same pair,
    /// in any process, always agree. The id is mixed with a multiplicative
    /// hash and compared against `u64::MAX * rate`.
    #[must_use]
    pub fn sampled(&self, rate: f64) -> bool {
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        let mixed = (self.low ^ self.high.rotate_left(32)).wrapping_mul(SAMPLING_HASH_MUL);
        let threshold = (u64::MAX as f64 * rate) as u64;
        mixed < threshold
    }
}

impl fmt::Display for Id128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_hex())
    }
}

/// Mutex-guarded pseudo-random identifier source.
///
/// Seeded once from system entropy at construction and injected into
/// whichever component needs non-deterministic ids, so independent
/// runner instances never share hidden state.
pub struct RandId {
    rng: Mutex<StdRng>,
}

impl RandId {
    /// Create a source seeded from system entropy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a source with a fixed seed, for reproducible tests.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Next random 64-bit identifier. Never returns the zero id.
    pub fn next_id64(&self) -> Id64 {
        let mut rng = self.rng.lock();
        loop {
            let v: u64 = rng.gen();
            if v != 0 {
                return Id64::new(v);
            }
        }
    }

    /// Next random 128-bit identifier. Never returns the zero id.
    pub fn next_id128(&self) -> Id128 {
        let mut rng = self.rng.lock();
        loop {
            let low: u64 = rng.gen();
            let high: u64 = rng.gen();
            if low != 0 || high != 0 {
                return Id128::new(low, high);
            }
        }
    }
}

impl Default for RandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandId").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id64_hex_roundtrip() {
        let id = Id64::new(0xdead_beef_0102_0304);
        assert_eq!(id.string_hex(), "deadbeef01020304");
        assert_eq!(Id64::from_hex("deadbeef01020304"), Some(id));
    }

    #[test]
    fn id64_dec_roundtrip() {
        let id = Id64::new(1234567890);
        assert_eq!(id.string_dec(), "1234567890");
        assert_eq!(Id64::from_dec("1234567890"), Some(id));
    }

    #[test]
    fn id64_rejects_malformed() {
        assert_eq!(Id64::from_hex(""), None);
        assert_eq!(Id64::from_hex("zzzz"), None);
        assert_eq!(Id64::from_hex("0123456789abcdef0"), None); // 17 chars
        assert_eq!(Id64::from_dec("-1"), None);
    }

    #[test]
    fn id128_hex_is_padded() {
        let id = Id128::new(0x1, 0x2);
        assert_eq!(
            id.string_hex(),
            "00000000000000020000000000000001"
        );
        assert_eq!(Id128::from_hex(&id.string_hex()), Some(id));
    }

    #[test]
    fn id128_dec_uses_low_when_high_unset() {
        assert_eq!(Id128::new(77, 0).string_dec(), "77");
        assert_eq!(Id128::new(77, 3).string_dec(), "377");
    }

    #[test]
    fn id128_zero_is_distinct_from_assigned() {
        assert!(Id128::zero().is_zero());
        assert!(!Id128::new(0, 1).is_zero());
        assert!(!Id128::new(1, 0).is_zero());
    }

    #[test]
    fn id128_be_bytes_layout() {
        let id = Id128::from_be_bytes([
            0, 0, 0, 0, 0, 0, 0, 2, //
            0, 0, 0, 0, 0, 0, 0, 1,
        ]);
        assert_eq!(id, Id128::new(1, 2));
    }

    #[test]
    fn sampled_is_pure() {
        let id = Id128::new(0x1234_5678, 0x9abc_def0);
        let first = id.sampled(0.5);
        for _ in 0..100 {
            assert_eq!(id.sampled(0.5), first);
        }
    }

    #[test]
    fn sampled_extremes() {
        let id = Id128::new(42, 42);
        assert!(id.sampled(1.0));
        assert!(id.sampled(1.5));
        assert!(!id.sampled(0.0));
        assert!(!id.sampled(-0.2));
    }

    #[test]
    fn sampled_rate_tracks_fraction() {
        let mut kept = 0usize;
        let total = 10_000usize;
        for i in 0..total {
            let id = Id128::new(i as u64, (i as u64).wrapping_mul(31));
            if id.sampled(0.3) {
                kept += 1;
            }
        }
        let fraction = kept as f64 / total as f64;
        assert!((fraction - 0.3).abs() < 0.05, "fraction was {fraction}");
    }

    #[test]
    fn rand_id_never_zero_and_distinct() {
        let source = RandId::from_seed(7);
        let a = source.next_id64();
        let b = source.next_id64();
        assert!(!a.is_zero());
        assert!(!b.is_zero());
        assert_ne!(a, b);

        let x = source.next_id128();
        let y = source.next_id128();
        assert!(!x.is_zero());
        assert_ne!(x, y);
    }

    #[test]
    fn rand_id_seeded_is_reproducible() {
        let a = RandId::from_seed(99).next_id128();
        let b = RandId::from_seed(99).next_id128();
        assert_eq!(a, b);
    }
}
