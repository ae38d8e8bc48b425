//! Sharder implementation.
use sha1::{Digest, Sha1};

/// Maps a bucketing seed to a pseudo-uniform point in `[0, 1)`.
pub trait Sharder {
    /// Map `input` to a point in `[0, 1)`. Must be deterministic.
    fn get_point(&self, input: &str) -> f64;
}

/// The default (and only) sharder.
///
/// Takes the first 32 bits of the SHA-1 digest of the input as a big-endian unsigned integer and
/// divides it by 2^32.
pub struct Sha1Sharder;

impl Sharder for Sha1Sharder {
    fn get_point(&self, input: &str) -> f64 {
        let hash = Sha1::digest(input.as_bytes());
        let int_from_hash = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        f64::from(int_from_hash) / 4_294_967_296.0
    }
}

#[cfg(test)]
pub struct DeterministicSharder(pub std::collections::HashMap<String, f64>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn get_point(&self, input: &str) -> f64 {
        self.0.get(input).copied().unwrap_or(0.0)
    }
}
