//! Deterministic cache keys
//!
//! A fingerprint is a BLAKE3 digest over a typed, tagged encoding of every
//! input that affects a cached value. Each field is written with a type tag
//! and, for variable-length data, a length prefix, so no two distinct key
//! tuples share an encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex-encoded BLAKE3 digest identifying one cached computation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const TAG_STR: u8 = 1;
const TAG_U64: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_SERIES: u8 = 4;
const TAG_NONE: u8 = 5;
const TAG_SOME: u8 = 6;
const TAG_STRS: u8 = 7;

/// Incremental builder for a [`Fingerprint`]
pub struct FingerprintBuilder {
    hasher: blake3::Hasher,
}

impl FingerprintBuilder {
    /// `domain` separates key spaces of different caches.
    pub fn new(domain: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"mortality-fingerprint-v1:");
        hasher.update(&(domain.len() as u64).to_le_bytes());
        hasher.update(domain.as_bytes());
        Self { hasher }
    }

    pub fn str(mut self, value: &str) -> Self {
        self.hasher.update(&[TAG_STR]);
        self.hasher.update(&(value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.hasher.update(&[TAG_U64]);
        self.hasher.update(&value.to_le_bytes());
        self
    }

    pub fn bool(mut self, value: bool) -> Self {
        self.hasher.update(&[TAG_BOOL, value as u8]);
        self
    }

    /// Order-sensitive encoding of a nullable series.
    pub fn series(mut self, values: &[Option<f64>]) -> Self {
        self.hasher.update(&[TAG_SERIES]);
        self.hasher.update(&(values.len() as u64).to_le_bytes());
        for value in values {
            match value {
                // All NaN payloads read as missing, so they hash as missing.
                Some(v) if !v.is_nan() => {
                    self.hasher.update(&[TAG_SOME]);
                    self.hasher.update(&v.to_bits().to_le_bytes());
                }
                _ => {
                    self.hasher.update(&[TAG_NONE]);
                }
            }
        }
        self
    }

    pub fn strs<S: AsRef<str>>(mut self, values: &[S]) -> Self {
        self.hasher.update(&[TAG_STRS]);
        self.hasher.update(&(values.len() as u64).to_le_bytes());
        for value in values {
            self = self.str(value.as_ref());
        }
        self
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize().as_bytes()))
    }
}
