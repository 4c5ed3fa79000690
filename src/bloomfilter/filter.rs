use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::rle;

/// Largest filter accepted from a peer
pub const MAX_WIRE_BITS: usize = 1 << 24;

/// Symbol written for an unset bit on the wire
pub const UNSET_SYMBOL: char = '-';
/// Symbol written for a set bit on the wire
pub const SET_SYMBOL: char = '#';

/// Bloom filter as exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBloomFilter {
    /// Number of bits in the filter
    pub bits: usize,
    /// Number of hash functions
    pub hashes: u32,
    /// Run-length encoded bit string
    pub encoded: String,
}

/// Probabilistic set of cache keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<bool>,
    hashes: u32,
}

impl BloomFilter {
    /// Creates an empty filter with `bits` bits and `hashes` hash functions
    pub fn new(bits: usize, hashes: u32) -> Result<Self> {
        if bits == 0 || hashes == 0 {
            return Err(anyhow!(
                "Bloom filter needs at least one bit and one hash (bits={}, hashes={})",
                bits,
                hashes
            ));
        }
        Ok(Self {
            bits: vec![false; bits],
            hashes,
        })
    }

    /// Builds a filter containing every key in `keys`
    pub fn from_keys<I, K>(keys: I, bits: usize, hashes: u32) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut filter = Self::new(bits, hashes)?;
        for key in keys {
            filter.insert(key.as_ref());
        }
        Ok(filter)
    }

    pub fn insert(&mut self, key: &str) {
        for index in self.indexes(key) {
            self.bits[index] = true;
        }
    }

    /// Returns false if `key` was definitely never inserted
    pub fn contains(&self, key: &str) -> bool {
        self.indexes(key).all(|index| self.bits[index])
    }

    /// Number of bits in the filter
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// True when no bit is set
    pub fn is_clear(&self) -> bool {
        !self.bits.iter().any(|bit| *bit)
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }

    // Kirsch-Mitzenmacher double hashing over the two halves of a SHA-256 digest.
    fn indexes(&self, key: &str) -> impl Iterator<Item = usize> {
        let digest = Sha256::digest(key.as_bytes());
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&digest[..8]);
        second.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_be_bytes(first);
        let h2 = u64::from_be_bytes(second);
        let len = self.bits.len() as u64;

        (0..self.hashes as u64)
            .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % len) as usize)
    }

    /// Serializes the filter into its run-length encoded wire form
    pub fn to_wire(&self) -> Result<WireBloomFilter> {
        let rendered: String = self
            .bits
            .iter()
            .map(|bit| if *bit { SET_SYMBOL } else { UNSET_SYMBOL })
            .collect();
        let encoded = rle::encode(&rendered).context("Failed to encode bloom filter")?;

        Ok(WireBloomFilter {
            bits: self.bits.len(),
            hashes: self.hashes,
            encoded,
        })
    }

    /// Rebuilds a filter received from a peer
    pub fn from_wire(wire: &WireBloomFilter) -> Result<Self> {
        if wire.bits > MAX_WIRE_BITS {
            return Err(anyhow!(
                "Bloom filter of {} bits exceeds the {} bit limit",
                wire.bits,
                MAX_WIRE_BITS
            ));
        }
        let mut filter = Self::new(wire.bits, wire.hashes)?;
        let decoded = rle::decode_with_limit(&wire.encoded, wire.bits)
            .context("Failed to decode bloom filter")?;

        let mut length = 0;
        for (index, symbol) in decoded.chars().enumerate() {
            filter.bits[index] = match symbol {
                SET_SYMBOL => true,
                UNSET_SYMBOL => false,
                other => return Err(anyhow!("Unknown bloom filter symbol {:?}", other)),
            };
            length += 1;
        }
        if length != wire.bits {
            return Err(anyhow!(
                "Bloom filter length mismatch: expected {} bits, got {}",
                wire.bits,
                length
            ));
        }

        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_keys_are_found() {
        let filter = BloomFilter::from_keys(["alpha", "beta", "gamma"], 256, 3).unwrap();
        assert!(filter.contains("alpha"));
        assert!(filter.contains("beta"));
        assert!(filter.contains("gamma"));
        assert!(filter.count_ones() <= 9);
    }

    #[test]
    fn test_empty_filter_contains_nothing() {
        let filter = BloomFilter::new(64, 2).unwrap();
        assert!(filter.is_clear());
        assert!(!filter.contains("anything"));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(BloomFilter::new(0, 3).is_err());
        assert!(BloomFilter::new(8, 0).is_err());
    }

    #[test]
    fn test_wire_form_uses_digit_free_alphabet() {
        let filter = BloomFilter::from_keys(["k1", "k2"], 128, 2).unwrap();
        let wire = filter.to_wire().unwrap();
        let expanded = rle::decode(&wire.encoded).unwrap();
        assert_eq!(expanded.len(), 128);
        assert!(expanded.chars().all(|c| c == SET_SYMBOL || c == UNSET_SYMBOL));
        // an empty region compresses to a single token
        assert_eq!(BloomFilter::new(128, 2).unwrap().to_wire().unwrap().encoded, "-128");
    }

    #[test]
    fn test_wire_transfer_preserves_membership() {
        let keys = ["user:1", "user:2", "session:abc"];
        let filter = BloomFilter::from_keys(keys, 512, 4).unwrap();
        let received = BloomFilter::from_wire(&filter.to_wire().unwrap()).unwrap();
        assert_eq!(received, filter);
        for key in keys {
            assert!(received.contains(key));
        }
    }

    #[test]
    fn test_from_wire_rejects_bad_payloads() {
        let short = WireBloomFilter {
            bits: 16,
            hashes: 2,
            encoded: "-10".to_string(),
        };
        assert!(BloomFilter::from_wire(&short).is_err());

        let oversized = WireBloomFilter {
            bits: 16,
            hashes: 2,
            encoded: "-999999999".to_string(),
        };
        assert!(BloomFilter::from_wire(&oversized).is_err());

        let foreign = WireBloomFilter {
            bits: 4,
            hashes: 2,
            encoded: "x4".to_string(),
        };
        assert!(BloomFilter::from_wire(&foreign).is_err());

        let huge = WireBloomFilter {
            bits: MAX_WIRE_BITS + 1,
            hashes: 2,
            encoded: String::new(),
        };
        assert!(BloomFilter::from_wire(&huge).is_err());
    }
}
