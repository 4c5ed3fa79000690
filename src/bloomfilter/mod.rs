mod filter;
pub mod rle;

pub use filter::{BloomFilter, WireBloomFilter, MAX_WIRE_BITS, SET_SYMBOL, UNSET_SYMBOL};
pub use rle::RleError;
