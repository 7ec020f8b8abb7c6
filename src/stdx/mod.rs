//! Small, self-contained data structures used across the engine.
//!
//! `stdx` hosts narrow, allocation-light utilities tuned for predictable
//! memory use in the compile and search hot paths rather than for
//! general-purpose ergonomics.
//!
//! # Module map
//! - `bitset`: the fixed 256-bit [`ByteSet`] used for transition predicates
//!   and the first-byte filter, and the heap-backed [`DynamicBitSet`] used
//!   for per-instruction check states.

pub mod bitset;

pub use bitset::{ByteSet, DynamicBitSet};
