//! Shared numerical components for the lensing simulation crates.
//!
//! This crate holds the pieces that carry no lensing semantics of their own:
//! interpolation tables used by the cosmology lookups, the order-preserving
//! parallel fan-out used for batch draws, and the summary statistics used to
//! check sampled distributions.

pub mod algo;
