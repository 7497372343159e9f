//! Numerical algorithms shared across the simulation crates
//!
//! This module provides interpolation tables, data-parallel helpers and
//! summary statistics.

pub mod lookup_table;
pub mod parallel;
pub mod stats;

pub use lookup_table::{LookupError, LookupTable};
pub use parallel::{par_map_ordered, try_par_map_ordered};
pub use stats::{ks_test_normal, mean, normal_cdf, population_std};
