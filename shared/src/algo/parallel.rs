//! Parallel processing utilities for independent draws
//!
//! Work items are fanned out over the rayon thread pool and results are
//! gathered back in input order, so a parallel evaluation is identical to a
//! sequential loop over the same inputs. No state is shared between items.

use rayon::prelude::*;

/// Map `f` over `items` in parallel, returning results in input order.
///
/// # Arguments
/// * `items` - Inputs to process, typically pre-split generator keys
/// * `f` - Closure receiving the item index and the item
///
/// # Returns
/// One output per input, `out[i] == f(i, &items[i])`
pub fn par_map_ordered<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Send + Sync,
{
    items
        .par_iter()
        .enumerate()
        .map(|(idx, item)| f(idx, item))
        .collect()
}

/// Fallible variant of [`par_map_ordered`].
///
/// Stops at an error; when several items fail, which error is reported
/// depends on scheduling, but every returned `Ok` vector is in input order.
pub fn try_par_map_ordered<T, R, E, F>(items: &[T], f: F) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(usize, &T) -> Result<R, E> + Send + Sync,
{
    items
        .par_iter()
        .enumerate()
        .map(|(idx, item)| f(idx, item))
        .collect()
}
