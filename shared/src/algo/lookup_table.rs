//! Uniform-grid lookup tables for precomputed cosmological functions.
//!
//! A table stores function values at regular intervals over a closed domain
//! and interpolates between them. Tables with three or more points use
//! quadratic (Lagrange) interpolation; two-point tables fall back to linear
//! interpolation so that deliberately coarse first-pass tables can still be
//! evaluated.
//!
//! # Example
//!
//! ```
//! use shared::algo::lookup_table::LookupTable;
//!
//! let exp_table = LookupTable::new(-5.0, 5.0, 1000, |x| x.exp()).unwrap();
//! let approx_value = exp_table.eval(2.3).unwrap();
//! assert!((approx_value - 2.3_f64.exp()).abs() < 1e-6);
//! ```

use thiserror::Error;

/// Error type for lookup table operations
#[derive(Debug, Error, PartialEq)]
pub enum LookupError {
    /// Value is outside the domain bounds
    #[error("Value {value} is outside domain bounds ({min}, {max})")]
    OutOfBounds { value: f64, min: f64, max: f64 },
    /// Domain is empty, reversed or not finite
    #[error("Invalid table domain ({min}, {max}): x_min must be less than x_max")]
    InvalidDomain { min: f64, max: f64 },
    /// Not enough grid points to interpolate
    #[error("Lookup table needs at least 2 points, got {0}")]
    TooFewPoints(usize),
}

/// A lookup table with quadratic interpolation over a uniform grid.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    /// Domain bounds (min, max)
    domain: (f64, f64),
    /// Step size between grid points
    dx: f64,
    /// Precomputed function values
    values: Vec<f64>,
}

impl LookupTable {
    /// Create a new lookup table by evaluating `f` at `n_points` grid points
    /// spanning `[x_min, x_max]`.
    ///
    /// # Errors
    ///
    /// * `LookupError::InvalidDomain` if `x_min >= x_max` or either bound is not finite
    /// * `LookupError::TooFewPoints` if `n_points < 2`
    pub fn new<F>(x_min: f64, x_max: f64, n_points: usize, f: F) -> Result<Self, LookupError>
    where
        F: Fn(f64) -> f64,
    {
        Self::check_domain(x_min, x_max)?;
        if n_points < 2 {
            return Err(LookupError::TooFewPoints(n_points));
        }

        let dx = (x_max - x_min) / (n_points - 1) as f64;
        let values = (0..n_points).map(|i| f(x_min + i as f64 * dx)).collect();

        Ok(Self {
            domain: (x_min, x_max),
            dx,
            values,
        })
    }

    /// Wrap values already sampled on a uniform grid spanning `[x_min, x_max]`.
    pub fn from_samples(x_min: f64, x_max: f64, values: Vec<f64>) -> Result<Self, LookupError> {
        Self::check_domain(x_min, x_max)?;
        if values.len() < 2 {
            return Err(LookupError::TooFewPoints(values.len()));
        }

        let dx = (x_max - x_min) / (values.len() - 1) as f64;
        Ok(Self {
            domain: (x_min, x_max),
            dx,
            values,
        })
    }

    fn check_domain(x_min: f64, x_max: f64) -> Result<(), LookupError> {
        if !(x_min.is_finite() && x_max.is_finite() && x_min < x_max) {
            return Err(LookupError::InvalidDomain {
                min: x_min,
                max: x_max,
            });
        }
        Ok(())
    }

    /// Evaluate the tabulated function at `x`.
    ///
    /// # Returns
    ///
    /// * `Ok(f64)` - Interpolated function value at x
    /// * `Err(LookupError::OutOfBounds)` - If x is outside the domain
    pub fn eval(&self, x: f64) -> Result<f64, LookupError> {
        if !self.contains(x) {
            return Err(LookupError::OutOfBounds {
                value: x,
                min: self.domain.0,
                max: self.domain.1,
            });
        }

        let n_points = self.values.len();
        let t = (x - self.domain.0) / self.dx;

        if n_points == 2 {
            return Ok(self.values[0] + t * (self.values[1] - self.values[0]));
        }

        let i = (t.floor().max(0.0) as usize).min(n_points - 3);

        let x0 = self.domain.0 + i as f64 * self.dx;
        let x1 = x0 + self.dx;
        let x2 = x1 + self.dx;

        let y0 = self.values[i];
        let y1 = self.values[i + 1];
        let y2 = self.values[i + 2];

        // Quadratic interpolation using Lagrange formula
        let l0 = ((x - x1) * (x - x2)) / ((x0 - x1) * (x0 - x2));
        let l1 = ((x - x0) * (x - x2)) / ((x1 - x0) * (x1 - x2));
        let l2 = ((x - x0) * (x - x1)) / ((x2 - x0) * (x2 - x1));

        Ok(y0 * l0 + y1 * l1 + y2 * l2)
    }

    /// Get the domain bounds of the lookup table.
    pub fn domain(&self) -> (f64, f64) {
        self.domain
    }

    /// Get the number of points in the lookup table.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Get the step size between grid points.
    pub fn step_size(&self) -> f64 {
        self.dx
    }

    /// Grid abscissa of point `i`.
    pub fn x_at(&self, i: usize) -> f64 {
        self.domain.0 + i as f64 * self.dx
    }

    /// Tabulated values in grid order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Check if a value is within the table's domain.
    pub fn contains(&self, x: f64) -> bool {
        x >= self.domain.0 && x <= self.domain.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_function() {
        // Linear function should be exact with quadratic interpolation
        let table = LookupTable::new(0.0, 10.0, 11, |x| 2.0 * x + 3.0).unwrap();

        for x in [0.0, 2.5, 5.0, 7.3, 9.9] {
            assert_relative_eq!(table.eval(x).unwrap(), 2.0 * x + 3.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_quadratic_function() {
        let table = LookupTable::new(-5.0, 5.0, 21, |x| x * x - 2.0 * x + 1.0).unwrap();

        for x in [-4.5, -2.0, 0.0, 1.5, 3.7, 4.9] {
            let expected = x * x - 2.0 * x + 1.0;
            assert_relative_eq!(table.eval(x).unwrap(), expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_two_point_table_is_linear() {
        let table = LookupTable::new(1e-4, 1e3, 2, |x| 3.0 * x).unwrap();

        assert_eq!(table.size(), 2);
        assert_relative_eq!(table.eval(500.0).unwrap(), 1500.0, epsilon = 1e-9);
        assert_relative_eq!(table.eval(1e3).unwrap(), 3e3, epsilon = 1e-9);
    }

    #[test]
    fn test_exponential_approximation() {
        let table = LookupTable::new(-2.0, 2.0, 1000, |x| x.exp()).unwrap();

        for x in [-1.5_f64, -0.5, 0.0, 0.5, 1.0, 1.5] {
            assert_relative_eq!(table.eval(x).unwrap(), x.exp(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_from_samples_matches_new() {
        let built = LookupTable::new(0.0, 2.0, 5, |x| x * x).unwrap();
        let wrapped = LookupTable::from_samples(0.0, 2.0, built.values().to_vec()).unwrap();

        assert_eq!(built, wrapped);
        assert_relative_eq!(wrapped.x_at(2), 1.0);
    }

    #[test]
    fn test_boundary_handling() {
        let table = LookupTable::new(0.0, 1.0, 11, |x| x * x).unwrap();

        assert_relative_eq!(table.eval(0.0).unwrap(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(table.eval(1.0).unwrap(), 1.0, epsilon = 1e-10);

        assert!(matches!(
            table.eval(-0.1),
            Err(LookupError::OutOfBounds { .. })
        ));
        assert!(matches!(
            table.eval(1.1),
            Err(LookupError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_domain_methods() {
        let table = LookupTable::new(-10.0, 10.0, 101, |x| x).unwrap();

        assert_eq!(table.domain(), (-10.0, 10.0));
        assert_eq!(table.size(), 101);
        assert_relative_eq!(table.step_size(), 0.2, epsilon = 1e-10);

        assert!(table.contains(-10.0));
        assert!(table.contains(10.0));
        assert!(!table.contains(10.1));
    }

    #[test]
    fn test_invalid_domain() {
        assert_eq!(
            LookupTable::new(5.0, 3.0, 10, |x| x),
            Err(LookupError::InvalidDomain { min: 5.0, max: 3.0 })
        );
        assert!(LookupTable::new(0.0, f64::INFINITY, 10, |x| x).is_err());
    }

    #[test]
    fn test_insufficient_points() {
        assert_eq!(
            LookupTable::new(0.0, 1.0, 1, |x| x),
            Err(LookupError::TooFewPoints(1))
        );
        assert_eq!(
            LookupTable::from_samples(0.0, 1.0, vec![]),
            Err(LookupError::TooFewPoints(0))
        );
    }

    #[test]
    fn test_high_accuracy_approximation() {
        let f = |x: f64| (x * x).exp() * x.cos();

        let coarse = LookupTable::new(-1.0, 1.0, 10, f).unwrap();
        let fine = LookupTable::new(-1.0, 1.0, 100, f).unwrap();
        let very_fine = LookupTable::new(-1.0, 1.0, 1000, f).unwrap();

        let test_x = 0.567;
        let exact = f(test_x);

        let error_coarse = (coarse.eval(test_x).unwrap() - exact).abs();
        let error_fine = (fine.eval(test_x).unwrap() - exact).abs();
        let error_very_fine = (very_fine.eval(test_x).unwrap() - exact).abs();

        assert!(error_fine < error_coarse);
        assert!(error_very_fine < error_fine);
        assert!(error_very_fine < 1e-8);
    }
}
