//! Pixel grids and image post-processing.

use ndarray::{s, Array2};
use thiserror::Error;

use crate::config::DetectorConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    #[error("supersampling factor must be at least 1")]
    ZeroSupersampling,
    #[error("image shape {rows}x{cols} is not divisible by supersampling factor {factor}")]
    IndivisibleShape {
        rows: usize,
        cols: usize,
        factor: usize,
    },
    #[error("image is empty")]
    EmptyImage,
    #[error("image has degenerate standard deviation {std}")]
    DegenerateImage { std: f64 },
}

/// Supersampled angular coordinate grids for a detector.
///
/// Creates `(n_y·s) × (n_x·s)` grids centred on the optical axis, with
/// adjacent sub-pixels separated by `pixel_width / s` arcseconds.
///
/// # Arguments
/// * `detector` - Detector geometry at output resolution
///
/// # Returns
/// `(grid_x, grid_y)` where `grid_x[[row, col]]` varies along columns and
/// `grid_y[[row, col]]` along rows
pub fn generate_grids(detector: &DetectorConfig) -> Result<(Array2<f64>, Array2<f64>), ImageError> {
    let factor = detector.supersampling_factor;
    if factor == 0 {
        return Err(ImageError::ZeroSupersampling);
    }

    let (rows, cols) = detector.supersampled_shape();
    let spacing = detector.pixel_width / factor as f64;
    let half_rows = (rows as f64 - 1.0) / 2.0;
    let half_cols = (cols as f64 - 1.0) / 2.0;

    let grid_x = Array2::from_shape_fn((rows, cols), |(_, col)| {
        (col as f64 - half_cols) * spacing
    });
    let grid_y = Array2::from_shape_fn((rows, cols), |(row, _)| {
        (row as f64 - half_rows) * spacing
    });
    Ok((grid_x, grid_y))
}

/// Box-average `factor × factor` blocks down to detector resolution.
pub fn downsample(image: &Array2<f64>, factor: usize) -> Result<Array2<f64>, ImageError> {
    if factor == 0 {
        return Err(ImageError::ZeroSupersampling);
    }
    let (rows, cols) = image.dim();
    if rows % factor != 0 || cols % factor != 0 {
        return Err(ImageError::IndivisibleShape { rows, cols, factor });
    }
    if factor == 1 {
        return Ok(image.clone());
    }

    let area = (factor * factor) as f64;
    let out = Array2::from_shape_fn((rows / factor, cols / factor), |(row, col)| {
        image
            .slice(s![
                row * factor..(row + 1) * factor,
                col * factor..(col + 1) * factor
            ])
            .sum()
            / area
    });
    Ok(out)
}

/// Divide an image by its own population standard deviation.
///
/// A uniform image has zero spread and cannot be rescaled; that is reported
/// as [`ImageError::DegenerateImage`] instead of producing NaNs.
pub fn normalize_to_unit_std(mut image: Array2<f64>) -> Result<Array2<f64>, ImageError> {
    if image.is_empty() {
        return Err(ImageError::EmptyImage);
    }
    let std = image.std(0.0);
    if !(std.is_finite() && std > 0.0) {
        return Err(ImageError::DegenerateImage { std });
    }
    image.mapv_inplace(|v| v / std);
    Ok(image)
}
