//! Sliding-window construction
//!
//! Windows are `(kernel, n_features)` slices of a recording; a batch of
//! windows is an `Array3` shaped `(n_windows, kernel, n_features)`.

use crate::data::Recording;
use crate::error::{Result, TimelyError};
use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

/// Number of windows of length `kernel` taken every `stride` samples
pub fn window_count(n_samples: usize, kernel: usize, stride: usize) -> usize {
    if kernel == 0 || stride == 0 || n_samples < kernel {
        0
    } else {
        (n_samples - kernel) / stride + 1
    }
}

fn check_window_params(kernel: usize, stride: usize) -> Result<()> {
    if kernel == 0 {
        return Err(TimelyError::invalid_parameter("kernel", kernel, "must be at least 1"));
    }
    if stride == 0 {
        return Err(TimelyError::invalid_parameter("stride", stride, "must be at least 1"));
    }
    Ok(())
}

/// Build the sliding-window tensor of a sample matrix
pub fn sliding_window_matrix(values: &Array2<f64>, kernel: usize, stride: usize) -> Result<Array3<f64>> {
    check_window_params(kernel, stride)?;

    let n_features = values.ncols();
    let m = window_count(values.nrows(), kernel, stride);
    let mut windows = Array3::zeros((m, kernel, n_features));

    windows
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(j, mut window)| {
            let start = j * stride;
            window.assign(&values.slice(s![start..start + kernel, ..]));
        });

    Ok(windows)
}

/// Window every recording and tag each window with its recording's label.
///
/// Returns the stacked windows and one label per window.
pub fn prepare_data(
    recordings: &[Recording],
    labels: &[usize],
    kernel: usize,
    stride: usize,
) -> Result<(Array3<f64>, Array1<usize>)> {
    check_window_params(kernel, stride)?;
    if recordings.len() != labels.len() {
        return Err(TimelyError::ShapeError {
            expected: format!("{} labels", recordings.len()),
            actual: format!("{} labels", labels.len()),
        });
    }

    let n_features = match recordings.first() {
        Some(rec) => rec.n_features(),
        None => return Ok((Array3::zeros((0, kernel, 0)), Array1::zeros(0))),
    };
    if let Some(rec) = recordings.iter().find(|r| r.n_features() != n_features) {
        return Err(TimelyError::ShapeError {
            expected: format!("{} features", n_features),
            actual: format!("{} features", rec.n_features()),
        });
    }

    let per_recording = recordings
        .par_iter()
        .map(|rec| sliding_window_matrix(rec.values(), kernel, stride))
        .collect::<Result<Vec<_>>>()?;

    let y: Array1<usize> = per_recording
        .iter()
        .zip(labels)
        .flat_map(|(x, &label)| std::iter::repeat(label).take(x.len_of(Axis(0))))
        .collect();

    let views: Vec<_> = per_recording.iter().map(|x| x.view()).collect();
    let x = ndarray::concatenate(Axis(0), &views)?;

    Ok((x, y))
}

/// Flatten windows to one row per window: `(m, k, f) -> (m, k * f)`
pub fn flatten_windows(x: &Array3<f64>) -> Array2<f64> {
    let (m, k, f) = x.dim();
    Array2::from_shape_fn((m, k * f), |(i, j)| x[[i, j / f, j % f]])
}

/// Inverse of [`flatten_windows`]
pub fn unflatten_windows(x: &Array2<f64>, kernel: usize) -> Result<Array3<f64>> {
    let (m, width) = x.dim();
    if kernel == 0 || width % kernel != 0 {
        return Err(TimelyError::ShapeError {
            expected: format!("row width divisible by {}", kernel),
            actual: format!("{}", width),
        });
    }
    let n_features = width / kernel;
    Ok(Array3::from_shape_fn((m, kernel, n_features), |(i, t, c)| x[[i, t * n_features + c]]))
}

/// Apply one random permutation to windows and labels
pub fn shuffle_windows(
    x: &Array3<f64>,
    y: &Array1<usize>,
    seed: Option<u64>,
) -> (Array3<f64>, Array1<usize>) {
    let mut rng = match seed {
        Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
        None => Xoshiro256PlusPlus::from_entropy(),
    };

    let mut order: Vec<usize> = (0..x.len_of(Axis(0))).collect();
    order.shuffle(&mut rng);

    (x.select(Axis(0), &order), y.select(Axis(0), &order))
}
