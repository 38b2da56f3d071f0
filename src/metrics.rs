//! Metrics.
//!
//! Metrics are evaluation helpers (they do not participate in backprop).

use crate::{Error, Matrix, Result};

/// Index of the largest value. Ties resolve to the first index; empty slices give 0.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Fraction of rows whose argmax equals the label.
pub fn accuracy(predictions: &Matrix, labels: &[usize]) -> Result<f32> {
    if predictions.rows() != labels.len() {
        return Err(Error::DimensionMismatch(format!(
            "{} prediction rows but {} labels",
            predictions.rows(),
            labels.len()
        )));
    }
    let correct = predictions
        .argmax_rows()
        .iter()
        .zip(labels)
        .filter(|(p, l)| p == l)
        .count();
    Ok(correct as f32 / labels.len() as f32)
}
