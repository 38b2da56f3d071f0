//! Loss functions.
//!
//! A loss provides two things to the training step:
//! - a scalar value for reporting
//! - the seed gradient that starts the backward sweep
//!
//! The seed gradient's meaning depends on the output layer. With
//! [`Loss::SoftmaxCrossEntropy`] the seed is `dL/dz` of the softmax layer (the closed form
//! `(prediction - target) / batch`), which the softmax layer consumes unchanged. With
//! [`Loss::Mse`] the seed is `dL/d(output)` and goes through the output activation's
//! derivative. [`Loss::check_output`] rejects pairings where those meanings disagree.

use crate::{Activation, Error, Matrix, Result};

/// Probabilities are clipped to `[EPS, 1 - EPS]` before taking the log.
const CROSS_ENTROPY_EPS: f32 = 1e-15;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    /// Softmax output + cross-entropy against one-hot targets.
    #[default]
    SoftmaxCrossEntropy,
    /// Squared error summed over outputs, averaged over the batch.
    Mse,
}

impl Loss {
    /// Check that the network's output activation is compatible with this loss.
    pub fn check_output(self, activation: Activation) -> Result<()> {
        match (self, activation) {
            (Loss::SoftmaxCrossEntropy, Activation::Softmax) => Ok(()),
            (Loss::SoftmaxCrossEntropy, other) => Err(Error::InvalidConfig(format!(
                "softmax cross-entropy needs a softmax output layer, got {}",
                other.name()
            ))),
            (Loss::Mse, Activation::Softmax) => Err(Error::InvalidConfig(
                "mse cannot seed a softmax output layer; use softmax cross-entropy".to_owned(),
            )),
            (Loss::Mse, _) => Ok(()),
        }
    }

    pub fn value(self, prediction: &Matrix, target: &Matrix) -> Result<f32> {
        check_shapes(prediction, target)?;
        Ok(match self {
            Loss::SoftmaxCrossEntropy => cross_entropy(prediction, target),
            Loss::Mse => mse(prediction, target),
        })
    }

    /// Gradient that seeds the backward sweep.
    pub fn seed_gradient(self, prediction: &Matrix, target: &Matrix) -> Result<Matrix> {
        check_shapes(prediction, target)?;
        let batch = prediction.rows() as f32;
        Ok(match self {
            Loss::SoftmaxCrossEntropy => {
                prediction.map(|p, r, c| (p - target[(r, c)]) / batch)
            }
            Loss::Mse => prediction.map(|p, r, c| 2.0 * (p - target[(r, c)]) / batch),
        })
    }
}

/// Mean over the batch of `-sum(target * ln(prediction))`.
pub fn cross_entropy(prediction: &Matrix, target: &Matrix) -> f32 {
    debug_assert_eq!(prediction.shape(), target.shape());
    let total: f32 = prediction
        .as_slice()
        .iter()
        .zip(target.as_slice())
        .map(|(&p, &t)| {
            let p = p.clamp(CROSS_ENTROPY_EPS, 1.0 - CROSS_ENTROPY_EPS);
            -t * p.ln()
        })
        .sum();
    total / prediction.rows() as f32
}

pub fn mse(prediction: &Matrix, target: &Matrix) -> f32 {
    debug_assert_eq!(prediction.shape(), target.shape());
    let total: f32 = prediction
        .as_slice()
        .iter()
        .zip(target.as_slice())
        .map(|(&p, &t)| (p - t) * (p - t))
        .sum();
    total / prediction.rows() as f32
}

fn check_shapes(prediction: &Matrix, target: &Matrix) -> Result<()> {
    if prediction.shape() != target.shape() {
        return Err(Error::DimensionMismatch(format!(
            "prediction is {}x{}, target is {}x{}",
            prediction.rows(),
            prediction.cols(),
            target.rows(),
            target.cols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::softmax;

    #[test]
    fn cross_entropy_of_confident_correct_prediction_is_small() {
        let target = Matrix::from_rows(&[vec![0.0, 1.0, 0.0]]).unwrap();
        let good = Matrix::from_rows(&[vec![0.01, 0.98, 0.01]]).unwrap();
        let bad = Matrix::from_rows(&[vec![0.98, 0.01, 0.01]]).unwrap();

        let l_good = Loss::SoftmaxCrossEntropy.value(&good, &target).unwrap();
        let l_bad = Loss::SoftmaxCrossEntropy.value(&bad, &target).unwrap();
        assert!(l_good < 0.03);
        assert!(l_bad > 4.0);

        // a hard zero on the true class is clipped, not infinite
        let zero = Matrix::from_rows(&[vec![1.0, 0.0, 0.0]]).unwrap();
        assert!(Loss::SoftmaxCrossEntropy.value(&zero, &target).unwrap().is_finite());
    }

    #[test]
    fn softmax_cross_entropy_seed_matches_numeric_dz() {
        let z = Matrix::from_rows(&[vec![0.2, -0.4, 1.1], vec![0.0, 0.3, -0.8]]).unwrap();
        let target = Matrix::from_rows(&[vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0]]).unwrap();
        let seed = Loss::SoftmaxCrossEntropy
            .seed_gradient(&softmax(&z), &target)
            .unwrap();

        let eps = 1e-3_f32;
        for r in 0..2 {
            for c in 0..3 {
                let mut zp = z.clone();
                zp.set(r, c, z[(r, c)] + eps);
                let plus = cross_entropy(&softmax(&zp), &target);
                zp.set(r, c, z[(r, c)] - eps);
                let minus = cross_entropy(&softmax(&zp), &target);
                let numeric = (plus - minus) / (2.0 * eps);
                assert!(
                    (seed[(r, c)] - numeric).abs() < 1e-3,
                    "analytic={} numeric={numeric}",
                    seed[(r, c)]
                );
            }
        }
    }

    #[test]
    fn mse_value_and_gradient() {
        let pred = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.5, 0.5]]).unwrap();
        let target = Matrix::from_rows(&[vec![0.0, 0.0], vec![0.5, 1.5]]).unwrap();
        assert_eq!(Loss::Mse.value(&pred, &target).unwrap(), 1.0);
        let g = Loss::Mse.seed_gradient(&pred, &target).unwrap();
        assert_eq!(g.as_slice(), &[1.0, 0.0, 0.0, -1.0]);
    }

    #[test]
    fn output_pairing_is_checked() {
        assert!(Loss::SoftmaxCrossEntropy.check_output(Activation::Softmax).is_ok());
        assert!(Loss::SoftmaxCrossEntropy.check_output(Activation::Relu).is_err());
        assert!(Loss::Mse.check_output(Activation::Sigmoid).is_ok());
        assert!(Loss::Mse.check_output(Activation::Softmax).is_err());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let a = Matrix::zeros(2, 3).unwrap();
        let b = Matrix::zeros(3, 2).unwrap();
        assert!(matches!(
            Loss::Mse.seed_gradient(&a, &b),
            Err(Error::DimensionMismatch(_))
        ));
    }
}
