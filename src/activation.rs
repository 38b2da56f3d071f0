//! Activation functions.
//!
//! A dense layer computes a pre-activation `z = x W + b` and then applies an
//! activation: `y = activation(z)`.
//!
//! The derivatives do not all consume the same cached value:
//! - sigmoid's derivative is expressed in terms of its output `y`: `y (1 - y)`
//! - relu's derivative is expressed in terms of its input `z`: `1` if `z > 0` else `0`
//!
//! [`Activation::derivative_input`] tells the layer which of its cached matrices to pass.
//! Softmax has no standalone derivative: it is always paired with cross-entropy and the
//! network seeds `dL/dz` directly (see [`crate::Loss`]).

use crate::{Init, Matrix};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Sigmoid,
    /// Row-wise softmax over the whole output matrix.
    Softmax,
}

/// Which cached value a derivative is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeInput {
    /// The pre-activation `z`.
    PreActivation,
    /// The post-activation output `y`.
    Output,
}

impl Activation {
    pub fn name(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Softmax => "softmax",
        }
    }

    /// Default initializer for a layer using this activation.
    #[inline]
    pub fn default_init(self) -> Init {
        match self {
            Activation::Relu => Init::He,
            Activation::Sigmoid | Activation::Softmax => Init::Xavier,
        }
    }

    /// Apply the activation to a pre-activation matrix.
    pub fn forward(self, z: &Matrix) -> Matrix {
        match self {
            Activation::Relu => z.map(|x, _, _| relu(x)),
            Activation::Sigmoid => z.map(|x, _, _| sigmoid(x)),
            Activation::Softmax => softmax(z),
        }
    }

    /// `None` for softmax, whose gradient is seeded by the loss.
    #[inline]
    pub fn derivative_input(self) -> Option<DerivativeInput> {
        match self {
            Activation::Relu => Some(DerivativeInput::PreActivation),
            Activation::Sigmoid => Some(DerivativeInput::Output),
            Activation::Softmax => None,
        }
    }

    /// Elementwise derivative; `value` must be the cached value named by
    /// [`Activation::derivative_input`].
    #[inline]
    pub fn derivative(self, value: f32) -> f32 {
        match self {
            Activation::Relu => relu_derivative(value),
            Activation::Sigmoid => sigmoid_derivative(value),
            Activation::Softmax => 1.0,
        }
    }
}

/// `max(0, x)`; NaN passes through so divergence stays visible downstream.
#[inline]
pub fn relu(x: f32) -> f32 {
    if x < 0.0 {
        0.0
    } else {
        x
    }
}

/// Derivative with respect to the input `x`.
#[inline]
pub fn relu_derivative(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else {
        0.0
    }
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Derivative with respect to the output `y = sigmoid(x)`.
#[inline]
pub fn sigmoid_derivative(y: f32) -> f32 {
    y * (1.0 - y)
}

/// Row-wise softmax.
///
/// Each row has its maximum subtracted before exponentiating, so every exponent is
/// `<= 0` and nothing overflows regardless of input magnitude.
pub fn softmax(z: &Matrix) -> Matrix {
    let cols = z.cols();
    let mut out = z.clone();
    for row in out.as_mut_slice().chunks_mut(cols) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0_f32;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    out
}
