//! Trainable layers.
//!
//! [`Dense`] computes `z = x W + b` and `y = activation(z)` over a whole batch at once
//! (`x` is `batch x input_size`). It caches `x`, `z` and `y` between a forward call and
//! the next backward call, so a layer must not see two forwards before a backward.
//!
//! Backprop is split in two explicit steps:
//! - [`Dense::compute_gradients`] reads the cache and produces [`LayerGradients`]
//! - [`Dense::apply_gradients`] performs the SGD update in place
//!
//! [`Dense::backward`] is both steps back to back.
//!
//! [`Layer`] is the closed set of layer kinds a network can hold.

use rand::Rng;

use crate::activation::DerivativeInput;
use crate::{Activation, Error, Init, Matrix, Result};

/// Output of one layer's backward computation (overwrite semantics, nothing is applied).
#[derive(Debug, Clone, PartialEq)]
pub struct LayerGradients {
    /// `dL/dW`, shape `input_size x output_size`.
    pub weights: Matrix,
    /// `dL/db`, shape `1 x output_size`.
    pub bias: Matrix,
    /// `dL/dx`, shape `batch x input_size`, computed with the pre-update weights.
    pub input: Matrix,
}

#[derive(Debug, Clone)]
struct ForwardCache {
    input: Matrix,
    z: Matrix,
    output: Matrix,
}

#[derive(Debug, Clone)]
pub struct Dense {
    /// Shape `(input_size, output_size)`.
    weights: Matrix,
    /// Shape `(1, output_size)`.
    bias: Matrix,
    activation: Activation,
    cache: Option<ForwardCache>,
}

impl Dense {
    /// Random weights scaled for `activation` (He for relu, Xavier otherwise), zero bias.
    pub fn new_with_rng<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        Self::with_init(input_size, output_size, activation, activation.default_init(), rng)
    }

    pub fn with_init<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        init: Init,
        rng: &mut R,
    ) -> Result<Self> {
        let weights = init.matrix(input_size, output_size, rng)?;
        let bias = Matrix::zeros(1, output_size)?;
        Ok(Self {
            weights,
            bias,
            activation,
            cache: None,
        })
    }

    /// Build from explicit parameters.
    ///
    /// `bias` must be `1 x weights.cols()`.
    pub fn from_parts(weights: Matrix, bias: Matrix, activation: Activation) -> Result<Self> {
        if bias.shape() != (1, weights.cols()) {
            return Err(Error::Shape(format!(
                "bias must be 1x{}, got {}x{}",
                weights.cols(),
                bias.rows(),
                bias.cols()
            )));
        }
        Ok(Self {
            weights,
            bias,
            activation,
            cache: None,
        })
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        self.weights.rows()
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        self.weights.cols()
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    #[inline]
    pub fn bias(&self) -> &Matrix {
        &self.bias
    }

    /// Output of the last forward pass, if it has not been consumed by a backward pass.
    #[inline]
    pub fn cached_output(&self) -> Option<&Matrix> {
        self.cache.as_ref().map(|c| &c.output)
    }

    /// `z = x W + b`.
    fn affine(&self, input: &Matrix) -> Result<Matrix> {
        if input.cols() != self.input_size() {
            return Err(Error::DimensionMismatch(format!(
                "layer expects {} input features, got {}x{}",
                self.input_size(),
                input.rows(),
                input.cols()
            )));
        }
        input.multiply(&self.weights)?.add(&self.bias)
    }

    /// Forward pass; caches the input, pre-activation and output for `backward`.
    pub fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let z = self.affine(input)?;
        let output = self.activation.forward(&z);
        self.cache = Some(ForwardCache {
            input: input.clone(),
            z,
            output: output.clone(),
        });
        Ok(output)
    }

    /// Forward pass that leaves the cache alone.
    pub fn infer(&self, input: &Matrix) -> Result<Matrix> {
        let z = self.affine(input)?;
        Ok(self.activation.forward(&z))
    }

    /// Gradients for the last forward pass. Consumes the cache.
    ///
    /// `grad_output` is `dL/d(output)`, except for softmax layers where it must already be
    /// `dL/dz` (the combined softmax + cross-entropy gradient) and is used unchanged.
    pub fn compute_gradients(&mut self, grad_output: &Matrix) -> Result<LayerGradients> {
        let cache = self.cache.take().ok_or(Error::MissingForward)?;
        if grad_output.shape() != cache.output.shape() {
            let err = Error::DimensionMismatch(format!(
                "gradient is {}x{}, layer output is {}x{}",
                grad_output.rows(),
                grad_output.cols(),
                cache.output.rows(),
                cache.output.cols()
            ));
            self.cache = Some(cache);
            return Err(err);
        }

        let act = self.activation;
        let delta = match act.derivative_input() {
            None => grad_output.clone(),
            Some(DerivativeInput::PreActivation) => {
                grad_output.map(|g, r, c| g * act.derivative(cache.z[(r, c)]))
            }
            Some(DerivativeInput::Output) => {
                grad_output.map(|g, r, c| g * act.derivative(cache.output[(r, c)]))
            }
        };

        Ok(LayerGradients {
            weights: cache.input.t_multiply(&delta)?,
            bias: delta.sum_rows(),
            input: delta.multiply_t(&self.weights)?,
        })
    }

    /// Parameters after one SGD step, without committing them.
    pub fn stepped_parameters(&self, grads: &LayerGradients, lr: f32) -> Result<(Matrix, Matrix)> {
        if grads.weights.shape() != self.weights.shape() || grads.bias.shape() != self.bias.shape()
        {
            return Err(Error::DimensionMismatch(format!(
                "gradients {}x{} / {}x{} do not match layer parameters {}x{} / {}x{}",
                grads.weights.rows(),
                grads.weights.cols(),
                grads.bias.rows(),
                grads.bias.cols(),
                self.weights.rows(),
                self.weights.cols(),
                self.bias.rows(),
                self.bias.cols()
            )));
        }
        if lr == 0.0 {
            return Ok((self.weights.clone(), self.bias.clone()));
        }
        let weights = self.weights.zip_sgd(&grads.weights, lr);
        let bias = self.bias.zip_sgd(&grads.bias, lr);
        Ok((weights, bias))
    }

    /// `W -= lr * dW`, `b -= lr * db` in place.
    pub fn apply_gradients(&mut self, grads: &LayerGradients, lr: f32) -> Result<()> {
        let (weights, bias) = self.stepped_parameters(grads, lr)?;
        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    /// Compute gradients, apply the SGD update, and return `dL/dx` for the previous layer.
    pub fn backward(&mut self, grad_output: &Matrix, lr: f32) -> Result<Matrix> {
        let grads = self.compute_gradients(grad_output)?;
        self.apply_gradients(&grads, lr)?;
        Ok(grads.input)
    }

    pub(crate) fn set_parameters(&mut self, weights: Matrix, bias: Matrix) {
        debug_assert_eq!(weights.shape(), self.weights.shape());
        debug_assert_eq!(bias.shape(), self.bias.shape());
        self.weights = weights;
        self.bias = bias;
    }

    #[cfg(test)]
    pub(crate) fn weights_mut(&mut self) -> &mut [f32] {
        self.weights.as_mut_slice()
    }

    #[cfg(test)]
    pub(crate) fn bias_mut(&mut self) -> &mut [f32] {
        self.bias.as_mut_slice()
    }
}

impl Matrix {
    /// `self - lr * grad`; shapes are checked by the caller.
    fn zip_sgd(&self, grad: &Matrix, lr: f32) -> Matrix {
        let mut out = self.clone();
        for (w, &g) in out.as_mut_slice().iter_mut().zip(grad.as_slice()) {
            *w -= lr * g;
        }
        out
    }
}

/// Every layer kind a network can hold.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
}

impl From<Dense> for Layer {
    fn from(value: Dense) -> Self {
        Layer::Dense(value)
    }
}

impl Layer {
    #[inline]
    pub fn input_size(&self) -> usize {
        match self {
            Layer::Dense(d) => d.input_size(),
        }
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        match self {
            Layer::Dense(d) => d.output_size(),
        }
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        match self {
            Layer::Dense(d) => d.activation(),
        }
    }

    #[inline]
    pub fn weights(&self) -> &Matrix {
        match self {
            Layer::Dense(d) => d.weights(),
        }
    }

    #[inline]
    pub fn bias(&self) -> &Matrix {
        match self {
            Layer::Dense(d) => d.bias(),
        }
    }

    #[inline]
    pub fn cached_output(&self) -> Option<&Matrix> {
        match self {
            Layer::Dense(d) => d.cached_output(),
        }
    }

    pub fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        match self {
            Layer::Dense(d) => d.forward(input),
        }
    }

    pub fn infer(&self, input: &Matrix) -> Result<Matrix> {
        match self {
            Layer::Dense(d) => d.infer(input),
        }
    }

    pub fn compute_gradients(&mut self, grad_output: &Matrix) -> Result<LayerGradients> {
        match self {
            Layer::Dense(d) => d.compute_gradients(grad_output),
        }
    }

    pub fn stepped_parameters(&self, grads: &LayerGradients, lr: f32) -> Result<(Matrix, Matrix)> {
        match self {
            Layer::Dense(d) => d.stepped_parameters(grads, lr),
        }
    }

    pub fn backward(&mut self, grad_output: &Matrix, lr: f32) -> Result<Matrix> {
        match self {
            Layer::Dense(d) => d.backward(grad_output, lr),
        }
    }

    pub(crate) fn set_parameters(&mut self, weights: Matrix, bias: Matrix) {
        match self {
            Layer::Dense(d) => d.set_parameters(weights, bias),
        }
    }

    /// Drop any cached forward state (used for read-only copies).
    pub(crate) fn clear_cache(&mut self) {
        match self {
            Layer::Dense(d) => d.cache = None,
        }
    }
}
