//! Sequential network and its training step.
//!
//! A [`Network`] owns an ordered list of layers where each layer's `output_size` equals
//! the next layer's `input_size`. [`Network::train`] runs one SGD step on a batch:
//!
//! 1. forward the batch; a non-finite prediction fails before any weight is touched
//! 2. seed the backward sweep from the configured [`Loss`]
//! 3. sweep the layers output to input, according to the configured [`UpdatePolicy`]
//! 4. publish a [`StepEvent`] if anyone subscribed
//!
//! Forward and backward share per-layer caches, so every mutating method takes
//! `&mut self`. For inference alongside training, take a [`Network::snapshot`].

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::events::{StepEvent, StepPublisher};
use crate::{Error, Layer, LayerGradients, Loss, Matrix, Result};

/// How a training step applies updates when a layer diverges.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Compute every layer's gradients and candidate parameters first; commit only if all
    /// of them are finite. A failed step leaves the network unchanged.
    #[default]
    AllOrNothing,
    /// Update each layer as soon as its gradient is known, checking its weights right
    /// after. A divergence at layer `k` leaves layers `k..` updated and `..k` untouched.
    Sequential,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkConfig {
    pub loss: Loss,
    pub update_policy: UpdatePolicy,
    /// Emit per-step `log::debug!` records.
    pub debug: bool,
}

#[derive(Debug, Default)]
pub struct Network {
    layers: Vec<Layer>,
    config: NetworkConfig,
    events: StepPublisher,
    steps: u64,
}

impl Network {
    /// Empty network.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn from_layers(layers: Vec<Layer>, config: NetworkConfig) -> Result<Self> {
        for (i, pair) in layers.windows(2).enumerate() {
            check_link(i + 1, &pair[0], &pair[1])?;
        }
        Ok(Self {
            layers,
            ..Self::new(config)
        })
    }

    /// Append a layer; its input size must match the current output size.
    pub fn push(&mut self, layer: impl Into<Layer>) -> Result<()> {
        let layer = layer.into();
        if let Some(prev) = self.layers.last() {
            check_link(self.layers.len(), prev, &layer)?;
        }
        self.layers.push(layer);
        Ok(())
    }

    #[inline]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn layer(&self, idx: usize) -> Option<&Layer> {
        self.layers.get(idx)
    }

    #[inline]
    pub fn input_size(&self) -> Option<usize> {
        self.layers.first().map(Layer::input_size)
    }

    #[inline]
    pub fn output_size(&self) -> Option<usize> {
        self.layers.last().map(Layer::output_size)
    }

    /// Number of successful training steps so far.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Receive a [`StepEvent`] after every successful training step.
    pub fn subscribe(&mut self) -> Receiver<Arc<StepEvent>> {
        self.events.subscribe()
    }

    /// Forward pass through every layer, refreshing each layer's cache.
    pub fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let (first, rest) = self.layers.split_first_mut().ok_or_else(empty_network)?;
        let mut current = first.forward(input)?;
        for layer in rest {
            current = layer.forward(&current)?;
        }
        Ok(current)
    }

    /// Same as [`Network::forward`]. The result does not depend on the caches, but the
    /// caches are overwritten.
    #[inline]
    pub fn predict(&mut self, input: &Matrix) -> Result<Matrix> {
        self.forward(input)
    }

    /// Forward pass that leaves the caches alone.
    pub fn infer(&self, input: &Matrix) -> Result<Matrix> {
        infer_layers(&self.layers, input)
    }

    /// Forward `x` and score it against `y` with the configured loss.
    pub fn loss(&mut self, x: &Matrix, y: &Matrix) -> Result<f32> {
        let prediction = self.forward(x)?;
        self.config.loss.value(&prediction, y)
    }

    /// Deep copy of the current parameters for read-only inference.
    pub fn snapshot(&self) -> InferenceModel {
        let mut layers = self.layers.clone();
        layers.iter_mut().for_each(Layer::clear_cache);
        InferenceModel { layers }
    }

    /// One SGD step on a batch. Returns the forward prediction.
    ///
    /// `x` is `batch x input_size`; `y` is `batch x output_size` (one-hot rows for
    /// softmax cross-entropy).
    pub fn train(&mut self, x: &Matrix, y: &Matrix, lr: f32) -> Result<Matrix> {
        let result = self.train_step(x, y, lr);
        if let Err(err) = &result {
            log::error!("training step {} failed: {err}", self.steps + 1);
        }
        result
    }

    fn train_step(&mut self, x: &Matrix, y: &Matrix, lr: f32) -> Result<Matrix> {
        if !(lr.is_finite() && lr >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and >= 0, got {lr}"
            )));
        }
        let output = self.layers.last().ok_or_else(empty_network)?;
        self.config.loss.check_output(output.activation())?;

        let prediction = self.forward(x)?;
        if !prediction.is_valid() {
            return Err(Error::Divergence {
                layer: None,
                reason: "non-finite values in forward output".to_owned(),
            });
        }
        let seed = self.config.loss.seed_gradient(&prediction, y)?;

        let publish = self.events.has_subscribers();
        let loss = if publish || self.config.debug {
            Some(self.config.loss.value(&prediction, y)?)
        } else {
            None
        };
        let activations: Vec<Matrix> = if publish {
            self.layers
                .iter()
                .filter_map(|l| l.cached_output().cloned())
                .collect()
        } else {
            Vec::new()
        };

        let gradients = match self.config.update_policy {
            UpdatePolicy::Sequential => self.sweep_sequential(seed, lr, publish)?,
            UpdatePolicy::AllOrNothing => self.sweep_all_or_nothing(seed, lr, publish)?,
        };
        self.steps += 1;

        if self.config.debug {
            log::debug!(
                "step {} batch={} lr={lr} loss={:.6}",
                self.steps,
                x.rows(),
                loss.unwrap_or(f32::NAN)
            );
        }

        if publish {
            let event = StepEvent {
                step: self.steps,
                loss: loss.unwrap_or(f32::NAN),
                prediction: prediction.clone(),
                activations,
                gradients,
                weights: self.layers.iter().map(|l| l.weights().clone()).collect(),
            };
            self.events.publish(event);
        }

        Ok(prediction)
    }

    /// Backward + update per layer, checking weights right after each update.
    ///
    /// Returns the gradient each layer received (input order) when `record` is set.
    fn sweep_sequential(&mut self, seed: Matrix, lr: f32, record: bool) -> Result<Vec<Matrix>> {
        let mut received = Vec::new();
        let mut grad = seed;
        for idx in (0..self.layers.len()).rev() {
            if record {
                received.push(grad.clone());
            }
            grad = self.layers[idx].backward(&grad, lr)?;
            if !self.layers[idx].weights().is_valid() {
                log::warn!("layer {idx} weights diverged; layers {idx}.. are already updated");
                return Err(Error::Divergence {
                    layer: Some(idx),
                    reason: "non-finite weights after update".to_owned(),
                });
            }
        }
        received.reverse();
        Ok(received)
    }

    /// Compute everything first, validate everything, then commit.
    fn sweep_all_or_nothing(
        &mut self,
        seed: Matrix,
        lr: f32,
        record: bool,
    ) -> Result<Vec<Matrix>> {
        let n = self.layers.len();
        let mut received = Vec::new();
        let mut all: Vec<LayerGradients> = Vec::with_capacity(n);
        let mut grad = seed;
        for idx in (0..n).rev() {
            let g = self.layers[idx].compute_gradients(&grad)?;
            if !(g.weights.is_valid() && g.bias.is_valid()) {
                return Err(Error::Divergence {
                    layer: Some(idx),
                    reason: "non-finite gradients".to_owned(),
                });
            }
            let next = g.input.clone();
            if record {
                received.push(std::mem::replace(&mut grad, next));
            } else {
                grad = next;
            }
            all.push(g);
        }

        let mut staged = Vec::with_capacity(n);
        for (idx, g) in (0..n).rev().zip(&all) {
            let (weights, bias) = self.layers[idx].stepped_parameters(g, lr)?;
            if !(weights.is_valid() && bias.is_valid()) {
                log::warn!("layer {idx} would diverge; no layer was updated");
                return Err(Error::Divergence {
                    layer: Some(idx),
                    reason: "non-finite weights after update".to_owned(),
                });
            }
            staged.push((idx, weights, bias));
        }
        for (idx, weights, bias) in staged {
            self.layers[idx].set_parameters(weights, bias);
        }

        received.reverse();
        Ok(received)
    }
}

/// Immutable deep copy of a network's parameters.
///
/// Prediction takes `&self` and touches no caches, so a snapshot can be shared across
/// threads while the original network keeps training.
#[derive(Debug, Clone)]
pub struct InferenceModel {
    layers: Vec<Layer>,
}

impl InferenceModel {
    pub fn predict(&self, input: &Matrix) -> Result<Matrix> {
        infer_layers(&self.layers, input)
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

fn infer_layers(layers: &[Layer], input: &Matrix) -> Result<Matrix> {
    let (first, rest) = layers.split_first().ok_or_else(empty_network)?;
    let mut current = first.infer(input)?;
    for layer in rest {
        current = layer.infer(&current)?;
    }
    Ok(current)
}

fn check_link(idx: usize, prev: &Layer, next: &Layer) -> Result<()> {
    if prev.output_size() != next.input_size() {
        return Err(Error::DimensionMismatch(format!(
            "layer {idx} input_size {} does not match previous output_size {}",
            next.input_size(),
            prev.output_size()
        )));
    }
    Ok(())
}

fn empty_network() -> Error {
    Error::InvalidConfig("network has no layers".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Activation, Dense};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dense(rows: &[Vec<f32>], bias: Vec<f32>, act: Activation) -> Dense {
        Dense::from_parts(
            Matrix::from_rows(rows).unwrap(),
            Matrix::row_vector(bias).unwrap(),
            act,
        )
        .unwrap()
    }

    fn two_layer(config: NetworkConfig) -> Network {
        let hidden = dense(
            &[vec![0.5, -0.3, 0.2], vec![0.1, 0.4, -0.6]],
            vec![0.1, 0.0, 0.2],
            Activation::Relu,
        );
        let output = dense(
            &[vec![0.3, -0.2], vec![-0.5, 0.4], vec![0.2, 0.1]],
            vec![0.0, 0.0],
            Activation::Softmax,
        );
        Network::from_layers(vec![hidden.into(), output.into()], config).unwrap()
    }

    #[test]
    fn rejects_broken_layer_chain() {
        let mut rng = StdRng::seed_from_u64(0);
        let a = Dense::new_with_rng(4, 3, Activation::Relu, &mut rng).unwrap();
        let b = Dense::new_with_rng(2, 2, Activation::Softmax, &mut rng).unwrap();

        let layers = vec![a.clone().into(), b.clone().into()];
        let err = Network::from_layers(layers, NetworkConfig::default());
        assert!(matches!(err, Err(Error::DimensionMismatch(_))));

        let mut net = Network::new(NetworkConfig::default());
        net.push(a).unwrap();
        assert!(matches!(net.push(b), Err(Error::DimensionMismatch(_))));
        assert_eq!(net.num_layers(), 1);
    }

    #[test]
    fn empty_network_cannot_run() {
        let mut net = Network::new(NetworkConfig::default());
        let x = Matrix::zeros(1, 2).unwrap();
        assert!(matches!(net.forward(&x), Err(Error::InvalidConfig(_))));
        assert!(matches!(net.train(&x, &x, 0.1), Err(Error::InvalidConfig(_))));
        assert!(net.snapshot().predict(&x).is_err());
    }

    #[test]
    fn predict_and_snapshot_agree() {
        let mut net = two_layer(NetworkConfig::default());
        let snapshot = net.snapshot();
        let x = Matrix::from_rows(&[vec![0.7, -0.1], vec![0.2, 0.9]]).unwrap();

        let live = net.predict(&x).unwrap();
        assert_eq!(snapshot.predict(&x).unwrap(), live);
        assert_eq!(net.infer(&x).unwrap(), live);
        for r in 0..2 {
            assert!((live.row(r).iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn snapshot_is_independent_of_training() {
        let mut net = two_layer(NetworkConfig::default());
        let snapshot = net.snapshot();
        let x = Matrix::from_rows(&[vec![0.7, -0.1]]).unwrap();
        let y = Matrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
        let before = snapshot.predict(&x).unwrap();

        net.train(&x, &y, 0.5).unwrap();
        assert_eq!(snapshot.predict(&x).unwrap(), before);
        assert_ne!(net.infer(&x).unwrap(), before);
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn snapshot_can_cross_threads() {
        assert_send_sync::<InferenceModel>();
    }

    #[test]
    fn train_gradients_match_numeric_cross_entropy() {
        // With lr = 1, each parameter moves by exactly its gradient.
        let mut net = two_layer(NetworkConfig::default());
        let x = Matrix::from_rows(&[vec![0.7, -0.1], vec![0.2, 0.9]]).unwrap();
        let y = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();

        let before: Vec<Matrix> = net.layers().iter().map(|l| l.weights().clone()).collect();
        net.train(&x, &y, 1.0).unwrap();
        let after: Vec<Matrix> = net.layers().iter().map(|l| l.weights().clone()).collect();

        let reference = two_layer(NetworkConfig::default());
        let loss_with = |weights: &[Matrix]| {
            let layers: Vec<Layer> = reference
                .layers()
                .iter()
                .zip(weights)
                .map(|(l, w)| {
                    Dense::from_parts(w.clone(), l.bias().clone(), l.activation())
                        .unwrap()
                        .into()
                })
                .collect();
            let net = Network::from_layers(layers, NetworkConfig::default()).unwrap();
            crate::loss::cross_entropy(&net.infer(&x).unwrap(), &y)
        };

        let eps = 1e-3_f32;
        for layer_idx in 0..2 {
            let n = before[layer_idx].as_slice().len();
            for p in 0..n {
                let mut plus = before.clone();
                plus[layer_idx].as_mut_slice()[p] += eps;
                let mut minus = before.clone();
                minus[layer_idx].as_mut_slice()[p] -= eps;
                let numeric = (loss_with(&plus) - loss_with(&minus)) / (2.0 * eps);
                let analytic = before[layer_idx].as_slice()[p] - after[layer_idx].as_slice()[p];
                assert!(
                    (analytic - numeric).abs() < 2e-3,
                    "layer {layer_idx} param {p}: analytic={analytic} numeric={numeric}"
                );
            }
        }
    }

    #[test]
    fn training_reduces_loss_on_toy_problem() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut net = Network::new(NetworkConfig::default());
        net.push(Dense::new_with_rng(2, 8, Activation::Relu, &mut rng).unwrap())
            .unwrap();
        net.push(Dense::new_with_rng(8, 2, Activation::Softmax, &mut rng).unwrap())
            .unwrap();

        // class 0 left of the y axis, class 1 right of it
        let x = Matrix::from_rows(&[
            vec![-1.0, 0.5],
            vec![-0.8, -0.4],
            vec![-0.6, 0.9],
            vec![0.7, -0.3],
            vec![0.9, 0.6],
            vec![0.5, -0.8],
        ])
        .unwrap();
        let y = Matrix::from_rows(&[
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        ])
        .unwrap();

        let initial = crate::loss::cross_entropy(&net.infer(&x).unwrap(), &y);
        for _ in 0..300 {
            net.train(&x, &y, 0.5).unwrap();
        }
        let trained = net.infer(&x).unwrap();
        let final_loss = crate::loss::cross_entropy(&trained, &y);
        assert!(final_loss < initial * 0.5, "initial={initial} final={final_loss}");
        assert_eq!(trained.argmax_rows(), vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(net.steps(), 300);
    }

    #[test]
    fn loss_must_match_output_activation() {
        let config = NetworkConfig {
            loss: Loss::Mse,
            ..NetworkConfig::default()
        };
        let mut net = two_layer(config);
        let x = Matrix::zeros(1, 2).unwrap();
        let y = Matrix::zeros(1, 2).unwrap();
        assert!(matches!(net.train(&x, &y, 0.1), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn mse_trains_a_sigmoid_output() {
        let config = NetworkConfig {
            loss: Loss::Mse,
            ..NetworkConfig::default()
        };
        let mut net = Network::new(config);
        net.push(dense(&[vec![0.2], vec![-0.1]], vec![0.0], Activation::Sigmoid))
            .unwrap();
        let x = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let y = Matrix::from_rows(&[vec![1.0], vec![0.0]]).unwrap();

        let initial = crate::loss::mse(&net.infer(&x).unwrap(), &y);
        for _ in 0..200 {
            net.train(&x, &y, 1.0).unwrap();
        }
        assert!(crate::loss::mse(&net.infer(&x).unwrap(), &y) < initial);
    }

    #[test]
    fn target_shape_is_checked() {
        let mut net = two_layer(NetworkConfig::default());
        let x = Matrix::zeros(2, 2).unwrap();
        let y = Matrix::zeros(1, 2).unwrap();
        assert!(matches!(net.train(&x, &y, 0.1), Err(Error::DimensionMismatch(_))));
        assert!(matches!(net.train(&x, &x, -1.0), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn non_finite_prediction_fails_before_any_update() {
        let mut net = two_layer(NetworkConfig {
            update_policy: UpdatePolicy::Sequential,
            ..NetworkConfig::default()
        });
        let before: Vec<Matrix> = net.layers().iter().map(|l| l.weights().clone()).collect();
        let x = Matrix::from_rows(&[vec![f32::NAN, 0.0]]).unwrap();
        let y = Matrix::from_rows(&[vec![1.0, 0.0]]).unwrap();

        let err = net.train(&x, &y, 0.1).unwrap_err();
        assert!(matches!(err, Error::Divergence { layer: None, .. }));
        let after: Vec<Matrix> = net.layers().iter().map(|l| l.weights().clone()).collect();
        assert_eq!(before, after);
        assert_eq!(net.steps(), 0);
    }

    #[test]
    fn subscribers_receive_step_events() {
        let mut net = two_layer(NetworkConfig::default());
        let rx = net.subscribe();
        let x = Matrix::from_rows(&[vec![0.7, -0.1], vec![0.2, 0.9]]).unwrap();
        let y = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();

        let prediction = net.train(&x, &y, 0.1).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.step, 1);
        assert_eq!(event.prediction, prediction);
        assert_eq!(event.activations.len(), 2);
        assert_eq!(event.activations[1], prediction);
        assert_eq!(event.gradients.len(), 2);
        assert_eq!(event.gradients[0].shape(), (2, 3));
        assert_eq!(event.gradients[1].shape(), (2, 2));
        assert_eq!(&event.weights[0], net.layers()[0].weights());
        assert!(event.loss.is_finite() && event.loss > 0.0);

        // failed steps publish nothing
        let bad = Matrix::from_rows(&[vec![f32::INFINITY, 0.0]]).unwrap();
        let one = Matrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
        assert!(net.train(&bad, &one, 0.1).is_err());
        assert!(rx.try_recv().is_err());
    }
}
