//! Network builder.
//!
//! `NetworkBuilder` is the usual way to define a digit classifier: list the layer
//! sizes and activations, pick a [`NetworkConfig`], and build with a seed.
//!
//! Each layer gets the initializer its activation calls for:
//!
//! - `relu`: He
//! - `sigmoid` / `softmax`: Xavier

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Activation, Dense, Error, Network, NetworkConfig, Result};

#[derive(Debug, Clone, Copy)]
struct LayerSpec {
    output_size: usize,
    activation: Activation,
}

#[derive(Debug, Clone)]
/// Builder for a [`Network`].
///
/// Example:
///
/// ```rust
/// use digit_mlp::{Activation, NetworkBuilder};
///
/// # fn main() -> digit_mlp::Result<()> {
/// let net = NetworkBuilder::new(784)?
///     .add_layer(64, Activation::Relu)?
///     .add_layer(10, Activation::Softmax)?
///     .build_with_seed(0)?;
/// assert_eq!(net.output_size(), Some(10));
/// # Ok(())
/// # }
/// ```
pub struct NetworkBuilder {
    input_size: usize,
    layers: Vec<LayerSpec>,
    config: NetworkConfig,
}

impl NetworkBuilder {
    /// Start building a network that accepts rows of length `input_size`.
    pub fn new(input_size: usize) -> Result<Self> {
        if input_size == 0 {
            return Err(Error::InvalidConfig("input_size must be > 0".to_owned()));
        }
        Ok(Self {
            input_size,
            layers: Vec::new(),
            config: NetworkConfig::default(),
        })
    }

    /// `sizes` includes the input and output sizes; `activations` has one entry per layer.
    pub fn from_sizes(sizes: &[usize], activations: &[Activation]) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(Error::InvalidConfig(
                "sizes must include input and output sizes".to_owned(),
            ));
        }
        if activations.len() != sizes.len() - 1 {
            return Err(Error::InvalidConfig(format!(
                "activations length {} does not match sizes.len() - 1 ({})",
                activations.len(),
                sizes.len() - 1
            )));
        }

        let mut b = Self::new(sizes[0])?;
        for (&output_size, &act) in sizes[1..].iter().zip(activations) {
            b = b.add_layer(output_size, act)?;
        }
        Ok(b)
    }

    /// Add a dense layer with `output_size` neurons.
    pub fn add_layer(mut self, output_size: usize, activation: Activation) -> Result<Self> {
        if output_size == 0 {
            return Err(Error::InvalidConfig(
                "layer output_size must be > 0".to_owned(),
            ));
        }
        self.layers.push(LayerSpec {
            output_size,
            activation,
        });
        Ok(self)
    }

    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Network> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Network> {
        let last = self.layers.last().ok_or_else(|| {
            Error::InvalidConfig("network must have at least one layer".to_owned())
        })?;
        self.config.loss.check_output(last.activation)?;

        let mut net = Network::new(self.config);
        let mut input_size = self.input_size;
        for spec in self.layers {
            net.push(Dense::new_with_rng(
                input_size,
                spec.output_size,
                spec.activation,
                rng,
            )?)?;
            input_size = spec.output_size;
        }
        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Loss, Matrix};

    #[test]
    fn builds_linked_layers() {
        let net = NetworkBuilder::from_sizes(
            &[4, 8, 3],
            &[Activation::Relu, Activation::Softmax],
        )
        .unwrap()
        .build_with_seed(1)
        .unwrap();

        assert_eq!(net.num_layers(), 2);
        assert_eq!(net.input_size(), Some(4));
        assert_eq!(net.output_size(), Some(3));
        assert_eq!(net.layer(0).unwrap().bias(), &Matrix::zeros(1, 8).unwrap());
    }

    #[test]
    fn same_seed_same_weights() {
        let build = || {
            NetworkBuilder::new(3)
                .unwrap()
                .add_layer(2, Activation::Softmax)
                .unwrap()
                .build_with_seed(42)
                .unwrap()
        };
        assert_eq!(build().to_record(), build().to_record());
    }

    #[test]
    fn rejects_bad_definitions() {
        assert!(NetworkBuilder::new(0).is_err());
        assert!(NetworkBuilder::new(3).unwrap().add_layer(0, Activation::Relu).is_err());
        assert!(NetworkBuilder::new(3).unwrap().build_with_seed(0).is_err());
        assert!(NetworkBuilder::from_sizes(&[3], &[]).is_err());
        assert!(NetworkBuilder::from_sizes(&[3, 2], &[]).is_err());
    }

    #[test]
    fn loss_is_checked_against_output_activation() {
        let err = NetworkBuilder::new(3)
            .unwrap()
            .add_layer(2, Activation::Sigmoid)
            .unwrap()
            .build_with_seed(0)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let net = NetworkBuilder::new(3)
            .unwrap()
            .add_layer(2, Activation::Sigmoid)
            .unwrap()
            .config(NetworkConfig {
                loss: Loss::Mse,
                ..NetworkConfig::default()
            })
            .build_with_seed(0)
            .unwrap();
        assert_eq!(net.config().loss, Loss::Mse);
    }
}
