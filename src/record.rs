//! Weight interchange records.
//!
//! Networks are not serialized directly. They are converted to plain records whose
//! field names form the interchange format:
//!
//! ```json
//! {"layers": [{"kind": "Dense", "inputSize": 2, "outputSize": 3,
//!              "activation": "relu", "weights": [[..], [..]], "bias": [[..]]}]}
//! ```
//!
//! `weights` is an `inputSize x outputSize` grid and `bias` a `1 x outputSize` grid.
//! Every conversion back into a network validates shapes, finiteness and the size
//! chain between layers.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Activation, Dense, Error, Layer, Matrix, Network, NetworkConfig, Result};

#[cfg(feature = "serde")]
use std::path::Path;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRecord {
    pub layers: Vec<LayerRecord>,
}

/// One layer, tagged by its `kind`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind"))]
#[derive(Debug, Clone, PartialEq)]
pub enum LayerRecord {
    Dense(DenseRecord),
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq)]
pub struct DenseRecord {
    pub input_size: usize,
    pub output_size: usize,
    pub activation: Activation,
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<Vec<f32>>,
}

/// Kinds this crate knows how to rebuild.
pub const LAYER_KINDS: &[&str] = &["Dense"];

impl DenseRecord {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.output_size == 0 {
            return Err(Error::Shape(format!(
                "layer sizes must be > 0, got inputSize={} outputSize={}",
                self.input_size, self.output_size
            )));
        }
        check_grid("weights", &self.weights, self.input_size, self.output_size)?;
        check_grid("bias", &self.bias, 1, self.output_size)?;

        let finite = |grid: &[Vec<f32>]| grid.iter().flatten().all(|v| v.is_finite());
        if !finite(&self.weights) {
            return Err(Error::InvalidData(
                "weights must contain only finite values".to_owned(),
            ));
        }
        if !finite(&self.bias) {
            return Err(Error::InvalidData(
                "bias must contain only finite values".to_owned(),
            ));
        }
        Ok(())
    }
}

fn check_grid(name: &str, grid: &[Vec<f32>], rows: usize, cols: usize) -> Result<()> {
    if grid.len() != rows {
        return Err(Error::Shape(format!(
            "{name} has {} rows, expected {rows}",
            grid.len()
        )));
    }
    if let Some((i, row)) = grid.iter().enumerate().find(|(_, r)| r.len() != cols) {
        return Err(Error::Shape(format!(
            "{name} row {i} has {} values, expected {cols}",
            row.len()
        )));
    }
    Ok(())
}

impl LayerRecord {
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            LayerRecord::Dense(_) => "Dense",
        }
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        match self {
            LayerRecord::Dense(d) => d.input_size,
        }
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        match self {
            LayerRecord::Dense(d) => d.output_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            LayerRecord::Dense(d) => d.validate(),
        }
    }
}

impl NetworkRecord {
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::InvalidData(
                "record must have at least one layer".to_owned(),
            ));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            layer.validate()?;
            if i > 0 {
                let prev_out = self.layers[i - 1].output_size();
                if layer.input_size() != prev_out {
                    return Err(Error::InvalidData(format!(
                        "layer {i} inputSize {} does not match previous outputSize {prev_out}",
                        layer.input_size()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl From<&Dense> for DenseRecord {
    fn from(layer: &Dense) -> Self {
        Self {
            input_size: layer.input_size(),
            output_size: layer.output_size(),
            activation: layer.activation(),
            weights: layer.weights().to_rows(),
            bias: layer.bias().to_rows(),
        }
    }
}

impl From<&Layer> for LayerRecord {
    fn from(layer: &Layer) -> Self {
        match layer {
            Layer::Dense(d) => LayerRecord::Dense(d.into()),
        }
    }
}

impl Dense {
    pub fn to_record(&self) -> DenseRecord {
        self.into()
    }

    pub fn from_record(record: &DenseRecord) -> Result<Self> {
        record.validate()?;
        Dense::from_parts(
            Matrix::from_rows(&record.weights)?,
            Matrix::from_rows(&record.bias)?,
            record.activation,
        )
    }
}

impl Layer {
    pub fn to_record(&self) -> LayerRecord {
        self.into()
    }

    pub fn from_record(record: &LayerRecord) -> Result<Self> {
        match record {
            LayerRecord::Dense(d) => Dense::from_record(d).map(Layer::Dense),
        }
    }
}

impl Network {
    pub fn to_record(&self) -> NetworkRecord {
        NetworkRecord {
            layers: self.layers().iter().map(LayerRecord::from).collect(),
        }
    }

    /// Rebuild a network from a record; the record carries weights only, so the
    /// training configuration is supplied by the caller.
    pub fn from_record(record: &NetworkRecord, config: NetworkConfig) -> Result<Self> {
        record.validate()?;
        let layers = record
            .layers
            .iter()
            .enumerate()
            .map(|(i, l)| {
                Layer::from_record(l).map_err(|e| match e {
                    Error::Shape(msg) => Error::Shape(format!("layer {i}: {msg}")),
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Network::from_layers(layers, config)
    }
}

#[cfg(feature = "serde")]
impl NetworkRecord {
    /// Parse a record, reporting layer kinds this crate cannot rebuild as
    /// [`Error::UnknownLayerKind`].
    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse network json: {e}")))?;
        if let Some(layers) = value.get("layers").and_then(|l| l.as_array()) {
            for layer in layers {
                if let Some(kind) = layer.get("kind").and_then(|k| k.as_str()) {
                    if !LAYER_KINDS.contains(&kind) {
                        return Err(Error::UnknownLayerKind(kind.to_owned()));
                    }
                }
            }
        }
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidData(format!("invalid network record: {e}")))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::InvalidData(format!("failed to serialize network: {e}")))
    }

    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidData(format!("failed to serialize network: {e}")))
    }
}

#[cfg(feature = "serde")]
impl Network {
    /// Serialize the weights to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        self.to_record().to_json_string()
    }

    /// Serialize the weights to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        self.to_record().to_json_string_pretty()
    }

    pub fn from_json_str(s: &str, config: NetworkConfig) -> Result<Self> {
        let record = NetworkRecord::from_json_str(s)?;
        Self::from_record(&record, config)
    }

    /// Save the weights to a JSON file (pretty-printed).
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        std::fs::write(p, s).map_err(|e| Error::Io(format!("failed to write {}: {e}", p.display())))
    }

    pub fn load_json<P: AsRef<Path>>(path: P, config: NetworkConfig) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::Io(format!("failed to read {}: {e}", p.display())))?;
        Self::from_json_str(&s, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(input_size: usize, output_size: usize, activation: Activation) -> DenseRecord {
        DenseRecord {
            input_size,
            output_size,
            activation,
            weights: vec![vec![0.5; output_size]; input_size],
            bias: vec![vec![0.0; output_size]],
        }
    }

    #[test]
    fn record_roundtrips_through_network() {
        let record = NetworkRecord {
            layers: vec![
                LayerRecord::Dense(dense(2, 3, Activation::Relu)),
                LayerRecord::Dense(dense(3, 2, Activation::Softmax)),
            ],
        };
        let net = Network::from_record(&record, NetworkConfig::default()).unwrap();
        assert_eq!(net.num_layers(), 2);
        assert_eq!(net.output_size(), Some(2));
        assert_eq!(net.to_record(), record);
    }

    #[test]
    fn rejects_bad_shapes() {
        let mut d = dense(2, 3, Activation::Relu);
        d.weights.pop();
        assert!(matches!(d.validate(), Err(Error::Shape(_))));

        let mut d = dense(2, 3, Activation::Relu);
        d.bias = vec![vec![0.0; 2]];
        assert!(matches!(Dense::from_record(&d), Err(Error::Shape(_))));

        let d = dense(0, 3, Activation::Relu);
        assert!(matches!(d.validate(), Err(Error::Shape(_))));
    }

    #[test]
    fn rejects_non_finite_and_broken_chain() {
        let mut d = dense(2, 3, Activation::Relu);
        d.weights[1][2] = f32::NAN;
        assert!(matches!(d.validate(), Err(Error::InvalidData(_))));

        let record = NetworkRecord {
            layers: vec![
                LayerRecord::Dense(dense(2, 3, Activation::Relu)),
                LayerRecord::Dense(dense(4, 2, Activation::Softmax)),
            ],
        };
        let err = Network::from_record(&record, NetworkConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));

        let empty = NetworkRecord { layers: vec![] };
        assert!(empty.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_uses_interchange_field_names() {
        let record = NetworkRecord {
            layers: vec![LayerRecord::Dense(dense(1, 2, Activation::Sigmoid))],
        };
        let json = record.to_json_string().unwrap();
        assert_eq!(
            json,
            r#"{"layers":[{"kind":"Dense","inputSize":1,"outputSize":2,"activation":"sigmoid","weights":[[0.5,0.5]],"bias":[[0.0,0.0]]}]}"#
        );
        assert_eq!(NetworkRecord::from_json_str(&json).unwrap(), record);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn unknown_kind_is_reported_by_name() {
        let json = r#"{"layers":[{"kind":"Conv2D","inputSize":1,"outputSize":1}]}"#;
        assert_eq!(
            NetworkRecord::from_json_str(json),
            Err(Error::UnknownLayerKind("Conv2D".to_owned()))
        );
        let err = Network::from_json_str(json, NetworkConfig::default()).unwrap_err();
        assert_eq!(err, Error::UnknownLayerKind("Conv2D".to_owned()));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn malformed_json_is_invalid_data() {
        assert!(matches!(
            NetworkRecord::from_json_str("{not json"),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            NetworkRecord::from_json_str(r#"{"layers":[{"inputSize":1}]}"#),
            Err(Error::InvalidData(_))
        ));
    }
}
