use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid dimensions or data at matrix construction.
    Shape(String),
    /// Operand shapes are incompatible for the requested operation.
    DimensionMismatch(String),
    /// A forward output (`layer: None`) or a layer's updated parameters became non-finite.
    Divergence { layer: Option<usize>, reason: String },
    /// A serialized layer record carries a `kind` this crate does not know.
    UnknownLayerKind(String),
    /// `backward` was called on a layer with no cached forward pass.
    MissingForward,
    InvalidData(String),
    InvalidConfig(String),
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Shape(msg) => write!(f, "invalid shape: {msg}"),
            Error::DimensionMismatch(msg) => write!(f, "dimension mismatch: {msg}"),
            Error::Divergence {
                layer: Some(idx),
                reason,
            } => write!(f, "divergence at layer {idx}: {reason}"),
            Error::Divergence {
                layer: None,
                reason,
            } => write!(f, "divergence: {reason}"),
            Error::UnknownLayerKind(kind) => write!(f, "unknown layer kind: {kind}"),
            Error::MissingForward => write!(f, "backward called without a preceding forward"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
