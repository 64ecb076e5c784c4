use crate::geometry::GeometryError;
use crate::units::UnitError;

/// Every way a conversion can fail. None of these are retried: they all mean
/// the input or the configuration is unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("malformed document: {0}")]
    Parse(String),
    #[error("reference error: {0}")]
    Reference(String),
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("unit error: {0}")]
    Unit(#[from] UnitError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<roxmltree::Error> for ConvertError {
    fn from(value: roxmltree::Error) -> Self {
        ConvertError::Parse(value.to_string())
    }
}
