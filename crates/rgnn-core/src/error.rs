//! Error types for rgnn operations.
//!
//! Provides structured error handling instead of panics.

use thiserror::Error;

/// Result type for rgnn operations.
pub type Result<T> = std::result::Result<T, RgnnError>;

/// Errors that can occur during rgnn operations.
#[derive(Debug, Clone, Error)]
pub enum RgnnError {
    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    /// Graph and sparse matrix errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    /// PPR engine errors.
    #[error("PPR error: {0}")]
    Ppr(#[from] PprError),
    /// Artifact storage errors.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// Attack execution errors.
    #[error("Attack error: {0}")]
    Attack(#[from] AttackError),
    /// A model collaborator failed.
    #[error("Model error: {0}")]
    Model(String),
    /// I/O errors (wrapped).
    #[error("I/O error: {0}")]
    Io(String),
    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RgnnError {
    fn from(e: std::io::Error) -> Self {
        RgnnError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RgnnError {
    fn from(e: serde_json::Error) -> Self {
        RgnnError::Serialization(e.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Invalid value.
    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    /// Missing required field or collaborator.
    #[error("Missing required field: {0}")]
    MissingField(String),
    /// Out of range.
    #[error("{field} out of range: {value} (must be {min}-{max})")]
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },
}

/// Graph-related errors.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Node index outside `[0, n)`.
    #[error("Node {index} out of range for graph with {n} nodes")]
    NodeOutOfRange { index: usize, n: usize },
    /// Matrix shapes do not agree.
    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// Triplet arrays of different lengths.
    #[error("Triplet arrays differ in length: rows={rows}, cols={cols}, values={values}")]
    TripletLength { rows: usize, cols: usize, values: usize },
    /// Non-finite weight.
    #[error("Invalid weight: {0}")]
    InvalidWeight(f64),
    /// Graph is empty.
    #[error("Graph is empty")]
    EmptyGraph,
    /// Stored sparse arrays that break the CSR layout.
    #[error("Invalid sparse layout: {0}")]
    InvalidLayout(String),
}

/// PPR engine errors.
#[derive(Debug, Clone, Error)]
pub enum PprError {
    /// The incremental update only holds for row-normalized PPR.
    #[error("Incremental update requires row normalization, found {0}")]
    UnsupportedNormalization(String),
    /// The target node carries a self-loop, which the rank-one update excludes.
    #[error("Node {0} must not be connected to itself")]
    SelfLoop(usize),
    /// Perturbation weights must lie in [0, 1].
    #[error("Perturbation weight {weight} at column {col} outside [0, 1]")]
    InvalidPerturbation { col: usize, weight: f64 },
    /// The rank-one update denominator vanished.
    #[error("Incremental update diverged at node {node} (denominator {denominator})")]
    Diverged { node: usize, denominator: f64 },
}

/// Artifact storage errors.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Backend failure (file system, database).
    #[error("Backend failure: {0}")]
    Backend(String),
    /// Stored index or payload could not be read back.
    #[error("Corrupt store entry {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Attack execution errors.
#[derive(Debug, Clone, Error)]
pub enum AttackError {
    /// Attack parameters that cannot be combined.
    #[error("Incompatible attack parameters: {0}")]
    IncompatibleParameters(String),
    /// No candidate columns to perturb.
    #[error("Empty search space for node {0}")]
    EmptySearchSpace(usize),
    /// Logits or loss became non-finite.
    #[error("Numerical divergence at node {node}: {reason}")]
    NumericalDivergence { node: usize, reason: String },
    /// Logits requested before the attack ran.
    #[error("Node {0} has not been attacked yet")]
    NotAttacked(usize),
    /// The node has no PPR row because it lies outside the attacked set.
    #[error("Node {0} is not in the attacked node set")]
    NotAttackable(usize),
    /// A batch finished without a single result.
    #[error("No results produced ({failures} failed units)")]
    NoResults { failures: usize },
}

// Convenience constructors
impl RgnnError {
    pub fn node_out_of_range(index: usize, n: usize) -> Self {
        RgnnError::Graph(GraphError::NodeOutOfRange { index, n })
    }

    pub fn invalid_config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        RgnnError::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        })
    }

    pub fn missing(field: impl Into<String>) -> Self {
        RgnnError::Config(ConfigError::MissingField(field.into()))
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        RgnnError::Storage(StorageError::Backend(msg.into()))
    }

    pub fn model(msg: impl Into<String>) -> Self {
        RgnnError::Model(msg.into())
    }
}
