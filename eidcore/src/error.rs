use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Fatal conditions raised by the in-memory sample operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("interval [{lo}, {hi}) is out of range for {total} events")]
    Index { lo: usize, hi: usize, total: usize },
    #[error("batch index {index} is out of range for {len} batches")]
    BatchOutOfRange { index: usize, len: usize },
    #[error("weight vector holds {got} entries but {needed} are required")]
    WeightsTooShort { needed: usize, got: usize },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Non-fatal outcome of evaluating a row predicate; the predicate is skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("unknown field `{0}`")]
    MissingField(String),
    #[error("field `{field}` is not a scalar column (row shape {shape:?})")]
    NotScalar { field: String, shape: Vec<usize> },
    #[error("malformed predicate `{expr}`: {reason}")]
    Malformed { expr: String, reason: String },
    #[error("predicate produced {got} values for {expected} rows")]
    Length { expected: usize, got: usize },
}
