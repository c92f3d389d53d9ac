use thiserror::Error;

/// Failures of the upload workflow steps.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Aggregated row problems, one line per problem.
    #[error("{0}")]
    FileValidation(String),

    /// Decode or dispatch failures while importing.
    #[error("import failed: {0}")]
    Import(String),

    #[error("upload not found")]
    NotFound,

    /// The bytes could not be turned into a workbook (or back).
    #[error("workbook codec error: {0}")]
    Codec(String),
}
