//! Bulk translation uploads.
//!
//! - `upload`: the event-sourced upload aggregate (submission and step outcomes)
//! - `workbook`: the row contract a spreadsheet decodes into, plus the codec seam
//! - `validate` / `import` / `export`: pure functions over that contract
//!
//! Running the steps (dispatching commands, waiting for projections) is infra's job.

pub mod error;
pub mod export;
pub mod import;
pub mod layout;
pub mod upload;
pub mod validate;
pub mod workbook;

pub use error::UploadError;
pub use export::{ExportTerm, ExportTranslation, build_workbook};
pub use import::{ImportedTerm, plan_import};
pub use layout::SheetKind;
pub use upload::{
    UPLOAD_AGGREGATE_TYPE,
    MarkCleaned, MarkImported, MarkNotImported, MarkNotValidated, MarkValidated, SubmitUpload,
    Upload, UploadCommand, UploadEvent, UploadId, UploadPhase,
};
pub use validate::{validate, validation_errors};
pub use workbook::{JsonWorkbookCodec, Row, Sheet, Workbook, WorkbookCodec};
