//! Projection implementations (read model builders).
//!
//! Projections consume term and upload events and build query-optimized read
//! models. All projections are:
//! - **Rebuildable**: reset, then replay the family's streams
//! - **Idempotent**: per-stream cursors make redelivery a no-op
//! - **Ordered**: each stream is applied in sequence order, early envelopes wait

pub mod cursor;
pub mod lookup;
pub mod terms;
pub mod uploads;

pub use lookup::{LookupEntry, LookupProjection};
pub use terms::{PageRequest, TermChange, TermQueryProjection, TermRecord, TermUpdate};
pub use uploads::{UploadStatus, UploadStatusProjection};
