//! Data module - CSV loading, schema and cleaning

mod cleaner;
mod loader;
pub mod schema;

pub use cleaner::{
    CleanOutcome, CleanRecord, CleanTable, CleanValue, CleanerError, DataCleaner, RejectReason,
    Rejection,
};
pub use loader::{DataLoader, LoaderError, RawRecord, RawTable, SourceInfo};
pub use schema::{ColumnSpec, FieldDef, Schema, SemanticType};
