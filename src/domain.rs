//! Domain module - panel data model and reconciliation rules
//!
//! Pure types and transformations; nothing in here performs I/O.
//! Collaborator traits live in `services` and are implemented in the
//! infrastructure layer.

pub mod category;
pub mod errors;
pub mod normalizer;
pub mod panel;
pub mod pivot;
pub mod services;

// Re-export commonly used items for convenience
pub use category::{
    Category, CategoryKind, FieldDeclaration, KeyCodec, PanelSchema, SeriesGroup, ValueKind,
};
pub use errors::{FetchError, PanelError, PanelResult};
pub use normalizer::{normalize_date, normalize_value, RawValue};
pub use panel::{DateRange, DayRecord, IntermediatePanel, PanelRecord, WidePanel};
pub use pivot::{panel_from_long, panel_to_long, to_long, to_wide, DuplicatePolicy};
pub use services::{ContentFetcher, PanelStore, RawPayload, TableParser};
