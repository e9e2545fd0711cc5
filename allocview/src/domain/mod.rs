//! Domain model for allocview
//!
//! Error types shared across the collector layers.

pub mod errors;

pub use errors::{ExportError, SessionError, SymbolError, TuiError};
