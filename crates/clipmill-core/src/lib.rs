//! clipmill-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for the clipmill conversion
//! stack, providing type-safe identifiers, a unified error type, the
//! processing-mode enum, application configuration, and a broadcast event
//! bus the presentation layer can subscribe to.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod mode;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use mode::ProcessingMode;
