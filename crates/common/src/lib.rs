//! Common types shared across eabkit crates.

pub mod ids;

pub use ids::{IdError, ProjectId, RecordName};
