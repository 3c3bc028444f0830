//! Per-collection download manifests.
//!
//! A collection directory holds one authoritative CSV snapshot named after
//! its [`Generation`]. [`ManifestStore`] reads it (sniffing the text
//! encoding), merges new enumeration results into it and records download
//! progress, always by writing a complete new snapshot and renaming it into
//! place.

mod codec;
mod encoding;
pub mod error;
mod generation;
mod models;
pub mod path;
pub mod pubdate;
mod store;

pub use crate::generation::Generation;
pub use crate::models::{ItemFields, Manifest, ManifestItem, Stats, Status};
pub use crate::path::validate as validate_path;
pub use crate::store::ManifestStore;
