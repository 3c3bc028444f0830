pub mod adapter;
pub mod error;
mod kind;
mod models;

pub use crate::adapter::{CommandSource, RemoteSource};
#[cfg(feature = "mock")]
pub use crate::adapter::{MockResolution, MockResponse, MockSource};
pub use crate::kind::CollectionKind;
pub use crate::models::{Enumeration, ItemState, Listing, RemoteItem, ResolvedItem};
use std::sync::Arc;

pub type SourceHandle = Arc<dyn RemoteSource>;
