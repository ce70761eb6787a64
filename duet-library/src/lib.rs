//! Track library for Duet - decoding, annotation storage and configuration

mod config;
mod loader;
mod store;

pub use config::Config;
pub use loader::{MediaSource, TrackLoader};
pub use store::{AnnotationCache, CacheError};
