pub mod client;
pub mod config;
pub mod cursor;
pub mod discover;
pub mod error;
pub mod models;
pub mod pagination;
pub mod streams;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use client::{FirefliesClient, GraphQLTransport};
pub use config::TapConfig;
pub use error::FirefliesError;
pub use streams::StreamKind;
pub use sync::{SyncManager, SyncSummary};
