//! Remote farm API with local fallback.

pub mod client;
pub mod farm_api;

pub use client::{RemoteClient, RemoteError};
pub use farm_api::FarmApi;
