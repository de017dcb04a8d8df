pub mod client;
pub mod models;
pub mod token;

pub use client::{GvmsApi, GvmsApiClient};
pub use models::{Gmr, MrnSearchResponse};
