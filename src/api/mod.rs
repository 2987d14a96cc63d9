//! HTTP request pipeline for the BlockTrade platform API.
//!
//! This module provides the `ApiClient` used by every feature surface:
//! JSON-over-HTTPS verbs with bearer authentication, retry of transient
//! failures with exponential backoff, and transparent single-flight token
//! refresh on 401.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiErrorBody, ApiResponse};
pub use error::ApiError;
