//! Vestro API access.
//!
//! This module provides the HTTP client and the paginated category fetcher.

pub mod client;
pub mod pager;

pub use client::{ClientSettings, RemoteClient};
pub use pager::FetchFilter;
