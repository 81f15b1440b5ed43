//! Utility functions shared by the binary and the library.
//!
//! - **URL validation**: reject feed URLs that are not http(s) before any work starts

mod url_validator;

pub use url_validator::{parse_feed_url, UrlValidationError};
