//! Merge several RSS/Atom feeds into one chronologically ordered Atom feed.

pub mod cache;
pub mod config;
pub mod feed;
pub mod util;
