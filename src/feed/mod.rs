//! Feed fetching, parsing, merging and Atom output.
//!
//! The pipeline for one aggregation:
//!
//! - [`fetcher`] resolves each URL to raw bytes, from the cache when fresh
//! - [`parser`] turns bytes into validated [`Entry`] records via `feed-rs`
//! - [`aggregator`] runs fetch+parse concurrently and merges newest first
//! - [`emitter`] writes the merged feed as Atom
//!
//! # Example
//!
//! ```ignore
//! use hybridfeed::cache::CacheStore;
//! use hybridfeed::feed::{Aggregator, FeedFetcher, DEFAULT_MAX_AGE};
//!
//! let fetcher = FeedFetcher::new(reqwest::Client::new(), CacheStore::new("./cache")?);
//! let atom = Aggregator::new(fetcher)
//!     .generate(&["https://example.com/rss"], DEFAULT_MAX_AGE)
//!     .await?;
//! ```

mod aggregator;
mod emitter;
mod fetcher;
mod parser;

pub use aggregator::{
    feed_id, merge_entries, AggregateError, AggregateFeed, Aggregator, HYBRID_FEED_TITLE,
};
pub use emitter::{write_atom, EmitError};
pub use fetcher::{FeedFetcher, FetchError, FetchRequest, DEFAULT_MAX_AGE};
pub use parser::{parse_feed, Entry, ParseError, ParsedFeed};
