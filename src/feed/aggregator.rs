use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

use super::emitter::{write_atom, EmitError};
use super::fetcher::{FeedFetcher, FetchError, FetchRequest};
use super::parser::{parse_feed, Entry, ParseError, ParsedFeed};

/// Title of every merged feed.
pub const HYBRID_FEED_TITLE: &str = "Hybrid Feed";

/// Errors that abort an aggregation. There is no partial output.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to parse {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    /// An entry has neither an updated nor a published timestamp.
    #[error("Entry '{guid}' has no updated or published timestamp")]
    MissingTimestamp { guid: String },

    /// The blocking parse task panicked or was cancelled.
    #[error("Parse worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// The merged result of one aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateFeed {
    /// `feed-<sha256 hex>` of the input URL set.
    pub id: String,
    pub title: String,
    /// Newest entry timestamp, or generation time for an empty feed.
    pub updated: DateTime<Utc>,
    /// Newest first.
    pub entries: Vec<Entry>,
}

/// Computes the identity of the feed produced for `urls`.
///
/// Depends only on the set of distinct URLs: order and repetition are
/// ignored, content is never consulted.
pub fn feed_id<S: AsRef<str>>(urls: &[S]) -> String {
    let distinct: BTreeSet<&str> = urls.iter().map(|url| url.as_ref()).collect();
    let joined = distinct.into_iter().collect::<Vec<_>>().join("\n");
    let hash = Sha256::digest(joined.as_bytes());
    format!("feed-{:x}", hash)
}

/// Flattens `feeds` in order and sorts entries newest first.
///
/// The key is `updated`, falling back to `published`. The sort is stable,
/// so entries with equal keys keep their flattened order.
///
/// # Errors
///
/// [`AggregateError::MissingTimestamp`] for the first entry with no key.
pub fn merge_entries(feeds: Vec<ParsedFeed>) -> Result<Vec<Entry>, AggregateError> {
    let mut keyed = feeds
        .into_iter()
        .flat_map(|feed| feed.entries)
        .map(|entry| match entry.sort_key() {
            Some(key) => Ok((key, entry)),
            None => Err(AggregateError::MissingTimestamp { guid: entry.guid }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    keyed.sort_by(|(a, _), (b, _)| b.cmp(a));

    Ok(keyed.into_iter().map(|(_, entry)| entry).collect())
}

/// Fetches, parses and merges several feeds into one.
#[derive(Debug, Clone)]
pub struct Aggregator {
    fetcher: FeedFetcher,
    max_concurrency: Option<usize>,
}

impl Aggregator {
    /// Creates an aggregator with unbounded fan-out.
    pub fn new(fetcher: FeedFetcher) -> Self {
        Self {
            fetcher,
            max_concurrency: None,
        }
    }

    /// Caps the number of feeds fetched at once. `None` fetches all URLs
    /// concurrently.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.map(|n| n.max(1));
        self
    }

    /// Builds the merged feed for `urls`.
    ///
    /// Every URL is fetched and parsed independently, duplicates included.
    /// The first failure aborts the aggregation; fetches still in flight are
    /// dropped with the stream. Fetches that completed before the failure
    /// keep their cache writes.
    pub async fn aggregate<S: AsRef<str>>(
        &self,
        urls: &[S],
        max_age: Duration,
    ) -> Result<AggregateFeed, AggregateError> {
        let id = feed_id(urls);
        let limit = self.max_concurrency.unwrap_or(urls.len()).max(1);

        tracing::info!(
            feed_id = %id,
            feeds = urls.len(),
            concurrency = limit,
            max_age_secs = max_age.as_secs(),
            "Aggregating feeds"
        );

        let mut indexed: Vec<(usize, ParsedFeed)> = stream::iter(urls.iter().enumerate())
            .map(|(index, url)| {
                let request = FetchRequest::new(url.as_ref(), max_age);
                async move {
                    let feed = self.fetch_and_parse(request).await?;
                    Ok::<_, AggregateError>((index, feed))
                }
            })
            .buffer_unordered(limit)
            .try_collect()
            .await?;

        // Completion order is arbitrary; restore input order before merging
        indexed.sort_by_key(|(index, _)| *index);
        let entries = merge_entries(indexed.into_iter().map(|(_, feed)| feed).collect())?;

        let updated = entries
            .first()
            .and_then(Entry::sort_key)
            .unwrap_or_else(Utc::now);

        tracing::info!(feed_id = %id, entries = entries.len(), "Merged feeds");

        Ok(AggregateFeed {
            id,
            title: HYBRID_FEED_TITLE.to_string(),
            updated,
            entries,
        })
    }

    /// Aggregates `urls` and serializes the result as Atom.
    pub async fn generate<S: AsRef<str>>(
        &self,
        urls: &[S],
        max_age: Duration,
    ) -> Result<String, AggregateError> {
        let feed = self.aggregate(urls, max_age).await?;
        Ok(write_atom(&feed)?)
    }

    async fn fetch_and_parse(&self, request: FetchRequest) -> Result<ParsedFeed, AggregateError> {
        let bytes = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|source| AggregateError::Fetch {
                url: request.url.clone(),
                source,
            })?;

        let parsed = tokio::task::spawn_blocking(move || parse_feed(&bytes)).await?;
        let feed = parsed.map_err(|source| AggregateError::Parse {
            url: request.url.clone(),
            source,
        })?;

        tracing::debug!(url = %request.url, entries = feed.entries.len(), "Parsed feed");
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn entry(guid: &str, updated: Option<DateTime<Utc>>, published: Option<DateTime<Utc>>) -> Entry {
        Entry {
            title: guid.to_uppercase(),
            guid: guid.to_string(),
            link: None,
            published,
            updated,
        }
    }

    fn feed(entries: Vec<Entry>) -> ParsedFeed {
        ParsedFeed {
            title: None,
            entries,
        }
    }

    fn guids(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.guid.as_str()).collect()
    }

    #[test]
    fn test_feed_id_matches_sha256_of_sorted_urls() {
        let expected = format!("feed-{:x}", Sha256::digest(b"A\nB"));
        assert_eq!(feed_id(&["A", "B"]), expected);
        assert_eq!(feed_id(&["B", "A"]), expected);
    }

    #[test]
    fn test_feed_id_ignores_duplicates() {
        assert_eq!(feed_id(&["A", "B", "A"]), feed_id(&["A", "B"]));
    }

    #[test]
    fn test_feed_id_single_and_empty() {
        assert_eq!(feed_id(&["A"]), format!("feed-{:x}", Sha256::digest(b"A")));
        let none: [&str; 0] = [];
        assert_eq!(feed_id(&none), format!("feed-{:x}", Sha256::digest(b"")));
    }

    #[test]
    fn test_feed_id_is_lowercase_hex() {
        let id = feed_id(&["https://example.com/rss"]);
        let hex = id.strip_prefix("feed-").unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    proptest! {
        #[test]
        fn prop_feed_id_order_independent(
            urls in proptest::collection::btree_set("[a-z]{1,12}", 1..8),
            seed in any::<u64>(),
        ) {
            let sorted: Vec<String> = urls.into_iter().collect();
            let mut shuffled = sorted.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();
            prop_assert_eq!(feed_id(&sorted), feed_id(&shuffled));
        }

        #[test]
        fn prop_feed_id_changes_with_set(
            urls in proptest::collection::btree_set("[a-z]{1,12}", 1..8),
            extra in "[A-Z]{1,12}",
        ) {
            let base: Vec<String> = urls.into_iter().collect();
            let mut grown = base.clone();
            grown.push(extra);
            prop_assert_ne!(feed_id(&base), feed_id(&grown));
        }
    }

    #[test]
    fn test_merge_sorts_descending_across_feeds() {
        let a = feed(vec![
            entry("a3", Some(ts(3, 0)), None),
            entry("a1", Some(ts(1, 0)), None),
        ]);
        let b = feed(vec![entry("b2", None, Some(ts(2, 0)))]);

        let merged = merge_entries(vec![a, b]).unwrap();
        assert_eq!(guids(&merged), vec!["a3", "b2", "a1"]);
    }

    #[test]
    fn test_merge_prefers_updated_over_published() {
        let a = feed(vec![entry("late-published", Some(ts(1, 0)), Some(ts(9, 0)))]);
        let b = feed(vec![entry("mid", Some(ts(5, 0)), None)]);

        let merged = merge_entries(vec![a, b]).unwrap();
        assert_eq!(guids(&merged), vec!["mid", "late-published"]);
    }

    #[test]
    fn test_merge_is_stable_on_ties() {
        let a = feed(vec![
            entry("a-first", Some(ts(2, 0)), None),
            entry("a-second", None, Some(ts(2, 0))),
        ]);
        let b = feed(vec![
            entry("b-newer", Some(ts(3, 0)), None),
            entry("b-tie", Some(ts(2, 0)), None),
        ]);

        let merged = merge_entries(vec![a, b]).unwrap();
        assert_eq!(guids(&merged), vec!["b-newer", "a-first", "a-second", "b-tie"]);
    }

    #[test]
    fn test_merge_rejects_missing_timestamp() {
        let a = feed(vec![entry("dated", Some(ts(1, 0)), None)]);
        let b = feed(vec![entry("undated", None, None)]);

        match merge_entries(vec![a, b]) {
            Err(AggregateError::MissingTimestamp { guid }) => assert_eq!(guid, "undated"),
            other => panic!("Expected MissingTimestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_entries(Vec::new()).unwrap().is_empty());
        assert!(merge_entries(vec![feed(Vec::new())]).unwrap().is_empty());
    }

    #[test]
    fn test_merge_keeps_colliding_guids() {
        let a = feed(vec![entry("same", Some(ts(1, 0)), None)]);
        let b = feed(vec![entry("same", Some(ts(2, 0)), None)]);

        let merged = merge_entries(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 2);
    }
}
