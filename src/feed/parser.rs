use chrono::{DateTime, Utc};
use feed_rs::parser;
use thiserror::Error;

/// Errors raised while turning raw feed bytes into entries.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not a feed `feed-rs` understands (RSS 0.9x/1.0/2.0, Atom, JSON Feed).
    #[error("Malformed feed: {0}")]
    Malformed(String),
    /// An entry carries no usable identifier.
    #[error("Entry #{index} has no guid")]
    MissingGuid { index: usize },
    /// An entry carries no title.
    #[error("Entry '{guid}' has no title")]
    MissingTitle { guid: String },
}

/// One item of a source feed, normalized across RSS and Atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    /// Never empty; checked by [`parse_feed`].
    pub guid: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl Entry {
    /// Ordering timestamp: `updated`, falling back to `published`.
    pub fn sort_key(&self) -> Option<DateTime<Utc>> {
        self.updated.or(self.published)
    }
}

/// A parsed source feed. Entries keep their document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<Entry>,
}

/// Parses an RSS or Atom document.
///
/// The dialect is detected by `feed-rs`. Every returned entry has a
/// non-empty guid and a title; timestamps stay optional and are checked
/// when entries are merged.
///
/// `feed-rs` normally invents ids for entries that lack one (a hash for
/// RSS, a random UUID for Atom). That is disabled here so a missing guid
/// surfaces as [`ParseError::MissingGuid`] instead of an unstable id.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| ParseError::Malformed(e.to_string()))?;

    let entries = feed
        .entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let guid = entry.id.trim().to_string();
            if guid.is_empty() {
                return Err(ParseError::MissingGuid { index });
            }

            let title = entry
                .title
                .map(|t| t.content)
                .ok_or_else(|| ParseError::MissingTitle { guid: guid.clone() })?;

            Ok(Entry {
                title,
                guid,
                link: entry.links.first().map(|l| l.href.clone()),
                published: entry.published,
                updated: entry.updated,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        entries,
    })
}
