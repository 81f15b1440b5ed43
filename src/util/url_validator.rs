use thiserror::Error;
use url::Url;

/// Errors that can occur when validating a feed URL given on the command line.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a feed URL and returns it unchanged.
///
/// The original string is returned rather than the normalized [`Url`]
/// because cache keys and the feed identity are derived from exactly what
/// the user typed.
///
/// Loopback and private hosts are allowed: feeds served from a local
/// network are a normal use of a personal aggregator.
///
/// # Examples
///
/// ```
/// use hybridfeed::util::parse_feed_url;
///
/// assert_eq!(
///     parse_feed_url("https://example.com/feed.xml").unwrap(),
///     "https://example.com/feed.xml"
/// );
/// assert!(parse_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn parse_feed_url(url_str: &str) -> Result<String, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url_str.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(parse_feed_url("https://example.com/feed.xml").is_ok());
        assert!(parse_feed_url("http://news.example.org").is_ok());
        assert!(parse_feed_url("http://127.0.0.1:8080/rss").is_ok());
    }

    #[test]
    fn test_returns_input_verbatim() {
        // Url would normalize this to "https://example.com/"
        assert_eq!(
            parse_feed_url("https://EXAMPLE.com").unwrap(),
            "https://EXAMPLE.com"
        );
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            parse_feed_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(s)) if s == "file"
        ));
        assert!(parse_feed_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_unparseable() {
        assert!(matches!(
            parse_feed_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
        assert!(parse_feed_url("").is_err());
    }
}
