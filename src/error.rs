use thiserror::Error;

/// Errors returned by the feed store, fetcher and pager.
#[derive(Debug, Error)]
pub enum Error {
    /// No feed is stored under this id.
    #[error("feed {0} not found")]
    FeedNotFound(i64),
    /// Requested page is below 1 or past the last page.
    #[error("page {page} is out of range (feed has {page_count} pages)")]
    PageOutOfRange { page: i64, page_count: i64 },
    /// Feed url could not be parsed or is not http(s).
    #[error("invalid feed url: {0}")]
    InvalidFeedUrl(String),
    /// Feed source could not be downloaded.
    #[error("failed to fetch feed: {0}")]
    Fetch(#[from] reqwest::Error),
    /// Downloaded document is not a valid RSS or Atom feed.
    #[error("failed to parse feed: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
