use crate::db::{Article, Database, Feed};
use crate::error::{Error, Result};

pub const PAGE_SIZE: i64 = 10;

/// Position of one page within a feed's articles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub current_page: i64,
    pub page_count: i64,
    pub article_count: i64,
}

impl PageInfo {
    /// Fails with [`Error::PageOutOfRange`] unless `1 <= page <= page_count`.
    pub fn new(page: i64, article_count: i64) -> Result<Self> {
        let page_count = page_count(article_count);
        if page < 1 || page > page_count {
            return Err(Error::PageOutOfRange { page, page_count });
        }

        Ok(Self {
            current_page: page,
            page_count,
            article_count,
        })
    }

    /// Index of the first article on this page
    pub fn start(&self) -> i64 {
        (self.current_page - 1) * PAGE_SIZE
    }

    /// Index one past the last article on this page
    pub fn end(&self) -> i64 {
        self.article_count.min(self.current_page * PAGE_SIZE)
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.page_count
    }
}

/// A feed never has fewer than one page, even when empty.
pub fn page_count(article_count: i64) -> i64 {
    let pages = (article_count + PAGE_SIZE - 1) / PAGE_SIZE;
    pages.max(1)
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    pub feed: Feed,
    pub info: PageInfo,
    pub articles: Vec<Article>,
}

/// Loads one page of a feed's articles, most recent first.
pub async fn get_page(db: &Database, feed_id: i64, page: i64) -> Result<FeedPage> {
    let feed = db
        .get_feed(feed_id)
        .await?
        .ok_or(Error::FeedNotFound(feed_id))?;

    let article_count = db.get_article_count_for_feed(feed_id).await?;
    let info = PageInfo::new(page, article_count)?;

    let articles = db
        .get_articles_for_feed(feed_id, info.end() - info.start(), info.start())
        .await?;

    Ok(FeedPage {
        feed,
        info,
        articles,
    })
}

pub async fn list_feeds(db: &Database) -> Result<Vec<Feed>> {
    db.get_all_feeds().await
}
