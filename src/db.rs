use std::collections::HashSet;

use chrono::SecondsFormat;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::error::Result;
use crate::fetcher::{ParsedArticle, ParsedFeed};

/// Max bound parameters per `IN (...)` lookup
const URL_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Article {
    pub url: String,
    pub feed_id: i64,
    pub title: String,
    pub description: String,
    /// Publication time exactly as the feed wrote it
    pub published: String,
    /// RFC 3339 UTC, absent when the feed's date could not be parsed
    pub parsed_time: Option<String>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` is a separate database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                url TEXT PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                published TEXT NOT NULL,
                parsed_time TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_feed_time
            ON articles(feed_id, parsed_time DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT id, title, url FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT id, title, url FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Stores a feed together with its articles in one transaction.
    ///
    /// Returns `None` without writing anything when a feed with the same url
    /// already exists. Articles whose url is already stored (under any feed)
    /// are skipped.
    pub async fn insert_feed_with_articles(&self, feed: &ParsedFeed) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query("INSERT INTO feeds (title, url) VALUES (?, ?)")
            .bind(&feed.title)
            .bind(&feed.url)
            .execute(&mut *tx)
            .await;

        let feed_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        insert_article_rows(&mut *tx, feed_id, &feed.articles).await?;
        tx.commit().await?;

        Ok(Some(feed_id))
    }

    /// Inserts articles for an existing feed, returning how many rows were added.
    pub async fn insert_articles(&self, feed_id: i64, articles: &[ParsedArticle]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let added = insert_article_rows(&mut *tx, feed_id, articles).await?;
        tx.commit().await?;
        Ok(added)
    }

    /// Returns the subset of `urls` already stored as articles of any feed.
    pub async fn existing_article_urls(&self, urls: &[String]) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();

        for chunk in urls.chunks(URL_BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT url FROM articles WHERE url IN (");
            let mut separated = builder.separated(", ");
            for url in chunk {
                separated.push_bind(url.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            existing.extend(rows.into_iter().map(|(url,)| url));
        }

        Ok(existing)
    }

    pub async fn get_articles_for_feed(
        &self,
        feed_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT url, feed_id, title, description, published, parsed_time
            FROM articles
            WHERE feed_id = ?
            ORDER BY parsed_time DESC NULLS LAST, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(feed_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn get_article_count_for_feed(&self, feed_id: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

async fn insert_article_rows(
    conn: &mut SqliteConnection,
    feed_id: i64,
    articles: &[ParsedArticle],
) -> Result<u64> {
    let mut added = 0;

    for article in articles {
        let parsed_time = article
            .parsed_time
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));

        let result = sqlx::query(
            r#"
            INSERT INTO articles (url, feed_id, title, description, published, parsed_time)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&article.url)
        .bind(feed_id)
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.published)
        .bind(parsed_time)
        .execute(&mut *conn)
        .await?;

        added += result.rows_affected();
    }

    Ok(added)
}
