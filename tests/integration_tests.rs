//! Integration tests for the newsstand RSS reader
//!
//! These tests run the full ingestion workflow against a mocked feed server
//! and an on-disk database.

use std::io::Write;
use tempfile::NamedTempFile;

mod common {
    use std::sync::Arc;

    use newsstand::config::FetchConfig;
    use newsstand::db::Database;
    use newsstand::fetcher::Fetcher;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub async fn open_db(db_url: &str) -> Arc<Database> {
        let db = Database::new(db_url).await.unwrap();
        db.initialize().await.unwrap();
        Arc::new(db)
    }

    pub fn create_fetcher(db: Arc<Database>) -> Fetcher {
        Fetcher::new(db, &FetchConfig::default()).unwrap()
    }

    /// RSS document whose item `i` links to `{prefix}/{i}`, newest first.
    pub fn rss_with_items(title: &str, prefix: &str, range: std::ops::RangeInclusive<u32>) -> String {
        let items: String = range
            .map(|i| {
                format!(
                    "<item><title>Article {i}</title><link>{prefix}/{i}</link>\
                     <description>Body {i}</description>\
                     <pubDate>Mon, 09 Dec 2024 {:02}:{:02}:00 GMT</pubDate></item>",
                    23 - i / 60,
                    59 - i % 60
                )
            })
            .collect();

        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title>{items}</channel></rss>"#
        )
    }

    pub async fn serve_at(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }
}

#[cfg(test)]
mod config_integration_tests {
    use super::*;
    use newsstand::config::Config;

    #[test]
    fn test_load_actual_config() {
        let config = Config::load("newsstand.toml");
        assert!(config.is_ok(), "Failed to load newsstand.toml: {:?}", config.err());

        let config = config.unwrap();
        assert!(!config.listen_addr.is_empty());
        assert!(config.fetch.timeout_secs > 0);
    }

    #[test]
    fn test_config_from_file() {
        let toml_content = r#"
            database_url = "sqlite::memory:"
            feeds = ["https://lobste.rs/rss"]
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.feeds, vec!["https://lobste.rs/rss".to_string()]);
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
    }
}

#[cfg(test)]
mod ingestion_integration_tests {
    use super::common::*;
    use newsstand::error::Error;
    use newsstand::pagination::{get_page, list_feeds};
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_add_and_page_through_feed() {
        let server = MockServer::start().await;
        serve_at(
            &server,
            "/rss",
            rss_with_items("Paged Feed", "https://paged.com/a", 1..=25),
        )
        .await;

        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        let fetcher = create_fetcher(db.clone());

        assert!(fetcher.add_feed(&format!("{}/rss", server.uri())).await.unwrap());

        let feeds = list_feeds(&db).await.unwrap();
        assert_eq!(feeds.len(), 1);
        let feed_id = feeds[0].id;

        let page1 = get_page(&db, feed_id, 1).await.unwrap();
        assert_eq!(page1.info.page_count, 3);
        assert_eq!(page1.info.article_count, 25);
        assert_eq!(page1.articles.len(), 10);
        assert_eq!(page1.articles[0].title, "Article 1");
        assert_eq!(page1.articles[9].title, "Article 10");

        let page3 = get_page(&db, feed_id, 3).await.unwrap();
        assert_eq!(page3.articles.len(), 5);
        assert_eq!(page3.articles[0].title, "Article 21");
        assert_eq!(page3.articles[4].title, "Article 25");

        let page4 = get_page(&db, feed_id, 4).await;
        assert!(matches!(page4, Err(Error::PageOutOfRange { .. })));
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_articles() {
        let server = MockServer::start().await;
        serve_at(
            &server,
            "/rss",
            rss_with_items("Growing", "https://grow.com/a", 4..=10),
        )
        .await;

        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        let fetcher = create_fetcher(db.clone());
        fetcher.add_feed(&format!("{}/rss", server.uri())).await.unwrap();
        let feed_id = list_feeds(&db).await.unwrap()[0].id;

        // Source now has three newer articles, and has dropped the oldest ones
        server.reset().await;
        serve_at(
            &server,
            "/rss",
            rss_with_items("Growing", "https://grow.com/a", 1..=6),
        )
        .await;

        let added = fetcher.refresh_feed(feed_id).await.unwrap();
        assert_eq!(added, 3);

        let page = get_page(&db, feed_id, 1).await.unwrap();
        assert_eq!(page.info.article_count, 10);
        assert_eq!(page.articles[0].title, "Article 1");
        assert!(page.articles.iter().all(|a| a.feed_id == feed_id));

        // A second refresh has nothing left to add
        assert_eq!(fetcher.refresh_feed(feed_id).await.unwrap(), 0);
        assert_eq!(db.get_article_count_for_feed(feed_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_existing_articles() {
        let server = MockServer::start().await;
        serve_at(
            &server,
            "/rss",
            rss_with_items("Flaky", "https://flaky.com/a", 1..=3),
        )
        .await;

        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        let fetcher = create_fetcher(db.clone());
        fetcher.add_feed(&format!("{}/rss", server.uri())).await.unwrap();
        let feed_id = list_feeds(&db).await.unwrap()[0].id;

        server.reset().await;
        serve_at(&server, "/rss", "<<<broken".to_string()).await;

        let result = fetcher.refresh_feed(feed_id).await;
        assert!(matches!(result, Err(Error::Parse(_))));
        assert_eq!(db.get_article_count_for_feed(feed_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_article_urls_unique_across_feeds() {
        let server = MockServer::start().await;
        serve_at(
            &server,
            "/first",
            rss_with_items("First", "https://shared.com/a", 1..=5),
        )
        .await;
        serve_at(
            &server,
            "/second",
            rss_with_items("Second", "https://shared.com/a", 3..=8),
        )
        .await;

        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        let fetcher = create_fetcher(db.clone());

        assert!(fetcher.add_feed(&format!("{}/first", server.uri())).await.unwrap());
        assert!(fetcher.add_feed(&format!("{}/second", server.uri())).await.unwrap());

        let feeds = list_feeds(&db).await.unwrap();
        assert_eq!(db.get_article_count_for_feed(feeds[0].id).await.unwrap(), 5);
        // Only articles 6..=8 are new to the store
        assert_eq!(db.get_article_count_for_feed(feeds[1].id).await.unwrap(), 3);
    }
}

#[cfg(test)]
mod persistence_tests {
    use super::common::*;
    use newsstand::db::Database;
    use newsstand::pagination::{get_page, list_feeds};
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_database_persistence() {
        let server = MockServer::start().await;
        serve_at(
            &server,
            "/rss",
            rss_with_items("Persistent Feed", "https://persist.com/a", 1..=2),
        )
        .await;

        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        {
            let db = open_db(&db_url).await;
            let fetcher = create_fetcher(db.clone());
            fetcher.add_feed(&format!("{}/rss", server.uri())).await.unwrap();
        }

        // Reopen database and verify data persists
        {
            let db = Database::new(&db_url).await.unwrap();

            let feeds = list_feeds(&db).await.unwrap();
            assert_eq!(feeds.len(), 1);
            assert_eq!(feeds[0].title, "Persistent Feed");

            let page = get_page(&db, feeds[0].id, 1).await.unwrap();
            assert_eq!(page.articles.len(), 2);
            assert_eq!(page.articles[0].published, "Mon, 09 Dec 2024 23:58:00 GMT");
            assert_eq!(
                page.articles[0].parsed_time.as_deref(),
                Some("2024-12-09T23:58:00Z")
            );
        }
    }
}
