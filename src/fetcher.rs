use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::db::Database;
use crate::error::{Error, Result};

/// A feed as read from its source, before anything is stored.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub url: String,
    pub articles: Vec<ParsedArticle>,
}

#[derive(Debug, Clone)]
pub struct ParsedArticle {
    pub url: String,
    pub title: String,
    pub description: String,
    pub published: String,
    pub parsed_time: Option<DateTime<Utc>>,
}

pub struct Fetcher {
    client: Client,
    db: Arc<Database>,
}

impl Fetcher {
    pub fn new(db: Arc<Database>, config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client, db })
    }

    /// Downloads and parses the feed at `url`. Nothing is stored.
    pub async fn parse_feed_from_source(&self, url: &str) -> Result<ParsedFeed> {
        let source = Url::parse(url).map_err(|_| Error::InvalidFeedUrl(url.to_string()))?;
        if !matches!(source.scheme(), "http" | "https") {
            return Err(Error::InvalidFeedUrl(url.to_string()));
        }

        debug!("Fetching feed: {}", url);
        let response = self.client.get(source).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        Self::parse_feed(url, &bytes)
    }

    /// Subscribes to the feed at `url`, storing it with all of its current
    /// articles. Returns `false` if the url is already subscribed.
    pub async fn add_feed(&self, url: &str) -> Result<bool> {
        let parsed = self.parse_feed_from_source(url).await?;

        match self.db.insert_feed_with_articles(&parsed).await? {
            Some(feed_id) => {
                info!(
                    "Added feed '{}' (id {}) with {} candidate articles",
                    parsed.title,
                    feed_id,
                    parsed.articles.len()
                );
                Ok(true)
            }
            None => {
                info!("Feed already exists: {}", url);
                Ok(false)
            }
        }
    }

    /// Re-reads a stored feed and stores the articles not seen before.
    /// Returns the number of articles added.
    pub async fn refresh_feed(&self, feed_id: i64) -> Result<u64> {
        let feed = self
            .db
            .get_feed(feed_id)
            .await?
            .ok_or(Error::FeedNotFound(feed_id))?;

        info!("Refreshing feed: {} ({})", feed.title, feed.url);
        let parsed = self.parse_feed_from_source(&feed.url).await?;

        let candidate_urls: Vec<String> = parsed.articles.iter().map(|a| a.url.clone()).collect();
        let stored = self.db.existing_article_urls(&candidate_urls).await?;
        let fresh = unseen_articles(parsed.articles, &stored);

        if fresh.is_empty() {
            info!("No new articles for feed '{}'", feed.title);
            return Ok(0);
        }

        let added = self.db.insert_articles(feed.id, &fresh).await?;
        info!("Added {} articles to feed '{}'", added, feed.title);
        Ok(added)
    }

    pub fn parse_feed(url: &str, bytes: &[u8]) -> Result<ParsedFeed> {
        // feed_rs normalises dates, the raw text is kept separately
        let raw_dates = Self::extract_dates_from_xml(bytes);

        let parsed = parser::parse(bytes)?;

        let title = parsed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| url.to_string());

        let articles = parsed
            .entries
            .into_iter()
            .filter_map(|entry| Self::article_from_entry(entry, &raw_dates))
            .collect();

        Ok(ParsedFeed {
            title,
            url: url.to_string(),
            articles,
        })
    }

    fn article_from_entry(entry: Entry, raw_dates: &HashMap<String, String>) -> Option<ParsedArticle> {
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_else(|| "Untitled".to_string());

        let url = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
            .or_else(|| entry.links.first())
            .map(|l| l.href.trim().to_string())
            .unwrap_or_default();

        if url.is_empty() {
            warn!("Skipping entry with no link: {}", title);
            return None;
        }

        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();

        let normalised = entry.published.or(entry.updated);

        let published = raw_dates
            .get(&url)
            .cloned()
            .or_else(|| normalised.map(|dt| dt.to_rfc2822()))
            .unwrap_or_default();

        let parsed_time = normalised.or_else(|| Self::parse_published(&published));

        Some(ParsedArticle {
            url,
            title,
            description,
            published,
            parsed_time,
        })
    }

    /// Parses an RFC 2822 or RFC 3339 timestamp into UTC.
    pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Maps each item link to the literal text of its date element: `<pubDate>`
    /// or `<dc:date>` for RSS, `<published>` or `<updated>` for Atom.
    ///
    /// Text is entity-decoded and CDATA is unwrapped, so keys match the links
    /// feed_rs reports.
    pub fn extract_dates_from_xml(xml_bytes: &[u8]) -> HashMap<String, String> {
        let mut dates = HashMap::new();
        let mut reader = Reader::from_reader(xml_bytes);
        let mut buf = Vec::new();

        let mut depth: usize = 0;
        // Depth of the open <item>/<entry> and what it has collected so far
        let mut item: Option<(usize, RawItem)> = None;
        let mut field: Option<ItemField> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    let name = e.name();
                    if item.is_none() {
                        if matches!(name.as_ref(), b"item" | b"entry") {
                            item = Some((depth, RawItem::default()));
                        }
                    } else if let Some((item_depth, raw)) = item.as_mut() {
                        if depth == *item_depth + 1 {
                            field = match name.as_ref() {
                                b"link" => match alternate_href(&e) {
                                    Some(href) => {
                                        raw.link.get_or_insert(href);
                                        None
                                    }
                                    None => Some(ItemField::Link),
                                },
                                other => ItemField::from_name(other),
                            };
                        }
                    }
                }
                Ok(Event::Empty(e)) => {
                    if let Some((item_depth, raw)) = item.as_mut() {
                        if depth == *item_depth && e.name().as_ref() == b"link" {
                            if let Some(href) = alternate_href(&e) {
                                raw.link.get_or_insert(href);
                            }
                        }
                    }
                }
                Ok(Event::Text(e)) => {
                    if let (Some(field), Some((_, raw))) = (field, item.as_mut()) {
                        let text = e
                            .unescape()
                            .map(|t| t.into_owned())
                            .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                        raw.push(field, &text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let (Some(field), Some((_, raw))) = (field, item.as_mut()) {
                        raw.push(field, &String::from_utf8_lossy(&e));
                    }
                }
                Ok(Event::End(_)) => {
                    field = None;
                    if matches!(item, Some((item_depth, _)) if item_depth == depth) {
                        if let Some((link, date)) = item.take().and_then(|(_, raw)| raw.finish()) {
                            // feed_rs may hand back the link in normalised form
                            if let Ok(normalised) = Url::parse(&link) {
                                let normalised = normalised.to_string();
                                if normalised != link {
                                    dates.insert(normalised, date.clone());
                                }
                            }
                            dates.insert(link, date);
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                // Malformed documents are reported by feed_rs
                Ok(Event::Eof) | Err(_) => break,
                _ => {}
            }
            buf.clear();
        }

        dates
    }
}

#[derive(Debug, Clone, Copy)]
enum ItemField {
    Link,
    PubDate,
    DcDate,
    Published,
    Updated,
}

impl ItemField {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"link" => Some(Self::Link),
            b"pubDate" => Some(Self::PubDate),
            b"dc:date" => Some(Self::DcDate),
            b"published" => Some(Self::Published),
            b"updated" => Some(Self::Updated),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RawItem {
    link: Option<String>,
    link_text: String,
    pub_date: String,
    dc_date: String,
    published: String,
    updated: String,
}

impl RawItem {
    fn push(&mut self, field: ItemField, text: &str) {
        let target = match field {
            ItemField::Link => &mut self.link_text,
            ItemField::PubDate => &mut self.pub_date,
            ItemField::DcDate => &mut self.dc_date,
            ItemField::Published => &mut self.published,
            ItemField::Updated => &mut self.updated,
        };
        target.push_str(text);
    }

    fn finish(self) -> Option<(String, String)> {
        let link_text = self.link_text.trim().to_string();
        let link = self.link.or((!link_text.is_empty()).then_some(link_text))?;

        let date = [self.pub_date, self.dc_date, self.published, self.updated]
            .into_iter()
            .map(|d| d.trim().to_string())
            .find(|d| !d.is_empty())?;

        Some((link, date))
    }
}

/// `href` of an Atom link that points at the entry itself
fn alternate_href(e: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    let mut alternate = true;

    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"href" => href = attr.unescape_value().ok().map(|v| v.into_owned()),
            b"rel" => alternate = attr.value.as_ref() == b"alternate",
            _ => {}
        }
    }

    if alternate {
        href
    } else {
        None
    }
}

/// Keeps the candidates whose url is neither in `stored` nor repeated
/// earlier in `candidates`.
pub fn unseen_articles(candidates: Vec<ParsedArticle>, stored: &HashSet<String>) -> Vec<ParsedArticle> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|a| !stored.contains(&a.url) && seen.insert(a.url.clone()))
        .collect()
}
