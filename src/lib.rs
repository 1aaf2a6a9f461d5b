//! Newsstand - A small RSS feed reader
//!
//! Feeds are subscribed by URL, refreshed on demand, and their articles are
//! served as numbered pages, most recent first.

pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod pagination;
pub mod routes;
