use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::services::ServeDir;
use tracing::error;

use crate::db::{Database, Feed};
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::pagination::{self, FeedPage};

pub struct AppState {
    pub db: Arc<Database>,
    pub fetcher: Arc<Fetcher>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/feed", get(show_feeds).post(add_feed))
        .route("/feed/:feed_id", get(show_feed))
        .route("/feed/:feed_id/:page", get(show_feed_page))
        .route("/feed_update/:feed_id", get(feed_update))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "feeds.html")]
pub struct FeedsTemplate {
    pub all_feeds: Vec<Feed>,
    /// `None` renders the empty state
    pub selected: Option<FeedPage>,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::FeedNotFound(_) => StatusCode::NOT_FOUND,
            Error::PageOutOfRange { .. } | Error::InvalidFeedUrl(_) => StatusCode::BAD_REQUEST,
            Error::Fetch(_) | Error::Parse(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        (status, format!("Error: {}", self.0)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

// Route handlers
pub async fn root() -> Response {
    found("/feed")
}

pub async fn show_feeds(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let all_feeds = pagination::list_feeds(&state.db).await?;

    Ok(HtmlTemplate(FeedsTemplate {
        all_feeds,
        selected: None,
    }))
}

pub async fn show_feed(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    render_page(&state, feed_id, 1).await
}

pub async fn show_feed_page(
    State(state): State<Arc<AppState>>,
    Path((feed_id, page)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    render_page(&state, feed_id, page).await
}

async fn render_page(
    state: &AppState,
    feed_id: i64,
    page: i64,
) -> Result<HtmlTemplate<FeedsTemplate>, AppError> {
    let selected = pagination::get_page(&state.db, feed_id, page).await?;
    let all_feeds = pagination::list_feeds(&state.db).await?;

    Ok(HtmlTemplate(FeedsTemplate {
        all_feeds,
        selected: Some(selected),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddFeedRequest {
    #[serde(rename = "rss-feed-link")]
    pub rss_feed_link: String,
}

pub async fn add_feed(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddFeedRequest>,
) -> Result<Response, AppError> {
    let added = state.fetcher.add_feed(request.rss_feed_link.trim()).await?;

    if added {
        Ok(found("/feed"))
    } else {
        Ok(StatusCode::ALREADY_REPORTED.into_response())
    }
}

pub async fn feed_update(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<Response, AppError> {
    state.fetcher.refresh_feed(feed_id).await?;
    Ok(found(&format!("/feed/{}", feed_id)))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
