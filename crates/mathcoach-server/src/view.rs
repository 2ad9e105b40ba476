//! Embedded single-page client.
//!
//! The page posts to `/api/math-problem`, keeps the problem and session id
//! in memory, and shows a generic retry message whenever a request fails.

use axum::response::Html;

/// The client page served at `/`.
pub const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Handler for `GET /`.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
