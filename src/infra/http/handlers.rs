use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::ContentItem;

use super::EditorState;
use super::error::EditorError;

const EDITOR_JS: &str = include_str!("../../../assets/stanza.js");
const EDITOR_CSS: &str = include_str!("../../../assets/stanza.css");

// Ten days; the assets only change with the crate version.
const STATIC_CACHE_CONTROL: &str = "public, max-age=864000";

pub async fn editor_js() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, STATIC_CACHE_CONTROL),
        ],
        EDITOR_JS,
    )
}

pub async fn editor_css() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/css; charset=utf-8"),
            (header::CACHE_CONTROL, STATIC_CACHE_CONTROL),
        ],
        EDITOR_CSS,
    )
}

pub async fn export_content(
    State(state): State<EditorState>,
) -> Result<Json<Vec<ContentItem>>, EditorError> {
    Ok(Json(state.store.get_all_content().await?))
}

/// One entry of the save payload: `{"<id>": {"content": "..."}}`. Entries
/// without a content field are ignored, matching what the widget sends for
/// untouched nodes.
#[derive(Deserialize)]
pub struct SaveEntry {
    #[serde(default)]
    content: Option<String>,
}

pub async fn save_content(
    State(state): State<EditorState>,
    Json(body): Json<BTreeMap<String, SaveEntry>>,
) -> Result<Json<Value>, EditorError> {
    let pairs: Vec<(String, String)> = body
        .into_iter()
        .filter_map(|(id, entry)| entry.content.map(|content| (id, content)))
        .collect();

    let count = pairs.len();
    if count > 0 {
        state.store.set_by_id(&pairs).await?;
        info!(items = count, "saved edited content");
    }
    Ok(Json(json!({ "message": format!("saved {count} items") })))
}

pub async fn import_content(
    State(state): State<EditorState>,
    Json(items): Json<Vec<ContentItem>>,
) -> Result<Json<Value>, EditorError> {
    let count = items.len();
    state.store.set(&items).await?;
    info!(items = count, "imported content items");
    Ok(Json(json!({ "message": "ok" })))
}

pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
