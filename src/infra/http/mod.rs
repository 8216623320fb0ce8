//! The HTTP edit surface.
//!
//! Five routes under a configurable prefix: the editor's static assets
//! (`/js`, `/css`), a JSON dump of every item (`/export`), the bulk
//! id → content save the browser widget posts to (`/save`), and a bulk item
//! import (`/import`). Unknown paths under the prefix return 404 and
//! unsupported methods 405; everything outside the prefix is the embedding
//! application's business — [`mount`] returns a plain [`Router`] for the
//! host to merge.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::application::store::ContentStore;

#[derive(Clone)]
pub struct EditorState {
    pub store: Arc<dyn ContentStore>,
}

/// The editor routes, unprefixed.
pub fn editor_router(store: Arc<dyn ContentStore>) -> Router {
    Router::new()
        .route("/js", get(handlers::editor_js))
        .route("/css", get(handlers::editor_css))
        .route("/export", get(handlers::export_content))
        .route("/save", post(handlers::save_content))
        .route("/import", post(handlers::import_content))
        .fallback(handlers::not_found)
        .with_state(EditorState { store })
}

/// The editor routes nested under `prefix` (e.g. `/stanza`).
pub fn mount(prefix: &str, store: Arc<dyn ContentStore>) -> Router {
    Router::new().nest(prefix, editor_router(store))
}
