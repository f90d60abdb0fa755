//! Defines routes for listing and media operations.
//!
//! ## Structure
//! - **Listing endpoints**
//!   - `POST   /listings`: create (multipart, `image` part)
//!   - `GET    /listings`: list (supports `city`, `owner`)
//!   - `GET    /listings/{id}`: fetch one
//!   - `PUT    /listings/{id}`: partial update, optional new `image`
//!   - `DELETE /listings/{id}`: delete listing and its image
//!
//! - **Favorites**
//!   - `POST   /listings/{id}/favorites`: add `{"user": uuid}`
//!   - `DELETE /listings/{id}/favorites/{user}`: remove
//!
//! - **Media & operations**
//!   - `GET    /media/{*key}`: images stored by the local backend
//!   - `POST   /admin/reconcile`: sweep orphaned remote objects
//!   - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        listing_handlers::{
            add_favorite, create_listing, delete_listing, get_listing, list_listings,
            reconcile, remove_favorite, update_listing,
        },
        media_handlers::get_media,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Multipart framing and text fields on top of the image itself.
const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Build the router for all listing routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/listings", get(list_listings).post(create_listing))
        .route(
            "/listings/{id}",
            get(get_listing).put(update_listing).delete(delete_listing),
        )
        .route("/listings/{id}/favorites", post(add_favorite))
        .route("/listings/{id}/favorites/{user}", delete(remove_favorite))
        .route("/media/{*key}", get(get_media))
        .route("/admin/reconcile", post(reconcile))
}

/// Routes with state applied and the request body limit sized to uploads.
pub fn app(state: AppState) -> Router {
    let limit = state.uploads.max_bytes.saturating_add(FORM_OVERHEAD_BYTES);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    routes()
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}
