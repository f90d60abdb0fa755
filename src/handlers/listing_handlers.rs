//! HTTP handlers for listings. Request decoding lives in `upload`; all media
//! and persistence work is delegated to `ListingService`.

use crate::{
    errors::AppError,
    models::listing::{Listing, ListingFilter, ListingForm},
    services::reconcile_service::ReconcileReport,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query params accepted by `GET /listings`.
#[derive(Debug, Deserialize)]
pub struct ListListingsQuery {
    pub city: Option<String>,
    pub owner: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct FavoriteReq {
    pub user: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// `POST /listings`: create a listing from a multipart form.
pub async fn create_listing(
    State(state): State<AppState>,
    form: ListingForm,
) -> Result<impl IntoResponse, AppError> {
    let listing = state.listings.create(form).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// `GET /listings`: list listings, optionally filtered by `city` and `owner`.
pub async fn list_listings(
    State(state): State<AppState>,
    Query(q): Query<ListListingsQuery>,
) -> Result<Json<Vec<Listing>>, AppError> {
    let filter = ListingFilter {
        city: q.city.filter(|c| !c.trim().is_empty()),
        owner: q.owner,
    };
    Ok(Json(state.listings.list(&filter).await?))
}

/// `GET /listings/{id}`
pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Listing>, AppError> {
    Ok(Json(state.listings.get(id).await?))
}

/// `PUT /listings/{id}`: partial update; an `image` part replaces the image.
///
/// The form is decoded and any image staged before the id is looked up, so a
/// bad form on an unknown id answers 400 rather than 404.
pub async fn update_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    form: ListingForm,
) -> Result<Json<Listing>, AppError> {
    Ok(Json(state.listings.replace(id, form).await?))
}

/// `DELETE /listings/{id}`: delete the listing and its image.
pub async fn delete_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    state.listings.delete(id).await?;
    Ok(Json(MessageResponse {
        message: "Listing deleted".into(),
    }))
}

/// `POST /listings/{id}/favorites` with `{"user": "<uuid>"}`.
pub async fn add_favorite(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FavoriteReq>,
) -> Result<Json<Listing>, AppError> {
    Ok(Json(state.listings.add_favorite(id, req.user).await?))
}

/// `DELETE /listings/{id}/favorites/{user}`
pub async fn remove_favorite(
    State(state): State<AppState>,
    Path((id, user)): Path<(Uuid, Uuid)>,
) -> Result<Json<Listing>, AppError> {
    Ok(Json(state.listings.remove_favorite(id, user).await?))
}

/// `POST /admin/reconcile`: run one orphan sweep now.
pub async fn reconcile(State(state): State<AppState>) -> Result<Json<ReconcileReport>, AppError> {
    Ok(Json(state.reconciler.run_once().await?))
}
