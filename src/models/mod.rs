//! Core data models for the listing media service.
//!
//! Listings are persisted through `sqlx` and serialize as JSON via `serde`;
//! the media types describe files on their way to and from the remote store.

pub mod listing;
pub mod media;
