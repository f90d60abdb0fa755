//! HTTP handlers.

pub mod health_handlers;
pub mod listing_handlers;
pub mod media_handlers;
pub mod upload;
