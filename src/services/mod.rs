//! Domain services: the listing manager, its storage seams and helpers.

pub mod cloudinary_store;
pub mod keyed_lock;
pub mod listing_repository;
pub mod listing_service;
pub mod local_store;
pub mod media_store;
pub mod reconcile_service;
pub mod saga;
