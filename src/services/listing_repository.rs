//! Persistence for listings: the [`ListingRepository`] seam and its SQLite
//! implementation.

use crate::models::listing::{Listing, ListingChanges, ListingFilter, MediaReference};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("listing `{id}` has a corrupt row: {reason}")]
    CorruptRow { id: Uuid, reason: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait ListingRepository: Send + Sync {
    /// Insert a new listing and return it as stored.
    async fn create(&self, listing: &Listing) -> RepositoryResult<Listing>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Listing>>;

    /// Apply `changes` to an existing listing. `None` when no such listing.
    async fn update(&self, id: Uuid, changes: &ListingChanges) -> RepositoryResult<Option<Listing>>;

    /// Remove a listing. `false` when no such listing.
    async fn delete_by_id(&self, id: Uuid) -> RepositoryResult<bool>;

    async fn list(&self, filter: &ListingFilter) -> RepositoryResult<Vec<Listing>>;

    /// Record that `user` favorited the listing. `false` when no such listing.
    async fn add_favorite(&self, id: Uuid, user: Uuid) -> RepositoryResult<bool>;

    /// Drop `user` from the listing's favorites. `false` when no such listing.
    async fn remove_favorite(&self, id: Uuid, user: Uuid) -> RepositoryResult<bool>;

    /// Every remote id currently referenced by some listing.
    async fn referenced_remote_ids(&self) -> RepositoryResult<HashSet<String>>;
}

#[derive(FromRow, Debug)]
struct ListingRow {
    id: Uuid,
    street_address: String,
    city: String,
    price: f64,
    size: f64,
    owner_id: Option<Uuid>,
    image_url: Option<String>,
    image_remote_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const LISTING_COLUMNS: &str = "id, street_address, city, price, size, owner_id, \
     image_url, image_remote_id, created_at, updated_at";

impl ListingRow {
    fn into_listing(self, favorited_by: BTreeSet<Uuid>) -> RepositoryResult<Listing> {
        let image = match (self.image_url, self.image_remote_id) {
            (Some(url), Some(remote_id)) => Some(MediaReference { url, remote_id }),
            (None, None) => None,
            _ => {
                return Err(RepositoryError::CorruptRow {
                    id: self.id,
                    reason: "image url and remote id must be set together".into(),
                });
            }
        };

        Ok(Listing {
            id: self.id,
            street_address: self.street_address,
            city: self.city,
            price: self.price,
            size: self.size,
            owner: self.owner_id,
            favorited_by,
            image,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct SqliteListingRepository {
    db: Arc<SqlitePool>,
}

impl SqliteListingRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn favorites_of(&self, id: Uuid) -> RepositoryResult<BTreeSet<Uuid>> {
        let users = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM listing_favorites WHERE listing_id = ?",
        )
        .bind(id)
        .fetch_all(&*self.db)
        .await?;
        Ok(users.into_iter().collect())
    }

    async fn hydrate(&self, row: ListingRow) -> RepositoryResult<Listing> {
        let favorites = self.favorites_of(row.id).await?;
        row.into_listing(favorites)
    }

    async fn exists(&self, id: Uuid) -> RepositoryResult<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl ListingRepository for SqliteListingRepository {
    async fn create(&self, listing: &Listing) -> RepositoryResult<Listing> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "INSERT INTO listings ({LISTING_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {LISTING_COLUMNS}"
        ))
        .bind(listing.id)
        .bind(&listing.street_address)
        .bind(&listing.city)
        .bind(listing.price)
        .bind(listing.size)
        .bind(listing.owner)
        .bind(listing.image.as_ref().map(|i| i.url.clone()))
        .bind(listing.image.as_ref().map(|i| i.remote_id.clone()))
        .bind(listing.created_at)
        .bind(listing.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        for user in &listing.favorited_by {
            sqlx::query("INSERT OR IGNORE INTO listing_favorites (listing_id, user_id) VALUES (?, ?)")
                .bind(listing.id)
                .bind(user)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        row.into_listing(listing.favorited_by.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// Only the supplied columns are written; `updated_at` always moves.
    /// Nothing runs after the commit.
    async fn update(&self, id: Uuid, changes: &ListingChanges) -> RepositoryResult<Option<Listing>> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE listings SET updated_at = ");
        builder.push_bind(Utc::now());

        let patch = &changes.patch;
        if let Some(street_address) = &patch.street_address {
            builder.push(", street_address = ");
            builder.push_bind(street_address);
        }
        if let Some(city) = &patch.city {
            builder.push(", city = ");
            builder.push_bind(city);
        }
        if let Some(price) = patch.price {
            builder.push(", price = ");
            builder.push_bind(price);
        }
        if let Some(size) = patch.size {
            builder.push(", size = ");
            builder.push_bind(size);
        }
        if let Some(owner) = patch.owner {
            builder.push(", owner_id = ");
            builder.push_bind(owner);
        }
        if let Some(image) = &changes.image {
            builder.push(", image_url = ");
            builder.push_bind(&image.url);
            builder.push(", image_remote_id = ");
            builder.push_bind(&image.remote_id);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(format!(" RETURNING {LISTING_COLUMNS}"));

        let mut tx = self.db.begin().await?;
        let Some(row) = builder
            .build_query_as::<ListingRow>()
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let favorites = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM listing_favorites WHERE listing_id = ?",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        row.into_listing(favorites.into_iter().collect()).map(Some)
    }

    async fn delete_by_id(&self, id: Uuid) -> RepositoryResult<bool> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM listing_favorites WHERE listing_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM listings WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &ListingFilter) -> RepositoryResult<Vec<Listing>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {LISTING_COLUMNS} FROM listings WHERE 1 = 1"));
        if let Some(city) = &filter.city {
            builder.push(" AND city = ");
            builder.push_bind(city);
        }
        if let Some(owner) = filter.owner {
            builder.push(" AND owner_id = ");
            builder.push_bind(owner);
        }
        builder.push(" ORDER BY created_at DESC, id ASC");

        let rows: Vec<ListingRow> = builder.build_query_as().fetch_all(&*self.db).await?;
        let mut listings = Vec::with_capacity(rows.len());
        for row in rows {
            listings.push(self.hydrate(row).await?);
        }
        Ok(listings)
    }

    async fn add_favorite(&self, id: Uuid, user: Uuid) -> RepositoryResult<bool> {
        if !self.exists(id).await? {
            return Ok(false);
        }
        sqlx::query("INSERT OR IGNORE INTO listing_favorites (listing_id, user_id) VALUES (?, ?)")
            .bind(id)
            .bind(user)
            .execute(&*self.db)
            .await?;
        Ok(true)
    }

    async fn remove_favorite(&self, id: Uuid, user: Uuid) -> RepositoryResult<bool> {
        if !self.exists(id).await? {
            return Ok(false);
        }
        sqlx::query("DELETE FROM listing_favorites WHERE listing_id = ? AND user_id = ?")
            .bind(id)
            .bind(user)
            .execute(&*self.db)
            .await?;
        Ok(true)
    }

    async fn referenced_remote_ids(&self) -> RepositoryResult<HashSet<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT image_remote_id FROM listings WHERE image_remote_id IS NOT NULL",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(ids.into_iter().collect())
    }
}
