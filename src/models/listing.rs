//! Represents a listing and the image reference embedded in it.

use crate::models::media::StagedFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Location of an image held by the remote media store.
///
/// Both halves are produced together by a single successful upload and are
/// always replaced together.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaReference {
    /// Externally resolvable URL of the stored image.
    pub url: String,

    /// Opaque handle the store uses to address (and delete) the object.
    #[serde(rename = "cloudinary_id")]
    pub remote_id: String,
}

/// A persisted listing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Identifier generated when the listing is created.
    #[serde(rename = "_id")]
    pub id: Uuid,

    pub street_address: String,

    pub city: String,

    /// Asking price, never negative.
    pub price: f64,

    /// Floor area, never negative.
    pub size: f64,

    /// User that owns the listing.
    pub owner: Option<Uuid>,

    /// Users that favorited the listing.
    pub favorited_by: BTreeSet<Uuid>,

    /// The listing's image, if it has one.
    pub image: Option<MediaReference>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Scalar fields as submitted by a client. Every field is optional here;
/// create and update validate them differently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFields {
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub owner: Option<Uuid>,
}

/// Decoded listing request: scalar fields plus the staged image, if any.
#[derive(Debug, Default)]
pub struct ListingForm {
    pub fields: ListingFields,
    pub image: Option<StagedFile>,
}

/// Validated fields for a brand-new listing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub street_address: String,
    pub city: String,
    pub price: f64,
    pub size: f64,
    pub owner: Option<Uuid>,
}

/// Validated partial update. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPatch {
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub owner: Option<Uuid>,
}

/// Everything an update writes: the scalar patch and, when a new image was
/// uploaded, its reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingChanges {
    pub patch: ListingPatch,
    pub image: Option<MediaReference>,
}

/// Filter accepted by listing queries.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub city: Option<String>,
    pub owner: Option<Uuid>,
}

impl ListingFields {
    /// Validate for creation: address, city, price and size are required.
    pub fn into_new_listing(self) -> Result<NewListing, String> {
        let street_address = required_text("streetAddress", self.street_address)?;
        let city = required_text("city", self.city)?;
        let price = self
            .price
            .ok_or_else(|| "price is required".to_string())
            .and_then(|value| non_negative("price", value))?;
        let size = self
            .size
            .ok_or_else(|| "size is required".to_string())
            .and_then(|value| non_negative("size", value))?;

        Ok(NewListing {
            street_address,
            city,
            price,
            size,
            owner: self.owner,
        })
    }

    /// Validate for a partial update: only supplied fields are checked.
    pub fn into_patch(self) -> Result<ListingPatch, String> {
        Ok(ListingPatch {
            street_address: self
                .street_address
                .map(|value| required_text("streetAddress", Some(value)))
                .transpose()?,
            city: self
                .city
                .map(|value| required_text("city", Some(value)))
                .transpose()?,
            price: self
                .price
                .map(|value| non_negative("price", value))
                .transpose()?,
            size: self
                .size
                .map(|value| non_negative("size", value))
                .transpose()?,
            owner: self.owner,
        })
    }
}

impl NewListing {
    /// Materialize the listing with its generated id and optional image.
    pub fn into_listing(self, id: Uuid, image: Option<MediaReference>, now: DateTime<Utc>) -> Listing {
        Listing {
            id,
            street_address: self.street_address,
            city: self.city,
            price: self.price,
            size: self.size,
            owner: self.owner,
            favorited_by: BTreeSet::new(),
            image,
            created_at: now,
            updated_at: now,
        }
    }
}

impl ListingPatch {
    pub fn is_empty(&self) -> bool {
        self == &ListingPatch::default()
    }
}

fn required_text(name: &str, value: Option<String>) -> Result<String, String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(format!("{name} is required")),
    }
}

fn non_negative(name: &str, value: f64) -> Result<f64, String> {
    if !value.is_finite() {
        return Err(format!("{name} must be a finite number"));
    }
    if value < 0.0 {
        return Err(format!("{name} must not be negative"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ListingFields {
        ListingFields {
            street_address: Some(" 1 Main St ".into()),
            city: Some("Springfield".into()),
            price: Some(250000.0),
            size: Some(1200.0),
            owner: None,
        }
    }

    #[test]
    fn new_listing_trims_text_fields() {
        let listing = complete().into_new_listing().unwrap();
        assert_eq!(listing.street_address, "1 Main St");
        assert_eq!(listing.city, "Springfield");
    }

    #[test]
    fn new_listing_requires_city() {
        let mut fields = complete();
        fields.city = Some("   ".into());
        assert_eq!(fields.into_new_listing().unwrap_err(), "city is required");
    }

    #[test]
    fn new_listing_rejects_negative_price() {
        let mut fields = complete();
        fields.price = Some(-1.0);
        assert!(fields.into_new_listing().is_err());
    }

    #[test]
    fn new_listing_rejects_nan_size() {
        let mut fields = complete();
        fields.size = Some(f64::NAN);
        assert!(fields.into_new_listing().is_err());
    }

    #[test]
    fn patch_only_checks_supplied_fields() {
        let patch = ListingFields {
            price: Some(10.0),
            ..Default::default()
        }
        .into_patch()
        .unwrap();
        assert_eq!(patch.price, Some(10.0));
        assert!(patch.city.is_none());
        assert!(!patch.is_empty());
    }

    #[test]
    fn patch_rejects_blank_address() {
        let fields = ListingFields {
            street_address: Some(String::new()),
            ..Default::default()
        };
        assert!(fields.into_patch().is_err());
    }

    #[test]
    fn listing_serializes_with_wire_names() {
        let listing = complete().into_new_listing().unwrap().into_listing(
            Uuid::nil(),
            Some(MediaReference {
                url: "https://cdn.example/abc123.jpg".into(),
                remote_id: "abc123".into(),
            }),
            Utc::now(),
        );
        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["_id"], Uuid::nil().to_string());
        assert_eq!(json["streetAddress"], "1 Main St");
        assert_eq!(json["image"]["url"], "https://cdn.example/abc123.jpg");
        assert_eq!(json["image"]["cloudinary_id"], "abc123");
        assert!(json["favoritedBy"].as_array().unwrap().is_empty());
    }
}
