//! Background sweep that removes remote objects no listing references.
//!
//! Orphans appear when a compensation fails, when a superseded image could
//! not be deleted, or when an upload completes after its caller timed out.
//! Objects younger than the grace period are skipped so in-flight creates and
//! replaces are never swept out from under their listing.

use crate::services::{
    listing_repository::ListingRepository,
    listing_service::{ListingError, ListingResult},
    media_store::MediaStore,
};
use chrono::Utc;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Remote objects examined.
    pub scanned: usize,
    /// Unreferenced objects still inside the grace period.
    pub skipped_recent: usize,
    pub orphans_deleted: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    repo: Arc<dyn ListingRepository>,
    media: Arc<dyn MediaStore>,
    folder: String,
    grace: Duration,
    remote_timeout: Duration,
    db_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn ListingRepository>,
        media: Arc<dyn MediaStore>,
        folder: impl Into<String>,
        grace: Duration,
        remote_timeout: Duration,
        db_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            media,
            folder: folder.into(),
            grace,
            remote_timeout,
            db_timeout,
        }
    }

    /// One sweep over the configured folder.
    pub async fn run_once(&self) -> ListingResult<ReconcileReport> {
        let objects = tokio::time::timeout(self.remote_timeout, self.media.list(&self.folder))
            .await
            .map_err(|_| ListingError::Timeout {
                operation: "media listing",
                after: self.remote_timeout,
            })??;
        let referenced = tokio::time::timeout(self.db_timeout, self.repo.referenced_remote_ids())
            .await
            .map_err(|_| ListingError::Timeout {
                operation: "referenced id query",
                after: self.db_timeout,
            })??;
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut report = ReconcileReport {
            scanned: objects.len(),
            ..ReconcileReport::default()
        };

        for object in objects {
            if referenced.contains(&object.remote_id) {
                continue;
            }
            if object.created_at > cutoff {
                report.skipped_recent += 1;
                continue;
            }
            match tokio::time::timeout(self.remote_timeout, self.media.delete(&object.remote_id)).await {
                Ok(Ok(_)) => {
                    info!(remote_id = %object.remote_id, "deleted orphaned media");
                    report.orphans_deleted += 1;
                }
                Ok(Err(err)) => {
                    warn!(remote_id = %object.remote_id, error = %err, "failed to delete orphaned media");
                    report.failures += 1;
                }
                Err(_) => {
                    warn!(remote_id = %object.remote_id, "timed out deleting orphaned media");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run [`Reconciler::run_once`] every `interval` until the task is aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) => info!(
                        folder = %self.folder,
                        backend = self.media.backend_name(),
                        scanned = report.scanned,
                        orphans_deleted = report.orphans_deleted,
                        failures = report.failures,
                        "reconciliation sweep finished"
                    ),
                    Err(err) => warn!(folder = %self.folder, error = %err, "reconciliation sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::listing::{ListingFields, MediaReference},
        services::listing_repository::SqliteListingRepository,
        test_support::{FlakyRepository, StubMediaStore, memory_pool},
    };
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_deletes_only_stale_unreferenced_objects() {
        let repo = Arc::new(SqliteListingRepository::new(Arc::new(memory_pool().await)));
        let store = Arc::new(StubMediaStore::default());
        let old = Utc::now() - chrono::Duration::hours(2);

        store.seed_at("listings/kept", old);
        store.seed_at("listings/orphan", old);
        store.seed("listings/fresh");
        store.seed_at("elsewhere/ignored", old);

        let listing = ListingFields {
            street_address: Some("1 Main St".into()),
            city: Some("Springfield".into()),
            price: Some(1.0),
            size: Some(1.0),
            owner: None,
        }
        .into_new_listing()
        .unwrap()
        .into_listing(
            Uuid::new_v4(),
            Some(MediaReference {
                url: "https://cdn.example/kept.jpg".into(),
                remote_id: "listings/kept".into(),
            }),
            Utc::now(),
        );
        repo.create(&listing).await.unwrap();

        let reconciler = Reconciler::new(
            repo,
            store.clone(),
            "listings",
            Duration::from_secs(3600),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let report = reconciler.run_once().await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                scanned: 3,
                skipped_recent: 1,
                orphans_deleted: 1,
                failures: 0,
            }
        );
        assert_eq!(store.deletes(), vec!["listings/orphan".to_string()]);
        assert!(store.contains("listings/kept"));
        assert!(store.contains("listings/fresh"));
        assert!(store.contains("elsewhere/ignored"));
    }

    #[tokio::test]
    async fn sweep_counts_delete_failures() {
        let repo = Arc::new(SqliteListingRepository::new(Arc::new(memory_pool().await)));
        let store = Arc::new(StubMediaStore::default());
        store.seed_at("listings/orphan", Utc::now() - chrono::Duration::hours(2));
        store.fail_deletes(true);

        let reconciler = Reconciler::new(
            repo,
            store,
            "listings",
            Duration::from_secs(60),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.orphans_deleted, 0);
    }

    #[tokio::test]
    async fn stalled_reference_query_times_out_without_deleting() {
        let repo = Arc::new(FlakyRepository::new(SqliteListingRepository::new(Arc::new(
            memory_pool().await,
        ))));
        repo.stall_reads(Duration::from_millis(300));
        let store = Arc::new(StubMediaStore::default());
        store.seed_at("listings/orphan", Utc::now() - chrono::Duration::hours(2));

        let reconciler = Reconciler::new(
            repo,
            store.clone(),
            "listings",
            Duration::from_secs(60),
            Duration::from_secs(1),
            Duration::from_millis(50),
        );
        let err = reconciler.run_once().await.unwrap_err();

        assert!(matches!(
            err,
            ListingError::Timeout {
                operation: "referenced id query",
                ..
            }
        ));
        assert!(store.deletes().is_empty());
    }
}
