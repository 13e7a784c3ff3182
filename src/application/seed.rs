//! Bulk import of seed data and removal of everything the layer owns.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::context::AppContext;
use crate::application::error::AppError;
use crate::domain::entities::{Booking, Review, Tour, User};
use crate::domain::resource::Resource;
use crate::domain::types::ResourceKind;
use crate::infra::error::InfraError;

/// One seed document: a draft plus an optional fixed id so that references
/// between seed files resolve.
#[derive(Debug, Deserialize)]
struct SeedRecord<D> {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(flatten)]
    draft: D,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub users: usize,
    pub tours: usize,
    pub reviews: usize,
    pub bookings: usize,
    pub aggregates: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub documents: u64,
    pub cache_flushed: bool,
}

/// Load `users.json`, `tours.json`, `reviews.json` and `bookings.json` from
/// `dir`, in that order. Missing files are skipped. Rating aggregates of
/// every reviewed tour are recomputed and the cache namespace is flushed.
#[instrument(skip(context))]
pub async fn import_dir(context: &AppContext, dir: &Path) -> Result<ImportReport, AppError> {
    let mut report = ImportReport {
        users: import_file::<User>(context, dir).await?,
        tours: import_file::<Tour>(context, dir).await?,
        ..ImportReport::default()
    };

    let reviews: Vec<SeedRecord<<Review as Resource>::Draft>> =
        read_seed(dir, ResourceKind::Review).await?;
    let mut reviewed = BTreeSet::new();
    for record in reviews {
        let review = insert::<Review>(context, record).await?;
        reviewed.insert(review.tour);
        report.reviews += 1;
    }
    for tour_id in reviewed {
        context.ratings.recompute(tour_id).await?;
        report.aggregates += 1;
    }

    report.bookings = import_file::<Booking>(context, dir).await?;

    flush_namespace(context).await;
    info!(
        users = report.users,
        tours = report.tours,
        reviews = report.reviews,
        bookings = report.bookings,
        "seed data imported"
    );
    Ok(report)
}

/// Delete every document of every resource and flush the cache namespace.
#[instrument(skip(context))]
pub async fn purge_all(context: &AppContext) -> Result<PurgeReport, AppError> {
    let mut documents = 0;
    for kind in ResourceKind::ALL {
        documents += context
            .store()
            .purge(kind.collection())
            .await
            .map_err(|err| AppError::from_repo("purge", err))?;
    }
    let cache_flushed = flush_namespace(context).await;
    info!(documents, cache_flushed, "all collections purged");
    Ok(PurgeReport {
        documents,
        cache_flushed,
    })
}

async fn flush_namespace(context: &AppContext) -> bool {
    let pattern = crate::cache::namespace_pattern(&context.cache_config.key_prefix);
    context.cache.delete_by_pattern(&pattern).await
}

async fn import_file<T: Resource>(context: &AppContext, dir: &Path) -> Result<usize, AppError>
where
    T::Draft: DeserializeOwned,
{
    let records: Vec<SeedRecord<T::Draft>> = read_seed(dir, T::KIND).await?;
    let count = records.len();
    for record in records {
        insert::<T>(context, record).await?;
    }
    Ok(count)
}

async fn insert<T: Resource>(
    context: &AppContext,
    record: SeedRecord<T::Draft>,
) -> Result<T, AppError> {
    let id = record.id.unwrap_or_else(Uuid::new_v4);
    let built = T::from_draft(id, record.draft)?;
    context
        .repository::<T>()
        .insert_record(built)
        .await
        .map_err(|err| AppError::from_repo("import", err))
}

async fn read_seed<D: DeserializeOwned>(
    dir: &Path,
    kind: ResourceKind,
) -> Result<Vec<SeedRecord<D>>, AppError> {
    let path = dir.join(format!("{}.json", kind.collection()));
    let data = match tokio::fs::read_to_string(&path).await {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "seed file absent; skipping");
            return Ok(Vec::new());
        }
        Err(err) => return Err(AppError::from(InfraError::Io(err))),
    };
    serde_json::from_str(&data).map_err(|err| {
        AppError::validation(format!("invalid seed file `{}`: {err}", path.display()))
    })
}
