use std::collections::BTreeSet;

use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::query::{Predicate, RawQuery};
use crate::application::repository::{Populate, Repository};
use crate::application::resources::{Listing, ResourceService};
use crate::domain::entities::{Booking, BookingDraft, BookingPatch, Tour};
use crate::domain::types::ResourceKind;

#[derive(Clone)]
pub struct BookingService {
    resources: ResourceService<Booking>,
    tours: Repository<Tour>,
}

impl BookingService {
    pub fn new(resources: ResourceService<Booking>, tours: Repository<Tour>) -> Self {
        Self { resources, tours }
    }

    pub fn resources(&self) -> &ResourceService<Booking> {
        &self.resources
    }

    pub async fn get(&self, id: Uuid) -> Result<Booking, AppError> {
        self.resources.get_one(id).await
    }

    pub async fn list(&self, raw: &RawQuery) -> Result<Listing<Booking>, AppError> {
        self.resources.get_all(raw, Vec::new()).await
    }

    pub async fn create(&self, draft: BookingDraft) -> Result<Booking, AppError> {
        self.resources.create(draft).await
    }

    pub async fn update(&self, id: Uuid, patch: &BookingPatch) -> Result<Booking, AppError> {
        self.resources.update(id, patch).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<Booking, AppError> {
        self.resources.delete(id).await
    }

    pub async fn booking_detail(&self, id: Uuid) -> Result<Value, AppError> {
        let populate = [
            Populate::local("tour", ResourceKind::Tour, &["name"]),
            Populate::local("user", ResourceKind::User, &["name", "email"]),
        ];
        self.resources.get_one_populated(id, &populate).await
    }

    /// The visible tours behind a user's bookings, in booking order.
    #[instrument(skip(self))]
    pub async fn booked_tours(&self, user_id: Uuid) -> Result<Vec<Tour>, AppError> {
        let bookings = self
            .resources
            .repository()
            .find_all(vec![Predicate::eq("user", user_id.to_string())], None)
            .await
            .map_err(|err| AppError::from_repo("find_bookings", err))?;

        let mut seen = BTreeSet::new();
        let mut tours = Vec::new();
        for booking in bookings {
            if !seen.insert(booking.tour) {
                continue;
            }
            let tour = self
                .tours
                .find_by_id(booking.tour)
                .await
                .map_err(|err| AppError::from_repo("find_tour", err))?;
            tours.extend(tour);
        }
        Ok(tours)
    }
}
