//! Resource records as stored in the document store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;
use super::resource::Resource;
use super::types::{Difficulty, GeoPoint, ResourceKind, Role, Timestamp, TourLocation};

pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

const TOUR_NAME_MIN: usize = 10;
const TOUR_NAME_MAX: usize = 40;
const REVIEW_TEXT_MIN: usize = 3;
const REVIEW_TEXT_MAX: usize = 200;
const RATING_MIN: f64 = 0.0;
const RATING_MAX: f64 = 5.0;

// ============================================================================
// Tour
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub duration: u32,
    pub max_group_size: u32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: u64,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<Timestamp>,
    #[serde(default)]
    pub secret_tour: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<TourLocation>,
    #[serde(default)]
    pub guides: Vec<Uuid>,
    pub created_at: Timestamp,
}

impl Tour {
    /// Derived read-only value, mirrors the `durationWeeks` virtual.
    pub fn duration_weeks(&self) -> f64 {
        f64::from(self.duration) / 7.0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourDraft {
    pub name: String,
    pub duration: u32,
    pub max_group_size: u32,
    pub difficulty: Difficulty,
    pub price: f64,
    #[serde(default)]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<Timestamp>,
    #[serde(default)]
    pub secret_tour: bool,
    #[serde(default)]
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<TourLocation>,
    #[serde(default)]
    pub guides: Vec<Uuid>,
}

/// Controller-facing tour update. The rating aggregate is deliberately absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_group_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_cover: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_dates: Option<Vec<Timestamp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_tour: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<TourLocation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guides: Option<Vec<Uuid>>,
}

impl Resource for Tour {
    const KIND: ResourceKind = ResourceKind::Tour;
    type Draft = TourDraft;
    type Patch = TourPatch;

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_draft(id: Uuid, draft: TourDraft) -> Result<Self, DomainError> {
        let name = draft.name.trim().to_string();
        let tour = Tour {
            id,
            slug: slug::slugify(&name),
            name,
            duration: draft.duration,
            max_group_size: draft.max_group_size,
            difficulty: draft.difficulty,
            ratings_average: DEFAULT_RATINGS_AVERAGE,
            ratings_quantity: 0,
            price: draft.price,
            price_discount: draft.price_discount,
            summary: draft.summary.trim().to_string(),
            description: draft.description.map(|value| value.trim().to_string()),
            image_cover: draft.image_cover.trim().to_string(),
            images: draft.images,
            start_dates: draft.start_dates,
            secret_tour: draft.secret_tour,
            start_location: draft.start_location,
            locations: draft.locations,
            guides: draft.guides,
            created_at: Timestamp::now(),
        };
        tour.validate()?;
        Ok(tour)
    }

    fn validate(&self) -> Result<(), DomainError> {
        let name_len = self.name.chars().count();
        if !(TOUR_NAME_MIN..=TOUR_NAME_MAX).contains(&name_len) {
            return Err(DomainError::validation(
                "name",
                format!("must be between {TOUR_NAME_MIN} and {TOUR_NAME_MAX} characters"),
            ));
        }
        if self.duration == 0 {
            return Err(DomainError::validation("duration", "must be greater than zero"));
        }
        if self.max_group_size == 0 {
            return Err(DomainError::validation(
                "maxGroupSize",
                "must be greater than zero",
            ));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(DomainError::validation("price", "must be a positive number"));
        }
        if let Some(discount) = self.price_discount
            && (!discount.is_finite() || discount < 0.0 || discount >= self.price)
        {
            return Err(DomainError::validation(
                "priceDiscount",
                format!("discount price ({discount}) should be below the regular price"),
            ));
        }
        if self.summary.trim().is_empty() {
            return Err(DomainError::validation("summary", "must not be empty"));
        }
        if self.image_cover.trim().is_empty() {
            return Err(DomainError::validation("imageCover", "must not be empty"));
        }
        if !(1.0..=5.0).contains(&self.ratings_average) {
            return Err(DomainError::validation(
                "ratingsAverage",
                "must be between 1.0 and 5.0",
            ));
        }
        if let Some(point) = &self.start_location
            && !point.is_valid()
        {
            return Err(DomainError::validation(
                "startLocation",
                "coordinates must be [longitude, latitude]",
            ));
        }
        if self.locations.iter().any(|location| !location.point.is_valid()) {
            return Err(DomainError::validation(
                "locations",
                "coordinates must be [longitude, latitude]",
            ));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.slug = slug::slugify(&self.name);
    }
}

/// Derived rating statistics owned by a tour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingAggregate {
    pub tour_id: Uuid,
    pub ratings_quantity: u64,
    pub ratings_average: f64,
}

impl RatingAggregate {
    /// Build the aggregate from a review count and mean. An empty set resets
    /// to the default average.
    pub fn from_stats(tour_id: Uuid, count: u64, mean: Option<f64>) -> Self {
        match mean {
            Some(mean) if count > 0 && mean.is_finite() => Self {
                tour_id,
                ratings_quantity: count,
                ratings_average: round_rating(mean),
            },
            _ => Self::empty(tour_id),
        }
    }

    pub fn empty(tour_id: Uuid) -> Self {
        Self {
            tour_id,
            ratings_quantity: 0,
            ratings_average: DEFAULT_RATINGS_AVERAGE,
        }
    }
}

/// Round to one decimal and clamp into the tour's accepted range. A set of
/// zero-star reviews cannot push the stored average below 1.0.
pub fn round_rating(value: f64) -> f64 {
    ((value * 10.0).round() / 10.0).clamp(1.0, 5.0)
}

// ============================================================================
// Review
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub tour: Uuid,
    pub user: Uuid,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDraft {
    pub review: String,
    pub rating: f64,
    pub tour: Uuid,
    pub user: Uuid,
}

/// Reviews may only change their text and rating; ownership is fixed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

impl Resource for Review {
    const KIND: ResourceKind = ResourceKind::Review;
    type Draft = ReviewDraft;
    type Patch = ReviewPatch;

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_draft(id: Uuid, draft: ReviewDraft) -> Result<Self, DomainError> {
        let review = Review {
            id,
            review: draft.review.trim().to_string(),
            rating: draft.rating,
            tour: draft.tour,
            user: draft.user,
            created_at: Timestamp::now(),
        };
        review.validate()?;
        Ok(review)
    }

    fn validate(&self) -> Result<(), DomainError> {
        let len = self.review.chars().count();
        if !(REVIEW_TEXT_MIN..=REVIEW_TEXT_MAX).contains(&len) {
            return Err(DomainError::validation(
                "review",
                format!("must be between {REVIEW_TEXT_MIN} and {REVIEW_TEXT_MAX} characters"),
            ));
        }
        if !self.rating.is_finite() || !(RATING_MIN..=RATING_MAX).contains(&self.rating) {
            return Err(DomainError::validation(
                "rating",
                format!("must be between {RATING_MIN} and {RATING_MAX}"),
            ));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.review = self.review.trim().to_string();
    }
}

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: Timestamp,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraft {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub photo: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

/// Self-service profile update. Only these fields can be changed by the
/// account owner.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
}

impl From<ProfileUpdate> for UserPatch {
    fn from(update: ProfileUpdate) -> Self {
        UserPatch {
            name: update.name,
            email: update.email,
            role: None,
            photo: update.photo,
        }
    }
}

impl Resource for User {
    const KIND: ResourceKind = ResourceKind::User;
    type Draft = UserDraft;
    type Patch = UserPatch;

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_draft(id: Uuid, draft: UserDraft) -> Result<Self, DomainError> {
        let mut user = User {
            id,
            name: draft.name,
            email: draft.email,
            role: draft.role,
            photo: draft.photo,
            active: true,
            created_at: Timestamp::now(),
        };
        user.normalize();
        user.validate()?;
        Ok(user)
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name", "must not be empty"));
        }
        if !looks_like_email(&self.email) {
            return Err(DomainError::validation(
                "email",
                "must be a valid email address",
            ));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_lowercase();
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !value.chars().any(char::is_whitespace)
}

// ============================================================================
// Booking
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub tour: Uuid,
    pub user: Uuid,
    pub price: f64,
    #[serde(default = "default_paid")]
    pub paid: bool,
    pub created_at: Timestamp,
}

fn default_paid() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    pub tour: Uuid,
    pub user: Uuid,
    pub price: f64,
    #[serde(default = "default_paid")]
    pub paid: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid: Option<bool>,
}

impl Resource for Booking {
    const KIND: ResourceKind = ResourceKind::Booking;
    type Draft = BookingDraft;
    type Patch = BookingPatch;

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_draft(id: Uuid, draft: BookingDraft) -> Result<Self, DomainError> {
        let booking = Booking {
            id,
            tour: draft.tour,
            user: draft.user,
            price: draft.price,
            paid: draft.paid,
            created_at: Timestamp::now(),
        };
        booking.validate()?;
        Ok(booking)
    }

    fn validate(&self) -> Result<(), DomainError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(DomainError::validation("price", "must be a positive number"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tour_draft(name: &str) -> TourDraft {
        TourDraft {
            name: name.to_string(),
            duration: 5,
            max_group_size: 10,
            difficulty: Difficulty::Easy,
            price: 397.0,
            price_discount: None,
            summary: "Breathtaking hike through the Canadian Banff National Park".to_string(),
            description: None,
            image_cover: "tour-1-cover.jpg".to_string(),
            images: Vec::new(),
            start_dates: Vec::new(),
            secret_tour: false,
            start_location: Some(GeoPoint::new(-116.214531, 51.417611)),
            locations: Vec::new(),
            guides: Vec::new(),
        }
    }

    #[test]
    fn tour_from_draft_applies_defaults() {
        let tour = Tour::from_draft(Uuid::new_v4(), tour_draft("The Forest Hiker")).expect("tour");
        assert_eq!(tour.slug, "the-forest-hiker");
        assert_eq!(tour.ratings_average, DEFAULT_RATINGS_AVERAGE);
        assert_eq!(tour.ratings_quantity, 0);
        assert!((tour.duration_weeks() - 5.0 / 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tour_name_length_is_enforced() {
        let err = Tour::from_draft(Uuid::new_v4(), tour_draft("Short")).unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: "name", .. }));
    }

    #[test]
    fn tour_discount_must_be_below_price() {
        let mut draft = tour_draft("The Sea Explorer");
        draft.price_discount = Some(500.0);
        let err = Tour::from_draft(Uuid::new_v4(), draft).unwrap_err();
        assert!(matches!(
            err,
            DomainError::Validation {
                field: "priceDiscount",
                ..
            }
        ));
    }

    #[test]
    fn tour_patch_skips_absent_fields() {
        let patch = TourPatch {
            price: Some(500.0),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).expect("serialize");
        assert_eq!(value, serde_json::json!({ "price": 500.0 }));
    }

    #[test]
    fn review_bounds_are_enforced() {
        let draft = |text: &str, rating: f64| ReviewDraft {
            review: text.to_string(),
            rating,
            tour: Uuid::new_v4(),
            user: Uuid::new_v4(),
        };
        assert!(Review::from_draft(Uuid::new_v4(), draft("Great tour", 4.0)).is_ok());
        assert!(Review::from_draft(Uuid::new_v4(), draft("ok", 4.0)).is_err());
        assert!(Review::from_draft(Uuid::new_v4(), draft(&"x".repeat(201), 4.0)).is_err());
        assert!(Review::from_draft(Uuid::new_v4(), draft("Great tour", 5.5)).is_err());
        assert!(Review::from_draft(Uuid::new_v4(), draft("Great tour", f64::NAN)).is_err());
    }

    #[test]
    fn user_email_is_normalized_and_checked() {
        let user = User::from_draft(
            Uuid::new_v4(),
            UserDraft {
                name: " Laura ".to_string(),
                email: "Laura@Example.COM".to_string(),
                role: Role::Guide,
                photo: None,
            },
        )
        .expect("user");
        assert_eq!(user.email, "laura@example.com");
        assert_eq!(user.name, "Laura");
        assert!(user.active);

        let err = User::from_draft(
            Uuid::new_v4(),
            UserDraft {
                name: "Nope".to_string(),
                email: "not-an-email".to_string(),
                role: Role::User,
                photo: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: "email", .. }));
    }

    #[test]
    fn rating_aggregate_defaults_when_empty() {
        let id = Uuid::new_v4();
        assert_eq!(RatingAggregate::from_stats(id, 0, None), RatingAggregate::empty(id));
        let aggregate = RatingAggregate::from_stats(id, 3, Some(4.0));
        assert_eq!(aggregate.ratings_quantity, 3);
        assert_eq!(aggregate.ratings_average, 4.0);
        assert_eq!(round_rating(4.666), 4.7);
        assert_eq!(round_rating(0.0), 1.0);
    }
}
