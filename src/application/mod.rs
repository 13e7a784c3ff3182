//! Services composed over the repository, cache and rating aggregator.

pub mod bookings;
pub mod context;
pub mod error;
pub mod query;
pub mod ratings;
pub mod repos;
pub mod repository;
pub mod resources;
pub mod reviews;
pub mod seed;
pub mod tours;
pub mod users;
