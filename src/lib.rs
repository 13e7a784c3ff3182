//! Resource access, caching and rating consistency for a tour booking
//! platform.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
