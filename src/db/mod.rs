// src/db/mod.rs
pub mod models;
pub mod mongodb;

pub use self::models::{AvailabilityHold, Reservation, ReservationStatus, Restaurant, Table};
pub use self::mongodb::MongoRepo;
