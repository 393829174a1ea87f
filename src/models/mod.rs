//! Core data models.
//!
//! `bucket`, `object` and `multipart` mirror the reference backend's SQLite
//! tables via `sqlx::FromRow`. `upload` holds the client-side pipeline types
//! that never touch the database.

pub mod bucket;
pub mod multipart;
pub mod object;
pub mod upload;
