//! SQL engines.
//!
//! Postgres is the directly reachable target. Statements are rendered by
//! [`dialect`], values are encoded by [`pg_types`] and connections come from the
//! deadpool-backed [`postgres::PgPool`].
pub mod dialect;
pub mod direct;
pub mod pg_types;
pub mod postgres;

pub use direct::DirectEngine;
pub use postgres::PgPool;
