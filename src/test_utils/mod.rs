//! Helpers for tests that need a live database server.

pub mod postgres;

pub use postgres::EmbeddedPostgres;
