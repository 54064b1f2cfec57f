//! Model-level CRUD helpers over `SQLite` and Postgres sessions.
//!
//! Every operation comes in a blocking ([`crud::blocking`]) and an async
//! ([`crud::nonblocking`]) flavour with identical semantics. Filters use Django-style key
//! suffixes (`value__gte`, `name__like`, `id__in`), upserts are rendered for the dialect named by
//! `SQL_DIALECT` (or the session's own), and errors are reported through [`CrudError`].
//!
//! ```rust,no_run
//! use sql_crud_utils::prelude::*;
//! # fn demo<M: Model>() -> Result<(), CrudError> {
//! let mut session = SqliteSession::open("app.db")?;
//! let page: Vec<M> = blocking::get_rows(
//!     &mut session,
//!     &RowsQuery::new(Filters::new().with("id__gte", 10)).page(1, 20),
//! )?;
//! # let _ = page;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crud;
pub mod dialect;
pub mod error;
pub mod filter;
pub mod mixins;
pub mod model;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod prelude;
pub mod results;
pub mod session;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod statement;
#[cfg(feature = "test-utils-postgres")]
pub mod test_utils;
pub mod transaction;
pub mod translation;
pub mod types;

pub use error::CrudError;
