// SQLite backend
//
// - config: bb8 connection manager and shared connection handle
// - params: RowValues -> rusqlite values
// - query: result extraction
// - session: blocking and async sessions

pub mod config;
pub mod params;
pub mod query;
pub mod session;

pub use config::{SharedSqliteConnection, SqliteManager};
pub use query::build_result_set;
pub use session::{AsyncSqliteSession, SqliteSession};
