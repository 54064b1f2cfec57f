// PostgreSQL backend
//
// - config: bb8 connection manager
// - params: RowValues as tokio-postgres parameters
// - query: result extraction
// - session: async session over a pooled client

pub mod config;
pub mod params;
pub mod query;
pub mod session;

pub use config::PgManager;
pub use query::build_result_set;
pub use session::PgSession;
