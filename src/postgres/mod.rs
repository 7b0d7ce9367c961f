// PostgreSQL backend for the connection layer.
//
// - manager: bb8 connection manager and pool construction
// - tls: rustls connectors per sslmode
// - handle: `RawHandle` / `TxHandle` implementations over pooled clients
// - params: `ToSql` for `RowValues`
// - query: result extraction into `ResultSet`

pub mod handle;
pub mod manager;
pub mod params;
pub mod query;
pub mod tls;

pub use handle::{PgHandle, PgTx};
pub use manager::PgManager;
pub use params::Params;
pub use query::build_result_set;
pub use tls::PgConnector;
