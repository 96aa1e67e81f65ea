pub mod config;
pub mod connection;
pub mod executor;
pub mod protocol;
pub mod result;
pub mod statement;
pub mod users;

pub use config::ServerConfig;
pub use connection::{ConnectionManager, Registry};
pub use executor::{QueryError, QueryExecutor, QueryOutcome, SystemExecutor};
pub use protocol::{ProtocolSession, Server, ShutdownSignal};
pub use result::{Column, ColumnType, TabularResult, Value};
pub use statement::Statement;
pub use users::{StaticUsers, UserDirectory};
