//! Query execution seam.
//!
//! The protocol layer never interprets SQL. Every `COM_QUERY` is forwarded as
//! text, together with the session's current database, to a [`QueryExecutor`].
//! The executor answers with rows, an affected-rows acknowledgment, or a
//! [`QueryError`] that is reported to the client while the session carries on.
use thiserror::Error;

use crate::{
    config::ServerConfig,
    protocol::codec::DEFAULT_MAX_PACKET_SIZE,
    result::{Column, ColumnType, TabularResult},
    statement::{Statement, StatementError},
};

/// Failure reported by an executor; becomes an error packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryError {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl QueryError {
    pub fn new(code: u16, sql_state: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state.to_string(),
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(1064, "42000", message)
    }

    pub fn unknown_database(name: &str) -> Self {
        Self::new(1049, "42000", format!("Unknown database '{name}'"))
    }

    pub fn unknown_table(name: &str) -> Self {
        Self::new(1146, "42S02", format!("Table '{name}' doesn't exist"))
    }

    pub fn no_database() -> Self {
        Self::new(1046, "3D000", "No database selected")
    }
}

impl From<StatementError> for QueryError {
    fn from(value: StatementError) -> Self {
        QueryError::syntax(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(TabularResult),
    Affected { rows: u64, last_insert_id: u64 },
}

impl QueryOutcome {
    pub fn done() -> Self {
        QueryOutcome::Affected {
            rows: 0,
            last_insert_id: 0,
        }
    }
}

/// Backend invoked for every decoded query.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, sql: &str, database: Option<&str>) -> Result<QueryOutcome, QueryError>;

    /// Validates a `COM_INIT_DB` target before the session switches to it.
    fn use_database(&self, _database: &str) -> Result<(), QueryError> {
        Ok(())
    }

    /// Column metadata for `COM_FIELD_LIST`; `wildcard` is the client's
    /// column name pattern, if it sent one.
    fn columns(
        &self,
        _table: &str,
        _wildcard: Option<&str>,
        _database: Option<&str>,
    ) -> Result<Vec<Column>, QueryError> {
        Ok(Vec::new())
    }
}

/// Executor answering the statements interactive clients issue on connect.
pub struct SystemExecutor {
    server_version: String,
    max_connections: usize,
    databases: Vec<String>,
}

impl SystemExecutor {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            server_version: config.server_version.clone(),
            max_connections: config.max_connections,
            databases: vec!["information_schema".to_string()],
        }
    }

    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.databases.push(name.into());
        self
    }

    fn variables(&self) -> Vec<(&'static str, String)> {
        vec![
            ("autocommit", "1".to_string()),
            ("character_set_client", "utf8".to_string()),
            ("max_allowed_packet", DEFAULT_MAX_PACKET_SIZE.to_string()),
            ("max_connections", self.max_connections.to_string()),
            ("version", self.server_version.clone()),
            ("version_comment", "floe".to_string()),
        ]
    }

    fn single(name: &str, value: Option<String>) -> TabularResult {
        TabularResult::new(vec![Column::new(name, ColumnType::VarString)]).with_row([value])
    }
}

impl QueryExecutor for SystemExecutor {
    fn execute(&self, sql: &str, database: Option<&str>) -> Result<QueryOutcome, QueryError> {
        let statement: Statement = sql.try_into()?;

        let result = match statement {
            Statement::Set => return Ok(QueryOutcome::done()),
            Statement::SelectDatabase => {
                Self::single("DATABASE()", database.map(str::to_string))
            }
            Statement::SelectVariable(name) => {
                let value = self
                    .variables()
                    .into_iter()
                    .find(|(var, _)| *var == name)
                    .map(|(_, value)| value)
                    .ok_or_else(|| {
                        QueryError::new(1193, "HY000", format!("Unknown system variable '{name}'"))
                    })?;
                Self::single(&format!("@@{name}"), Some(value))
            }
            Statement::ShowDatabases => {
                let mut result =
                    TabularResult::new(vec![Column::new("Database", ColumnType::VarString)]);
                for name in &self.databases {
                    result.push_row([name.as_str()]);
                }
                result
            }
            Statement::ShowTables => {
                let database = database.ok_or_else(QueryError::no_database)?;
                TabularResult::new(vec![Column::new(
                    format!("Tables_in_{database}"),
                    ColumnType::VarString,
                )])
            }
            Statement::ShowVariables => {
                let mut result = TabularResult::new(vec![
                    Column::new("Variable_name", ColumnType::VarString),
                    Column::new("Value", ColumnType::VarString),
                ]);
                for (name, value) in self.variables() {
                    result.push_row([name.to_string(), value]);
                }
                result
            }
        };

        Ok(QueryOutcome::Rows(result))
    }

    fn use_database(&self, database: &str) -> Result<(), QueryError> {
        if self.databases.iter().any(|name| name == database) {
            Ok(())
        } else {
            Err(QueryError::unknown_database(database))
        }
    }

    fn columns(
        &self,
        table: &str,
        _wildcard: Option<&str>,
        _database: Option<&str>,
    ) -> Result<Vec<Column>, QueryError> {
        Err(QueryError::unknown_table(table))
    }
}

#[cfg(test)]
mod tests {
    use crate::result::Value;

    use super::*;

    fn executor() -> SystemExecutor {
        SystemExecutor::new(&ServerConfig::default()).with_database("app")
    }

    #[test]
    fn show_databases_lists_known_names() {
        let outcome = executor().execute("SHOW DATABASES", None).unwrap();
        let QueryOutcome::Rows(result) = outcome else {
            panic!("expected rows");
        };
        assert_eq!(result.columns[0].name, "Database");
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[1][0], Value::from("app"));
    }

    #[test]
    fn select_version_reports_configured_version() {
        let outcome = executor().execute("select @@version", None).unwrap();
        let QueryOutcome::Rows(result) = outcome else {
            panic!("expected rows");
        };
        assert_eq!(
            result.rows[0][0],
            Value::from(ServerConfig::default().server_version)
        );
    }

    #[test]
    fn select_database_is_null_without_selection() {
        let outcome = executor().execute("SELECT DATABASE()", None).unwrap();
        assert_eq!(
            outcome,
            QueryOutcome::Rows(
                TabularResult::new(vec![Column::new("DATABASE()", ColumnType::VarString)])
                    .with_row([Value::Null])
            )
        );
    }

    #[test]
    fn show_tables_requires_database() {
        let err = executor().execute("show tables", None).unwrap_err();
        assert_eq!(err.code, 1046);
    }

    #[test]
    fn set_is_acknowledged() {
        assert_eq!(
            executor().execute("SET autocommit=1", None).unwrap(),
            QueryOutcome::done()
        );
    }

    #[test]
    fn unsupported_statement_is_syntax_error() {
        let err = executor().execute("DELETE FROM t", None).unwrap_err();
        assert_eq!(err.code, 1064);
        assert_eq!(err.sql_state, "42000");
    }

    #[test]
    fn use_database_checks_known_names() {
        assert!(executor().use_database("app").is_ok());
        assert_eq!(executor().use_database("nope").unwrap_err().code, 1049);
    }
}
