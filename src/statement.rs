use thiserror::Error;

/// Introspection statements answered by the
/// [`SystemExecutor`](crate::executor::SystemExecutor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `SELECT @@name`, with the session/global scope prefix stripped.
    SelectVariable(String),
    /// `SELECT DATABASE()`
    SelectDatabase,
    ShowDatabases,
    ShowTables,
    ShowVariables,
    /// `SET ...`
    Set,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StatementError {
    #[error("empty statement")]
    EmptyStatement,

    #[error("statement not supported: {0}")]
    Unsupported(String),
}

impl TryFrom<&str> for Statement {
    type Error = StatementError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let text = value.trim().trim_end_matches(';').trim();
        let lowered = text.to_lowercase();
        let parts = lowered.split_whitespace().collect::<Vec<&str>>();

        match parts.as_slice() {
            [] => Err(StatementError::EmptyStatement),
            ["set", ..] => Ok(Statement::Set),
            ["show", "databases"] | ["show", "schemas"] => Ok(Statement::ShowDatabases),
            ["show", "tables"] => Ok(Statement::ShowTables),
            ["show", "variables"] => Ok(Statement::ShowVariables),
            ["select", "database()"] => Ok(Statement::SelectDatabase),
            ["select", var] if var.starts_with("@@") => {
                let name = var.trim_start_matches("@@");
                let name = name
                    .strip_prefix("session.")
                    .or_else(|| name.strip_prefix("global."))
                    .unwrap_or(name);
                Ok(Statement::SelectVariable(name.to_string()))
            }
            _ => Err(StatementError::Unsupported(text.to_string())),
        }
    }
}
