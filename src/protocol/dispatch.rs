use log::{debug, info};

use crate::executor::{QueryExecutor, QueryOutcome};

use super::{
    request::Request,
    response::{OkPacket, Response},
    session::SessionState,
};

/// What the session does after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reply(Response),
    Quit,
}

/// Routes a decoded command to its handler.
pub fn dispatch(
    request: Request,
    state: &mut SessionState,
    executor: &dyn QueryExecutor,
) -> Outcome {
    let response = match request {
        Request::Quit => return Outcome::Quit,
        Request::Ping => Response::ok(),
        Request::InitDb(database) => match executor.use_database(&database) {
            Ok(()) => {
                info!("switched database to '{database}'");
                state.database = Some(database);
                Response::ok()
            }
            Err(e) => Response::error(&e),
        },
        Request::Query(sql) => {
            debug!("query: {}", sql.trim());
            match executor.execute(&sql, state.database.as_deref()) {
                Ok(QueryOutcome::Rows(result)) => Response::ResultSet(result),
                Ok(QueryOutcome::Affected {
                    rows,
                    last_insert_id,
                }) => Response::Ok(OkPacket::affected(rows, last_insert_id)),
                Err(e) => {
                    debug!("query failed: {e}");
                    Response::error(&e)
                }
            }
        }
        Request::FieldList { table, wildcard } => {
            let schema = state.database.clone().unwrap_or_default();
            match executor.columns(&table, wildcard.as_deref(), state.database.as_deref()) {
                Ok(columns) => Response::FieldList(
                    columns
                        .into_iter()
                        .map(|column| column.with_table(schema.as_str(), table.as_str()))
                        .collect(),
                ),
                Err(e) => Response::error(&e),
            }
        }
    };

    Outcome::Reply(response)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::{
        executor::{QueryError, QueryExecutor, QueryOutcome},
        result::{Column, ColumnType, TabularResult},
    };

    /// Answers `SELECT 'hi'` with one `msg` column, `INSERT` with one affected
    /// row and `SLEEP` after 150ms. Fails everything else.
    pub struct StubExecutor;

    impl QueryExecutor for StubExecutor {
        fn execute(&self, sql: &str, _database: Option<&str>) -> Result<QueryOutcome, QueryError> {
            match sql {
                "SELECT 'hi'" => Ok(QueryOutcome::Rows(
                    TabularResult::new(vec![Column::new("msg", ColumnType::VarString)])
                        .with_row(["hi"]),
                )),
                "INSERT" => Ok(QueryOutcome::Affected {
                    rows: 1,
                    last_insert_id: 9,
                }),
                "SLEEP" => {
                    std::thread::sleep(std::time::Duration::from_millis(150));
                    Ok(QueryOutcome::done())
                }
                _ => Err(QueryError::syntax("stub rejects this")),
            }
        }

        /// `users` has `id` and `name`; a wildcard filters by the prefix
        /// before its first `%`.
        fn columns(
            &self,
            table: &str,
            wildcard: Option<&str>,
            _database: Option<&str>,
        ) -> Result<Vec<Column>, QueryError> {
            if table != "users" {
                return Err(QueryError::unknown_table(table));
            }
            let prefix = wildcard
                .map(|pattern| pattern.split('%').next().unwrap_or_default())
                .unwrap_or_default();
            Ok([
                Column::new("id", ColumnType::LongLong),
                Column::new("name", ColumnType::VarString),
            ]
            .into_iter()
            .filter(|column| column.name.starts_with(prefix))
            .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        executor::QueryError,
        protocol::response::ErrPacket,
        result::{Column, ColumnType, TabularResult},
    };

    use super::{testing::StubExecutor, *};

    #[test]
    fn ping_does_not_mutate_state() {
        let mut state = SessionState::default();
        let before = state.clone();

        let outcome = dispatch(Request::Ping, &mut state, &StubExecutor);
        assert_eq!(outcome, Outcome::Reply(Response::ok()));
        assert_eq!(state, before);
    }

    #[test]
    fn quit_has_no_reply() {
        let mut state = SessionState::default();
        assert_eq!(dispatch(Request::Quit, &mut state, &StubExecutor), Outcome::Quit);
    }

    #[test]
    fn init_db_switches_database() {
        let mut state = SessionState::default();
        let outcome = dispatch(Request::InitDb("shop".to_string()), &mut state, &StubExecutor);

        assert_eq!(outcome, Outcome::Reply(Response::ok()));
        assert_eq!(state.database.as_deref(), Some("shop"));
    }

    #[test]
    fn query_rows_become_result_set() {
        let mut state = SessionState::default();
        let outcome = dispatch(
            Request::Query("SELECT 'hi'".to_string()),
            &mut state,
            &StubExecutor,
        );

        let expected = TabularResult::new(vec![Column::new("msg", ColumnType::VarString)])
            .with_row(["hi"]);
        assert_eq!(outcome, Outcome::Reply(Response::ResultSet(expected)));
    }

    #[test]
    fn query_affected_rows_become_ok() {
        let mut state = SessionState::default();
        let outcome = dispatch(Request::Query("INSERT".to_string()), &mut state, &StubExecutor);
        assert_eq!(
            outcome,
            Outcome::Reply(Response::Ok(OkPacket::affected(1, 9)))
        );
    }

    #[test]
    fn query_error_becomes_err_packet() {
        let mut state = SessionState::default();
        let outcome = dispatch(Request::Query("DROP".to_string()), &mut state, &StubExecutor);
        assert_eq!(
            outcome,
            Outcome::Reply(Response::Err(ErrPacket::from(&QueryError::syntax(
                "stub rejects this"
            ))))
        );
    }

    #[test]
    fn field_list_tags_columns_with_table() {
        let mut state = SessionState {
            database: Some("shop".to_string()),
            ..SessionState::default()
        };
        let outcome = dispatch(
            Request::FieldList {
                table: "users".to_string(),
                wildcard: None,
            },
            &mut state,
            &StubExecutor,
        );

        let Outcome::Reply(Response::FieldList(columns)) = outcome else {
            panic!("expected field list");
        };
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].table, "users");
        assert_eq!(columns[0].schema, "shop");
    }

    #[test]
    fn field_list_forwards_wildcard() {
        let mut state = SessionState::default();
        let outcome = dispatch(
            Request::FieldList {
                table: "users".to_string(),
                wildcard: Some("na%".to_string()),
            },
            &mut state,
            &StubExecutor,
        );

        let Outcome::Reply(Response::FieldList(columns)) = outcome else {
            panic!("expected field list");
        };
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name"]);
    }
}
