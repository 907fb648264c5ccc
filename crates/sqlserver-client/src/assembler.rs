//! Groups response tokens into an [`ExecutionResult`].

use std::sync::Arc;

use tds_wire::token::{Done, Token};
use tds_wire::{ColumnMeta, ServerMessage};

use crate::error::Error;
use crate::result::{ExecutionResult, OutputValue, ResultSet};
use crate::row::Row;

/// Accumulates one request's tokens.
///
/// COLMETADATA opens a result set, rows append to it, and the DONE that
/// carries its row count closes it. Warnings attach to the open set (or the
/// next one); the first hard error (severity ≥ 11) decides the request's
/// outcome but never stops accumulation — later tokens still need to be
/// consumed off the wire.
#[derive(Debug, Default)]
pub(crate) struct Assembler {
    result: ExecutionResult,
    open: Option<OpenSet>,
    pending_warnings: Vec<ServerMessage>,
    first_error: Option<ServerMessage>,
    diagnostics: Vec<ServerMessage>,
    fatal: bool,
}

#[derive(Debug)]
struct OpenSet {
    columns: Arc<[ColumnMeta]>,
    rows: Vec<Row>,
    order: Vec<u16>,
    warnings: Vec<ServerMessage>,
}

impl Assembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether a fatal (severity ≥ 20) error arrived.
    pub(crate) fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub(crate) fn push(&mut self, token: Token) {
        match token {
            Token::Columns(columns) => {
                self.close_open(None);
                self.open = Some(OpenSet {
                    columns,
                    rows: Vec::new(),
                    order: Vec::new(),
                    warnings: std::mem::take(&mut self.pending_warnings),
                });
            }
            Token::Row(values) => {
                if let Some(open) = self.open.as_mut() {
                    open.rows.push(Row::new(Arc::clone(&open.columns), values));
                } else {
                    tracing::warn!("dropping row without an open result set");
                }
            }
            Token::Order(columns) => {
                if let Some(open) = self.open.as_mut() {
                    open.order = columns;
                }
            }
            Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                self.apply_done(&done);
            }
            Token::Error(message) => {
                if message.is_error() {
                    self.diagnostics.push(message.clone());
                    if self.first_error.is_none() {
                        self.first_error = Some(message.clone());
                    }
                    if message.is_fatal() {
                        self.fatal = true;
                    }
                } else {
                    self.warn(message);
                }
            }
            Token::Info(message) => self.warn(message),
            Token::ReturnStatus(status) => {
                self.result.return_status = Some(status);
            }
            Token::ReturnValue(rv) => {
                self.result.return_values.push(OutputValue {
                    name: rv.name,
                    status: rv.status,
                    value: rv.value,
                });
            }
            // Connection state changes are applied by the connection task;
            // table/column info for browse mode carries nothing we surface.
            Token::EnvChange(_)
            | Token::LoginAck(_)
            | Token::FeatureAck(_)
            | Token::TableName(_)
            | Token::ColumnInfo(_) => {}
        }
    }

    /// Resolve the request: the first hard error if any, else the result.
    pub(crate) fn finish(mut self) -> Result<ExecutionResult, Error> {
        self.close_open(None);
        if let Some(error) = self.first_error {
            return Err(Error::from_server_message(
                error,
                std::mem::take(&mut self.diagnostics),
            ));
        }
        self.result.warnings.append(&mut self.pending_warnings);
        Ok(self.result)
    }

    fn warn(&mut self, message: ServerMessage) {
        self.diagnostics.push(message.clone());
        match self.open.as_mut() {
            Some(open) => open.warnings.push(message),
            None => self.pending_warnings.push(message),
        }
    }

    fn apply_done(&mut self, done: &Done) {
        let count = done
            .status
            .contains(tds_wire::DoneStatus::COUNT)
            .then_some(done.row_count);
        if let Some(count) = count {
            self.result.rows_affected += count;
        }
        if self.open.is_some() {
            self.close_open(count);
        }
    }

    fn close_open(&mut self, rows_affected: Option<u64>) {
        if let Some(open) = self.open.take() {
            self.result.result_sets.push(ResultSet {
                columns: open.columns,
                rows: open.rows,
                rows_affected,
                order: open.order,
                warnings: open.warnings,
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::meta::TypeMeta;
    use tds_wire::token::{Done, DoneStatus};
    use tds_wire::{ColumnFlags, DataType, Value};

    fn columns(count: usize) -> Arc<[ColumnMeta]> {
        (0..count)
            .map(|ordinal| ColumnMeta {
                name: format!("c{ordinal}"),
                ordinal,
                user_type: 0,
                flags: ColumnFlags::default(),
                meta: TypeMeta::plain(DataType::Int4),
                table_name: None,
            })
            .collect()
    }

    fn done(status: DoneStatus, rows: u64) -> Done {
        Done {
            status,
            cur_cmd: 0,
            row_count: rows,
        }
    }

    fn message(number: i32, severity: u8) -> ServerMessage {
        ServerMessage {
            number,
            state: 1,
            severity,
            message: format!("message {number}"),
            server: String::new(),
            procedure: String::new(),
            line: 1,
        }
    }

    #[test]
    fn rows_group_under_their_metadata() {
        let mut assembler = Assembler::new();
        assembler.push(Token::Columns(columns(1)));
        assembler.push(Token::Row(vec![Value::Int(1)]));
        assembler.push(Token::Row(vec![Value::Int(2)]));
        assembler.push(Token::Done(done(DoneStatus::COUNT, 2)));

        let result = assembler.finish().unwrap();
        assert_eq!(result.result_sets.len(), 1);
        assert_eq!(result.result_sets[0].rows.len(), 2);
        assert_eq!(result.result_sets[0].rows_affected, Some(2));
        assert_eq!(result.rows_affected, 2);
    }

    #[test]
    fn intermediate_done_separates_sets() {
        let mut assembler = Assembler::new();
        assembler.push(Token::Columns(columns(1)));
        assembler.push(Token::Row(vec![Value::Int(1)]));
        assembler.push(Token::Done(done(DoneStatus::COUNT | DoneStatus::MORE, 1)));
        assembler.push(Token::Columns(columns(2)));
        assembler.push(Token::Row(vec![Value::Int(2), Value::Int(3)]));
        assembler.push(Token::Done(done(DoneStatus::COUNT, 1)));

        let result = assembler.finish().unwrap();
        assert_eq!(result.result_sets.len(), 2);
        assert_eq!(result.result_sets[0].rows.len(), 1);
        assert_eq!(result.result_sets[1].columns.len(), 2);
        assert_eq!(result.rows_affected, 2);
    }

    #[test]
    fn warnings_attach_to_the_open_set() {
        let mut assembler = Assembler::new();
        assembler.push(Token::Info(message(5701, 0)));
        assembler.push(Token::Columns(columns(1)));
        assembler.push(Token::Info(message(5703, 0)));
        assembler.push(Token::Done(done(DoneStatus::empty(), 0)));

        let result = assembler.finish().unwrap();
        let set = &result.result_sets[0];
        // The pre-set warning rides into the set it preceded.
        assert_eq!(set.warnings.len(), 2);
    }

    #[test]
    fn first_hard_error_wins() {
        let mut assembler = Assembler::new();
        assembler.push(Token::Info(message(100, 0)));
        assembler.push(Token::Error(message(208, 16)));
        assembler.push(Token::Error(message(266, 16)));
        assembler.push(Token::Done(done(DoneStatus::ERROR, 0)));

        let err = assembler.finish().unwrap_err();
        let Error::Server(server) = err else {
            panic!("expected server error, got {err:?}");
        };
        assert_eq!(server.number, 208);
        // All prior messages ride along as diagnostics.
        assert_eq!(server.diagnostics.len(), 3);
    }

    #[test]
    fn low_severity_error_is_a_warning() {
        let mut assembler = Assembler::new();
        assembler.push(Token::Error(message(5701, 10)));
        assembler.push(Token::Done(done(DoneStatus::empty(), 0)));
        assert!(assembler.finish().is_ok());
    }

    #[test]
    fn severity_20_is_fatal() {
        let mut assembler = Assembler::new();
        assembler.push(Token::Error(message(17, 20)));
        assert!(assembler.is_fatal());
    }

    #[test]
    fn return_status_and_values_accumulate() {
        let mut assembler = Assembler::new();
        assembler.push(Token::ReturnStatus(12));
        assembler.push(Token::ReturnValue(tds_wire::ReturnValue {
            ordinal: 0,
            name: "@y".into(),
            status: 1,
            meta: TypeMeta::plain(DataType::IntN),
            value: Value::Int(17),
        }));
        assembler.push(Token::DoneProc(done(DoneStatus::empty(), 0)));

        let result = assembler.finish().unwrap();
        assert_eq!(result.return_status, Some(12));
        assert_eq!(result.output("y").unwrap().value, Value::Int(17));
    }
}
