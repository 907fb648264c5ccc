//! Request results.

use std::sync::Arc;

use tds_wire::{ColumnMeta, ServerMessage, Value};

use crate::row::Row;

/// One result set of a request.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Column layout; empty for row-less statements.
    pub columns: Arc<[ColumnMeta]>,
    /// Materialised rows, in arrival order.
    pub rows: Vec<Row>,
    /// Row count from the closing DONE, when it carried one.
    pub rows_affected: Option<u64>,
    /// Ordinals of the ORDER BY columns, when the server reported them.
    pub order: Vec<u16>,
    /// Informational messages and warnings attributed to this set.
    pub warnings: Vec<ServerMessage>,
}

/// An OUT parameter (or function result) reported via RETURNVALUE.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    /// Parameter name, with the `@`.
    pub name: String,
    /// Status byte from the token.
    pub status: u8,
    /// The returned value.
    pub value: Value,
}

/// The complete outcome of one request.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Result sets in arrival order.
    pub result_sets: Vec<ResultSet>,
    /// OUT parameter values.
    pub return_values: Vec<OutputValue>,
    /// Procedure return status, when the request was an RPC.
    pub return_status: Option<i32>,
    /// Total affected rows across all statements.
    pub rows_affected: u64,
    /// Messages not attributable to a particular result set.
    pub warnings: Vec<ServerMessage>,
}

impl ExecutionResult {
    /// Rows of the first result set, consuming the result.
    #[must_use]
    pub fn into_first_rows(mut self) -> Vec<Row> {
        if self.result_sets.is_empty() {
            Vec::new()
        } else {
            self.result_sets.swap_remove(0).rows
        }
    }

    /// Look up an OUT parameter by name (case-insensitive, `@` optional).
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputValue> {
        let normalised = name.trim_start_matches('@');
        self.return_values
            .iter()
            .find(|output| output.name.trim_start_matches('@').eq_ignore_ascii_case(normalised))
    }

    /// Total row count across materialised result sets.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.result_sets.iter().map(|set| set.rows.len()).sum()
    }
}
