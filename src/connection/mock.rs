//! Recording in-memory handle for state-machine tests.
//!
//! Models one table of integers. `INSERT <n>` writes a value, savepoints snapshot the
//! transaction's pending writes, and every statement the connection issues is logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::TxMiddlewareError;
use crate::handle::{RawHandle, TxHandle};
use crate::results::ResultSet;
use crate::translation::PlaceholderStyle;
use crate::types::RowValues;

#[derive(Default)]
struct Shared {
    committed: Vec<i64>,
    log: Vec<String>,
    fail_prefix: Option<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    pub(crate) fn log(&self) -> Vec<String> {
        self.shared.lock().unwrap().log.clone()
    }

    pub(crate) fn committed(&self) -> Vec<i64> {
        self.shared.lock().unwrap().committed.clone()
    }

    /// Make every statement starting with `prefix` fail until cleared.
    pub(crate) fn fail_on(&self, prefix: &str) {
        self.shared.lock().unwrap().fail_prefix = Some(prefix.to_string());
    }

    pub(crate) fn clear_failure(&self) {
        self.shared.lock().unwrap().fail_prefix = None;
    }

    fn record(&self, statement: &str) -> Result<(), TxMiddlewareError> {
        let mut shared = self.shared.lock().unwrap();
        if let Some(prefix) = &shared.fail_prefix
            && statement.starts_with(prefix.as_str())
        {
            return Err(TxMiddlewareError::Io(std::io::Error::other(format!(
                "injected failure: {statement}"
            ))));
        }
        shared.log.push(statement.to_string());
        Ok(())
    }
}

fn values_result(values: &[i64]) -> ResultSet {
    let mut rs = ResultSet::with_capacity(values.len());
    rs.set_column_names(Arc::new(vec!["id".to_string()]));
    for v in values {
        rs.add_row_values(vec![RowValues::Int(*v)]);
    }
    rs
}

#[async_trait]
impl RawHandle for MockHandle {
    type Tx = MockTx;

    async fn begin(&self) -> Result<MockTx, TxMiddlewareError> {
        self.record("BEGIN")?;
        Ok(MockTx {
            handle: self.clone(),
            pending: Vec::new(),
            marks: HashMap::new(),
        })
    }

    async fn select(
        &self,
        query: &str,
        _params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError> {
        self.record(query)?;
        Ok(values_result(&self.committed()))
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }
}

pub(crate) struct MockTx {
    handle: MockHandle,
    pending: Vec<i64>,
    marks: HashMap<String, usize>,
}

#[async_trait]
impl TxHandle for MockTx {
    async fn commit(self) -> Result<(), TxMiddlewareError> {
        self.handle.record("COMMIT")?;
        self.handle
            .shared
            .lock()
            .unwrap()
            .committed
            .extend(self.pending);
        Ok(())
    }

    async fn rollback(self) -> Result<(), TxMiddlewareError> {
        self.handle.record("ROLLBACK")
    }

    async fn execute(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, TxMiddlewareError> {
        self.handle.record(query)?;
        if query.starts_with("INSERT") {
            for p in params {
                if let Some(v) = p.as_int() {
                    self.pending.push(*v);
                }
            }
            return Ok(params.len());
        }
        Ok(0)
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), TxMiddlewareError> {
        self.handle.record(sql)?;
        if let Some(name) = sql.strip_prefix("SAVEPOINT ") {
            self.marks.insert(name.to_string(), self.pending.len());
        } else if let Some(name) = sql.strip_prefix("ROLLBACK TO SAVEPOINT ") {
            if let Some(len) = self.marks.get(name) {
                self.pending.truncate(*len);
            }
        } else if let Some(name) = sql.strip_prefix("RELEASE SAVEPOINT ") {
            self.marks.remove(name);
        }
        Ok(())
    }

    async fn select(
        &mut self,
        query: &str,
        _params: &[RowValues],
    ) -> Result<ResultSet, TxMiddlewareError> {
        self.handle.record(query)?;
        let mut visible = self.handle.committed();
        visible.extend(&self.pending);
        Ok(values_result(&visible))
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }
}
