// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use thiserror::Error;

use super::request::{TransactionParameters, LAST_QUERY_ID};
use super::signals::{SessionHandle, TerminationToken};
use super::spi::{
    RecordBatch, StatementMetadata, TransactionHandle, TransactionKind, TransactionSpi,
};
use crate::error_::SpiError;
use crate::value::Value;

#[derive(Error, Debug)]
pub(crate) enum TransactionError {
    #[error(transparent)]
    Spi(#[from] SpiError),
    #[error("there is no open transaction")]
    NoTransaction,
    #[error("a transaction is already open")]
    AlreadyOpen,
    #[error("there is no open result with query id {qid}")]
    NoOpenResult { qid: i64 },
}

pub(crate) type TxResult<T> = Result<T, TransactionError>;

#[derive(Debug)]
struct OpenTransaction {
    handle: TransactionHandle,
    kind: TransactionKind,
    // query ids of results not yet exhausted, oldest first
    open_results: Vec<i64>,
}

/// Owns the transaction engine and the (at most one) open transaction.
pub(crate) struct TransactionStateMachine {
    spi: Box<dyn TransactionSpi + Send>,
    signals: SessionHandle,
    current: Option<OpenTransaction>,
}

impl Debug for TransactionStateMachine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStateMachine")
            .field("spi", &"...")
            .field("current", &self.current)
            .finish()
    }
}

impl TransactionStateMachine {
    pub(crate) fn new(spi: Box<dyn TransactionSpi + Send>, signals: SessionHandle) -> Self {
        Self {
            spi,
            signals,
            current: None,
        }
    }

    pub(crate) fn has_transaction(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn kind(&self) -> Option<TransactionKind> {
        self.current.as_ref().map(|tx| tx.kind)
    }

    #[cfg(test)]
    pub(crate) fn has_open_result(&self, qid: i64) -> bool {
        self.current
            .as_ref()
            .and_then(|tx| tx.resolve_qid(qid))
            .is_some()
    }

    pub(crate) fn begin(
        &mut self,
        kind: TransactionKind,
        parameters: &TransactionParameters,
    ) -> TxResult<()> {
        if self.current.is_some() {
            return Err(TransactionError::AlreadyOpen);
        }
        let token = TerminationToken::new();
        self.signals.set_current_transaction(Some(token.clone()));
        match self.spi.begin(kind, parameters, token) {
            Ok(handle) => {
                self.current = Some(OpenTransaction {
                    handle,
                    kind,
                    open_results: Vec::new(),
                });
                Ok(())
            }
            Err(err) => {
                self.signals.set_current_transaction(None);
                Err(err.into())
            }
        }
    }

    pub(crate) fn run(
        &mut self,
        query: &str,
        parameters: &HashMap<String, Value>,
    ) -> TxResult<StatementMetadata> {
        let tx = self
            .current
            .as_mut()
            .ok_or(TransactionError::NoTransaction)?;
        let metadata = self.spi.run(tx.handle, query, parameters)?;
        tx.open_results.push(metadata.query_id);
        Ok(metadata)
    }

    pub(crate) fn stream(&mut self, qid: i64, n: i64, discard: bool) -> TxResult<RecordBatch> {
        let tx = self
            .current
            .as_mut()
            .ok_or(TransactionError::NoTransaction)?;
        let qid = tx
            .resolve_qid(qid)
            .ok_or(TransactionError::NoOpenResult { qid })?;
        let batch = self.spi.fetch(tx.handle, qid, n, discard)?;
        if !batch.has_more {
            tx.open_results.retain(|open| *open != qid);
        }
        Ok(batch)
    }

    /// Commit and forget the open transaction.
    ///
    /// The transaction is gone afterwards, even if committing failed.
    pub(crate) fn commit(&mut self) -> TxResult<Option<String>> {
        let tx = self.take()?;
        Ok(self.spi.commit(tx.handle)?)
    }

    /// Roll back and forget the open transaction.
    pub(crate) fn rollback(&mut self) -> TxResult<()> {
        let tx = self.take()?;
        Ok(self.spi.rollback(tx.handle)?)
    }

    /// Roll back if a transaction is open, do nothing otherwise.
    pub(crate) fn rollback_if_open(&mut self) -> TxResult<()> {
        match self.current {
            None => Ok(()),
            Some(_) => self.rollback(),
        }
    }

    fn take(&mut self) -> TxResult<OpenTransaction> {
        let tx = self.current.take().ok_or(TransactionError::NoTransaction)?;
        self.signals.set_current_transaction(None);
        Ok(tx)
    }
}

impl OpenTransaction {
    fn resolve_qid(&self, qid: i64) -> Option<i64> {
        match qid {
            LAST_QUERY_ID => self.open_results.last().copied(),
            _ => self.open_results.iter().copied().find(|open| *open == qid),
        }
    }
}
