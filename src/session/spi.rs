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

//! Collaborators the session drives.
//!
//! Implementations are owned by the [`super::BoltStateMachine`] and only ever
//! called from the thread processing requests.

use std::collections::HashMap;

use super::request::TransactionParameters;
use super::signals::TerminationToken;
use crate::error_::{BoltError, SpiResult};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthenticationResult {
    pub principal: Option<String>,
    pub credentials_expired: bool,
}

impl AuthenticationResult {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            credentials_expired: false,
        }
    }

    pub fn with_credentials_expired(mut self, credentials_expired: bool) -> Self {
        self.credentials_expired = credentials_expired;
        self
    }
}

/// Identity, error reporting, and lifecycle hooks of the session.
#[cfg_attr(test, mockall::automock)]
pub trait BoltStateMachineSpi {
    fn authenticate(&mut self, auth: &HashMap<String, Value>) -> SpiResult<AuthenticationResult>;

    /// Called once per successful HELLO.
    fn register_client(&mut self, user_agent: &str);

    /// Every failure the session sends (or stashes for) the client passes
    /// through here first. Benign terminations never do.
    fn report_error(&mut self, error: &BoltError);

    /// The session with the given id has been closed.
    fn on_terminate(&mut self, session_id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Opened by a RUN outside an explicit transaction, committed when its
    /// result has been consumed.
    Implicit,
    /// Opened by BEGIN.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatementMetadata {
    pub fields: Vec<String>,
    pub query_id: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    pub records: Vec<Vec<Value>>,
    pub has_more: bool,
    /// Extra summary entries (e.g., statistics) forwarded to the client once
    /// the result is exhausted.
    pub metadata: HashMap<String, Value>,
}

/// The transaction and query engine.
#[cfg_attr(test, mockall::automock)]
pub trait TransactionSpi {
    fn begin(
        &mut self,
        kind: TransactionKind,
        parameters: &TransactionParameters,
        token: TerminationToken,
    ) -> SpiResult<TransactionHandle>;

    fn run(
        &mut self,
        tx: TransactionHandle,
        query: &str,
        parameters: &HashMap<String, Value>,
    ) -> SpiResult<StatementMetadata>;

    /// Fetch (or, if `discard`, skip) up to `n` records of result `qid`.
    /// `n == -1` means all remaining records.
    fn fetch(
        &mut self,
        tx: TransactionHandle,
        qid: i64,
        n: i64,
        discard: bool,
    ) -> SpiResult<RecordBatch>;

    /// Returns the bookmark of the committed transaction, if any.
    fn commit(&mut self, tx: TransactionHandle) -> SpiResult<Option<String>>;

    fn rollback(&mut self, tx: TransactionHandle) -> SpiResult<()>;
}
