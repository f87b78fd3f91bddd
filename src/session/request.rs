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
use std::time::Duration;

use itertools::Itertools;

use crate::error_::BoltError;
use crate::value::Value;

const MASKED: &str = "**********";
const SENSITIVE_AUTH_KEYS: [&str; 1] = ["credentials"];

/// Fetch everything that is left of a result.
pub const FETCH_ALL: i64 = -1;
/// Address the most recently opened result of a transaction.
pub const LAST_QUERY_ID: i64 = -1;

/// A client request as handed to [`crate::BoltStateMachine::process()`].
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Hello(HelloParameters),
    Run(RunParameters),
    Pull(PullParameters),
    Discard(DiscardParameters),
    Begin(TransactionParameters),
    Commit,
    Rollback,
    Reset,
    /// A failure raised outside of any request (e.g., by the connection
    /// layer) to be delivered to the client.
    ExternalFailure(BoltError),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello(_) => "HELLO",
            Request::Run(_) => "RUN",
            Request::Pull(_) => "PULL",
            Request::Discard(_) => "DISCARD",
            Request::Begin(_) => "BEGIN",
            Request::Commit => "COMMIT",
            Request::Rollback => "ROLLBACK",
            Request::Reset => "RESET",
            Request::ExternalFailure(_) => "EXTERNAL_FAILURE",
        }
    }

    pub(crate) fn is_reset(&self) -> bool {
        matches!(self, Request::Reset)
    }
}

/// Parameters of HELLO.
#[derive(Clone, PartialEq, Default)]
pub struct HelloParameters {
    pub user_agent: String,
    pub auth: HashMap<String, Value>,
}

impl HelloParameters {
    pub fn new(user_agent: impl Into<String>, auth: HashMap<String, Value>) -> Self {
        Self {
            user_agent: user_agent.into(),
            auth,
        }
    }
}

impl Debug for HelloParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HelloParameters {{ user_agent: {:?}, auth: {{{}}} }}",
            self.user_agent,
            self.auth
                .iter()
                .sorted_by(|(k1, _), (k2, _)| k1.cmp(k2))
                .map(|(k, v)| match SENSITIVE_AUTH_KEYS.contains(&k.as_str()) {
                    true => format!("{k:?}: {MASKED:?}"),
                    false => format!("{k:?}: {v}"),
                })
                .format(", ")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

/// Parameters of BEGIN, also carried by a RUN that opens an auto-commit
/// transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionParameters {
    pub bookmarks: Vec<String>,
    pub timeout: Option<Duration>,
    pub metadata: HashMap<String, Value>,
    pub mode: AccessMode,
    pub db: Option<String>,
}

impl TransactionParameters {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }
}

/// Parameters of RUN.
///
/// `transaction` is only considered when the RUN opens an auto-commit
/// transaction. Inside an explicit transaction the BEGIN parameters apply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunParameters {
    pub query: String,
    pub parameters: HashMap<String, Value>,
    pub transaction: TransactionParameters,
}

impl RunParameters {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_transaction(mut self, transaction: TransactionParameters) -> Self {
        self.transaction = transaction;
        self
    }
}

/// Parameters of PULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullParameters {
    pub n: i64,
    pub qid: i64,
}

impl PullParameters {
    pub fn new(n: i64, qid: i64) -> Self {
        Self { n, qid }
    }

    pub fn all() -> Self {
        Default::default()
    }
}

impl Default for PullParameters {
    fn default() -> Self {
        Self::new(FETCH_ALL, LAST_QUERY_ID)
    }
}

/// Parameters of DISCARD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscardParameters {
    pub n: i64,
    pub qid: i64,
}

impl DiscardParameters {
    pub fn new(n: i64, qid: i64) -> Self {
        Self { n, qid }
    }

    pub fn all() -> Self {
        Default::default()
    }
}

impl Default for DiscardParameters {
    fn default() -> Self {
        Self::new(FETCH_ALL, LAST_QUERY_ID)
    }
}
