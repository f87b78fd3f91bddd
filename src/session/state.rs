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

use std::fmt::{Display, Formatter};

use super::request::Request;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum BoltState {
    /// Waiting for HELLO.
    Connected,
    Ready,
    /// A RUN outside an explicit transaction opened a result that has not
    /// been consumed yet.
    AutoCommit,
    InTransaction,
    /// Only RESET gets out of here.
    Failed,
    /// Requests are discarded until enough RESETs have been received.
    Interrupted,
    Closed,
}

impl BoltState {
    pub fn name(&self) -> &'static str {
        match self {
            BoltState::Connected => "CONNECTED",
            BoltState::Ready => "READY",
            BoltState::AutoCommit => "AUTO_COMMIT",
            BoltState::InTransaction => "IN_TRANSACTION",
            BoltState::Failed => "FAILED",
            BoltState::Interrupted => "INTERRUPTED",
            BoltState::Closed => "CLOSED",
        }
    }

    /// What a request means in this state.
    pub(crate) fn action_for(&self, request: &Request) -> Action {
        use BoltState::*;
        use Request::*;

        match (self, request) {
            // INTERRUPTED sessions match RESETs against the interrupt count instead
            (Closed | Interrupted, _) => Action::Ignore,

            (Failed, Reset) => Action::Reset,
            (Failed, ExternalFailure(_)) => Action::Fail,
            (Failed, _) => Action::Ignore,

            (_, Reset) => Action::Reset,
            (_, ExternalFailure(_)) => Action::Fail,

            (Connected, Hello(_)) => Action::Authenticate,

            (Ready, Run(_)) => Action::RunAutoCommit,
            (Ready, Begin(_)) => Action::Begin,

            (AutoCommit, Pull(_)) => Action::Stream { discard: false },
            (AutoCommit, Discard(_)) => Action::Stream { discard: true },

            (InTransaction, Run(_)) => Action::RunInTransaction,
            (InTransaction, Pull(_)) => Action::Stream { discard: false },
            (InTransaction, Discard(_)) => Action::Stream { discard: true },
            (InTransaction, Commit) => Action::Commit,
            (InTransaction, Rollback) => Action::Rollback,
            (InTransaction, Begin(_)) => Action::Breach(format!(
                "{} cannot be handled by a session in the {} state: nested transactions are \
                 not supported.",
                request.name(),
                self.name()
            )),

            (Connected | Ready | AutoCommit | InTransaction, _) => {
                Action::Breach(breach_message(request, *self))
            }
        }
    }
}

impl Display for BoltState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn breach_message(request: &Request, state: BoltState) -> String {
    format!(
        "{} cannot be handled by a session in the {} state.",
        request.name(),
        state.name()
    )
}

/// The work a request triggers, as decided by the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Authenticate,
    RunAutoCommit,
    RunInTransaction,
    Begin,
    Stream { discard: bool },
    Commit,
    Rollback,
    Reset,
    /// Enter FAILED with the externally provided error.
    Fail,
    /// Answer IGNORED without doing anything.
    Ignore,
    Breach(String),
}
