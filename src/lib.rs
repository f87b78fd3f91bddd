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

#![allow(clippy::option_map_unit_fn)]
#![doc(test(attr(deny(dead_code))))]
#![doc(test(attr(deny(unused))))]

//! # Bolt Session
//!
//! The server side of a Bolt connection: a state machine that interprets the
//! requests a client sends over one connection and decides, for each of them,
//! whether it succeeds, fails, or is ignored.
//!
//! The crate neither speaks the wire format nor executes queries.
//! Decoded requests go in through [`BoltStateMachine::process()`], outcomes come
//! out through a [`ResponseChannel`], and all real work is delegated to two
//! service interfaces the embedding server implements:
//!  * [`session::spi::BoltStateMachineSpi`] for authentication, error reporting,
//!    and lifecycle notifications.
//!  * [`session::spi::TransactionSpi`] for transactions and query execution.
//!
//! ## States
//! A session starts out [`BoltState::Connected`] and becomes
//! [`BoltState::Ready`] after a successful HELLO. From there, a RUN opens an
//! auto-commit result ([`BoltState::AutoCommit`]) that is committed once fully
//! pulled or discarded, while BEGIN opens an explicit transaction
//! ([`BoltState::InTransaction`]) that lasts until COMMIT or ROLLBACK.
//!
//! ## Failures
//! Recoverable failures (e.g., a syntax error in a query) are sent to the client
//! and leave the session [`BoltState::Failed`]. Everything but RESET is ignored
//! until the client acknowledges the failure with a RESET.
//!
//! Failures that occur while no request is in flight can be handed to
//! [`BoltStateMachine::mark_failed()`]. They are delivered in place of the
//! outcome of the next request.
//!
//! Some conditions can't be recovered from (protocol violations, rejected or
//! expired credentials). They are signalled as [`BoltConnectionFatality`] from
//! [`BoltStateMachine::process()`] after the session has closed itself.
//!
//! ## Interrupts
//! Any thread holding a [`SessionHandle`] may interrupt the session, e.g.,
//! because the client sent a RESET that was read ahead of the requests still
//! queued. Each interrupt makes the session ignore everything until one RESET
//! per interrupt has arrived. The last of those RESETs rolls back any open
//! transaction and makes the session usable again.
//!
//! A session can also be marked for termination. Work that gets terminated
//! because of this is not reported as a failure, and the session closes on the
//! next request it sees.
//!
//! ## Logging
//! The crate logs through the [`log`](https://docs.rs/log/) crate.
//! Every message is prefixed with the connection id of the session.
//!  * `debug`: requests received, outcomes sent, state transitions, and
//!    failures that got dropped or discarded.
//!  * `warn`: failures to roll back a transaction while closing.

mod error_;
mod macros;
pub mod session;
mod time;
pub mod value;

// imports for docs
#[allow(unused)]
use session::ResponseChannel;

pub use error_::{
    status, BoltConnectionFatality, BoltError, BoxError, Result, SpiError, SpiResult,
};
pub use session::{
    AccessMode, BoltState, BoltStateMachine, NullResponseChannel, Outcome, ResponseCallbacks,
    ResponseRecorder, SessionConfig, SessionHandle, TerminationToken, TransactionParameters,
};
pub use value::Value;
