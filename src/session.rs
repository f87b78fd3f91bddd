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

//! The server side of a Bolt connection.
//!
//! A [`BoltStateMachine`] interprets the requests of one client connection in
//! order and makes sure each of them is answered exactly once.

pub mod config;
pub(crate) mod connection_state;
pub mod request;
pub mod response;
pub mod signals;
pub mod spi;
pub mod state;
pub(crate) mod transaction;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use log::warn;

use crate::error_::{status, BoltConnectionFatality, BoltError, Result, SpiError};
use crate::time::Instant;
use crate::value::Value;
pub use config::SessionConfig;
use connection_state::{ConnectionState, ResponseGuard};
use request::{DiscardParameters, HelloParameters, PullParameters, Request, RunParameters};
pub use request::{AccessMode, TransactionParameters};
pub use response::{
    NullResponseChannel, Outcome, ResponseCallbacks, ResponseChannel, ResponseRecorder,
};
pub use signals::{SessionHandle, TerminationToken};
use spi::{BoltStateMachineSpi, TransactionKind, TransactionSpi};
pub use state::BoltState;
use state::Action;
use transaction::{TransactionError, TransactionStateMachine};

macro_rules! session_debug {
    ($id:expr, $($args:tt)+) => {
        log::debug!("[{}] {}", $id, format!($($args)+))
    };
}
pub(crate) use session_debug;

/// Drives one client connection.
///
/// Requests are fed in order through [`BoltStateMachine::process()`] by a
/// single thread. The only operations meant for other threads are exposed
/// through [`BoltStateMachine::handle()`].
///
/// # Example
/// ```
/// use std::collections::HashMap;
///
/// use bolt_session::session::request::{HelloParameters, Request};
/// use bolt_session::session::spi::{
///     AuthenticationResult, BoltStateMachineSpi, RecordBatch, StatementMetadata,
///     TransactionHandle, TransactionKind, TransactionSpi,
/// };
/// use bolt_session::{
///     BoltError, BoltState, BoltStateMachine, ResponseRecorder, SessionConfig, SpiResult,
///     TerminationToken, TransactionParameters, Value,
/// };
///
/// struct Server;
///
/// impl BoltStateMachineSpi for Server {
///     fn authenticate(&mut self, _: &HashMap<String, Value>) -> SpiResult<AuthenticationResult> {
///         Ok(AuthenticationResult::new("neo4j"))
///     }
///     fn register_client(&mut self, _: &str) {}
///     fn report_error(&mut self, _: &BoltError) {}
///     fn on_terminate(&mut self, _: &str) {}
/// }
///
/// struct Engine;
///
/// impl TransactionSpi for Engine {
///     fn begin(
///         &mut self,
///         _: TransactionKind,
///         _: &TransactionParameters,
///         _: TerminationToken,
///     ) -> SpiResult<TransactionHandle> {
///         Ok(TransactionHandle(1))
///     }
///     fn run(
///         &mut self,
///         _: TransactionHandle,
///         _: &str,
///         _: &HashMap<String, Value>,
///     ) -> SpiResult<StatementMetadata> {
///         Ok(Default::default())
///     }
///     fn fetch(
///         &mut self,
///         _: TransactionHandle,
///         _: i64,
///         _: i64,
///         _: bool,
///     ) -> SpiResult<RecordBatch> {
///         Ok(Default::default())
///     }
///     fn commit(&mut self, _: TransactionHandle) -> SpiResult<Option<String>> {
///         Ok(None)
///     }
///     fn rollback(&mut self, _: TransactionHandle) -> SpiResult<()> {
///         Ok(())
///     }
/// }
///
/// let mut session =
///     BoltStateMachine::new(SessionConfig::new(), Box::new(Server), Box::new(Engine));
/// let mut recorder = ResponseRecorder::new();
/// session
///     .process(
///         Request::Hello(HelloParameters::new("example/1.0", HashMap::new())),
///         &mut recorder,
///     )
///     .unwrap();
///
/// assert!(recorder.outcome().unwrap().is_success());
/// assert_eq!(session.state(), BoltState::Ready);
/// assert_eq!(session.owner(), Some("neo4j"));
/// ```
pub struct BoltStateMachine {
    id: Arc<str>,
    config: SessionConfig,
    state: BoltState,
    connection_state: ConnectionState,
    signals: SessionHandle,
    spi: Box<dyn BoltStateMachineSpi + Send>,
    transactions: TransactionStateMachine,
}

impl Debug for BoltStateMachine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltStateMachine")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("connection_state", &self.connection_state)
            .field("signals", &self.signals)
            .field("transactions", &self.transactions)
            .finish()
    }
}

impl BoltStateMachine {
    pub fn new(
        config: SessionConfig,
        spi: Box<dyn BoltStateMachineSpi + Send>,
        transaction_spi: Box<dyn TransactionSpi + Send>,
    ) -> Self {
        let id = Arc::from(config.connection_id());
        let signals = SessionHandle::new();
        let transactions = TransactionStateMachine::new(transaction_spi, signals.clone());
        session_debug!(id, "session created");
        Self {
            id,
            config,
            state: BoltState::Connected,
            connection_state: ConnectionState::new(),
            signals,
            spi,
            transactions,
        }
    }

    /// Handle one request.
    ///
    /// All outcomes, including recoverable failures, are delivered through
    /// `channel`. An `Err` means the session is beyond repair: it has already
    /// closed itself, told the client why (through `channel`), and the caller
    /// is expected to drop the connection.
    pub fn process(&mut self, request: Request, channel: &mut dyn ResponseChannel) -> Result<()> {
        session_debug!(self.id, "C: {:?}", request);
        let mut channel = ResponseGuard::new(channel, Arc::clone(&self.id), request.name());
        let res = self.process_guarded(request, &mut channel);
        if res.is_ok() && !channel.is_answered() {
            channel.success();
        }
        res
    }

    /// Deliver `error` through `channel` if possible, otherwise stash it
    /// like [`BoltStateMachine::mark_failed()`] does.
    pub fn handle_external_failure(
        &mut self,
        error: BoltError,
        channel: &mut dyn ResponseChannel,
    ) -> Result<()> {
        self.process(Request::ExternalFailure(error), channel)
    }

    /// Fail the session while no request is in flight.
    ///
    /// The error is reported and kept until the next request, which receives
    /// it instead of its own outcome. Only the first of several such errors
    /// survives, the request then receives IGNORED instead. A RESET discards
    /// the stashed error altogether.
    pub fn mark_failed(&mut self, error: BoltError) {
        if self.connection_state.is_closed() {
            session_debug!(self.id, "session closed, dropping failure {}", error);
            return;
        }
        self.fail(error, None);
    }

    /// See [`SessionHandle::interrupt()`].
    pub fn interrupt(&self) {
        self.signals.interrupt();
    }

    /// See [`SessionHandle::mark_for_termination()`].
    pub fn mark_for_termination(&self) {
        self.signals.mark_for_termination();
    }

    /// Roll back any open transaction and close the session for good.
    ///
    /// Calling this more than once is harmless.
    pub fn close(&mut self) {
        if self.connection_state.is_closed() {
            return;
        }
        if let Err(err) = self.transactions.rollback_if_open() {
            warn!("[{}] failed to roll back transaction on close: {}", self.id, err);
        }
        self.connection_state.mark_closed();
        self.set_state(BoltState::Closed);
        self.spi.on_terminate(&self.id);
    }

    /// A thread-safe handle to interrupt or terminate this session.
    pub fn handle(&self) -> SessionHandle {
        self.signals.clone()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The principal the session was authenticated as, if any.
    pub fn owner(&self) -> Option<&str> {
        self.connection_state.owner()
    }

    pub fn state(&self) -> BoltState {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn has_transaction(&self) -> bool {
        self.transactions.has_transaction()
    }

    pub fn is_closed(&self) -> bool {
        self.connection_state.is_closed()
    }

    /// The error waiting to be delivered to the next request, if any.
    pub fn pending_error(&self) -> Option<&BoltError> {
        self.connection_state.pending_error()
    }

    /// Whether the next request will be answered with IGNORED because of
    /// stashed failures.
    pub fn has_pending_ignore(&self) -> bool {
        self.connection_state.has_pending_ignore()
    }

    fn process_guarded(&mut self, request: Request, channel: &mut ResponseGuard) -> Result<()> {
        if self.connection_state.is_closed() {
            channel.ignored();
            return Ok(());
        }
        if self.signals.will_terminate() {
            session_debug!(self.id, "marked for termination, closing");
            self.close();
            channel.ignored();
            return Ok(());
        }
        if self.signals.is_interrupted() {
            self.set_state(BoltState::Interrupted);
            return self.process_interrupted(request, channel);
        }
        if !request.is_reset() {
            self.connection_state.drain_pending(channel);
        }

        let action = self.state.action_for(&request);
        self.execute(action, request, channel)
    }

    fn process_interrupted(&mut self, request: Request, channel: &mut ResponseGuard) -> Result<()> {
        match request {
            Request::Reset => match self.signals.consume_interrupt() {
                0 => self.reset(channel),
                remaining => {
                    session_debug!(self.id, "{} more RESET(s) expected", remaining);
                    channel.ignored();
                    Ok(())
                }
            },
            Request::ExternalFailure(error) => {
                // stashed until the final RESET discards it
                self.spi.report_error(&error);
                self.connection_state.mark_failed(error, None);
                channel.ignored();
                Ok(())
            }
            _ => {
                channel.ignored();
                Ok(())
            }
        }
    }

    fn execute(
        &mut self,
        action: Action,
        request: Request,
        channel: &mut ResponseGuard,
    ) -> Result<()> {
        match (action, request) {
            (Action::Authenticate, Request::Hello(hello)) => self.authenticate(hello, channel),
            (Action::RunAutoCommit, Request::Run(run)) => self.run_auto_commit(run, channel),
            (Action::RunInTransaction, Request::Run(run)) => self.run_in_transaction(run, channel),
            (Action::Begin, Request::Begin(parameters)) => {
                match self
                    .transactions
                    .begin(TransactionKind::Explicit, &parameters)
                {
                    Ok(()) => {
                        self.set_state(BoltState::InTransaction);
                        Ok(())
                    }
                    Err(err) => self.handle_transaction_error(err, channel),
                }
            }
            (
                Action::Stream { discard },
                Request::Pull(PullParameters { n, qid })
                | Request::Discard(DiscardParameters { n, qid }),
            ) => self.stream(n, qid, discard, channel),
            (Action::Commit, _) => self.commit(channel),
            (Action::Rollback, _) => self.rollback(channel),
            (Action::Reset, _) => self.reset(channel),
            (Action::Fail, Request::ExternalFailure(error)) => {
                self.fail(error, Some(channel));
                Ok(())
            }
            (Action::Ignore, _) => {
                channel.ignored();
                Ok(())
            }
            (Action::Breach(message), _) => Err(self.protocol_breach(message, channel)),
            (action, request) => {
                let message = format!("{:?} cannot be applied to {}", action, request.name());
                Err(self.fatal(
                    BoltError::fatal(status::GENERAL_UNKNOWN_ERROR, message.clone()),
                    BoltConnectionFatality::unexpected(message),
                    channel,
                ))
            }
        }
    }

    fn authenticate(&mut self, hello: HelloParameters, channel: &mut ResponseGuard) -> Result<()> {
        let result = match self.spi.authenticate(&hello.auth) {
            Ok(result) => result,
            Err(SpiError::Failure(error)) => {
                let message = error.message().to_string();
                return Err(self.fatal(
                    error.into_fatal(),
                    BoltConnectionFatality::unexpected(message),
                    channel,
                ));
            }
            Err(err) => return self.handle_spi_error(err, channel),
        };
        self.spi.register_client(&hello.user_agent);
        self.connection_state.authenticated_as(result.principal);
        channel.metadata("server", Value::from(self.config.server_agent.as_str()));
        channel.metadata("connection_id", Value::from(&*self.id));
        if result.credentials_expired {
            channel.metadata("credentials_expired", Value::from(true));
        }
        self.set_state(BoltState::Ready);
        Ok(())
    }

    fn run_auto_commit(&mut self, run: RunParameters, channel: &mut ResponseGuard) -> Result<()> {
        let start = Instant::now();
        if let Err(err) = self
            .transactions
            .begin(TransactionKind::Implicit, &run.transaction)
        {
            return self.handle_transaction_error(err, channel);
        }
        match self.transactions.run(&run.query, &run.parameters) {
            Ok(metadata) => {
                channel.metadata("fields", Value::from(metadata.fields));
                channel.metadata("t_first", Value::from(start.elapsed_millis()));
                self.set_state(BoltState::AutoCommit);
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = self.transactions.rollback_if_open() {
                    session_debug!(
                        self.id,
                        "failed to roll back implicit transaction: {}",
                        rollback_err
                    );
                }
                self.handle_transaction_error(err, channel)
            }
        }
    }

    fn run_in_transaction(
        &mut self,
        run: RunParameters,
        channel: &mut ResponseGuard,
    ) -> Result<()> {
        let start = Instant::now();
        match self.transactions.run(&run.query, &run.parameters) {
            Ok(metadata) => {
                channel.metadata("fields", Value::from(metadata.fields));
                channel.metadata("t_first", Value::from(start.elapsed_millis()));
                channel.metadata("qid", Value::from(metadata.query_id));
                Ok(())
            }
            Err(err) => self.handle_transaction_error(err, channel),
        }
    }

    fn stream(
        &mut self,
        n: i64,
        qid: i64,
        discard: bool,
        channel: &mut ResponseGuard,
    ) -> Result<()> {
        let start = Instant::now();
        let batch = match self.transactions.stream(qid, n, discard) {
            Ok(batch) => batch,
            Err(err) => return self.handle_transaction_error(err, channel),
        };
        if !discard {
            for record in &batch.records {
                if let Err(err) = channel.record(record) {
                    self.fail(BoltError::from_boxed(err), Some(channel));
                    return Ok(());
                }
            }
        }
        if batch.has_more {
            channel.metadata("has_more", Value::from(true));
            return Ok(());
        }
        for (key, value) in batch.metadata {
            channel.metadata(&key, value);
        }
        channel.metadata("t_last", Value::from(start.elapsed_millis()));
        if self.transactions.kind() == Some(TransactionKind::Implicit) {
            match self.transactions.commit() {
                Ok(bookmark) => {
                    if let Some(bookmark) = bookmark {
                        channel.metadata("bookmark", Value::from(bookmark));
                    }
                    self.set_state(BoltState::Ready);
                }
                Err(err) => return self.handle_transaction_error(err, channel),
            }
        }
        Ok(())
    }

    fn commit(&mut self, channel: &mut ResponseGuard) -> Result<()> {
        match self.transactions.commit() {
            Ok(bookmark) => {
                if let Some(bookmark) = bookmark {
                    channel.metadata("bookmark", Value::from(bookmark));
                }
                self.set_state(BoltState::Ready);
                Ok(())
            }
            Err(err) => self.handle_transaction_error(err, channel),
        }
    }

    fn rollback(&mut self, channel: &mut ResponseGuard) -> Result<()> {
        match self.transactions.rollback() {
            Ok(()) => self.set_state(BoltState::Ready),
            Err(err) => self.rollback_failed(err, channel),
        }
        Ok(())
    }

    fn reset(&mut self, channel: &mut ResponseGuard) -> Result<()> {
        if let Some(error) = self.connection_state.clear_pending() {
            session_debug!(self.id, "RESET discards pending failure {}", error);
        }
        let next_state = match self.connection_state.is_authenticated() {
            true => BoltState::Ready,
            false => BoltState::Connected,
        };
        match self.transactions.rollback_if_open() {
            Ok(()) => self.set_state(next_state),
            Err(err) => self.rollback_failed(err, channel),
        }
        Ok(())
    }

    fn rollback_failed(&mut self, err: TransactionError, channel: &mut ResponseGuard) {
        let error = match err {
            TransactionError::Spi(SpiError::Failure(error)) => error,
            err => BoltError::new(status::TRANSACTION_ROLLBACK_FAILED, err.to_string()),
        };
        self.fail(error, Some(channel));
    }

    fn handle_transaction_error(
        &mut self,
        err: TransactionError,
        channel: &mut ResponseGuard,
    ) -> Result<()> {
        match err {
            TransactionError::Spi(err) => self.handle_spi_error(err, channel),
            err @ (TransactionError::NoTransaction
            | TransactionError::AlreadyOpen
            | TransactionError::NoOpenResult { .. }) => {
                let message = format!(
                    "{} cannot be handled by a session in the {} state: {}.",
                    channel.request(),
                    self.state.name(),
                    err
                );
                Err(self.protocol_breach(message, channel))
            }
        }
    }

    fn handle_spi_error(&mut self, err: SpiError, channel: &mut ResponseGuard) -> Result<()> {
        match err {
            SpiError::Failure(error) => {
                self.fail(error, Some(channel));
                Ok(())
            }
            SpiError::Terminated
                if self.signals.will_terminate() || self.signals.is_interrupted() =>
            {
                session_debug!(self.id, "{} terminated early", channel.request());
                if let Err(err) = self.transactions.rollback_if_open() {
                    session_debug!(self.id, "failed to roll back terminated transaction: {}", err);
                }
                let next_state = match self.connection_state.is_authenticated() {
                    true => BoltState::Ready,
                    false => BoltState::Connected,
                };
                self.set_state(next_state);
                channel.ignored();
                Ok(())
            }
            SpiError::Terminated => {
                self.fail(
                    BoltError::new(
                        status::TRANSACTION_TERMINATED,
                        "The transaction has been terminated.",
                    ),
                    Some(channel),
                );
                Ok(())
            }
            SpiError::AuthorizationExpired { message } => Err(self.fatal(
                BoltError::fatal(status::SECURITY_AUTHORIZATION_EXPIRED, message.clone()),
                BoltConnectionFatality::AuthorizationExpired { message },
                channel,
            )),
            SpiError::Authentication { message } => Err(self.fatal(
                BoltError::fatal(status::SECURITY_UNAUTHORIZED, message.clone()),
                BoltConnectionFatality::Authentication { message },
                channel,
            )),
        }
    }

    /// Report `error` and route it to the client, the session is FAILED
    /// afterwards.
    fn fail(&mut self, error: BoltError, channel: Option<&mut ResponseGuard>) {
        self.spi.report_error(&error);
        self.connection_state.mark_failed(error, channel);
        self.set_state(BoltState::Failed);
    }

    fn protocol_breach(
        &mut self,
        message: String,
        channel: &mut ResponseGuard,
    ) -> BoltConnectionFatality {
        self.fatal(
            BoltError::fatal(status::REQUEST_INVALID, message.clone()),
            BoltConnectionFatality::protocol_breach(message),
            channel,
        )
    }

    fn fatal(
        &mut self,
        error: BoltError,
        fatality: BoltConnectionFatality,
        channel: &mut ResponseGuard,
    ) -> BoltConnectionFatality {
        session_debug!(self.id, "fatal: {}", fatality);
        self.spi.report_error(&error);
        channel.failure(&error);
        self.close();
        fatality
    }

    fn set_state(&mut self, state: BoltState) {
        if self.state != state {
            session_debug!(self.id, "{} > {}", self.state, state);
            self.state = state;
        }
    }
}
