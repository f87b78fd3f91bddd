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

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use super::response::{Outcome, ResponseChannel};
use super::session_debug;
use crate::error_::{BoltError, BoxError};
use crate::value::Value;

/// Wraps the channel of the request currently being processed.
///
/// Only the first outcome reaches the channel; later ones are dropped.
pub(crate) struct ResponseGuard<'a> {
    channel: &'a mut dyn ResponseChannel,
    session_id: Arc<str>,
    request: &'static str,
    answered: bool,
}

impl<'a> ResponseGuard<'a> {
    pub(crate) fn new(
        channel: &'a mut dyn ResponseChannel,
        session_id: Arc<str>,
        request: &'static str,
    ) -> Self {
        Self {
            channel,
            session_id,
            request,
            answered: false,
        }
    }

    pub(crate) fn is_answered(&self) -> bool {
        self.answered
    }

    /// Name of the request being answered.
    pub(crate) fn request(&self) -> &'static str {
        self.request
    }

    pub(crate) fn metadata(&mut self, key: &str, value: Value) {
        if !self.answered {
            self.channel.on_metadata(key, value);
        }
    }

    pub(crate) fn record(&mut self, fields: &[Value]) -> Result<(), BoxError> {
        self.channel.on_record(fields)
    }

    pub(crate) fn success(&mut self) {
        self.answer(Outcome::Success)
    }

    pub(crate) fn failure(&mut self, error: &BoltError) {
        self.answer(Outcome::Failure(error.clone()))
    }

    pub(crate) fn ignored(&mut self) {
        self.answer(Outcome::Ignored)
    }

    fn answer(&mut self, outcome: Outcome) {
        if self.answered {
            session_debug!(
                self.session_id,
                "dropping {:?} for {}: already answered",
                outcome,
                self.request
            );
            return;
        }
        self.answered = true;
        match &outcome {
            Outcome::Success => {
                session_debug!(self.session_id, "S: SUCCESS");
                self.channel.deliver_success()
            }
            Outcome::Failure(error) => {
                session_debug!(self.session_id, "S: FAILURE {}", error);
                self.channel.deliver_failure(error)
            }
            Outcome::Ignored => {
                session_debug!(self.session_id, "S: IGNORED");
                self.channel.deliver_ignored()
            }
        }
    }
}

impl Debug for ResponseGuard<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseGuard")
            .field("request", &self.request)
            .field("answered", &self.answered)
            .finish()
    }
}

/// Per-session bookkeeping besides the protocol state itself.
#[derive(Debug, Default)]
pub(crate) struct ConnectionState {
    pending_error: Option<BoltError>,
    pending_ignore: bool,
    closed: bool,
    authenticated: bool,
    owner: Option<String>,
}

impl ConnectionState {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Route `error` to the client.
    ///
    /// With a channel at hand, the error is delivered right away (unless the
    /// channel already carries an outcome, then it's dropped). Without one it
    /// is stashed for the next request: the first stashed error is kept, any
    /// further one turns the next answer into IGNORED instead.
    pub(crate) fn mark_failed(&mut self, error: BoltError, channel: Option<&mut ResponseGuard>) {
        match channel {
            Some(channel) => channel.failure(&error),
            None => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(error);
                } else {
                    self.pending_ignore = true;
                }
            }
        }
    }

    /// Deliver whatever has been stashed to `channel` and clear the stash.
    pub(crate) fn drain_pending(&mut self, channel: &mut ResponseGuard) {
        let pending_error = self.pending_error.take();
        if std::mem::take(&mut self.pending_ignore) {
            channel.ignored();
        } else if let Some(error) = pending_error {
            channel.failure(&error);
        }
    }

    /// Forget stashed failures without delivering them.
    ///
    /// Returns the error that was pending, if any.
    pub(crate) fn clear_pending(&mut self) -> Option<BoltError> {
        self.pending_ignore = false;
        self.pending_error.take()
    }

    pub(crate) fn pending_error(&self) -> Option<&BoltError> {
        self.pending_error.as_ref()
    }

    pub(crate) fn has_pending_ignore(&self) -> bool {
        self.pending_ignore
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn authenticated_as(&mut self, owner: Option<String>) {
        self.authenticated = true;
        self.owner = owner;
    }

    pub(crate) fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}
