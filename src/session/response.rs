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

use crate::error_::{BoltError, BoxError};
use crate::value::Value;

pub type BoltMeta = HashMap<String, Value>;
pub type BoltRecordFields = Vec<Value>;

/// The sink a single request's outcome is written to.
///
/// The session calls exactly one of [`deliver_success()`],
/// [`deliver_failure()`], or [`deliver_ignored()`] per processed request.
/// Metadata and records, if any, are handed over before that.
///
/// [`deliver_success()`]: ResponseChannel::deliver_success
/// [`deliver_failure()`]: ResponseChannel::deliver_failure
/// [`deliver_ignored()`]: ResponseChannel::deliver_ignored
#[cfg_attr(test, mockall::automock)]
pub trait ResponseChannel {
    fn on_metadata(&mut self, _key: &str, _value: Value) {}

    /// Receive one record of a PULL.
    ///
    /// Returning an error aborts the stream, the session then fails with
    /// `Neo.DatabaseError.General.UnknownError`.
    fn on_record(&mut self, _fields: &[Value]) -> Result<(), BoxError> {
        Ok(())
    }

    fn deliver_success(&mut self);
    fn deliver_failure(&mut self, error: &BoltError);
    fn deliver_ignored(&mut self);
}

/// The outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    Failure(BoltError),
    Ignored,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored)
    }
}

/// A channel that throws everything away.
///
/// Handy for requests whose outcome nobody is interested in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResponseChannel;

impl ResponseChannel for NullResponseChannel {
    fn deliver_success(&mut self) {}
    fn deliver_failure(&mut self, _error: &BoltError) {}
    fn deliver_ignored(&mut self) {}
}

/// A channel remembering everything it receives.
#[derive(Debug, Default, Clone)]
pub struct ResponseRecorder {
    outcomes: Vec<Outcome>,
    metadata: BoltMeta,
    records: Vec<BoltRecordFields>,
    reject_records: Option<String>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Default::default()
    }

    /// A recorder whose [`ResponseChannel::on_record()`] always fails with
    /// `message`.
    pub fn rejecting_records(message: impl Into<String>) -> Self {
        Self {
            reject_records: Some(message.into()),
            ..Default::default()
        }
    }

    /// The first outcome received, if any.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcomes.first()
    }

    /// All outcomes received, in order.
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn failure(&self) -> Option<&BoltError> {
        match self.outcome() {
            Some(Outcome::Failure(error)) => Some(error),
            _ => None,
        }
    }

    pub fn metadata(&self) -> &BoltMeta {
        &self.metadata
    }

    pub fn records(&self) -> &[BoltRecordFields] {
        &self.records
    }
}

impl ResponseChannel for ResponseRecorder {
    fn on_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(String::from(key), value);
    }

    fn on_record(&mut self, fields: &[Value]) -> Result<(), BoxError> {
        if let Some(message) = &self.reject_records {
            return Err(message.clone().into());
        }
        self.records.push(fields.to_vec());
        Ok(())
    }

    fn deliver_success(&mut self) {
        self.outcomes.push(Outcome::Success);
    }

    fn deliver_failure(&mut self, error: &BoltError) {
        self.outcomes.push(Outcome::Failure(error.clone()));
    }

    fn deliver_ignored(&mut self) {
        self.outcomes.push(Outcome::Ignored);
    }
}

type OptBox<T> = Option<Box<T>>;

/// A channel assembled from closures.
///
/// Metadata is collected and handed to the success callback as a whole.
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// use bolt_session::session::response::{ResponseCallbacks, ResponseChannel};
///
/// let done = Rc::new(Cell::new(false));
/// let done_cb = Rc::clone(&done);
/// let mut callbacks = ResponseCallbacks::new().with_on_summary(move || done_cb.set(true));
///
/// callbacks.deliver_ignored();
/// assert!(done.get());
/// ```
#[derive(Default)]
pub struct ResponseCallbacks {
    metadata: BoltMeta,
    on_success_cb: OptBox<dyn FnMut(BoltMeta)>,
    on_failure_cb: OptBox<dyn FnMut(&BoltError)>,
    on_ignored_cb: OptBox<dyn FnMut()>,
    on_record_cb: OptBox<dyn FnMut(&[Value]) -> Result<(), BoxError>>,
    on_summary_cb: OptBox<dyn FnMut()>,
}

impl ResponseCallbacks {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_on_success<F: FnMut(BoltMeta) + 'static>(mut self, cb: F) -> Self {
        self.on_success_cb = Some(Box::new(cb));
        self
    }

    pub fn with_on_failure<F: FnMut(&BoltError) + 'static>(mut self, cb: F) -> Self {
        self.on_failure_cb = Some(Box::new(cb));
        self
    }

    pub fn with_on_ignored<F: FnMut() + 'static>(mut self, cb: F) -> Self {
        self.on_ignored_cb = Some(Box::new(cb));
        self
    }

    pub fn with_on_record<F: FnMut(&[Value]) -> Result<(), BoxError> + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.on_record_cb = Some(Box::new(cb));
        self
    }

    /// Called after any of the outcome callbacks.
    pub fn with_on_summary<F: FnMut() + 'static>(mut self, cb: F) -> Self {
        self.on_summary_cb = Some(Box::new(cb));
        self
    }

    fn on_summary(&mut self) {
        if let Some(cb) = self.on_summary_cb.as_mut() {
            cb()
        }
    }
}

impl ResponseChannel for ResponseCallbacks {
    fn on_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(String::from(key), value);
    }

    fn on_record(&mut self, fields: &[Value]) -> Result<(), BoxError> {
        match self.on_record_cb.as_mut() {
            None => Ok(()),
            Some(cb) => cb(fields),
        }
    }

    fn deliver_success(&mut self) {
        let meta = std::mem::take(&mut self.metadata);
        if let Some(cb) = self.on_success_cb.as_mut() {
            cb(meta)
        }
        self.on_summary();
    }

    fn deliver_failure(&mut self, error: &BoltError) {
        self.metadata.clear();
        if let Some(cb) = self.on_failure_cb.as_mut() {
            cb(error)
        }
        self.on_summary();
    }

    fn deliver_ignored(&mut self) {
        self.metadata.clear();
        if let Some(cb) = self.on_ignored_cb.as_mut() {
            cb()
        }
        self.on_summary();
    }
}

impl Debug for ResponseCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "ResponseCallbacks {{\n  metadata: {:?}\n  on_success: {:?}\n  on_failure: {:?}\n  \
             on_ignored: {:?}\n  on_record: {:?}\n  on_summary: {:?}\n}}",
            self.metadata,
            self.on_success_cb.as_ref().map(|_| "..."),
            self.on_failure_cb.as_ref().map(|_| "..."),
            self.on_ignored_cb.as_ref().map(|_| "..."),
            self.on_record_cb.as_ref().map(|_| "..."),
            self.on_summary_cb.as_ref().map(|_| "..."),
        )
    }
}
