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

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Cooperative cancellation flag handed to the transaction collaborator
/// together with each transaction it opens.
///
/// Long-running work is expected to poll [`TerminationToken::is_marked()`] and
/// bail out with [`crate::SpiError::Terminated`] once it returns `true`.
#[derive(Debug, Default)]
pub struct TerminationToken(Arc<AtomicBool>);

impl PartialEq for TerminationToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TerminationToken {}

impl Hash for TerminationToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let bool_ref: &AtomicBool = &self.0;
        std::ptr::hash(bool_ref, state);
    }
}

impl Clone for TerminationToken {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl TerminationToken {
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Signals {
    interrupt_counter: AtomicUsize,
    terminated: AtomicBool,
    current_transaction: Mutex<Option<TerminationToken>>,
}

/// The thread-safe surface of a session.
///
/// Obtained through [`crate::BoltStateMachine::handle()`], it can be cloned
/// and sent to other threads while the owning thread keeps processing
/// requests. Nothing else about the session is reachable through it.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle(Arc<Signals>);

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Discard every request up to (and including) the matching RESET.
    ///
    /// Calls accumulate: `n` interrupts need `n` RESET requests before the
    /// session accepts work again. Any running transaction is asked to
    /// terminate.
    pub fn interrupt(&self) {
        self.0.interrupt_counter.fetch_add(1, Ordering::AcqRel);
        self.mark_current_transaction();
    }

    /// Cooperatively cancel the work currently in flight.
    ///
    /// This is not an error: the session will not report it nor become
    /// FAILED because of it. The next processed request closes the session.
    pub fn mark_for_termination(&self) {
        self.0.terminated.store(true, Ordering::Release);
        self.mark_current_transaction();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt_count() > 0
    }

    pub fn will_terminate(&self) -> bool {
        self.0.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn interrupt_count(&self) -> usize {
        self.0.interrupt_counter.load(Ordering::Acquire)
    }

    /// Consume one interrupt and return how many are left.
    ///
    /// Never underflows: returns `0` without decrementing when no interrupt
    /// is pending.
    pub(crate) fn consume_interrupt(&self) -> usize {
        match self.0.interrupt_counter.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |count| count.checked_sub(1),
        ) {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    /// Register the token of a freshly opened transaction.
    ///
    /// If a signal arrived before the transaction existed, the token is marked
    /// right away so the signal is not missed.
    pub(crate) fn set_current_transaction(&self, token: Option<TerminationToken>) {
        let mut current = self.0.current_transaction.lock();
        if let Some(token) = &token {
            if self.will_terminate() || self.is_interrupted() {
                token.mark();
            }
        }
        *current = token;
    }

    fn mark_current_transaction(&self) {
        if let Some(token) = self.0.current_transaction.lock().as_ref() {
            token.mark();
        }
    }
}
