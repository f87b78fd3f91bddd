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

//! Internal module to enable mocking of time.

use std::fmt::Debug;
use std::time::{Duration, Instant as StdInstant};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Instant(StdInstant);

impl Debug for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Instant {
    #[inline]
    pub(crate) fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    /// Milliseconds elapsed since `self`, as reported in `t_first`/`t_last`.
    pub(crate) fn elapsed_millis(&self) -> i64 {
        i64::try_from(self.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(not(test))]
impl Instant {
    #[inline]
    pub(crate) fn now() -> Self {
        Self(StdInstant::now())
    }

    #[inline]
    pub(crate) fn elapsed(&self) -> Duration {
        Self::now().saturating_duration_since(*self)
    }
}

#[cfg(test)]
mod mockable_time {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static MOCKED_TIME: RefCell<Option<StdInstant>> = RefCell::new(None);
    }

    impl Instant {
        pub(crate) fn now() -> Self {
            Self(MOCKED_TIME.with(|t| t.borrow().unwrap_or_else(StdInstant::now)))
        }

        #[inline]
        pub(crate) fn elapsed(&self) -> Duration {
            Self::now().saturating_duration_since(*self)
        }
    }

    pub(crate) fn freeze_time() -> StdInstant {
        MOCKED_TIME.with(|t| *t.borrow_mut().insert(StdInstant::now()))
    }

    pub(crate) fn tick(duration: Duration) -> Result<StdInstant, String> {
        MOCKED_TIME.with(|t| {
            let mut mocked_time = t.borrow_mut();
            *mocked_time = mocked_time.map(|mocked_time| mocked_time + duration);
            mocked_time
                .as_ref()
                .copied()
                .ok_or_else(|| String::from("cannot tick time if not frozen"))
        })
    }

    pub(crate) fn unfreeze_time() -> Result<(), String> {
        MOCKED_TIME.with(|t| {
            t.borrow_mut()
                .take()
                .map(drop)
                .ok_or_else(|| String::from("cannot unfreeze time if not frozen"))
        })
    }
}

#[cfg(test)]
pub(crate) use mockable_time::*;
