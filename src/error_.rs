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

use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use thiserror::Error;

// imports for docs
#[allow(unused)]
use crate::session::spi::TransactionSpi;
#[allow(unused)]
use crate::session::BoltStateMachine;

/// Error type returned by response channels that fail to accept records.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Status codes used by the session itself.
///
/// Collaborators are free to use any other code following the
/// `Neo.<Classification>.<Category>.<Title>` scheme.
pub mod status {
    pub const GENERAL_UNKNOWN_ERROR: &str = "Neo.DatabaseError.General.UnknownError";
    pub const REQUEST_INVALID: &str = "Neo.ClientError.Request.Invalid";
    pub const REQUEST_NO_THREADS_AVAILABLE: &str = "Neo.TransientError.Request.NoThreadsAvailable";
    pub const SECURITY_UNAUTHORIZED: &str = "Neo.ClientError.Security.Unauthorized";
    pub const SECURITY_AUTHORIZATION_EXPIRED: &str =
        "Neo.ClientError.Security.AuthorizationExpired";
    pub const TRANSACTION_TERMINATED: &str = "Neo.ClientError.Transaction.Terminated";
    pub const TRANSACTION_ROLLBACK_FAILED: &str =
        "Neo.DatabaseError.Transaction.TransactionRollbackFailed";
    pub const TRANSACTION_COMMIT_FAILED: &str =
        "Neo.DatabaseError.Transaction.TransactionCommitFailed";
    pub const STATEMENT_SYNTAX_ERROR: &str = "Neo.ClientError.Statement.SyntaxError";
}

/// An error as it is reported to the client (a `FAILURE` response).
///
/// Errors are plain values: recoverable failures never leave
/// [`BoltStateMachine::process()`] as an `Err`, they are delivered through the
/// request's response channel instead (or stashed until the next request).
#[derive(Debug, Clone)]
pub struct BoltError {
    code: String,
    message: String,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
    fatal: bool,
}

impl BoltError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            cause: None,
            fatal: false,
        }
    }

    /// An error that will terminate the session after being sent.
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            ..Self::new(code, message)
        }
    }

    /// Wrap an arbitrary error as `Neo.DatabaseError.General.UnknownError`.
    pub fn from_cause<E: StdError + Send + Sync + 'static>(cause: E) -> Self {
        Self {
            code: String::from(status::GENERAL_UNKNOWN_ERROR),
            message: cause.to_string(),
            cause: Some(Arc::new(cause)),
            fatal: false,
        }
    }

    pub(crate) fn from_boxed(cause: BoxError) -> Self {
        Self {
            code: String::from(status::GENERAL_UNKNOWN_ERROR),
            message: cause.to_string(),
            cause: Some(Arc::from(cause)),
            fatal: false,
        }
    }

    pub fn with_cause<E: StdError + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("")
    }

    pub fn category(&self) -> &str {
        self.code.split('.').nth(2).unwrap_or("")
    }

    pub fn title(&self) -> &str {
        self.code.split('.').nth(3).unwrap_or("")
    }

    pub(crate) fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl PartialEq for BoltError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message && self.fatal == other.fatal
    }
}

impl Eq for BoltError {}

impl Display for BoltError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for BoltError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Failures reported by the session's collaborators.
///
/// See [`TransactionSpi`] and [`crate::session::spi::BoltStateMachineSpi`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpiError {
    /// An ordinary failure (e.g., a syntax error or a constraint violation).
    /// The session becomes FAILED but stays open.
    #[error("{0}")]
    Failure(BoltError),
    /// The authenticated user's authorization expired while executing work.
    #[error("authorization expired: {message}")]
    AuthorizationExpired { message: String },
    /// The provided credentials were rejected.
    #[error("authentication failed: {message}")]
    Authentication { message: String },
    /// The work was cut short because its [`crate::session::TerminationToken`]
    /// was marked.
    #[error("the transaction has been terminated")]
    Terminated,
}

impl From<BoltError> for SpiError {
    fn from(err: BoltError) -> Self {
        SpiError::Failure(err)
    }
}

pub type SpiResult<T> = std::result::Result<T, SpiError>;

#[derive(Error, Debug)]
/// Conditions that void the session.
///
/// When [`BoltStateMachine::process()`] returns one of these, the session has
/// already been closed and the caller must tear down the connection.
pub enum BoltConnectionFatality {
    /// A request arrived that is not legal in the session's current state.
    #[error("protocol breach: {message}")]
    #[non_exhaustive]
    ProtocolBreach { message: String },

    /// The authorization of the authenticated user expired mid-request.
    /// Callers may use this to force re-authentication instead of a plain
    /// teardown.
    #[error("authorization expired: {message}")]
    #[non_exhaustive]
    AuthorizationExpired { message: String },

    /// HELLO was rejected by the authentication collaborator.
    #[error("authentication failed: {message}")]
    #[non_exhaustive]
    Authentication { message: String },

    /// Anything else that cannot be recovered from.
    #[error("session failed fatally: {message}")]
    #[non_exhaustive]
    Unexpected { message: String },
}

impl BoltConnectionFatality {
    pub(crate) fn protocol_breach<S: Into<String>>(message: S) -> Self {
        Self::ProtocolBreach {
            message: message.into(),
        }
    }

    pub(crate) fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    pub fn is_auth_fatality(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationExpired { .. } | Self::Authentication { .. }
        )
    }

    pub fn is_protocol_breach(&self) -> bool {
        matches!(self, Self::ProtocolBreach { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::ProtocolBreach { message }
            | Self::AuthorizationExpired { message }
            | Self::Authentication { message }
            | Self::Unexpected { message } => message,
        }
    }
}

pub type Result<T> = std::result::Result<T, BoltConnectionFatality>;
