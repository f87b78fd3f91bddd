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

use rand::Rng;

// imports for docs
#[allow(unused)]
use super::BoltStateMachine;

const DEFAULT_SERVER_AGENT: &str = env!("BOLT_SESSION_DEFAULT_SERVER_AGENT");
const CONNECTION_ID_PREFIX: &str = "bolt-";

/// Configure how a [`BoltStateMachine`] presents itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub(crate) server_agent: String,
    pub(crate) connection_id: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_agent: String::from(DEFAULT_SERVER_AGENT),
            connection_id: None,
        }
    }
}

impl SessionConfig {
    /// Create a new session configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent string reported as `server` in the HELLO response.
    #[inline]
    pub fn with_server_agent(mut self, server_agent: String) -> Self {
        self.server_agent = server_agent;
        self
    }

    /// Use the default server agent.
    ///
    /// It consists of this crate's name and version as well as the version of
    /// the Rust compiler it was built with. The exact format is an
    /// implementation detail and may change in the future.
    #[inline]
    pub fn with_default_server_agent(mut self) -> Self {
        self.server_agent = String::from(DEFAULT_SERVER_AGENT);
        self
    }

    /// Use a fixed connection id.
    ///
    /// It is reported as `connection_id` in the HELLO response and prefixes
    /// all log lines of the session.
    #[inline]
    pub fn with_connection_id(mut self, connection_id: String) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    /// Let each session generate a random connection id (*default*).
    #[inline]
    pub fn with_generated_connection_id(mut self) -> Self {
        self.connection_id = None;
        self
    }

    pub(crate) fn connection_id(&self) -> String {
        match &self.connection_id {
            Some(id) => id.clone(),
            None => generate_connection_id(),
        }
    }
}

fn generate_connection_id() -> String {
    let id: u32 = rand::thread_rng().gen();
    format!("{CONNECTION_ID_PREFIX}{id:08x}")
}
