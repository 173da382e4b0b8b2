// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the transport and by correlated requests.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    #[error("websocket connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout { request_id: String, timeout: Duration },

    #[error("connection lost before request {0} was answered")]
    Disconnected(String),

    #[error("server rejected request {request_id}: {message}")]
    Server { request_id: String, message: String },

    #[error("connection closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("failed to encode action: {0}")]
    Encode(#[from] serde_json::Error),
}
