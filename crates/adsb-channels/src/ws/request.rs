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

//! Request/response correlation by request id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ChannelError;

pub type Reply = Result<Value, ChannelError>;

/// Requests waiting for a server reply.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Reply>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new request and return its id and reply receiver.
    #[must_use]
    pub fn register(&self) -> (String, oneshot::Receiver<Reply>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id.clone(), tx);
        (request_id, rx)
    }

    /// Deliver a successful reply. Returns `false` for unknown ids.
    pub fn resolve(&self, request_id: &str, data: Value) -> bool {
        self.complete(request_id, Ok(data))
    }

    /// Deliver a server error. Returns `false` for unknown ids.
    pub fn reject(&self, request_id: &str, message: String) -> bool {
        self.complete(
            request_id,
            Err(ChannelError::Server {
                request_id: request_id.to_string(),
                message,
            }),
        )
    }

    /// Forget a request without answering it (timeout, send failure).
    pub fn cancel(&self, request_id: &str) {
        self.lock().remove(request_id);
    }

    /// Fail every outstanding request because the session ended.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (request_id, tx) in drained {
            let _ = tx.send(Err(ChannelError::Disconnected(request_id)));
        }
        count
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn complete(&self, request_id: &str, reply: Reply) -> bool {
        match self.lock().remove(request_id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve() {
        let pending = PendingRequests::new();
        let (id, rx) = pending.register();
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(&id, json!({"ok": true})));
        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));
        assert!(pending.is_empty());
        assert!(!pending.resolve(&id, json!(null)));
    }

    #[tokio::test]
    async fn test_reject() {
        let pending = PendingRequests::new();
        let (id, rx) = pending.register();
        assert!(pending.reject(&id, "unknown aircraft".to_string()));
        assert!(matches!(
            rx.await.unwrap(),
            Err(ChannelError::Server { message, .. }) if message == "unknown aircraft"
        ));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let pending = PendingRequests::new();
        let (_, rx1) = pending.register();
        let (_, rx2) = pending.register();
        assert_eq!(pending.fail_all(), 2);
        assert!(matches!(rx1.await.unwrap(), Err(ChannelError::Disconnected(_))));
        assert!(matches!(rx2.await.unwrap(), Err(ChannelError::Disconnected(_))));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_cancel() {
        let pending = PendingRequests::new();
        let (id, _rx) = pending.register();
        pending.cancel(&id);
        assert!(pending.is_empty());
    }
}
