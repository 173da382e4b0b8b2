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

//! Background task that drives interpolation frames.

use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running frame loop.
///
/// The loop ticks at a fixed interval and skips missed ticks instead of
/// bursting to catch up. It stops when cancelled, when the callback returns
/// `false`, or when the handle is dropped.
pub struct FrameLoop {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLoop")
            .field("cancel_token", &self.cancel_token)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl FrameLoop {
    /// Spawn a frame loop calling `on_frame` with the frame instant.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn<F>(interval: Duration, mut on_frame: F) -> Self
    where
        F: FnMut(Instant) -> bool + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let task_cancel = cancel_token.clone();
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !on_frame(Instant::now()) {
                            debug!("Frame loop stopped by callback");
                            return;
                        }
                    }
                    () = task_cancel.cancelled() => {
                        info!("Frame loop cancelled");
                        return;
                    }
                }
            }
        });

        Self {
            cancel_token,
            handle,
        }
    }

    /// Stop scheduling frames.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the loop task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_frame_loop_ticks_until_stopped() {
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        let frame_loop = FrameLoop::spawn(Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        frame_loop.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(frame_loop.is_finished());
        let seen = frames.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {seen} frames");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(frames.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_frame_loop_stops_when_callback_declines() {
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        let frame_loop = FrameLoop::spawn(Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst) < 2
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(frame_loop.is_finished());
        assert_eq!(frames.load(Ordering::SeqCst), 3);
    }
}
