// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Two-phase service termination.
//!
//! Phase one happens on the request path: the `shutdown` action produces its
//! acknowledgment and the flight service returns it. Phase two is posted here:
//! a detached task waits out the grace period so the acknowledgment can be
//! flushed, then fires the signal the tonic server is serving against.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::texflight_logging::info;

#[derive(Clone, Debug)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<bool>>,
    scheduled: Arc<AtomicBool>,
    grace: Duration,
}

/// Resolves once termination has been triggered.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownController {
    pub fn new(grace: Duration) -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                tx: Arc::new(tx),
                scheduled: Arc::new(AtomicBool::new(false)),
                grace,
            },
            ShutdownSignal { rx },
        )
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Fires the shutdown signal immediately.
    pub fn trigger(&self) {
        self.scheduled.store(true, Ordering::SeqCst);
        self.tx.send_replace(true);
    }

    /// Posts a deferred termination onto its own task. Must be called from
    /// within a tokio runtime. Returns `false` when one is already pending.
    pub fn schedule(&self) -> bool {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let tx = Arc::clone(&self.tx);
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            info!(
                target: "texflight::flight",
                grace_ms = grace.as_millis() as u64,
                "Flight Server is shutting down"
            );
            tx.send_replace(true);
        });
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub async fn wait(mut self) {
        // A dropped controller also means nobody can keep the server alive.
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ShutdownController;

    #[tokio::test]
    async fn scheduled_shutdown_fires_after_grace() {
        let (controller, signal) = ShutdownController::new(Duration::from_millis(50));
        assert!(controller.schedule());
        assert!(!controller.is_triggered());
        tokio::time::timeout(Duration::from_secs(5), signal.wait())
            .await
            .expect("signal fired");
        assert!(controller.is_triggered());
    }

    #[tokio::test]
    async fn second_schedule_is_ignored() {
        let (controller, _signal) = ShutdownController::new(Duration::from_secs(60));
        assert!(controller.schedule());
        assert!(!controller.schedule());
        assert!(controller.is_scheduled());
    }

    #[tokio::test]
    async fn trigger_wakes_every_subscriber() {
        let (controller, first) = ShutdownController::new(Duration::from_secs(60));
        let second = controller.signal();
        controller.trigger();
        tokio::time::timeout(Duration::from_secs(1), async {
            first.wait().await;
            second.wait().await;
        })
        .await
        .expect("both signals fired");
    }
}
