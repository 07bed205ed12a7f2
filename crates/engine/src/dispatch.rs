use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::{Alarm, NotificationSink, Result};

/// Fans fired alarms out to every registered sink, one delayed task per alarm.
///
/// The n-th alarm of a batch is delivered `n * stagger` after the batch was
/// handed over, so a burst of firings never stacks OS popups on top of each
/// other. Pending deliveries are dropped on `shutdown()`.
pub struct Dispatcher {
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
    stagger: Duration,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>, stagger: Duration) -> Self {
        Self {
            sinks: RwLock::new(sinks),
            stagger,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn sink_names(&self) -> Vec<String> {
        self.sinks
            .read()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Install `sink`, replacing any sink registered under the same name.
    /// Deliveries already scheduled keep the sink they were scheduled with.
    pub async fn replace_sink(&self, sink: Arc<dyn NotificationSink>) {
        let mut sinks = self.sinks.write().await;
        match sinks.iter().position(|s| s.name() == sink.name()) {
            Some(idx) => sinks[idx] = sink,
            None => sinks.push(sink),
        }
    }

    /// Returns true if a sink with that name was registered.
    pub async fn remove_sink(&self, name: &str) -> bool {
        let mut sinks = self.sinks.write().await;
        let before = sinks.len();
        sinks.retain(|s| s.name() != name);
        before != sinks.len()
    }

    /// Schedule delivery of `fired` and return immediately.
    pub async fn dispatch(&self, fired: Vec<Alarm>) {
        if fired.is_empty() {
            return;
        }
        let sinks: Arc<[Arc<dyn NotificationSink>]> = self.sinks.read().await.clone().into();

        for (index, alarm) in fired.into_iter().enumerate() {
            let delay = stagger_delay(self.stagger, index);
            let sinks = sinks.clone();
            let cancel = self.cancel.clone();

            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(alarm_id = %alarm.id, "Pending notification discarded on shutdown");
                    }
                    _ = tokio::time::sleep(delay) => {
                        deliver(&sinks, &alarm).await;
                    }
                }
            });
        }
    }

    /// Run `send_test` on every sink and report each outcome by sink name.
    pub async fn send_test_all(&self) -> Vec<(String, Result<()>)> {
        let sinks = self.sinks.read().await.clone();
        let mut results = Vec::with_capacity(sinks.len());
        for sink in sinks {
            let outcome = sink.send_test().await;
            if let Err(e) = &outcome {
                warn!(sink = sink.name(), error = %e, "Test notification failed");
            }
            results.push((sink.name().to_string(), outcome));
        }
        results
    }

    /// Discard every delivery that has not started yet.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// `index * stagger`, saturating instead of overflowing.
fn stagger_delay(stagger: Duration, index: usize) -> Duration {
    u32::try_from(index)
        .ok()
        .and_then(|n| stagger.checked_mul(n))
        .unwrap_or(Duration::MAX)
}

/// Best effort: a failing sink is logged and never retried.
async fn deliver(sinks: &[Arc<dyn NotificationSink>], alarm: &Alarm) {
    for sink in sinks {
        match sink.notify_fired(alarm).await {
            Ok(()) => info!(
                sink = sink.name(),
                alarm_id = %alarm.id,
                coin = %alarm.coin_name,
                "Notification sent"
            ),
            Err(e) => warn!(
                sink = sink.name(),
                alarm_id = %alarm.id,
                error = %e,
                "Notification failed"
            ),
        }
    }
}
