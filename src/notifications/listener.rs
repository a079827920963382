use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::bus::{NotificationBus, StreamEvent};

/// In-process stand-in for the database `summary_update` notification
/// channel. The summary repository publishes meeting ids here after commit;
/// the listener task translates them into bus broadcasts. A deployment that
/// scales out horizontally can replace this with an external channel without
/// touching the bus.
#[derive(Clone)]
pub struct SummaryChannel {
    tx: broadcast::Sender<String>,
}

impl Default for SummaryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Best-effort publish; dropped when nobody is listening.
    pub fn publish(&self, meeting_id: &str) {
        let _ = self.tx.send(meeting_id.to_string());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

/// Forwards `summary_update` channel messages to live subscribers until
/// shutdown.
pub async fn run_update_listener(
    channel: SummaryChannel,
    bus: Arc<NotificationBus>,
    shutdown: CancellationToken,
) {
    let mut rx = channel.subscribe();
    info!("summary_update listener started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = rx.recv() => match received {
                Ok(meeting_id) => {
                    let event = StreamEvent::SummaryUpdate {
                        meeting_id: meeting_id.clone(),
                    };
                    bus.broadcast(&meeting_id, event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("summary_update listener lagged, skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    info!("summary_update listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_translates_channel_messages_into_bus_events() {
        let channel = SummaryChannel::new();
        let bus = Arc::new(NotificationBus::new());
        let shutdown = CancellationToken::new();

        let (_id, mut rx) = bus.subscribe("m1");
        let task = tokio::spawn(run_update_listener(
            channel.clone(),
            bus.clone(),
            shutdown.clone(),
        ));

        channel.publish("m1");
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            StreamEvent::SummaryUpdate {
                meeting_id: "m1".into()
            }
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn publish_without_listener_is_a_no_op() {
        let channel = SummaryChannel::new();
        channel.publish("m1");
    }
}
