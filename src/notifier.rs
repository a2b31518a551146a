use log::{debug, info};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NotifyEvent {
    Progress { fraction: f64 },
    Finished { id: String },
}

/// Message published on a channel, usually the id of the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub channel: String,
    pub event: NotifyEvent,
}

pub trait Notifier: Send + Sync {
    fn publish(&self, channel: &str, event: NotifyEvent);
}

/// Fans notifications out to any number of subscribers.
#[derive(Clone)]
pub struct ChannelNotifier {
    sender: broadcast::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, channel: &str, event: NotifyEvent) {
        // no subscribers is fine
        let _ = self.sender.send(Notification {
            channel: channel.to_string(),
            event,
        });
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn publish(&self, channel: &str, event: NotifyEvent) {
        match event {
            NotifyEvent::Progress { fraction } => {
                debug!("[{}] progress {:.1}%", channel, fraction * 100.0)
            }
            NotifyEvent::Finished { id } => info!("[{}] finished {}", channel, id),
        }
    }
}
