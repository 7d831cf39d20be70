//! Event sinks
//!
//! The engine publishes every [`Event`] through an [`EventSink`]. Publishing
//! must never block a worker or the progress ticker, so every implementation
//! here is fire-and-forget: a full or closed channel drops the event.

use tokio::sync::{broadcast, mpsc};

use crate::types::Event;

/// Receiver of engine events, implemented by the host
pub trait EventSink: Send + Sync {
    /// Deliver one event without blocking
    fn publish(&self, event: Event);
}

impl EventSink for broadcast::Sender<Event> {
    fn publish(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine
        self.send(event).ok();
    }
}

impl EventSink for mpsc::UnboundedSender<Event> {
    fn publish(&self, event: Event) {
        self.send(event).ok();
    }
}

/// Adapter turning a closure into an [`EventSink`]
///
/// ```
/// use batch_dl::{Event, FnSink};
///
/// let sink = FnSink::new(|event: Event| {
///     println!("{}", event.kind());
/// });
/// # let _ = sink;
/// ```
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(Event) + Send + Sync,
{
    /// Wrap `f`
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventSink for FnSink<F>
where
    F: Fn(Event) + Send + Sync,
{
    fn publish(&self, event: Event) {
        (self.0)(event)
    }
}

/// Fan-out to the broadcast channel plus an optional host sink
pub(crate) struct EventHub {
    broadcast: broadcast::Sender<Event>,
    extra: Option<std::sync::Arc<dyn EventSink>>,
}

impl EventHub {
    pub(crate) fn new(capacity: usize, extra: Option<std::sync::Arc<dyn EventSink>>) -> Self {
        let (broadcast, _rx) = broadcast::channel(capacity);
        Self { broadcast, extra }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast.subscribe()
    }
}

impl EventSink for EventHub {
    fn publish(&self, event: Event) {
        tracing::trace!(event = event.kind().as_str(), "publishing event");
        if let Some(extra) = &self.extra {
            extra.publish(event.clone());
        }
        self.broadcast.publish(event);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProgressSnapshot;
    use std::sync::{Arc, Mutex};

    fn progress_event() -> Event {
        Event::Progress {
            progress: ProgressSnapshot::default(),
        }
    }

    #[test]
    fn broadcast_sink_without_receivers_drops_silently() {
        let (tx, rx) = broadcast::channel::<Event>(4);
        drop(rx);
        tx.publish(progress_event());
    }

    #[test]
    fn hub_delivers_to_subscribers_and_extra_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let extra: Arc<dyn EventSink> = Arc::new(FnSink::new(move |event: Event| {
            seen_clone.lock().unwrap().push(event.kind());
        }));

        let hub = EventHub::new(8, Some(extra));
        let mut rx = hub.subscribe();
        hub.publish(progress_event());

        assert_eq!(rx.try_recv().unwrap(), progress_event());
        assert_eq!(seen.lock().unwrap().as_slice(), &[crate::EventKind::Progress]);
    }

    #[test]
    fn unbounded_sender_sink_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.publish(progress_event());
        assert_eq!(rx.try_recv().unwrap(), progress_event());
    }
}
