//! Broadcast event bus for engine events.
//!
//! Every component that wants to observe pairing, capability updates or
//! unmapped datapoints subscribes here. Publishing never fails the caller:
//! with no subscribers the event is simply dropped.

use tokio::sync::broadcast;

use crate::event::EngineEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Returns `true` if there was at least one subscriber.
    pub fn publish(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events for a single device.
    pub fn subscribe_device(&self, device_id: impl Into<String>) -> DeviceReceiver {
        DeviceReceiver {
            rx: self.tx.subscribe(),
            device_id: device_id.into(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<EngineEvent>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "event receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every event currently buffered.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Receiver that only yields events for one device.
pub struct DeviceReceiver {
    rx: broadcast::Receiver<EngineEvent>,
    device_id: String,
}

impl DeviceReceiver {
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.device_id() == self.device_id => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CapabilityValue;

    fn update(device: &str) -> EngineEvent {
        EngineEvent::CapabilityUpdated {
            device_id: device.to_string(),
            capability: "measure_temperature".to_string(),
            value: CapabilityValue::Float(21.5),
            dp: Some(1),
            timestamp: 0,
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.publish(update("a")));
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert!(bus.publish(update("a")));

        let event = rx.recv().await.unwrap();
        assert!(event.is_capability_update());
        assert_eq!(event.device_id(), "a");
    }

    #[tokio::test]
    async fn test_device_filter() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_device("b");
        bus.publish(update("a"));
        bus.publish(update("b"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.device_id(), "b");
    }

    #[test]
    fn test_drain() {
        let bus = EventBus::with_capacity(8);
        let mut rx = bus.subscribe();
        bus.publish(update("a"));
        bus.publish(update("b"));
        assert_eq!(rx.drain().len(), 2);
        assert!(rx.try_recv().is_none());
    }
}
