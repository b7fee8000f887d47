//! Per-device datapoint dispatch.
//!
//! Every frame on the proprietary cluster walks the same state machine:
//!
//! ```text
//! Idle -> FrameReceived -> Parsed{dp} -> Dispatched{dp, capability} -> Idle
//!                                    \-> Unmapped{dp} -> Idle
//! ```
//!
//! `Parsed -> Dispatched` happens once per handler bound to the datapoint id.
//! A datapoint with no handler is logged at debug level and dropped; the
//! remaining records of the frame are still dispatched. There are no retries
//! here, retransmission is the reporting device's business.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, trace, warn};

use dpbridge_core::{now_ts, EngineEvent, EventBus, FrameError, Result};

use crate::datapoint::{
    commands, encode_time_sync, Datapoint, DatapointId, ReportFrame, PROPRIETARY_CLUSTER,
};
use crate::endpoint::{EndpointEvent, EndpointHandle, EndpointListener};

/// Dispatcher state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchState {
    Idle,
    FrameReceived,
    Parsed { dp: DatapointId },
    Dispatched { dp: DatapointId, capability: String },
    Unmapped { dp: DatapointId },
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::FrameReceived => f.write_str("frame_received"),
            Self::Parsed { dp } => write!(f, "parsed(dp={})", dp),
            Self::Dispatched { dp, capability } => {
                write!(f, "dispatched(dp={} -> {})", dp, capability)
            }
            Self::Unmapped { dp } => write!(f, "unmapped(dp={})", dp),
        }
    }
}

/// Consumer of one datapoint id, installed by a trait.
#[async_trait]
pub trait DatapointHandler: Send + Sync {
    /// Capability the handler updates.
    fn capability(&self) -> &str;

    async fn handle(&self, datapoint: &Datapoint) -> Result<()>;
}

/// What a single dispatch cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub seq: Option<u16>,
    /// `(dp, capability)` for every handler that succeeded.
    pub dispatched: Vec<(DatapointId, String)>,
    pub unmapped: Vec<DatapointId>,
    /// Handlers that returned an error.
    pub failed: Vec<(DatapointId, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every state entered during the cycle, ending in `Idle`.
    pub transitions: Vec<DispatchState>,
}

impl DispatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.unmapped.is_empty() && self.failed.is_empty() && self.error.is_none()
    }
}

/// Routes proprietary-cluster frames of one device to its trait handlers.
pub struct DatapointDispatcher {
    device_id: String,
    handlers: RwLock<HashMap<DatapointId, Vec<Arc<dyn DatapointHandler>>>>,
    state: Mutex<DispatchState>,
    /// One cycle at a time per device.
    cycle: tokio::sync::Mutex<()>,
    endpoint: Option<Weak<dyn EndpointHandle>>,
    events: EventBus,
}

impl DatapointDispatcher {
    pub fn new(device_id: impl Into<String>, events: EventBus) -> Self {
        Self {
            device_id: device_id.into(),
            handlers: RwLock::new(HashMap::new()),
            state: Mutex::new(DispatchState::Idle),
            cycle: tokio::sync::Mutex::new(()),
            endpoint: None,
            events,
        }
    }

    /// Attach the endpoint used to answer time-sync requests.
    pub fn with_endpoint(mut self, endpoint: &Arc<dyn EndpointHandle>) -> Self {
        self.endpoint = Some(Arc::downgrade(endpoint));
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> DispatchState {
        self.state.lock().clone()
    }

    pub fn register(&self, dp: DatapointId, handler: Arc<dyn DatapointHandler>) {
        trace!(device = %self.device_id, dp, capability = handler.capability(), "Registered datapoint handler");
        self.handlers.write().entry(dp).or_default().push(handler);
    }

    pub fn is_mapped(&self, dp: DatapointId) -> bool {
        self.handlers.read().get(&dp).is_some_and(|h| !h.is_empty())
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    /// Drop every handler. Later frames are all unmapped.
    pub fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.handlers.write());
        removed.values().map(Vec::len).sum()
    }

    fn transition(&self, outcome: &mut DispatchOutcome, next: DispatchState) {
        trace!(device = %self.device_id, state = %next, "Dispatch transition");
        *self.state.lock() = next.clone();
        outcome.transitions.push(next);
    }

    /// Run one dispatch cycle over a report payload.
    pub async fn dispatch_frame(&self, payload: &[u8]) -> DispatchOutcome {
        let _cycle = self.cycle.lock().await;
        let mut outcome = DispatchOutcome::default();
        self.transition(&mut outcome, DispatchState::FrameReceived);

        let frame = match ReportFrame::parse(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device = %self.device_id, error = %e, "Malformed datapoint frame");
                outcome.error = Some(e.to_string());
                self.transition(&mut outcome, DispatchState::Idle);
                return outcome;
            }
        };
        outcome.seq = Some(frame.seq());

        for record in frame.datapoints() {
            match record {
                Ok(datapoint) => self.dispatch_one(&datapoint, &mut outcome).await,
                Err(e) => {
                    self.malformed(&e, &mut outcome);
                    break;
                }
            }
        }

        self.transition(&mut outcome, DispatchState::Idle);
        outcome
    }

    fn malformed(&self, error: &FrameError, outcome: &mut DispatchOutcome) {
        warn!(
            device = %self.device_id,
            error = %error,
            delivered = outcome.dispatched.len(),
            "Malformed datapoint record, dropping rest of frame"
        );
        outcome.error = Some(error.to_string());
    }

    async fn dispatch_one(&self, datapoint: &Datapoint, outcome: &mut DispatchOutcome) {
        let dp = datapoint.dp;
        self.transition(outcome, DispatchState::Parsed { dp });

        // Clone out so the lock is not held across handler awaits.
        let handlers = self.handlers.read().get(&dp).cloned().unwrap_or_default();
        if handlers.is_empty() {
            self.transition(outcome, DispatchState::Unmapped { dp });
            debug!(device = %self.device_id, dp, value = %datapoint.value, "Unmapped datapoint, discarding");
            self.events.publish(EngineEvent::DatapointUnmapped {
                device_id: self.device_id.clone(),
                dp,
                timestamp: now_ts(),
            });
            outcome.unmapped.push(dp);
            return;
        }

        for handler in handlers {
            let capability = handler.capability().to_string();
            match handler.handle(datapoint).await {
                Ok(()) => {
                    self.transition(
                        outcome,
                        DispatchState::Dispatched {
                            dp,
                            capability: capability.clone(),
                        },
                    );
                    outcome.dispatched.push((dp, capability));
                }
                Err(e) => {
                    warn!(device = %self.device_id, dp, capability = %capability, error = %e, "Datapoint handler failed");
                    outcome.failed.push((dp, capability));
                }
            }
        }
    }

    async fn answer_time_sync(&self, payload: &[u8]) {
        let seq = match payload {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        };
        let Some(endpoint) = self.endpoint.as_ref().and_then(Weak::upgrade) else {
            debug!(device = %self.device_id, "Time sync requested but no endpoint attached");
            return;
        };
        let answer = encode_time_sync(seq, chrono::Utc::now());
        if let Err(e) = endpoint
            .send_command(PROPRIETARY_CLUSTER, commands::TIME_SYNC, answer)
            .await
        {
            warn!(device = %self.device_id, error = %e, "Failed to answer time sync");
        } else {
            debug!(device = %self.device_id, seq, "Answered time sync");
        }
    }
}

impl fmt::Debug for DatapointDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatapointDispatcher")
            .field("device_id", &self.device_id)
            .field("handlers", &self.handler_count())
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl EndpointListener for DatapointDispatcher {
    async fn on_event(&self, event: &EndpointEvent) {
        match event {
            EndpointEvent::DatapointReport { command, payload }
                if commands::carries_datapoints(*command) =>
            {
                self.dispatch_frame(payload).await;
            }
            EndpointEvent::DatapointReport { command, payload }
                if *command == commands::TIME_SYNC =>
            {
                self.answer_time_sync(payload).await;
            }
            EndpointEvent::DatapointReport { command, .. } => {
                trace!(device = %self.device_id, command, "Ignoring proprietary command");
            }
            EndpointEvent::AttributeReport { cluster, .. } => {
                trace!(device = %self.device_id, cluster, "Ignoring attribute report");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::{encode_datapoints, DpValue};

    struct Recorder {
        capability: String,
        seen: Mutex<Vec<Datapoint>>,
        fail: bool,
    }

    impl Recorder {
        fn new(capability: &str) -> Arc<Self> {
            Arc::new(Self {
                capability: capability.to_string(),
                seen: Mutex::new(Vec::new()),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl DatapointHandler for Recorder {
        fn capability(&self) -> &str {
            &self.capability
        }

        async fn handle(&self, datapoint: &Datapoint) -> Result<()> {
            if self.fail {
                return Err(dpbridge_core::Error::NotFound("boom".into()));
            }
            self.seen.lock().push(datapoint.clone());
            Ok(())
        }
    }

    fn frame(records: &[(u8, DpValue)]) -> Vec<u8> {
        let dps: Vec<_> = records
            .iter()
            .map(|(dp, v)| Datapoint::new(*dp, v.clone()))
            .collect();
        encode_datapoints(7, &dps).unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_dispatch_mapped() {
        let dispatcher = DatapointDispatcher::new("dev1", EventBus::new());
        let temp = Recorder::new("measure_temperature");
        dispatcher.register(1, temp.clone());

        let outcome = dispatcher
            .dispatch_frame(&frame(&[(1, DpValue::Value(215))]))
            .await;

        assert!(outcome.is_clean());
        assert_eq!(outcome.seq, Some(7));
        assert_eq!(outcome.dispatched, vec![(1, "measure_temperature".to_string())]);
        assert_eq!(
            outcome.transitions,
            vec![
                DispatchState::FrameReceived,
                DispatchState::Parsed { dp: 1 },
                DispatchState::Dispatched {
                    dp: 1,
                    capability: "measure_temperature".to_string()
                },
                DispatchState::Idle,
            ]
        );
        assert_eq!(temp.seen.lock()[0].value, DpValue::Value(215));
        assert_eq!(dispatcher.state(), DispatchState::Idle);
    }

    #[tokio::test]
    async fn test_unmapped_is_discarded_and_published() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let dispatcher = DatapointDispatcher::new("dev1", bus);
        let temp = Recorder::new("measure_temperature");
        dispatcher.register(1, temp.clone());

        let outcome = dispatcher
            .dispatch_frame(&frame(&[(99, DpValue::Value(1)), (1, DpValue::Value(200))]))
            .await;

        assert_eq!(outcome.unmapped, vec![99]);
        assert_eq!(outcome.dispatched.len(), 1);
        assert!(outcome
            .transitions
            .contains(&DispatchState::Unmapped { dp: 99 }));
        assert_eq!(temp.seen.lock().len(), 1);

        match rx.try_recv() {
            Some(EngineEvent::DatapointUnmapped { device_id, dp, .. }) => {
                assert_eq!(device_id, "dev1");
                assert_eq!(dp, 99);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_tail_keeps_earlier_records() {
        let dispatcher = DatapointDispatcher::new("dev1", EventBus::new());
        let temp = Recorder::new("measure_temperature");
        dispatcher.register(1, temp.clone());

        let mut payload = frame(&[(1, DpValue::Value(215))]);
        // dp 2, value type, declares 4 bytes, carries 1
        payload.extend_from_slice(&[2, 2, 0, 4, 0]);

        let outcome = dispatcher.dispatch_frame(&payload).await;
        assert_eq!(outcome.dispatched.len(), 1);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.transitions.last(), Some(&DispatchState::Idle));
    }

    #[tokio::test]
    async fn test_short_frame() {
        let dispatcher = DatapointDispatcher::new("dev1", EventBus::new());
        let outcome = dispatcher.dispatch_frame(&[0x01]).await;
        assert!(outcome.error.is_some());
        assert_eq!(
            outcome.transitions,
            vec![DispatchState::FrameReceived, DispatchState::Idle]
        );
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_others() {
        let dispatcher = DatapointDispatcher::new("dev1", EventBus::new());
        dispatcher.register(
            1,
            Arc::new(Recorder {
                capability: "broken".to_string(),
                seen: Mutex::new(Vec::new()),
                fail: true,
            }),
        );
        let ok = Recorder::new("measure_temperature");
        dispatcher.register(1, ok.clone());

        let outcome = dispatcher
            .dispatch_frame(&frame(&[(1, DpValue::Value(1))]))
            .await;
        assert_eq!(outcome.failed, vec![(1, "broken".to_string())]);
        assert_eq!(outcome.dispatched, vec![(1, "measure_temperature".to_string())]);
        assert_eq!(ok.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let dispatcher = DatapointDispatcher::new("dev1", EventBus::new());
        dispatcher.register(1, Recorder::new("a"));
        dispatcher.register(2, Recorder::new("b"));
        assert_eq!(dispatcher.handler_count(), 2);
        assert_eq!(dispatcher.clear(), 2);
        assert_eq!(dispatcher.clear(), 0);
        assert!(!dispatcher.is_mapped(1));
    }
}
