//! A broadcast-backed publisher of [`FlowEvent`]s, additive to `tracing`
//! instrumentation: structured-logging consumers read spans/events, typed
//! in-process consumers (a progress view, a test assertion) subscribe here.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast::{self, Receiver, Sender};

use super::event::FlowEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsMetrics {
    pub capacity: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct DiagnosticsBus {
    sender: RwLock<Option<Sender<FlowEvent>>>,
    dropped: AtomicUsize,
    capacity: usize,
}

impl DiagnosticsBus {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self {
            sender: RwLock::new(Some(sender)),
            dropped: AtomicUsize::new(0),
            capacity,
        })
    }

    pub fn publish(&self, event: FlowEvent) {
        if let Some(sender) = self.current_sender() {
            let _ = sender.send(event);
        }
    }

    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> DiagnosticsStream {
        let receiver = self.current_sender().map(|s| s.subscribe()).unwrap_or_else(|| {
            let (sender, receiver) = broadcast::channel(self.capacity);
            drop(sender);
            receiver
        });
        DiagnosticsStream {
            receiver,
            hub: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn metrics(&self) -> DiagnosticsMetrics {
        DiagnosticsMetrics {
            capacity: self.capacity,
            dropped: self.dropped(),
        }
    }

    pub fn close(&self) {
        let _ = self.sender.write().expect("diagnostics bus lock poisoned").take();
    }

    fn current_sender(&self) -> Option<Sender<FlowEvent>> {
        self.sender.read().expect("diagnostics bus lock poisoned").clone()
    }

    fn record_lag(&self, missed: u64) {
        if missed == 0 {
            return;
        }
        let increment = usize::try_from(missed).unwrap_or(usize::MAX);
        let total = self.dropped.fetch_add(increment, Ordering::Relaxed).saturating_add(increment);
        tracing::warn!(
            target: "flowloom::diagnostics",
            missed,
            total_dropped = total,
            "diagnostics stream lagged; dropped events"
        );
    }
}

pub struct DiagnosticsStream {
    receiver: Receiver<FlowEvent>,
    hub: Arc<DiagnosticsBus>,
}

impl DiagnosticsStream {
    pub async fn recv(&mut self) -> Result<FlowEvent, broadcast::error::RecvError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                self.hub.record_lag(missed);
                Err(broadcast::error::RecvError::Lagged(missed))
            }
            Err(err) => Err(err),
        }
    }

    pub fn try_recv(&mut self) -> Result<FlowEvent, broadcast::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                self.hub.record_lag(missed);
                Err(broadcast::error::TryRecvError::Lagged(missed))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::event::FlowEventKind;
    use crate::ids::{FlowId, NodeId};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = DiagnosticsBus::new(8);
        let mut stream = bus.subscribe();
        bus.publish(FlowEvent::new(
            FlowId::new("f1"),
            FlowEventKind::StepCompleted {
                node: NodeId::from_raw(0),
                step: "A".into(),
            },
        ));
        let event = stream.recv().await.unwrap();
        assert!(matches!(event.kind, FlowEventKind::StepCompleted { .. }));
    }

    #[test]
    fn metrics_report_configured_capacity() {
        let bus = DiagnosticsBus::new(4);
        assert_eq!(bus.metrics().capacity, 4);
        assert_eq!(bus.metrics().dropped, 0);
    }
}
