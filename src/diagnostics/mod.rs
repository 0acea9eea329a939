//! In-process diagnostics bus: a typed, subscribable view of the same
//! lifecycle transitions the executor also logs via `tracing`.

pub mod event;
pub mod hub;

pub use event::{FlowEvent, FlowEventKind};
pub use hub::{DiagnosticsBus, DiagnosticsMetrics, DiagnosticsStream};
