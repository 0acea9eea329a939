//! Plain-text rendering of diagnostics events, for binaries/tests that want
//! a human-readable line without standing up a full log subscriber.

use crate::diagnostics::{FlowEvent, FlowEventKind};

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for one diagnostics event.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub line: String,
}

pub trait TelemetryFormatter: Send + Sync {
    fn render(&self, event: &FlowEvent) -> EventRender;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlainFormatter;

impl TelemetryFormatter for PlainFormatter {
    fn render(&self, event: &FlowEvent) -> EventRender {
        let context = match &event.kind {
            FlowEventKind::StepFailed { .. }
            | FlowEventKind::StepRejected { .. }
            | FlowEventKind::StepTimedOut { .. } => Some("warn".to_string()),
            FlowEventKind::Cancelled => Some("cancelled".to_string()),
            _ => None,
        };
        let line = format!("{LINE_COLOR}{event}{RESET_COLOR}\n");
        EventRender { context, line }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlainFormatterNoColor;

impl TelemetryFormatter for PlainFormatterNoColor {
    fn render(&self, event: &FlowEvent) -> EventRender {
        EventRender {
            context: None,
            line: format!("{event}\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FlowId, NodeId};

    #[test]
    fn plain_formatter_flags_failures_as_warnings() {
        let event = FlowEvent::new(
            FlowId::new("f1"),
            FlowEventKind::StepFailed {
                node: NodeId::from_raw(1),
                step: "charge".into(),
                message: "card declined".into(),
            },
        );
        let render = PlainFormatter.render(&event);
        assert_eq!(render.context.as_deref(), Some("warn"));
        assert!(render.line.contains("charge"));
    }
}
