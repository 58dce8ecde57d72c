// Load Events
// Progress reporting for registration, composition, and stack execution

use crate::stack::models::LoaderKind;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for load progress events
pub type ProgressSender = mpsc::UnboundedSender<LoadEvent>;

/// Receiver for load progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<LoadEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted by a [`LoaderCache`](crate::LoaderCache) and its composed stacks
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// Steps were added to a named stack
    LoaderRegistered {
        kind: LoaderKind,
        name: String,
        total_steps: usize,
    },

    /// An engine option was set
    OptionSet { key: String },

    /// A stack was resolved and bound to an execution kind
    StackComposed {
        name: Option<String>,
        kind: LoaderKind,
        total_steps: usize,
    },

    /// A step started running
    StepStarted {
        name: Option<String>,
        kind: LoaderKind,
        step_index: usize,
        label: String,
    },

    /// A step finished
    StepCompleted {
        name: Option<String>,
        kind: LoaderKind,
        step_index: usize,
        label: String,
        success: bool,
        duration: Duration,
    },

    /// Every step ran, or the stack stopped on an error
    StackCompleted {
        name: Option<String>,
        kind: LoaderKind,
        success: bool,
        duration: Duration,
    },

    /// A stack failed
    Error {
        message: String,
        name: Option<String>,
        step_index: Option<usize>,
    },
}

impl LoadEvent {
    /// Create a step started event
    pub fn step_started(
        name: Option<String>,
        kind: LoaderKind,
        step_index: usize,
        label: impl Into<String>,
    ) -> Self {
        Self::StepStarted {
            name,
            kind,
            step_index,
            label: label.into(),
        }
    }

    /// Create a step completed event
    pub fn step_completed(
        name: Option<String>,
        kind: LoaderKind,
        step_index: usize,
        label: impl Into<String>,
        success: bool,
        duration: Duration,
    ) -> Self {
        Self::StepCompleted {
            name,
            kind,
            step_index,
            label: label.into(),
            success,
            duration,
        }
    }

    /// Create a stack completed event
    pub fn stack_completed(
        name: Option<String>,
        kind: LoaderKind,
        success: bool,
        duration: Duration,
    ) -> Self {
        Self::StackCompleted {
            name,
            kind,
            success,
            duration,
        }
    }

    /// Create an error event
    pub fn error(
        message: impl Into<String>,
        name: Option<String>,
        step_index: Option<usize>,
    ) -> Self {
        Self::Error {
            message: message.into(),
            name,
            step_index,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: LoadEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: LoadEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: LoadEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(LoadEvent::OptionSet { key: "cwd".into() });
        tx.send_event(LoadEvent::step_started(
            Some("bar".into()),
            LoaderKind::Sync,
            0,
            "read",
        ));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, LoadEvent::OptionSet { .. }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, LoadEvent::StepStarted { step_index: 0, .. }));
    }

    #[test]
    fn test_event_construction() {
        let event = LoadEvent::step_completed(
            Some("bar".into()),
            LoaderKind::Promise,
            2,
            "data",
            true,
            Duration::from_millis(5),
        );

        if let LoadEvent::StepCompleted {
            name,
            kind,
            step_index,
            label,
            success,
            duration,
        } = event
        {
            assert_eq!(name.as_deref(), Some("bar"));
            assert_eq!(kind, LoaderKind::Promise);
            assert_eq!(step_index, 2);
            assert_eq!(label, "data");
            assert!(success);
            assert_eq!(duration, Duration::from_millis(5));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(LoadEvent::error("boom", None, None));
    }
}
