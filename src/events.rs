//! Typed event bus connecting the execution core to UI-facing sinks.
//!
//! Subscribers receive every published event over an mpsc channel; publishing
//! is synchronous and drops subscribers whose receiving end has gone away.
//! Publishers persist related settings mutations *before* emitting, so a
//! subscriber observing an event can rely on the store already reflecting it.
use std::sync::{Arc, Mutex, mpsc};

use crate::{executor::ExecutionResult, service::ServiceState};

/// Events published by the execution core.
#[derive(Debug, Clone)]
pub enum Event {
    /// An on-demand execution was dispatched.
    ExecutionStarted {
        /// Canonical script identifier.
        script: String,
    },
    /// An on-demand execution finished.
    ExecutionCompleted {
        /// Canonical script identifier.
        script: String,
        /// The captured result.
        result: ExecutionResult,
    },
    /// An on-demand execution could not run at all.
    ExecutionFailed {
        /// Canonical script identifier.
        script: String,
        /// Failure description.
        error: String,
    },

    /// A schedule was registered and armed.
    ScheduleStarted(String),
    /// A schedule was stopped and removed.
    ScheduleStopped(String),
    /// A scheduled callback completed without error.
    ScheduleExecuted(String),
    /// A tick fired while the previous callback was still running.
    ScheduleBlocked(String),
    /// A scheduled callback failed.
    ScheduleError {
        /// Schedule name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// A service transitioned between states.
    ServiceStateChanged {
        /// Service name.
        name: String,
        /// The newly observed state.
        state: ServiceState,
    },
    /// A service process exited while it was expected to be running.
    ServiceCrashed(String),
    /// A crashed service was restarted by the monitor.
    ServiceRestarted(String),
    /// An automatic restart attempt failed.
    ServiceRestartFailed {
        /// Service name.
        name: String,
        /// Failure description.
        error: String,
    },
    /// A crashed service hit its restart bound and was abandoned.
    ServiceRestartLimitReached(String),

    /// A hotkey binding was added to the registry.
    HotkeyAdded {
        /// Binding target.
        name: String,
        /// Normalized chord.
        chord: String,
    },
    /// A hotkey binding was replaced with a new chord.
    HotkeyUpdated {
        /// Binding target.
        name: String,
        /// Normalized chord.
        chord: String,
    },
    /// A hotkey binding was removed.
    HotkeyRemoved(String),
    /// A registered chord was pressed.
    HotkeyTriggered {
        /// Binding target.
        name: String,
        /// Normalized chord.
        chord: String,
    },
    /// The OS refused a chord registration.
    HotkeyRegistrationFailed {
        /// Binding target.
        name: String,
        /// Normalized chord.
        chord: String,
        /// OS-level diagnostic.
        reason: String,
    },

    /// Discovery finished and the catalog changed.
    ScriptsDiscovered {
        /// Number of scripts now in the catalog.
        count: usize,
    },
    /// The tray menu should be rebuilt.
    MenuRefreshRequested,
    /// A user-facing notification should be raised.
    Notification {
        /// Notification title.
        title: String,
        /// Notification body.
        body: String,
    },
}

/// Clone-able publish/subscribe hub.
#[derive(Clone, Default)]
pub struct EventBus {
    senders: Arc<Mutex<Vec<mpsc::Sender<Event>>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.senders.lock().unwrap().push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber.
    pub fn publish(&self, event: Event) {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers; used by shutdown diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}
