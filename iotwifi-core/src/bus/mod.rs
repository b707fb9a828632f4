//! The process-output bus: a single unbounded channel that every reader task,
//! step task and the HTTP layer post into, drained by one dispatch loop.

mod dispatch;

pub use dispatch::{Dispatcher, EventHandler, Reaction, Step};

use crate::supervisor::{CommandId, CommandSpec, ExitEvent};
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    Stdout,
    Stderr,
}

/// One line of output from a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub id: CommandId,
    /// Binary the line came from.
    pub program: String,
    pub line: String,
    pub origin: StreamOrigin,
    pub pid: Option<u32>,
}

impl OutputEvent {
    pub fn is_error(&self) -> bool {
        self.origin == StreamOrigin::Stderr
    }
}

/// Why the dispatch loop stopped. The daemon maps this to an exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The `kill` pseudo-event arrived.
    Killed,
    /// hostapd reported `AP-DISABLED`.
    ApDisabled,
    /// A daemon or cascade step could not be started.
    SpawnFailed { program: String, reason: String },
    /// The AP interface was still missing after it was created.
    InterfaceUnavailable { interface: String },
    /// Every sender went away.
    BusClosed,
}

impl ShutdownReason {
    /// Distinct status for `AP-DISABLED` so an outer supervisor can restart us.
    pub const AP_DISABLED_EXIT_CODE: i32 = 2;

    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::ApDisabled => Self::AP_DISABLED_EXIT_CODE,
            _ => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Killed => write!(f, "kill requested"),
            ShutdownReason::ApDisabled => write!(f, "access point disabled"),
            ShutdownReason::SpawnFailed { program, reason } => {
                write!(f, "failed to spawn {}: {}", program, reason)
            }
            ShutdownReason::InterfaceUnavailable { interface } => {
                write!(f, "interface {} unavailable after creation", interface)
            }
            ShutdownReason::BusClosed => write!(f, "event bus closed"),
        }
    }
}

/// Everything that flows through the bus.
#[derive(Debug)]
pub enum BusMessage {
    Output(OutputEvent),
    Exited(ExitEvent),
    /// Spawn request, executed by the dispatch loop.
    Spawn(CommandSpec),
    /// Unrecoverable failure raised outside the dispatch loop.
    Fatal(ShutdownReason),
}

/// Constructor for the bus channel.
pub struct EventBus;

impl EventBus {
    pub fn channel() -> (BusHandle, mpsc::UnboundedReceiver<BusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BusHandle { tx }, rx)
    }
}

/// Cloneable producer side of the bus.
#[derive(Debug, Clone)]
pub struct BusHandle {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl BusHandle {
    pub fn send(&self, message: BusMessage) {
        if self.tx.send(message).is_err() {
            warn!("event bus closed, message dropped");
        }
    }

    /// Asks the dispatch loop to start `spec`.
    pub fn spawn(&self, spec: CommandSpec) {
        self.send(BusMessage::Spawn(spec));
    }

    /// Posts the `kill` pseudo-event.
    pub fn request_kill(&self) {
        self.send(BusMessage::Output(OutputEvent {
            id: CommandId::kill(),
            program: String::new(),
            line: "kill requested".to_string(),
            origin: StreamOrigin::Stdout,
            pid: None,
        }));
    }

    pub fn fatal(&self, reason: ShutdownReason) {
        self.send(BusMessage::Fatal(reason));
    }
}
