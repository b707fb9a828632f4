//! AP interface bring-up, driven entirely by the output of `ifconfig` and
//! `hostapd`.
//!
//! Raw lines are first classified into a [`Signal`] per process kind; the
//! cascade is then a transition table over ([`BringupState`], [`ProcessKind`],
//! [`Signal`]).
//!
//! ```text
//! Unknown --absent--> Creating --present--> ApStarting --enabled--> ApEnabled
//!    \______________present______________/       \--disabled--> ApDisabled
//! ```

pub mod commands;
pub mod hostapd;

use crate::bus::{EventHandler, OutputEvent, Reaction, ShutdownReason, Step};
use crate::config::SetupConfig;
use crate::supervisor::{CommandId, CommandSpec};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupState {
    /// Nothing known about the AP interface yet.
    Unknown,
    /// Interface was absent; `iw ... add` issued, re-check pending.
    Creating,
    /// Interface present; up/address/hostapd issued.
    ApStarting,
    ApEnabled,
    /// Terminal.
    ApDisabled,
    /// Terminal: interface still missing after creation.
    Failed,
}

impl BringupState {
    /// Readiness predicate for starting the station side.
    pub fn is_ap_ready(self) -> bool {
        self == BringupState::ApEnabled
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BringupState::ApDisabled | BringupState::Failed)
    }
}

/// Which classifier applies to a command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    InterfaceCheck,
    /// The check issued after `iw ... add`; only its answer can fail bring-up.
    InterfaceRecheck,
    ApDaemon,
    Other,
}

/// A classified output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    InterfaceAbsent,
    InterfacePresent,
    ApEnabled,
    ApDisabled,
    Unclassified(String),
}

/// Maps one output line to a signal. Only lines from the process kind that
/// can legitimately produce a signal are considered.
pub fn classify(kind: ProcessKind, line: &str, ap_interface: &str) -> Signal {
    match kind {
        ProcessKind::InterfaceCheck | ProcessKind::InterfaceRecheck => {
            if line.contains("Device not found") {
                Signal::InterfaceAbsent
            } else if interface_present(line, ap_interface) {
                Signal::InterfacePresent
            } else {
                Signal::Unclassified(line.to_string())
            }
        }
        ProcessKind::ApDaemon => {
            if line.contains("AP-DISABLED") {
                Signal::ApDisabled
            } else if line.contains("AP-ENABLED") {
                Signal::ApEnabled
            } else {
                Signal::Unclassified(line.to_string())
            }
        }
        ProcessKind::Other => Signal::Unclassified(line.to_string()),
    }
}

// busybox: "uap0      Link encap:Ethernet ..."; net-tools: "uap0: flags=4163<UP,...>"
fn interface_present(line: &str, ap_interface: &str) -> bool {
    let first = line.split_whitespace().next().unwrap_or("");
    (first == ap_interface && line.contains("Link encap"))
        || line.starts_with(&format!("{}: flags=", ap_interface))
}

/// Handler for the interface-check and hostapd command ids.
pub struct BringupMachine {
    config: Arc<SetupConfig>,
    state: BringupState,
    state_tx: watch::Sender<BringupState>,
    check_id: CommandId,
    recheck_id: CommandId,
    hostapd_id: CommandId,
}

impl BringupMachine {
    pub fn new(config: Arc<SetupConfig>) -> Self {
        let (state_tx, _) = watch::channel(BringupState::Unknown);
        Self {
            check_id: CommandId::new(commands::interface_check_id(&config.interfaces)),
            recheck_id: CommandId::new(commands::interface_recheck_id(&config.interfaces)),
            hostapd_id: CommandId::new(commands::HOSTAPD_ID),
            config,
            state: BringupState::Unknown,
            state_tx,
        }
    }

    pub fn state(&self) -> BringupState {
        self.state
    }

    /// State updates, for tasks outside the dispatch loop.
    pub fn subscribe(&self) -> watch::Receiver<BringupState> {
        self.state_tx.subscribe()
    }

    /// Ids this machine must be registered under.
    pub fn command_ids(&self) -> Vec<CommandId> {
        vec![
            self.check_id.clone(),
            self.recheck_id.clone(),
            self.hostapd_id.clone(),
        ]
    }

    /// The spawn that starts the cascade.
    pub fn initial_check(&self) -> CommandSpec {
        commands::interface_check(&self.config.interfaces)
    }

    pub fn kind_of(&self, id: &CommandId) -> ProcessKind {
        if *id == self.check_id {
            ProcessKind::InterfaceCheck
        } else if *id == self.recheck_id {
            ProcessKind::InterfaceRecheck
        } else if *id == self.hostapd_id {
            ProcessKind::ApDaemon
        } else {
            ProcessKind::Other
        }
    }

    /// The transition table. Pure: no state is changed here.
    pub fn transition(&self, kind: ProcessKind, signal: &Signal) -> (BringupState, Reaction) {
        use BringupState as S;

        let cfg = &*self.config;
        match (self.state, kind, signal) {
            (_, _, Signal::ApDisabled) => (S::ApDisabled, Reaction::Shutdown(ShutdownReason::ApDisabled)),

            (S::Unknown, _, Signal::InterfaceAbsent) => (
                S::Creating,
                Reaction::Steps(vec![
                    Step::Run(commands::add_ap_interface(&cfg.interfaces)),
                    Step::Spawn(commands::interface_recheck(&cfg.interfaces)),
                ]),
            ),
            // Late lines from the first check are ignored below.
            (S::Creating, ProcessKind::InterfaceRecheck, Signal::InterfaceAbsent) => (
                S::Failed,
                Reaction::Shutdown(ShutdownReason::InterfaceUnavailable {
                    interface: cfg.interfaces.ap.clone(),
                }),
            ),

            (S::Unknown | S::Creating, _, Signal::InterfacePresent) => (
                S::ApStarting,
                Reaction::Steps(vec![
                    Step::Run(commands::up_ap_interface(&cfg.interfaces)),
                    Step::Run(commands::assign_ap_address(cfg)),
                    Step::Spawn(commands::hostapd(cfg)),
                ]),
            ),

            (S::ApStarting, _, Signal::ApEnabled) => (
                S::ApEnabled,
                Reaction::Steps(vec![Step::Spawn(commands::dnsmasq(cfg))]),
            ),

            // dnsmasq is started once per run; repeated AP-ENABLED is driver chatter.
            (S::ApEnabled, _, Signal::ApEnabled) => (S::ApEnabled, Reaction::Ignore),

            (state, _, _) => (state, Reaction::Ignore),
        }
    }
}

impl EventHandler for BringupMachine {
    fn handle(&mut self, event: &OutputEvent) -> Reaction {
        let kind = self.kind_of(&event.id);
        let signal = classify(kind, &event.line, &self.config.interfaces.ap);
        if let Signal::Unclassified(_) = signal {
            return Reaction::Ignore;
        }

        let (next, reaction) = self.transition(kind, &signal);
        if next == self.state {
            debug!(state = ?self.state, ?signal, "signal ignored");
        } else {
            if next.is_terminal() {
                error!(from = ?self.state, to = ?next, ?signal, "bring-up failed");
            } else {
                info!(from = ?self.state, to = ?next, ?signal, "bring-up transition");
            }
            self.state = next;
            self.state_tx.send_replace(next);
        }
        reaction
    }
}
