use super::{BusHandle, BusMessage, OutputEvent, ShutdownReason};
use crate::Error;
use crate::supervisor::{CommandId, CommandSpec};
use crate::traits::{CommandRunner, ProcessSpawner};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One unit of work requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Short configuration command, run to completion before the next step.
    Run(CommandSpec),
    /// Long-running process whose output comes back over the bus.
    Spawn(CommandSpec),
}

/// What a handler wants done after seeing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Ignore,
    Steps(Vec<Step>),
    Shutdown(ShutdownReason),
}

/// Callback for the events of one or more command ids.
///
/// Handlers run inline on the dispatch loop and must not block; anything
/// slow is expressed as `Step`s.
pub trait EventHandler: Send {
    fn handle(&mut self, event: &OutputEvent) -> Reaction;
}

/// Built-in handler for the reserved `kill` id.
struct KillSwitch;

impl EventHandler for KillSwitch {
    fn handle(&mut self, _event: &OutputEvent) -> Reaction {
        Reaction::Shutdown(ShutdownReason::Killed)
    }
}

/// Single consumer of the bus. Owns the handler table and the spawner, so
/// neither needs a lock.
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<BusMessage>,
    bus: BusHandle,
    spawner: Box<dyn ProcessSpawner>,
    runner: Arc<dyn CommandRunner>,
    routes: HashMap<CommandId, usize>,
    handlers: Vec<Box<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new(
        rx: mpsc::UnboundedReceiver<BusMessage>,
        bus: BusHandle,
        spawner: Box<dyn ProcessSpawner>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let mut dispatcher = Self {
            rx,
            bus,
            spawner,
            runner,
            routes: HashMap::new(),
            handlers: Vec::new(),
        };
        dispatcher.install([CommandId::kill()], Box::new(KillSwitch));
        dispatcher
    }

    /// Routes every id in `ids` to `handler`. Must happen before `run`.
    pub fn register<I>(&mut self, ids: I, handler: Box<dyn EventHandler>)
    where
        I: IntoIterator<Item = CommandId>,
    {
        let ids: Vec<CommandId> = ids
            .into_iter()
            .filter(|id| {
                let reserved = id.as_str() == CommandId::KILL;
                if reserved {
                    warn!(cmd_id = %id, "handler registration for reserved id ignored");
                }
                !reserved
            })
            .collect();
        self.install(ids, handler);
    }

    pub fn is_registered(&self, id: &CommandId) -> bool {
        self.routes.contains_key(id)
    }

    fn install<I>(&mut self, ids: I, handler: Box<dyn EventHandler>)
    where
        I: IntoIterator<Item = CommandId>,
    {
        let index = self.handlers.len();
        self.handlers.push(handler);
        for id in ids {
            if self.routes.insert(id.clone(), index).is_some() {
                warn!(cmd_id = %id, "handler replaced");
            }
        }
    }

    /// Drains the bus until a handler or a fatal message asks to stop.
    pub async fn run(mut self) -> ShutdownReason {
        info!(handlers = self.handlers.len(), "dispatch loop started");
        while let Some(message) = self.rx.recv().await {
            if let Some(reason) = self.dispatch(message) {
                info!(%reason, "dispatch loop stopping");
                return reason;
            }
        }
        ShutdownReason::BusClosed
    }

    fn dispatch(&mut self, message: BusMessage) -> Option<ShutdownReason> {
        match message {
            BusMessage::Output(event) => self.on_output(event),
            BusMessage::Exited(exit) => {
                info!(cmd_id = %exit.id, cmd = %exit.program, code = ?exit.code, "process exited");
                self.spawner.reaped(&exit);
                None
            }
            BusMessage::Spawn(spec) => self.spawn(spec),
            BusMessage::Fatal(reason) => Some(reason),
        }
    }

    fn on_output(&mut self, event: OutputEvent) -> Option<ShutdownReason> {
        info!(
            cmd_id = %event.id,
            cmd = %event.program,
            is_error = event.is_error(),
            "{}",
            event.line
        );

        let index = *self.routes.get(&event.id)?;
        let reaction = self.handlers[index].handle(&event);
        match reaction {
            Reaction::Ignore => None,
            Reaction::Steps(steps) => self.execute(steps),
            Reaction::Shutdown(reason) => Some(reason),
        }
    }

    fn spawn(&mut self, spec: CommandSpec) -> Option<ShutdownReason> {
        let program = spec.program.clone();
        match self.spawner.spawn(spec) {
            Ok(()) => None,
            Err(e) => {
                error!(program = %program, error = %e, "spawn failed");
                Some(ShutdownReason::SpawnFailed {
                    program,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Leading spawns happen inline; from the first `Run` on, the rest of the
    /// sequence moves to a step task so the loop keeps draining.
    fn execute(&mut self, steps: Vec<Step>) -> Option<ShutdownReason> {
        let mut steps = steps.into_iter();
        let mut remaining = Vec::new();
        for step in steps.by_ref() {
            match step {
                Step::Spawn(spec) => {
                    if let Some(reason) = self.spawn(spec) {
                        return Some(reason);
                    }
                }
                run @ Step::Run(_) => {
                    remaining.push(run);
                    break;
                }
            }
        }
        remaining.extend(steps);

        if !remaining.is_empty() {
            tokio::spawn(run_steps(remaining, self.runner.clone(), self.bus.clone()));
        }
        None
    }
}

async fn run_steps(steps: Vec<Step>, runner: Arc<dyn CommandRunner>, bus: BusHandle) {
    for step in steps {
        match step {
            Step::Run(spec) => {
                debug!(cmd_id = %spec.id, cmd = %spec.command_line(), "running step");
                match runner.run(&spec.program, &spec.args).await {
                    Ok(_) => {}
                    Err(Error::Spawn { program, source }) => {
                        error!(program = %program, error = %source, "step could not be started");
                        bus.fatal(ShutdownReason::SpawnFailed {
                            program,
                            reason: source.to_string(),
                        });
                        return;
                    }
                    // Best effort: later steps still run.
                    Err(e) => warn!(cmd_id = %spec.id, error = %e, "step failed"),
                }
            }
            Step::Spawn(spec) => bus.spawn(spec),
        }
    }
}
