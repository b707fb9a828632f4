//! Process supervision: long-running daemons whose stdout/stderr are streamed
//! onto the event bus line by line, plus one-shot query commands.

mod runner;

pub use runner::SystemRunner;

use crate::bus::{BusHandle, BusMessage, OutputEvent, StreamOrigin};
use crate::traits::ProcessSpawner;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Logical name of a supervised process, used to route its output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(String);

impl CommandId {
    /// Reserved pseudo-id: an event carrying it terminates the service.
    pub const KILL: &'static str = "kill";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn kill() -> Self {
        Self::new(Self::KILL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to start a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub id: CommandId,
    pub program: String,
    pub args: Vec<String>,
    /// Text written once to stdin, after which stdin is closed.
    pub input: Option<String>,
}

impl CommandSpec {
    pub fn new(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: CommandId::new(id),
            program: program.into(),
            args: Vec::new(),
            input: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn input(mut self, text: impl Into<String>) -> Self {
        self.input = Some(text.into());
        self
    }

    /// `program arg1 arg2 ...`, for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Posted once both output streams hit EOF and the child has been reaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    pub id: CommandId,
    pub program: String,
    /// `None` when killed by a signal or when `wait` itself failed.
    pub code: Option<i32>,
}

/// A process currently tracked by the supervisor.
#[derive(Debug)]
pub struct ManagedProcess {
    pub id: CommandId,
    pub program: String,
    pub pid: Option<u32>,
}

/// Spawns processes and forwards their output to the bus.
///
/// The live map is only touched by whoever owns the supervisor, which in the
/// running service is the dispatch loop.
pub struct ProcessSupervisor {
    bus: BusHandle,
    live: HashMap<CommandId, ManagedProcess>,
}

impl ProcessSupervisor {
    pub fn new(bus: BusHandle) -> Self {
        Self {
            bus,
            live: HashMap::new(),
        }
    }

    /// Starts `spec`, non-blocking. Any `spec.input` is written on a
    /// background task and stdin is closed afterwards.
    pub fn spawn(&mut self, spec: CommandSpec) -> Result<()> {
        match spec.input.clone() {
            Some(text) => {
                let mut stdin = self.spawn_with_input(&spec)?;
                let id = spec.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(text.as_bytes()).await {
                        warn!(cmd_id = %id, error = %e, "failed to write process input");
                    }
                    // Dropping the handle closes the pipe.
                    let _ = stdin.shutdown().await;
                });
                Ok(())
            }
            None => self.launch(&spec, false).map(|_| ()),
        }
    }

    /// Starts `spec` and hands back its stdin for one-shot configuration.
    pub fn spawn_with_input(&mut self, spec: &CommandSpec) -> Result<ChildStdin> {
        self.launch(spec, true)?.ok_or_else(|| Error::Spawn {
            program: spec.program.clone(),
            source: std::io::Error::other("stdin pipe unavailable"),
        })
    }

    /// Blocking one-shot execution; bypasses the bus and the live map.
    pub async fn run(program: &str, args: &[String]) -> Result<Vec<u8>> {
        runner::run_output(program, args).await
    }

    pub fn is_running(&self, id: &CommandId) -> bool {
        self.live.contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn launch(&mut self, spec: &CommandSpec, with_input: bool) -> Result<Option<ChildStdin>> {
        if self.live.contains_key(&spec.id) {
            return Err(Error::DuplicateCommand(spec.id.to_string()));
        }

        debug!(cmd_id = %spec.id, cmd = %spec.command_line(), "spawning process");

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if with_input { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let pipe_error = |name: &str| Error::Spawn {
            program: spec.program.clone(),
            source: std::io::Error::other(format!("{} pipe unavailable", name)),
        };
        let stdout = child.stdout.take().ok_or_else(|| pipe_error("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| pipe_error("stderr"))?;
        let stdin = child.stdin.take();
        let pid = child.id();
        info!(cmd_id = %spec.id, cmd = %spec.program, pid = ?pid, "process started");

        let out_task = forward_lines(stdout, StreamOrigin::Stdout, spec, pid, self.bus.clone());
        let err_task = forward_lines(stderr, StreamOrigin::Stderr, spec, pid, self.bus.clone());

        let bus = self.bus.clone();
        let id = spec.id.clone();
        let program = spec.program.clone();
        // Detached: the exit event is how the dispatch loop learns of the end.
        tokio::spawn(async move {
            let _ = tokio::join!(out_task, err_task);
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    error!(cmd_id = %id, error = %e, "failed to reap process");
                    None
                }
            };
            bus.send(BusMessage::Exited(ExitEvent { id, program, code }));
        });

        self.live.insert(
            spec.id.clone(),
            ManagedProcess {
                id: spec.id.clone(),
                program: spec.program.clone(),
                pid,
            },
        );

        Ok(stdin)
    }
}

impl ProcessSpawner for ProcessSupervisor {
    fn spawn(&mut self, spec: CommandSpec) -> Result<()> {
        ProcessSupervisor::spawn(self, spec)
    }

    fn reaped(&mut self, exit: &ExitEvent) {
        if self.live.remove(&exit.id).is_none() {
            warn!(cmd_id = %exit.id, "exit reported for an untracked process");
        }
    }
}

/// Reads `reader` line by line and posts one `OutputEvent` per line.
fn forward_lines<R>(
    reader: R,
    origin: StreamOrigin,
    spec: &CommandSpec,
    pid: Option<u32>,
    bus: BusHandle,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let id = spec.id.clone();
    let program = spec.program.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => bus.send(BusMessage::Output(OutputEvent {
                    id: id.clone(),
                    program: program.clone(),
                    line,
                    origin,
                    pid,
                })),
                Ok(None) => break,
                Err(e) => {
                    warn!(cmd_id = %id, ?origin, error = %e, "stopped reading process output");
                    break;
                }
            }
        }
    })
}
