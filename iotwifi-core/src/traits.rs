use crate::supervisor::{CommandSpec, ExitEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// 在这里定义共享的数据类型，以及进程执行相关的 trait。

/// A single network found by `wpa_cli scan_results`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub bssid: String,
    pub frequency: String,
    pub signal_level: String,
    pub flags: String,
    pub ssid: String,
}

/// Body of a `/connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub psk: String,
}

/// Outcome of a connect request. `state` is either a supplicant state name
/// (`COMPLETED`) or `FAIL` when polling ran out of attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConnectionResult {
    pub ssid: String,
    pub state: String,
    pub ip: String,
    pub message: String,
}

/// One-shot command execution: run to completion and capture stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`.
    ///
    /// Returns `Error::Spawn` when the binary cannot be started and
    /// `Error::CommandFailed` when it exits with a non-zero status.
    async fn run(&self, program: &str, args: &[String]) -> crate::Result<Vec<u8>>;
}

/// Long-running process creation, driven from the dispatch loop.
///
/// Implementations are owned by the dispatcher, so `&mut self` is only ever
/// borrowed from that single task.
pub trait ProcessSpawner: Send {
    /// Starts the process and attaches its output streams to the bus.
    fn spawn(&mut self, spec: CommandSpec) -> crate::Result<()>;

    /// Forgets a process whose streams closed and which has been reaped.
    fn reaped(&mut self, exit: &ExitEvent);
}
