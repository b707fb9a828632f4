//! Station-side workflows over `wpa_cli`: status, scan and connect.
//!
//! Each workflow is a sequence of one-shot commands and never touches the
//! event bus, so it can run on any task (HTTP handlers, the rescan loop).

mod parsing;

pub use parsing::{parse_scan_results, parse_status};

use crate::traits::{CommandRunner, WifiConnectionResult, WifiCredentials, WifiNetwork};
use crate::util::poll_until;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const STATE_COMPLETED: &str = "COMPLETED";
pub const STATE_FAIL: &str = "FAIL";

/// Delays and retry budgets of the workflows.
#[derive(Debug, Clone)]
pub struct WpaTimings {
    /// Status polls after `enable_network`.
    pub connect_attempts: u32,
    pub connect_interval: Duration,
    pub scan_poll_interval: Duration,
    /// Upper bound on waiting for scan results to show up.
    pub scan_max_wait: Duration,
}

impl Default for WpaTimings {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            connect_interval: Duration::from_secs(3),
            scan_poll_interval: Duration::from_millis(500),
            scan_max_wait: Duration::from_secs(5),
        }
    }
}

pub struct WpaConnectionManager {
    runner: Arc<dyn CommandRunner>,
    interface: String,
    timings: WpaTimings,
}

impl WpaConnectionManager {
    pub fn new(runner: Arc<dyn CommandRunner>, interface: impl Into<String>) -> Self {
        Self {
            runner,
            interface: interface.into(),
            timings: WpaTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: WpaTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Supplicant status as a key/value map.
    pub async fn status(&self) -> Result<BTreeMap<String, String>> {
        let out = self.wpa_cli(&["status"]).await?;
        Ok(parse_status(&out))
    }

    /// Triggers a scan and returns the networks keyed by ssid.
    pub async fn scan(&self) -> Result<BTreeMap<String, WifiNetwork>> {
        let reply = self.wpa_cli(&["scan"]).await?;
        if reply.trim() != "OK" {
            warn!(iface = %self.interface, reply = %reply.trim(), "scan request not accepted");
            return Ok(BTreeMap::new());
        }

        let waited = poll_until(
            "scan results",
            self.timings.scan_poll_interval,
            self.timings.scan_max_wait,
            || async move {
                let out = self.wpa_cli(&["scan_results"]).await?;
                let networks = parse_scan_results(&out);
                Ok((!networks.is_empty()).then_some(networks))
            },
        )
        .await;

        match waited {
            Ok(networks) => {
                debug!(iface = %self.interface, count = networks.len(), "scan complete");
                Ok(networks)
            }
            Err(Error::Timeout(_)) => {
                warn!(
                    iface = %self.interface,
                    max_wait = ?self.timings.scan_max_wait,
                    "no scan results before deadline"
                );
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Adds, configures and enables a network, then polls until the
    /// supplicant reports `COMPLETED`.
    ///
    /// Exhausting the attempts is not an error: the result carries state
    /// `FAIL` and nothing is saved.
    pub async fn connect(&self, creds: &WifiCredentials) -> Result<WifiConnectionResult> {
        let reply = self.wpa_cli(&["add_network"]).await?;
        let net_id: u32 = reply.trim().parse().map_err(|_| {
            Error::CommandFailed(format!("unexpected add_network reply: {}", reply.trim()))
        })?;
        let net_id = net_id.to_string();
        info!(ssid = %creds.ssid, net_id = %net_id, "network added");

        self.set_network(&net_id, "ssid", &format!("\"{}\"", creds.ssid), false).await?;
        if creds.psk.is_empty() {
            self.set_network(&net_id, "key_mgmt", "NONE", false).await?;
        } else {
            self.set_network(&net_id, "psk", &format!("\"{}\"", creds.psk), true).await?;
        }
        expect_ok(self.wpa_cli(&["enable_network", &net_id]).await?, "enable_network")?;

        for attempt in 1..=self.timings.connect_attempts {
            let status = self.status().await?;
            let state = status.get("wpa_state").map(String::as_str).unwrap_or("");
            debug!(ssid = %creds.ssid, attempt, state, "checking connection state");

            if state == STATE_COMPLETED {
                expect_ok(self.wpa_cli(&["save_config"]).await?, "save_config")?;
                info!(ssid = %creds.ssid, "connected, configuration saved");
                return Ok(WifiConnectionResult {
                    ssid: creds.ssid.clone(),
                    state: STATE_COMPLETED.to_string(),
                    ip: status.get("ip_address").cloned().unwrap_or_default(),
                    message: String::new(),
                });
            }

            if attempt < self.timings.connect_attempts {
                tokio::time::sleep(self.timings.connect_interval).await;
            }
        }

        warn!(ssid = %creds.ssid, attempts = self.timings.connect_attempts, "connection not completed");
        Ok(WifiConnectionResult {
            ssid: creds.ssid.clone(),
            state: STATE_FAIL.to_string(),
            ip: String::new(),
            message: format!("Unable to connect to {}", creds.ssid),
        })
    }

    /// With `secret`, the value is scrubbed from any error the runner reports.
    async fn set_network(&self, net_id: &str, key: &str, value: &str, secret: bool) -> Result<()> {
        let reply = self
            .wpa_cli(&["set_network", net_id, key, value])
            .await
            .map_err(|e| if secret { scrub(e, value) } else { e })?;
        expect_ok(reply, key)
    }

    async fn wpa_cli(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["-i".to_string(), self.interface.clone()];
        full.extend(args.iter().map(|a| a.to_string()));
        let out = self.runner.run("wpa_cli", &full).await?;
        Ok(String::from_utf8(out)?)
    }
}

fn scrub(err: Error, secret: &str) -> Error {
    match err {
        Error::CommandFailed(msg) => Error::CommandFailed(
            msg.replace(secret, "<redacted>")
                .replace(secret.trim_matches('"'), "<redacted>"),
        ),
        other => other,
    }
}

// wpa_cli exits 0 even when the supplicant rejects a request.
fn expect_ok(reply: String, ctx: &str) -> Result<()> {
    if reply.trim().starts_with("FAIL") {
        return Err(Error::CommandFailed(format!("{} rejected: {}", ctx, reply.trim())));
    }
    Ok(())
}
