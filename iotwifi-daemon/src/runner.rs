use anyhow::Context;
use iotwifi_core::{bus::ShutdownReason, config, service};
use std::net::{Ipv4Addr, SocketAddr};

pub const CFG_ENV: &str = "IOTWIFI_CFG";
pub const PORT_ENV: &str = "IOTWIFI_PORT";
const DEFAULT_CFG: &str = "cfg/wificfg.json";
const DEFAULT_PORT: &str = "8080";

/// Startup settings taken from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// File path or URL of the JSON setup configuration.
    pub cfg_location: String,
    pub port: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Empty values fall back to the defaults, like unset ones.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, fallback: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            cfg_location: get(CFG_ENV, DEFAULT_CFG),
            port: get(PORT_ENV, DEFAULT_PORT),
        }
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let port: u16 = self
            .port
            .parse()
            .with_context(|| format!("invalid {}: {}", PORT_ENV, self.port))?;
        Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }
}

/// Loads the configuration (fatal on failure) and runs the service.
pub async fn run(settings: Settings) -> anyhow::Result<ShutdownReason> {
    tracing::info!(cfg = %settings.cfg_location, port = %settings.port, "Loading IoT Wifi...");
    let listen = settings.listen_addr()?;
    let setup = config::load_config(&settings.cfg_location)
        .await
        .context("could not load config")?;

    let reason = service::run(setup, listen).await?;
    Ok(reason)
}
