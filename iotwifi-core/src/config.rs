use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// 顶层配置：对应 wificfg.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(rename = "dnsmasq_cfg")]
    pub dnsmasq: DnsmasqConfig,
    #[serde(rename = "host_apd_cfg")]
    pub hostapd: HostapdConfig,
    #[serde(rename = "wpa_supplicant_cfg")]
    pub wpa_supplicant: WpaSupplicantConfig,
    /// Optional; the device names default to `uap0`/`wlan0`/`phy0`.
    #[serde(default)]
    pub interfaces: InterfaceConfig,
}

// ============= dnsmasq =============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsmasqConfig {
    /// e.g. `/#/192.168.27.1`
    pub address: String,
    /// e.g. `192.168.27.100,192.168.27.150,1h`
    pub dhcp_range: String,
    /// e.g. `set:device,IoT`
    pub vendor_class: String,
}

// ============= hostapd =============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostapdConfig {
    pub ssid: String,
    pub wpa_passphrase: String,
    pub channel: String,
    /// Static address assigned to the AP interface.
    pub ip: String,
}

// ============= wpa_supplicant =============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WpaSupplicantConfig {
    /// e.g. `/etc/wpa_supplicant/wpa_supplicant.conf`
    pub cfg_file: String,
}

// ============= 网络接口 =============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Virtual AP interface created on `phy`.
    pub ap: String,
    /// Station interface the supplicant manages.
    pub sta: String,
    pub phy: String,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            ap: "uap0".to_string(),
            sta: "wlan0".to_string(),
            phy: "phy0".to_string(),
        }
    }
}

// ============= 配置加载函数 =============

/// A location containing a scheme delimiter is fetched over HTTP.
pub fn is_url(location: &str) -> bool {
    location.contains("://")
}

/// 从 JSON 字符串解析配置
pub fn parse_config(json: &str) -> Result<SetupConfig> {
    serde_json::from_str(json).map_err(|e| Error::Config(format!("malformed configuration: {}", e)))
}

/// Loads the configuration from a file path or an http(s) URL.
pub async fn load_config(location: &str) -> Result<SetupConfig> {
    let json = if is_url(location) {
        tracing::info!(url = %location, "Fetching configuration");
        fetch(location)
            .await
            .map_err(|e| Error::Config(format!("cannot fetch {}: {}", location, e)))?
    } else {
        tracing::info!(path = %location, "Reading configuration");
        tokio::fs::read_to_string(location)
            .await
            .map_err(|e| Error::Config(format!("cannot read {}: {}", location, e)))?
    };

    parse_config(&json)
}

async fn fetch(url: &str) -> Result<String> {
    let body = reqwest::get(url).await?.error_for_status()?.text().await?;
    Ok(body)
}
