use crate::config::HostapdConfig;

/// Renders the hostapd configuration fed to `hostapd -d /dev/stdin`.
///
/// Only ssid, channel and passphrase come from the setup config; the rest of
/// the template (802.11g, WPA2-PSK, TKIP/CCMP) is fixed.
pub fn render(interface: &str, cfg: &HostapdConfig) -> String {
    let lines = [
        format!("interface={}", interface),
        format!("ssid={}", cfg.ssid),
        "hw_mode=g".to_string(),
        format!("channel={}", cfg.channel),
        "macaddr_acl=0".to_string(),
        "auth_algs=1".to_string(),
        "ignore_broadcast_ssid=0".to_string(),
        "wpa=2".to_string(),
        format!("wpa_passphrase={}", cfg.wpa_passphrase),
        "wpa_key_mgmt=WPA-PSK".to_string(),
        "wpa_pairwise=TKIP".to_string(),
        "rsn_pairwise=CCMP".to_string(),
    ];

    let mut text = lines.join("\n");
    text.push('\n');
    text
}
