use crate::traits::WifiNetwork;
use std::collections::BTreeMap;

/// Parses `wpa_cli status` output (`key=value` per line). Lines without `=`
/// are skipped; the first `=` splits key from value.
pub fn parse_status(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// 解析 SCAN_RESULTS 的输出
/// 格式: bssid / frequency / signal level / flags / ssid
///
/// The header line and `[P2P]` rows are skipped, as are rows without an
/// ssid. An ssid containing spaces is rejoined with single spaces. A repeated
/// ssid keeps the last row seen.
pub fn parse_scan_results(output: &str) -> BTreeMap<String, WifiNetwork> {
    let mut networks = BTreeMap::new();
    for line in output.lines().skip(1) {
        if line.contains("[P2P]") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }

        let ssid = fields[4..].join(" ");
        networks.insert(
            ssid.clone(),
            WifiNetwork {
                bssid: fields[0].to_string(),
                frequency: fields[1].to_string(),
                signal_level: fields[2].to_string(),
                flags: fields[3].to_string(),
                ssid,
            },
        );
    }
    networks
}
