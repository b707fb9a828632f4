//! Command lines for the interface cascade and the network daemons.

use super::hostapd;
use crate::config::{InterfaceConfig, SetupConfig};
use crate::supervisor::CommandSpec;

pub const HOSTAPD_ID: &str = "hostapd";
pub const DNSMASQ_ID: &str = "dnsmasq";
pub const WPA_SUPPLICANT_ID: &str = "wpa_supplicant";

pub fn interface_check_id(ifaces: &InterfaceConfig) -> String {
    format!("ifconfig_{}", ifaces.ap)
}

/// The re-check after creation gets its own id, so the first check can
/// still be draining while it runs.
pub fn interface_recheck_id(ifaces: &InterfaceConfig) -> String {
    format!("ifconfig_{}_recheck", ifaces.ap)
}

/// `ifconfig <ap>`: prints "Link encap" when present, "Device not found" otherwise.
pub fn interface_check(ifaces: &InterfaceConfig) -> CommandSpec {
    CommandSpec::new(interface_check_id(ifaces), "ifconfig").arg(&ifaces.ap)
}

pub fn interface_recheck(ifaces: &InterfaceConfig) -> CommandSpec {
    CommandSpec::new(interface_recheck_id(ifaces), "ifconfig").arg(&ifaces.ap)
}

pub fn add_ap_interface(ifaces: &InterfaceConfig) -> CommandSpec {
    CommandSpec::new(format!("iw_add_{}", ifaces.ap), "iw").args([
        "phy",
        ifaces.phy.as_str(),
        "interface",
        "add",
        ifaces.ap.as_str(),
        "type",
        "__ap",
    ])
}

pub fn up_ap_interface(ifaces: &InterfaceConfig) -> CommandSpec {
    CommandSpec::new(format!("ifconfig_{}_up", ifaces.ap), "ifconfig").args([ifaces.ap.as_str(), "up"])
}

pub fn assign_ap_address(cfg: &SetupConfig) -> CommandSpec {
    let ap = cfg.interfaces.ap.as_str();
    CommandSpec::new(format!("ifconfig_{}_ip", ap), "ifconfig").args([ap, cfg.hostapd.ip.as_str()])
}

/// hostapd reads its configuration from stdin.
pub fn hostapd(cfg: &SetupConfig) -> CommandSpec {
    CommandSpec::new(HOSTAPD_ID, "hostapd")
        .args(["-d", "/dev/stdin"])
        .input(hostapd::render(&cfg.interfaces.ap, &cfg.hostapd))
}

pub fn dnsmasq(cfg: &SetupConfig) -> CommandSpec {
    CommandSpec::new(DNSMASQ_ID, "dnsmasq").args([
        "--no-hosts".to_string(),
        "--keep-in-foreground".to_string(),
        "--log-queries".to_string(),
        "--no-resolv".to_string(),
        format!("--address={}", cfg.dnsmasq.address),
        format!("--dhcp-range={}", cfg.dnsmasq.dhcp_range),
        format!("--dhcp-vendorclass={}", cfg.dnsmasq.vendor_class),
        "--dhcp-authoritative".to_string(),
        "--log-facility=-".to_string(),
    ])
}

pub fn wpa_supplicant(cfg: &SetupConfig) -> CommandSpec {
    CommandSpec::new(WPA_SUPPLICANT_ID, "wpa_supplicant").args([
        "-Dnl80211".to_string(),
        format!("-i{}", cfg.interfaces.sta),
        format!("-c{}", cfg.wpa_supplicant.cfg_file),
    ])
}
