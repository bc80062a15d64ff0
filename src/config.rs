//! Fixed parameters of the configuration portal.
//!
//! The access point name and passphrase can be overridden at build time
//! through `PORTAL_AP_SSID` / `PORTAL_AP_PASSWORD`.

use std::net::Ipv4Addr;
use std::time::Duration;

pub const AP_SSID: &str = match option_env!("PORTAL_AP_SSID") {
    Some(ssid) => ssid,
    None => "NeopixelMagic",
};

/// Must be at least 8 characters for the network to be advertised with WPA2.
pub const AP_PASSWORD: &str = match option_env!("PORTAL_AP_PASSWORD") {
    Some(pass) => pass,
    None => "123456789",
};

pub const AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
pub const AP_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
pub const AP_NETMASK_BITS: u8 = 24;

pub const DNS_PORT: u16 = 53;

/// Page shell on the template filesystem: head and script, no closing tags.
pub const TEMPLATE_NAME: &str = "config.html";
pub const TEMPLATE_MOUNT_POINT: &str = "/spiffs";

pub const RENDER_BUFFER_CAPACITY: usize = 6044;
pub const MAX_SUBMISSION_BYTES: usize = 2048;

/// Time given to pending log output before a fatal restart.
pub const FATAL_RESTART_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub ssid: String,
    pub password: String,
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask_bits: u8,
}

impl NetworkIdentity {
    /// Where every unmatched request gets redirected.
    pub fn portal_url(&self) -> String {
        format!("http://{}/", self.ip)
    }
}

impl Default for NetworkIdentity {
    fn default() -> Self {
        Self {
            ssid: AP_SSID.to_string(),
            password: AP_PASSWORD.to_string(),
            ip: AP_IP,
            gateway: AP_GATEWAY,
            netmask_bits: AP_NETMASK_BITS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub network: NetworkIdentity,
    pub dns_port: u16,
    pub template: String,
    pub buffer_capacity: usize,
    pub max_submission_bytes: usize,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            network: NetworkIdentity::default(),
            dns_port: DNS_PORT,
            template: TEMPLATE_NAME.to_string(),
            buffer_capacity: RENDER_BUFFER_CAPACITY,
            max_submission_bytes: MAX_SUBMISSION_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_url_points_at_ap_root() {
        let network = NetworkIdentity::default();
        assert_eq!(network.portal_url(), "http://192.168.4.1/");
    }

    #[test]
    fn default_passphrase_is_long_enough_for_wpa2() {
        assert!(AP_PASSWORD.len() >= 8);
    }
}
