//! Device discovery over mDNS.
//!
//! Dyson Link devices advertise their local broker as a
//! `_dyson_mqtt._tcp.local.` service. The instance name is either the serial
//! itself or `{product}_{serial}` depending on firmware.

use std::net::IpAddr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// mDNS service type advertised by the devices.
pub const SERVICE_TYPE: &str = "_dyson_mqtt._tcp.local.";

/// Default time to browse before giving up.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether an mDNS instance full name belongs to the device with `serial`.
pub fn instance_matches(fullname: &str, serial: &str) -> bool {
    let instance = fullname.split('.').next().unwrap_or_default();
    let instance = instance.to_ascii_uppercase();
    let serial = serial.to_ascii_uppercase();
    instance == serial || instance.ends_with(&format!("_{}", serial))
}

/// Resolve the address of a device's broker by browsing mDNS.
///
/// Returns [`Error::Discovery`] if the device does not answer within
/// `timeout`.
pub async fn resolve_host(serial: &str, timeout: Duration) -> Result<IpAddr> {
    let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| Error::Discovery(e.to_string()))?;

    debug!("Browsing {} for {}", SERVICE_TYPE, serial);
    let deadline = Instant::now() + timeout;
    let mut found = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = match tokio::time::timeout(remaining, receiver.recv_async()).await {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                warn!("mDNS browse ended early: {}", e);
                break;
            }
            Err(_) => break,
        };

        if let ServiceEvent::ServiceResolved(service) = event {
            if !instance_matches(service.get_fullname(), serial) {
                continue;
            }
            if let Some(addr) = service.get_addresses().iter().next() {
                found = Some(addr.to_string());
                break;
            }
        }
    }

    if let Err(e) = daemon.shutdown() {
        debug!("mDNS daemon shutdown failed: {}", e);
    }

    let addr = found.ok_or_else(|| {
        Error::Discovery(format!("{} not found within {:?}", serial, timeout))
    })?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| Error::Discovery(format!("invalid address {} for {}", addr, serial)))?;
    info!("Discovered {} at {}", serial, addr);
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_matches_plain_serial() {
        assert!(instance_matches(
            "AB1-UK-AAA0111A._dyson_mqtt._tcp.local.",
            "AB1-UK-AAA0111A"
        ));
    }

    #[test]
    fn test_instance_matches_product_prefix() {
        assert!(instance_matches(
            "438_ab1-uk-aaa0111a._dyson_mqtt._tcp.local.",
            "AB1-UK-AAA0111A"
        ));
    }

    #[test]
    fn test_instance_does_not_match_other_device() {
        assert!(!instance_matches(
            "438_XYZ-EU-BBB2222B._dyson_mqtt._tcp.local.",
            "AB1-UK-AAA0111A"
        ));
        assert!(!instance_matches(
            "AB1-UK-AAA0111AX._dyson_mqtt._tcp.local.",
            "AB1-UK-AAA0111A"
        ));
    }
}
