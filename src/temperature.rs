//! Temperature client (C11, §4.11): best-effort HTTP read of a head's onboard
//! sensors. Never fails the caller; a bad response just yields zeroes.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Temperature {
    pub cameras: [f64; 2],
    pub mainboard: f64,
    pub mainboard_humidity: f64,
}

#[derive(Deserialize)]
struct TemperatureResponse {
    camera: Vec<f64>,
    mainboard: f64,
    #[serde(rename = "mainboardHumidity")]
    mainboard_humidity: f64,
}

/// Reads `http://<ip>:8080/sensors/temperature`. On any transport, status, or
/// decode failure this logs a warning and returns an all-zero reading rather
/// than propagating an error, per the "not fatal" contract.
pub fn read_temperature(ip: Ipv4Addr) -> Temperature {
    let url = format!("http://{ip}:8080/sensors/temperature");
    let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();

    let response = match agent.get(&url).call() {
        Ok(r) => r,
        Err(e) => {
            warn!(%ip, error = %e, "temperature request failed");
            return Temperature::default();
        }
    };

    let parsed: TemperatureResponse = match response.into_json() {
        Ok(p) => p,
        Err(e) => {
            warn!(%ip, error = %e, "temperature response could not be decoded");
            return Temperature::default();
        }
    };

    let mut cameras = [0.0; 2];
    for (slot, value) in cameras.iter_mut().zip(parsed.camera.iter()) {
        *slot = *value;
    }

    Temperature { cameras, mainboard: parsed.mainboard, mainboard_humidity: parsed.mainboard_humidity }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_host_yields_zeroed_reading() {
        // 192.0.2.0/24 is reserved (TEST-NET-1) and never routable.
        let t = read_temperature(Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(t, Temperature::default());
    }
}
