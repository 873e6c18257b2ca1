//! Endpoint discovery
//!
//! Finds the port a Marlin board sits on. Each candidate is opened, given
//! time to boot (opening the port resets most boards), drained of its boot
//! banner and then asked to identify itself. The first candidate whose
//! answer carries the firmware signature wins; everything else is closed.

use crate::communication::transport::{EndpointOpener, Transport};
use cnclink_core::ConnectionError;
use cnclink_settings::ControllerConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BANNER_SLICE: Duration = Duration::from_millis(50);

/// An endpoint that answered the probe
pub struct DiscoveredEndpoint {
    /// Endpoint name
    pub endpoint: String,
    /// Open transport, banner and probe answer already consumed
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for DiscoveredEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredEndpoint")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Probe candidates in order and return the first responsive one
pub async fn discover(
    opener: &dyn EndpointOpener,
    config: &ControllerConfig,
) -> Result<DiscoveredEndpoint, ConnectionError> {
    let candidates = if config.serial.candidates.is_empty() {
        opener.candidates()?
    } else {
        config.serial.candidates.clone()
    };
    tracing::info!("Probing {} candidate endpoint(s)", candidates.len());

    let mut tried = 0;
    for endpoint in candidates {
        tried += 1;
        let transport = match opener.open(&endpoint, config.baud_rate()) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", endpoint, e);
                continue;
            }
        };

        match probe(transport.clone(), &endpoint, config).await {
            Ok(()) => {
                tracing::info!("Found controller on {}", endpoint);
                return Ok(DiscoveredEndpoint {
                    endpoint,
                    transport,
                });
            }
            Err(e) => {
                tracing::warn!("Rejected {}: {}", endpoint, e);
                transport.close();
            }
        }
    }

    Err(ConnectionError::NotFound { tried })
}

async fn probe(
    transport: Arc<dyn Transport>,
    endpoint: &str,
    config: &ControllerConfig,
) -> Result<(), ConnectionError> {
    tokio::time::sleep(config.boot_delay()).await;

    let endpoint = endpoint.to_string();
    let command = config.serial.probe_command.clone();
    let signature = config.serial.firmware_signature.clone();
    let timeout = config.probe_timeout();

    let port = endpoint.clone();
    tokio::task::spawn_blocking(move || {
        probe_blocking(transport.as_ref(), &endpoint, &command, &signature, timeout)
    })
    .await
    .map_err(|e| ConnectionError::FailedToOpen {
        port,
        reason: e.to_string(),
    })?
}

fn probe_blocking(
    transport: &dyn Transport,
    endpoint: &str,
    command: &str,
    signature: &str,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    let failed = |reason: String| ConnectionError::FailedToOpen {
        port: endpoint.to_string(),
        reason,
    };

    let drain_deadline = Instant::now() + timeout;
    while Instant::now() < drain_deadline {
        match transport.read_line(BANNER_SLICE) {
            Ok(Some(line)) => tracing::debug!("Banner from {}: {}", endpoint, line),
            Ok(None) => break,
            Err(e) => return Err(failed(e.to_string())),
        }
    }

    transport
        .write_line(command)
        .map_err(|e| failed(e.to_string()))?;

    let deadline = Instant::now() + timeout;
    let mut answered = false;
    let mut identified = false;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match transport.read_line(deadline - now) {
            Ok(Some(line)) => {
                answered = true;
                if line.contains(signature) {
                    identified = true;
                } else if identified && line.starts_with("ok") {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => return Err(failed(e.to_string())),
        }
    }

    match (identified, answered) {
        (true, _) => Ok(()),
        (false, true) => Err(ConnectionError::SignatureMismatch {
            port: endpoint.to_string(),
        }),
        (false, false) => Err(ConnectionError::ProbeTimeout {
            port: endpoint.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
