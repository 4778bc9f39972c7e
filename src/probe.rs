//! Fingerprints candidate hosts over HTTP to confirm an exposed Ollama API.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_derive::{Deserialize, Serialize};

use crate::scan::Host;

/// A confirmed Ollama API server and everything it reported about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub address: std::net::IpAddr,
    pub port: u16,
    pub version: String,
    pub models: Vec<ModelDescriptor>,
    pub last_seen: f64,
}

/// One model entry from `/api/tags`, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub model: String,
    pub modified_at: String,
    pub size: u64,
    pub digest: String,
    pub details: ModelDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    pub parent_model: String,
    pub format: String,
    pub family: String,
    pub families: Vec<String>,
    pub parameter_size: String,
    pub quantization_level: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelDescriptor>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

/// Anything that can turn a discovered host into a confirmed service.
///
/// `None` is a non-match: the host did not prove to be the service we are
/// looking for, for whatever reason. Probe failures never escalate past the
/// single host.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, host: &Host) -> Option<ServiceInstance>;
}

/// The production prober: two HTTP calls per host against the Ollama API.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    client: Client,
}

impl ProbeClient {
    /// Builds the shared HTTP client. The per-request timeout is mandatory:
    /// one hung host must never stall the batch or block shutdown.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Runs the fixed fingerprint sequence: `/api/tags` for the model list,
    /// then `/api/version`. The two reads are a best-effort snapshot, not a
    /// transaction; the service may change between them.
    ///
    /// Decoding is all-or-nothing. One undecodable model entry fails the
    /// whole `models` array, so a partial model list can never escape.
    async fn fingerprint(&self, host: &Host) -> reqwest::Result<ServiceInstance> {
        // SocketAddr printing brackets IPv6 addresses for us.
        let base = SocketAddr::new(host.address, host.port);

        let tags: TagsResponse = self
            .client
            .get(format!("http://{base}/api/tags"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let version: VersionResponse = self
            .client
            .get(format!("http://{base}/api/version"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let last_seen = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        Ok(ServiceInstance {
            address: host.address,
            port: host.port,
            version: version.version,
            models: tags.models,
            last_seen,
        })
    }
}

#[async_trait]
impl Prober for ProbeClient {
    async fn probe(&self, host: &Host) -> Option<ServiceInstance> {
        match self.fingerprint(host).await {
            Ok(instance) => Some(instance),
            Err(e) => {
                debug!("probe of {}:{} did not match: {e}", host.address, host.port);
                None
            }
        }
    }
}
