//! HTTP client for the Proxmox VE inventory API.
//!
//! Covers the handful of endpoints the refresher needs: the version probe
//! used as an authentication check, the cluster handle, the VM resource list,
//! and the per-guest agent interface report. Responses arrive wrapped in the
//! usual `{"data": ...}` envelope.

use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::Error;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Inventory API client. Cheap to clone.
#[derive(Clone)]
pub struct InventoryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
}

/// Builder for configuring an [`InventoryClient`].
pub struct InventoryClientBuilder {
    base_url: String,
    token_id: String,
    secret: String,
    timeout: Duration,
    insecure_tls: bool,
}

impl InventoryClientBuilder {
    /// Create a builder for the given endpoint and API token.
    pub fn new(
        base_url: impl Into<String>,
        token_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token_id: token_id.into(),
            secret: secret.into(),
            timeout: DEFAULT_TIMEOUT,
            insecure_tls: false,
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skip TLS certificate verification. Off by default; opt in only for
    /// endpoints with self-signed certificates.
    #[must_use]
    pub fn insecure_tls(mut self, insecure: bool) -> Self {
        self.insecure_tls = insecure;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<InventoryClient, Error> {
        let auth = format!("PVEAPIToken={}={}", self.token_id, self.secret);
        let mut auth_value = HeaderValue::from_str(&auth)
            .map_err(|_| Error::Config("API token contains invalid header characters".into()))?;
        auth_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth_value);

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(self.insecure_tls)
            .build()?;

        let base_url = Url::parse(&self.base_url)
            .map_err(|err| Error::Config(format!("invalid inventory endpoint: {err}")))?;

        Ok(InventoryClient {
            inner: Arc::new(ClientInner { http, base_url }),
        })
    }
}

/// Inventory API version, returned by the authentication probe.
#[derive(Debug, Clone, Deserialize)]
pub struct Version {
    /// Version string (e.g., "8.2").
    pub version: String,
    /// Release string.
    #[serde(default)]
    pub release: String,
}

/// Handle to the cluster, resolved once before polling starts.
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    /// Cluster name from `/cluster/status`.
    pub name: String,
}

/// One entry of the cluster resource list.
#[derive(Debug, Clone, Deserialize)]
pub struct VmResource {
    /// Guest name; becomes the cached DNS name.
    #[serde(default)]
    pub name: String,
    /// Node hosting the guest.
    #[serde(default)]
    pub node: String,
    /// Numeric guest id.
    #[serde(default)]
    pub vmid: u64,
    /// Resource kind ("qemu", "lxc", ...).
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// One agent-reported network interface.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentInterface {
    /// Interface name inside the guest.
    #[serde(default)]
    pub name: String,
    /// Addresses reported for this interface.
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<InterfaceAddress>,
}

/// One address of an agent-reported interface.
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceAddress {
    /// Textual address.
    #[serde(rename = "ip-address")]
    pub ip_address: String,
    /// Address family, "ipv4" or "ipv6".
    #[serde(rename = "ip-address-type")]
    pub ip_address_type: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ClusterStatusItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct AgentResult {
    #[serde(default)]
    result: Vec<AgentInterface>,
}

impl InventoryClient {
    /// Create a builder for the given endpoint and API token.
    pub fn builder(
        base_url: impl Into<String>,
        token_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> InventoryClientBuilder {
        InventoryClientBuilder::new(base_url, token_id, secret)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self
            .inner
            .base_url
            .join(path)
            .map_err(|err| Error::Config(format!("invalid request path {path}: {err}")))?;
        debug!(%url, "inventory GET");

        let response = self.inner.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("{path}: HTTP {status}")));
        }

        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    /// Fetch the API version. Doubles as the authentication probe at startup.
    pub async fn version(&self) -> Result<Version, Error> {
        self.get("api2/json/version").await
    }

    /// Resolve the cluster handle from `/cluster/status`.
    pub async fn cluster(&self) -> Result<ClusterHandle, Error> {
        let items: Vec<ClusterStatusItem> = self.get("api2/json/cluster/status").await?;
        items
            .into_iter()
            .find(|item| item.kind == "cluster")
            .map(|item| ClusterHandle { name: item.name })
            .ok_or_else(|| Error::Upstream("cluster status reported no cluster entry".into()))
    }

    /// List VM-type resources across the cluster.
    pub async fn vm_resources(&self) -> Result<Vec<VmResource>, Error> {
        self.get("api2/json/cluster/resources?type=vm").await
    }

    /// Fetch the agent-reported network interfaces for one guest.
    pub async fn agent_interfaces(
        &self,
        node: &str,
        vmid: u64,
    ) -> Result<Vec<AgentInterface>, Error> {
        let path = format!("api2/json/nodes/{node}/qemu/{vmid}/agent/network-get-interfaces");
        let result: AgentResult = self.get(&path).await?;
        Ok(result.result)
    }
}
