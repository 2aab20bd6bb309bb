//! An `AccessStore` backed by the OVH API.
//!
//! Every request is signed with the application secret and consumer key, using the API server's
//! clock (measured once, when connecting).

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use nasha_controller_core::{AccessEntry, AccessMode, AccessStore, IpNet, ResourceRef};
use reqwest::{header, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::{
    fmt,
    net::IpAddr,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, warn};


const ENDPOINTS: [(&str, &str); 7] = [
    ("ovh-eu", "https://eu.api.ovh.com/1.0"),
    ("ovh-ca", "https://ca.api.ovh.com/1.0"),
    ("ovh-us", "https://api.us.ovhcloud.com/1.0"),
    ("kimsufi-eu", "https://eu.api.kimsufi.com/1.0"),
    ("kimsufi-ca", "https://ca.api.kimsufi.com/1.0"),
    ("soyoustart-eu", "https://eu.api.soyoustart.com/1.0"),
    ("soyoustart-ca", "https://ca.api.soyoustart.com/1.0"),
];

#[derive(Clone)]
pub struct Credentials {
    pub application_key: String,
    pub application_secret: String,
    pub consumer_key: String,
}

pub struct Client {
    http: reqwest::Client,
    base: Url,
    credentials: Credentials,

    /// Seconds to add to the local clock to get the API server's clock.
    time_delta: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid OVH endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("OVH API returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct CreateAccess {
    ip: String,
    #[serde(rename = "type")]
    mode: AccessMode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Access {
    ip: String,
    #[serde(rename = "type")]
    mode: AccessMode,
    access_id: u64,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Resolves an endpoint name (e.g. `ovh-eu`) or URL.
pub fn endpoint(name: &str) -> Result<Url, Error> {
    let url = ENDPOINTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, url)| *url)
        .unwrap_or(name);
    match Url::parse(url) {
        Ok(url) if !url.cannot_be_a_base() && matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(Error::InvalidEndpoint(name.to_string())),
    }
}

/// Computes the `X-Ovh-Signature` header value.
pub fn signature(
    credentials: &Credentials,
    method: &Method,
    url: &str,
    body: &str,
    timestamp: i64,
) -> String {
    let timestamp = timestamp.to_string();
    let mut sha = Sha1::new();
    for (i, part) in [
        credentials.application_secret.as_str(),
        credentials.consumer_key.as_str(),
        method.as_str(),
        url,
        body,
        timestamp.as_str(),
    ]
    .iter()
    .enumerate()
    {
        if i > 0 {
            sha.update(b"+");
        }
        sha.update(part.as_bytes());
    }
    format!("$1${}", const_hex::encode(sha.finalize()))
}

// === impl Credentials ===

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("application_key", &self.application_key)
            .finish_non_exhaustive()
    }
}

// === impl Client ===

impl Client {
    /// Connects to the API, synchronizing with its clock and checking the credentials.
    pub async fn connect(endpoint: &str, credentials: Credentials) -> Result<Self, Error> {
        let base = self::endpoint(endpoint)?;
        let http = reqwest::Client::builder().build()?;
        let mut client = Self {
            http,
            base,
            credentials,
            time_delta: 0,
        };

        let url = client.url(&["auth", "time"])?;
        let rsp = check(client.http.get(url).send().await?).await?;
        let server_time = rsp.json::<i64>().await?;
        client.time_delta = server_time - unix_now();
        debug!(delta = client.time_delta, "Synchronized with API clock");

        let credential = client
            .call::<serde_json::Value>(Method::GET, &["auth", "currentCredential"], None)
            .await?;
        info!(
            endpoint = %client.base,
            status = credential.get("status").and_then(|s| s.as_str()).unwrap_or("unknown"),
            "Connected to the OVH API"
        );
        Ok(client)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn timestamp(&self) -> i64 {
        unix_now() + self.time_delta
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<String>,
    ) -> Result<reqwest::Response, Error> {
        let url = self.url(segments)?;
        let body = body.unwrap_or_default();
        let timestamp = self.timestamp();
        let signature = signature(&self.credentials, &method, url.as_str(), &body, timestamp);
        debug!(%method, %url, "Sending request");

        let mut req = self
            .http
            .request(method, url)
            .header("X-Ovh-Application", &self.credentials.application_key)
            .header("X-Ovh-Consumer", &self.credentials.consumer_key)
            .header("X-Ovh-Timestamp", timestamp.to_string())
            .header("X-Ovh-Signature", signature)
            .header(header::CONTENT_TYPE, "application/json");
        if !body.is_empty() {
            req = req.body(body);
        }
        check(req.send().await?).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<String>,
    ) -> Result<T, Error> {
        let rsp = self.send(method, segments, body).await?;
        rsp.json().await.map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl AccessStore for Client {
    async fn lookup(
        &self,
        resource: &ResourceRef,
        addr: IpAddr,
    ) -> anyhow::Result<Option<AccessEntry>> {
        let ip = addr.to_string();
        let segments = access_path(resource, Some(&ip));
        let access = match self.call::<Access>(Method::GET, &segments, None).await {
            Ok(access) => access,
            Err(Error::Api {
                status: StatusCode::NOT_FOUND,
                ..
            }) => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Ok(Some(AccessEntry {
            ip: parse_block(&access.ip)?,
            mode: access.mode,
            id: access.access_id,
        }))
    }

    async fn list(&self, resource: &ResourceRef) -> anyhow::Result<Vec<IpNet>> {
        let segments = access_path(resource, None);
        let blocks = self.call::<Vec<String>>(Method::GET, &segments, None).await?;
        Ok(blocks
            .iter()
            .filter_map(|block| match parse_block(block) {
                Ok(net) => Some(net),
                Err(error) => {
                    warn!(partition = %resource, %block, %error, "Ignoring invalid access");
                    None
                }
            })
            .collect())
    }

    async fn create(
        &self,
        resource: &ResourceRef,
        block: IpNet,
        mode: AccessMode,
    ) -> anyhow::Result<()> {
        let body = serde_json::to_string(&CreateAccess {
            ip: block.to_string(),
            mode,
        })
        .map_err(Error::from)?;
        let segments = access_path(resource, None);
        self.send(Method::POST, &segments, Some(body)).await?;
        Ok(())
    }

    async fn delete(&self, resource: &ResourceRef, block: IpNet) -> anyhow::Result<()> {
        let ip = access_key(block);
        let segments = access_path(resource, Some(&ip));
        self.send(Method::DELETE, &segments, None).await?;
        Ok(())
    }
}

fn access_path<'a>(resource: &'a ResourceRef, ip: Option<&'a str>) -> Vec<&'a str> {
    let mut segments = vec![
        "dedicated",
        "nasha",
        resource.nasha.as_str(),
        "partition",
        resource.name.as_str(),
        "access",
    ];
    segments.extend(ip);
    segments
}

/// Names an entry in an access path: hosts by address, wider blocks by CIDR.
fn access_key(block: IpNet) -> String {
    if block.prefix_len() == block.max_prefix_len() {
        block.addr().to_string()
    } else {
        block.to_string()
    }
}

/// Parses an access block, which the API may report with or without a prefix length.
fn parse_block(block: &str) -> anyhow::Result<IpNet> {
    if let Ok(net) = block.parse::<IpNet>() {
        return Ok(net);
    }
    let addr = block.parse::<IpAddr>()?;
    Ok(IpNet::from(addr))
}

async fn check(rsp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = rsp.status();
    if status.is_success() {
        return Ok(rsp);
    }
    let body = rsp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|e| e.message)
        .unwrap_or(body);
    Err(Error::Api { status, message })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
