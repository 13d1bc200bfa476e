//! Network client seam and the record/replay network cache.
//!
//! Collaborators reach the remote system only through [`Transport`]. When
//! the network cache is enabled the transport is wrapped in a
//! [`CachingTransport`], which answers previously recorded requests from
//! `.http_cache.json` without contacting the live system.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use crate::io::dirs::write_atomic;

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            body: Some(body.into()),
        }
    }

    pub fn put(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "PUT".to_string(),
            url: url.into(),
            body: Some(body.into()),
        }
    }

    /// Cache key over method, scheme, host, port, path, query and body.
    pub fn cache_key(&self) -> Result<String> {
        let url = Url::parse(&self.url).with_context(|| format!("parse url {}", self.url))?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("url without host: {}", self.url))?;
        let port = url
            .port_or_known_default()
            .map(|port| port.to_string())
            .unwrap_or_default();
        let body_hash = self
            .body
            .as_deref()
            .map(|body| hex::encode(Sha256::digest(body.as_bytes())))
            .unwrap_or_default();
        Ok(format!(
            "{} {}://{}:{}{}?{} body={}",
            self.method.to_ascii_uppercase(),
            url.scheme(),
            host,
            port,
            url.path(),
            url.query().unwrap_or_default(),
            body_hash
        ))
    }
}

/// Response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail unless the status is 2xx.
    pub fn error_for_status(self, request: &Request) -> Result<Self> {
        if !self.is_success() {
            bail!(
                "{} {} returned status {}",
                request.method,
                request.url,
                self.status
            );
        }
        Ok(self)
    }
}

/// Abstraction over the remote API client.
pub trait Transport {
    fn send(&mut self, request: &Request) -> Result<Response>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, request: &Request) -> Result<Response> {
        (**self).send(request)
    }
}

/// Transport without a live connection: every call fails.
///
/// Wrapped in a [`CachingTransport`] it can still replay recorded calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn send(&mut self, request: &Request) -> Result<Response> {
        bail!(
            "no live connection configured for {} {}",
            request.method,
            request.url
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RecordedExchange {
    request: Request,
    response: Response,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: BTreeMap<String, RecordedExchange>,
}

/// Persisted request/response pairs. Additive, never pruned.
#[derive(Debug)]
pub struct NetworkCache {
    path: PathBuf,
    file: CacheFile,
}

impl NetworkCache {
    /// Open the cache at `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parse network cache {}", path.display()))?
        } else {
            CacheFile::default()
        };
        debug!(path = %path.display(), entries = file.entries.len(), "network cache opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.file.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.entries.is_empty()
    }

    pub fn lookup(&self, request: &Request) -> Result<Option<Response>> {
        let key = request.cache_key()?;
        Ok(self
            .file
            .entries
            .get(&key)
            .map(|exchange| exchange.response.clone()))
    }

    /// Record an exchange and persist the cache.
    pub fn record(&mut self, request: &Request, response: &Response) -> Result<()> {
        let key = request.cache_key()?;
        self.file.entries.insert(
            key,
            RecordedExchange {
                request: request.clone(),
                response: response.clone(),
            },
        );
        let mut buf = serde_json::to_string_pretty(&self.file).context("serialize network cache")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

/// Read-through record/replay wrapper around a transport.
pub struct CachingTransport<T> {
    inner: T,
    cache: NetworkCache,
}

impl<T: Transport> CachingTransport<T> {
    pub fn open(inner: T, cache_path: &Path) -> Result<Self> {
        Ok(Self {
            inner,
            cache: NetworkCache::open(cache_path)?,
        })
    }

    pub fn cache(&self) -> &NetworkCache {
        &self.cache
    }
}

impl<T: Transport> Transport for CachingTransport<T> {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    fn send(&mut self, request: &Request) -> Result<Response> {
        if let Some(response) = self.cache.lookup(request)? {
            debug!("replaying cached response");
            return Ok(response);
        }
        let response = self.inner.send(request)?;
        debug!(status = response.status, "recording response");
        self.cache.record(request, &response)?;
        Ok(response)
    }
}
