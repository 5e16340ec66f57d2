// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::cache::TtlCache;
use crate::error::ResolveError;
use crate::retry::{retry, RetryPolicy};
use crate::types::OriginInfo;

/// How long a resolved origin is trusted before it is looked up again.
pub const ORIGIN_CACHE_TTL: Duration = Duration::from_secs(60);

/// The underlying, uncached, IP to origin lookup.
#[async_trait]
pub trait OriginLookup: Send + Sync + 'static {
    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<OriginInfo>;
}

/// Resolves IP addresses to their origin, caching answers and retrying failed lookups.
///
/// The cache is shared by every caller of the same resolver. Concurrent misses for the same
/// address each perform their own lookup.
pub struct OriginResolver {
    lookup: Arc<dyn OriginLookup>,
    cache: TtlCache<String, OriginInfo>,
    retry: RetryPolicy,
}

impl OriginResolver {
    pub fn new(lookup: Arc<dyn OriginLookup>, retry: RetryPolicy) -> Self {
        Self::with_cache(lookup, TtlCache::new(ORIGIN_CACHE_TTL), retry)
    }

    pub fn with_cache(
        lookup: Arc<dyn OriginLookup>,
        cache: TtlCache<String, OriginInfo>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            lookup,
            cache,
            retry,
        }
    }

    pub async fn resolve(&self, ip: IpAddr) -> Result<OriginInfo, ResolveError> {
        let key = ip.to_string();
        if let Some(origin) = self.cache.get(&key) {
            return Ok(origin);
        }

        let origin = retry(&self.retry, || self.lookup.lookup(ip)).await?;
        debug!(%ip, asn = origin.asn, name = %origin.name, "Resolved origin");

        self.cache.insert(key, origin.clone());
        Ok(origin)
    }

    /// Like [`OriginResolver::resolve`], for an address that is still in textual form.
    pub async fn resolve_host(&self, host: &str) -> Result<OriginInfo, ResolveError> {
        let ip = host
            .parse()
            .map_err(|_| ResolveError::NotAnAddress(host.to_string()))?;
        self.resolve(ip).await
    }
}

/// Origin lookups against Team Cymru's IP to ASN whois service, in bulk verbose mode.
pub struct CymruWhois {
    server: String,
    timeout: Duration,
}

impl CymruWhois {
    pub const DEFAULT_SERVER: &'static str = "whois.cymru.com:43";

    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            timeout,
        }
    }

    async fn query(&self, ip: IpAddr) -> anyhow::Result<String> {
        let mut stream = TcpStream::connect(&self.server)
            .await
            .with_context(|| format!("connecting to {}", self.server))?;

        stream
            .write_all(format!("begin\nverbose\n{ip}\nend\n").as_bytes())
            .await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }
}

impl Default for CymruWhois {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SERVER, Duration::from_secs(10))
    }
}

#[async_trait]
impl OriginLookup for CymruWhois {
    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<OriginInfo> {
        let response = tokio::time::timeout(self.timeout, self.query(ip))
            .await
            .map_err(|_| anyhow!("whois query for {ip} timed out after {:?}", self.timeout))??;
        parse_cymru_response(&response)
    }
}

/// Parses the first answer of a verbose bulk response:
///
/// ```text
/// AS      | IP               | BGP Prefix          | CC | Registry | Allocated  | AS Name
/// 13335   | 1.1.1.1          | 1.1.1.0/24          | AU | apnic    | 2011-08-11 | CLOUDFLARENET, US
/// ```
pub fn parse_cymru_response(response: &str) -> anyhow::Result<OriginInfo> {
    let line = response
        .lines()
        .map(str::trim)
        .find(|line| {
            !line.is_empty() && !line.starts_with("Bulk mode") && !line.starts_with("AS ")
        })
        .ok_or_else(|| anyhow!("empty whois response"))?;

    if let Some(error) = line.strip_prefix("Error:") {
        bail!("whois error: {}", error.trim());
    }

    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let [asn, ip, prefix, country, registry, allocated, name] = fields[..] else {
        bail!("unexpected whois answer: {line:?}");
    };

    if asn == "NA" {
        bail!("no origin announced for {ip}");
    }

    let optional = |field: &str| (!field.is_empty()).then(|| field.to_string());

    Ok(OriginInfo {
        ip: ip.parse().with_context(|| format!("bad address {ip:?}"))?,
        asn: asn.parse().with_context(|| format!("bad AS number {asn:?}"))?,
        name: name.to_string(),
        country: country.to_string(),
        registry: optional(registry),
        prefix: optional(prefix),
        allocated: optional(allocated),
    })
}
