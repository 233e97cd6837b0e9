//! Passive HTTP fingerprinting prober
//!
//! Detects the deployed framework version from response headers and page
//! markers. Only the passive strategy is implemented; intrusive strategies
//! need a payload-capable prober supplied by the caller.

use super::{
    EvasionVariant, Platform, ProbeOptions, ProbeOutcome, ProbeStrategy, Prober, TransportOptions,
};
use crate::error::{ScanError, ScanResult};
use crate::target::Target;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE, USER_AGENT, VARY};
use reqwest::{Client, Response};
use std::sync::Mutex;
use std::time::Duration;

static POWERED_BY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Next\.js\s+([0-9.]+(?:-canary\.\d+)?)").expect("powered-by regex is valid")
});

static BUILD_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""buildId"\s*:\s*"([^"]+)""#).expect("build id regex is valid"));

/// Body bytes read from a fingerprinting response
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Status code returned by request-filtering proxies
const BLOCKED_STATUS: u16 = 403;

const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// What a passive fingerprint found on one target
#[derive(Debug, Clone, Default, PartialEq)]
struct Fingerprint {
    version: Option<String>,
    rsc_vary: bool,
    rsc_content_type: bool,
    build_id: bool,
    page_markers: bool,
}

impl Fingerprint {
    fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| -> String {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        let powered_by = header("x-powered-by");
        let version = POWERED_BY_RE
            .captures(&powered_by)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let vary = header(VARY.as_str());
        Self {
            version,
            rsc_vary: vary.contains("RSC") || vary.contains("Next-Router-State-Tree"),
            ..Self::default()
        }
    }

    fn inspect_body(&mut self, body: &str) {
        self.build_id = BUILD_ID_RE.is_match(body);
        self.page_markers = body.contains("/_next/") || body.contains("__next");
    }

    fn framework_detected(&self) -> bool {
        self.version.is_some() || self.page_markers || self.build_id
    }

    fn evidence(&self) -> String {
        let mut parts = Vec::new();
        match &self.version {
            Some(version) => parts.push(format!("x-powered-by: Next.js {}", version)),
            None if self.framework_detected() => {
                parts.push("framework detected (version unknown)".to_string())
            }
            None => {}
        }
        if self.rsc_vary || self.rsc_content_type {
            parts.push("rsc endpoint".to_string());
        }
        if self.build_id {
            parts.push("build id present".to_string());
        }
        parts.join("; ")
    }
}

/// reqwest-backed prober for passive version detection
pub struct HttpProber {
    client: Client,
    user_agent: String,
    rng: Mutex<StdRng>,
}

impl HttpProber {
    /// Create a prober from transport options, seeding request ids from entropy
    pub fn new(transport: &TransportOptions, timeout: Duration) -> ScanResult<Self> {
        Self::with_rng(transport, timeout, StdRng::from_entropy())
    }

    /// Create a prober with an explicit random source for request ids
    pub fn with_rng(
        transport: &TransportOptions,
        timeout: Duration,
        rng: StdRng,
    ) -> ScanResult<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(10)
            .danger_accept_invalid_certs(!transport.verify_tls);

        if let Some(proxy) = &transport.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ScanError::ConfigError(format!("Invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ScanError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agent: transport.user_agent.clone(),
            rng: Mutex::new(rng),
        })
    }

    fn request_id(&self) -> String {
        let n: u32 = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(1000..10000),
            Err(poisoned) => poisoned.into_inner().gen_range(1000..10000),
        };
        format!("scan-{}", n)
    }

    async fn get(
        &self,
        target: &Target,
        options: &ProbeOptions,
        rsc: bool,
    ) -> ScanResult<Response> {
        let mut request = self
            .client
            .get(target.as_str())
            .timeout(options.timeout)
            .header(USER_AGENT, &self.user_agent)
            .header(REQUEST_ID_HEADER, self.request_id());
        if rsc {
            request = request.header("RSC", "1");
        }
        Ok(request.send().await?)
    }
}

async fn read_body_limited(mut response: Response) -> ScanResult<String> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        body.extend_from_slice(&chunk);
        if body.len() >= MAX_BODY_BYTES {
            body.truncate(MAX_BODY_BYTES);
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe_version(
        &self,
        target: &Target,
        options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome> {
        let response = self.get(target, options, false).await?;
        let status = response.status().as_u16();
        let mut fingerprint = Fingerprint::from_headers(response.headers());

        if status == BLOCKED_STATUS {
            log::debug!("{} answered {} to a plain GET", target, status);
            return Ok(ProbeOutcome {
                filter_suspected: true,
                detected_version: fingerprint.version.clone(),
                evidence: fingerprint.evidence(),
                status_code: Some(status),
                ..ProbeOutcome::default()
            });
        }

        // a broken body must not cost the header fingerprint
        match read_body_limited(response).await {
            Ok(body) => fingerprint.inspect_body(&body),
            Err(e) => log::debug!("{}: body read failed: {}", target, e),
        }

        match self.get(target, options, true).await {
            Ok(rsc_response) => {
                fingerprint.rsc_content_type = rsc_response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map_or(false, |ct| ct.starts_with("text/x-component"));
            }
            Err(e) => log::debug!("RSC request to {} failed: {}", target, e),
        }

        Ok(ProbeOutcome {
            detected_version: fingerprint.version.clone(),
            evidence: fingerprint.evidence(),
            status_code: Some(status),
            ..ProbeOutcome::default()
        })
    }

    async fn probe_non_destructive(
        &self,
        _target: &Target,
        _options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome> {
        Err(ScanError::ProbeTransportError(
            "strategy not supported by http prober".to_string(),
        ))
    }

    async fn probe_active(
        &self,
        _target: &Target,
        _variant: Option<EvasionVariant>,
        _platform: Platform,
        _options: &ProbeOptions,
    ) -> ScanResult<ProbeOutcome> {
        Err(ScanError::ProbeTransportError(
            "strategy not supported by http prober".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "HTTP fingerprint"
    }

    fn supports(&self, strategy: ProbeStrategy) -> bool {
        strategy == ProbeStrategy::PassiveVersion
    }
}
