//! Remote Ed25519 signer over HTTP.
//!
//! The endpoint accepts raw payload bytes in a POST body and answers with the
//! raw 64-byte signature. The private key never leaves it.
//!
//! ## Features
//!
//! - Automatic retry with exponential backoff on transient errors
//! - HTTPS-only connections with TLS 1.3 (unless explicitly relaxed)
//! - Timeouts surfaced as a distinct error
//! - Full observability with tracing instrumentation

use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use super::{check_payload, SignatureBytes, Signer, SignerSource};
use crate::error::{MeveError, Result, MAX_SIGNER_PAYLOAD};

/// Default timeout for signing requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of retry attempts.
const MAX_RETRIES: u32 = 3;

/// Initial retry interval.
const INITIAL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum retry interval.
const MAX_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for [`RemoteSigner`].
#[derive(Clone)]
pub struct RemoteSignerConfig {
    /// Signing endpoint URL.
    pub endpoint: String,
    /// Optional bearer token.
    pub token: Option<Zeroizing<String>>,
    /// Key identifier recorded in payloads.
    pub key_id: Option<String>,
    /// Public key of the remote signing key, if published.
    pub public_key: Option<[u8; 32]>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors.
    pub max_retries: u32,
    /// Largest payload forwarded to the endpoint.
    pub max_payload_bytes: usize,
    /// Refuse plain-HTTP endpoints.
    pub require_https: bool,
}

impl std::fmt::Debug for RemoteSignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSignerConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("key_id", &self.key_id)
            .field("public_key", &self.public_key.map(hex::encode))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("require_https", &self.require_https)
            .finish()
    }
}

impl RemoteSignerConfig {
    /// Configuration for `endpoint` with default limits.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            key_id: None,
            public_key: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
            max_payload_bytes: MAX_SIGNER_PAYLOAD,
            require_https: true,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Required: `MEVE_SIGNER_URL`
    /// Optional: `MEVE_SIGNER_TOKEN`, `MEVE_SIGNER_KEY_ID`, `MEVE_SIGNER_PUBLIC_KEY`,
    /// `MEVE_SIGNER_TIMEOUT_SECS`, `MEVE_SIGNER_MAX_RETRIES`, `MEVE_SIGNER_MAX_PAYLOAD`,
    /// `MEVE_SIGNER_ALLOW_HTTP`
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("MEVE_SIGNER_URL").map_err(|_| {
            MeveError::SignerUnavailable("MEVE_SIGNER_URL environment variable not set".into())
        })?;

        let mut config = Self::new(endpoint);
        config.token = std::env::var("MEVE_SIGNER_TOKEN").ok().map(Zeroizing::new);
        config.key_id = std::env::var("MEVE_SIGNER_KEY_ID").ok();
        config.public_key = match std::env::var("MEVE_SIGNER_PUBLIC_KEY") {
            Ok(hex_key) => Some(crate::crypto::public_key_from_hex(&hex_key)?),
            Err(_) => None,
        };
        if let Some(secs) = env_parse::<u64>("MEVE_SIGNER_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("MEVE_SIGNER_MAX_RETRIES") {
            config.max_retries = retries;
        }
        if let Some(max) = env_parse::<usize>("MEVE_SIGNER_MAX_PAYLOAD") {
            config.max_payload_bytes = max;
        }
        config.require_https = std::env::var("MEVE_SIGNER_ALLOW_HTTP")
            .map(|v| v.to_lowercase() != "true")
            .unwrap_or(true);

        Ok(config)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Zeroizing::new(token.into()));
        self
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn with_public_key(mut self, public_key: [u8; 32]) -> Self {
        self.public_key = Some(public_key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Permit `http://` endpoints (local testing only).
    pub fn allow_http(mut self) -> Self {
        self.require_https = false;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// HTTP client for the remote signing endpoint.
pub struct RemoteSigner {
    client: Client,
    config: RemoteSignerConfig,
}

impl RemoteSigner {
    /// Create a new remote signer.
    #[instrument(level = "debug", skip_all, fields(
        endpoint = %config.endpoint,
        timeout_ms = config.timeout.as_millis() as u64,
        max_retries = config.max_retries
    ))]
    pub fn new(config: RemoteSignerConfig) -> Result<Self> {
        debug!("Creating remote signer client");

        if config.endpoint.trim().is_empty() {
            return Err(MeveError::SignerUnavailable(
                "signer endpoint is not configured".into(),
            ));
        }

        let mut builder = Client::builder().timeout(config.timeout);
        if config.require_https {
            builder = builder
                .https_only(true)
                .min_tls_version(reqwest::tls::Version::TLS_1_3);
        }

        let client = builder.build().map_err(|e| {
            warn!(error = %e, "Failed to create HTTP client");
            MeveError::SignerUnavailable(format!("Failed to create HTTP client: {e}"))
        })?;

        info!("Remote signer client created");
        Ok(Self { client, config })
    }

    /// Create a remote signer from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(RemoteSignerConfig::from_env()?)
    }

    pub fn config(&self) -> &RemoteSignerConfig {
        &self.config
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout.as_millis() as u64
    }

    /// Build exponential backoff configuration.
    fn build_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: INITIAL_INTERVAL,
            max_interval: MAX_INTERVAL,
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries),
            ..Default::default()
        }
    }

    /// One signing attempt.
    async fn sign_once(
        &self,
        payload: &[u8],
    ) -> std::result::Result<SignatureBytes, backoff::Error<MeveError>> {
        let start = Instant::now();

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec());
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token.as_str());
        }

        let response = request.send().await.map_err(|e| {
            let latency_ms = start.elapsed().as_millis() as u64;
            if e.is_timeout() {
                warn!(latency_ms, "Signer request timed out, will retry");
                backoff::Error::transient(MeveError::SignerTimeout {
                    timeout_ms: self.timeout_ms(),
                })
            } else if is_transient_error(&e) {
                warn!(error = %e, latency_ms, "Transient error, will retry");
                backoff::Error::transient(MeveError::SignerUnavailable(format!(
                    "Transient error (will retry): {e}"
                )))
            } else {
                warn!(error = %e, latency_ms, "Permanent error, aborting");
                backoff::Error::permanent(MeveError::SignerUnavailable(format!(
                    "Signer request failed: {e}"
                )))
            }
        })?;

        let status = response.status();
        debug!(status = %status, "Received signer response");

        if !status.is_success() {
            let err = status_error(
                status,
                payload.len(),
                self.config.max_payload_bytes,
                self.timeout_ms(),
            );
            return if is_transient_status(status) {
                warn!(status = %status, "Transient HTTP status, will retry");
                Err(backoff::Error::transient(err))
            } else {
                warn!(status = %status, "Permanent HTTP error");
                Err(backoff::Error::permanent(err))
            };
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                backoff::Error::transient(MeveError::SignerTimeout {
                    timeout_ms: self.timeout_ms(),
                })
            } else {
                backoff::Error::permanent(MeveError::SignerUnavailable(format!(
                    "Failed to read signer response: {e}"
                )))
            }
        })?;

        let signature: SignatureBytes = body.as_ref().try_into().map_err(|_| {
            backoff::Error::permanent(MeveError::SignerUnavailable(format!(
                "Expected 64-byte signature, got {} bytes",
                body.len()
            )))
        })?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Signature received"
        );
        Ok(signature)
    }
}

/// Map a non-success signer status onto the error taxonomy.
fn status_error(status: StatusCode, size: usize, max: usize, timeout_ms: u64) -> MeveError {
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => MeveError::SizeExceeded { size, max },
        StatusCode::BAD_REQUEST => {
            MeveError::InvalidPayload("signer rejected the payload".into())
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            MeveError::SignerTimeout { timeout_ms }
        }
        _ => MeveError::SignerUnavailable(format!("Signer returned status: {status}")),
    }
}

/// Check if a reqwest error is transient and should be retried.
pub(crate) fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Check if an HTTP status code indicates a transient error.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}

#[async_trait]
impl Signer for RemoteSigner {
    #[instrument(
        level = "info",
        skip_all,
        fields(source = "remote", bytes = payload.len(), max_retries = self.config.max_retries)
    )]
    async fn sign(&self, payload: &[u8]) -> Result<SignatureBytes> {
        check_payload(payload, self.config.max_payload_bytes)?;

        let start = Instant::now();
        debug!("Requesting signature from remote signer");

        let result = retry_notify(
            self.build_backoff(),
            || async { self.sign_once(payload).await },
            |err: MeveError, duration: Duration| {
                warn!(
                    error = %err,
                    retry_after_ms = duration.as_millis() as u64,
                    "Retry scheduled"
                );
            },
        )
        .await;

        let total_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(total_latency_ms = total_ms, "Signature obtained"),
            Err(e) => {
                warn!(error = %e, total_latency_ms = total_ms, "Failed to obtain signature after all retries")
            }
        }

        result
    }

    fn key_id(&self) -> Option<String> {
        self.config.key_id.clone()
    }

    fn public_key(&self) -> Option<[u8; 32]> {
        self.config.public_key
    }

    fn source_id(&self) -> SignerSource {
        SignerSource::Remote {
            endpoint: self.config.endpoint.clone(),
        }
    }
}
