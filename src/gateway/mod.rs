//! HTTP gateways to the merchant and VASP backends.
//!
//! The traits are the seam the checkout flow, poller and order views depend
//! on; `MerchantClient` and `VaspClient` are the reqwest implementations.

pub mod merchant;
pub mod vasp;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::models::{Order, OrderPaymentStatus, PaymentOptions, PaymentProcessingDetails, PaymentStatus, Product};

pub use merchant::MerchantClient;
pub use vasp::{FixtureVaspClient, VaspClient};

#[async_trait]
pub trait MerchantGateway: Send + Sync {
    async fn list_products(&self) -> Result<Vec<Product>, GatewayError>;

    /// Creates an order for one unit of `gtin` and a payment for it.
    async fn checkout_one(&self, gtin: &str) -> Result<PaymentProcessingDetails, GatewayError>;

    async fn order_details(&self, order_id: Uuid) -> Result<Option<Order>, GatewayError>;

    async fn payment_log(&self, payment_id: &str) -> Result<Option<PaymentStatus>, GatewayError>;

    async fn order_payment_status(&self, order_id: Uuid) -> Result<OrderPaymentStatus, GatewayError>;

    /// Fire-and-forget; refetch the order to observe the effect.
    async fn payout(&self, payment_id: &str) -> Result<(), GatewayError>;

    /// Fire-and-forget; refetch the order to observe the effect.
    async fn refund(&self, payment_id: &str) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait VaspGateway: Send + Sync {
    async fn payment_options(&self, payment_id: &str) -> Result<Option<PaymentOptions>, GatewayError>;
}

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_RESET_TIMEOUT_SECS: u64 = 60;

/// JSON-over-HTTP plumbing shared by both backend clients.
#[derive(Clone)]
pub(crate) struct HttpBackend {
    client: Client,
    base_url: String,
    name: &'static str,
    circuit_breaker: Breaker,
}

impl HttpBackend {
    pub(crate) fn new(name: &'static str, base_url: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(
            name,
            base_url,
            timeout,
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_RESET_TIMEOUT_SECS,
        )
    }

    pub(crate) fn with_circuit_breaker(
        name: &'static str,
        base_url: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        HttpBackend {
            client,
            base_url,
            name,
            circuit_breaker,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = self.url(path);
        let client = self.client.clone();
        let endpoint = path.to_string();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .get(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .send()
                    .await?;
                let response = ensure_success(response, &endpoint)?;
                Ok::<T, GatewayError>(response.json::<T>().await?)
            })
            .await;

        self.settle(result)
    }

    /// GET where 404 means "no such resource" rather than failure.
    pub(crate) async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, GatewayError> {
        let result = self.circuit_breaker.call(self.fetch_optional::<T>(path)).await;
        self.settle(result)
    }

    /// `get_optional` outside the circuit breaker. Status polling keeps its
    /// own cadence and must not be locked out by an open breaker, nor trip
    /// it with its own failed checks.
    pub(crate) async fn get_optional_unguarded<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, GatewayError> {
        self.fetch_optional::<T>(path).await
    }

    fn fetch_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<T>, GatewayError>> {
        let url = self.url(path);
        let client = self.client.clone();
        let endpoint = path.to_string();

        async move {
            let response = client
                .get(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = ensure_success(response, &endpoint)?;
            Ok::<Option<T>, GatewayError>(Some(response.json::<T>().await?))
        }
    }

    pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let request = self.client.post(&url).json(body);
        let endpoint = path.to_string();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = request.send().await?;
                let response = ensure_success(response, &endpoint)?;
                Ok::<T, GatewayError>(response.json::<T>().await?)
            })
            .await;

        self.settle(result)
    }

    /// POST without a body whose response payload is ignored.
    pub(crate) async fn post_empty(&self, path: &str) -> Result<(), GatewayError> {
        let url = self.url(path);
        let client = self.client.clone();
        let endpoint = path.to_string();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .send()
                    .await?;
                ensure_success(response, &endpoint)?;
                Ok::<(), GatewayError>(())
            })
            .await;

        self.settle(result)
    }

    fn settle<T>(&self, result: Result<T, FailsafeError<GatewayError>>) -> Result<T, GatewayError> {
        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen(format!(
                "{} backend circuit breaker is open",
                self.name
            ))),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn ensure_success(response: Response, endpoint: &str) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(GatewayError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        })
    }
}

/// Appends `key=value` to a URL's query string. Falls back to plain string
/// concatenation for URLs `url` cannot parse (relative form URLs).
pub fn append_query_param(raw: &str, key: &str, value: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair(key, value);
            parsed.to_string()
        }
        Err(_) => {
            let separator = if raw.contains('?') { '&' } else { '?' };
            format!("{raw}{separator}{key}={value}")
        }
    }
}

/// Backend timestamps arrive either as ISO-8601 text (with or without an
/// offset; naive values are UTC) or as epoch seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireTimestamp {
    Text(String),
    Seconds(f64),
}

impl WireTimestamp {
    pub(crate) fn into_utc(self) -> Result<DateTime<Utc>, GatewayError> {
        match self {
            WireTimestamp::Text(raw) => {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
                    return Ok(parsed.with_timezone(&Utc));
                }
                NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| Utc.from_utc_datetime(&naive))
                    .map_err(|e| {
                        GatewayError::InvalidResponse(format!("bad timestamp {raw:?}: {e}"))
                    })
            }
            WireTimestamp::Seconds(secs) => {
                let whole = secs.trunc() as i64;
                let nanos = ((secs - secs.trunc()) * 1e9) as u32;
                Utc.timestamp_opt(whole, nanos).single().ok_or_else(|| {
                    GatewayError::InvalidResponse(format!("bad timestamp {secs}"))
                })
            }
        }
    }
}
