use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{HttpBackend, VaspGateway};
use crate::config::Config;
use crate::error::GatewayError;
use crate::models::{PaymentOption, PaymentOptions};

#[derive(Debug, Deserialize)]
struct PaymentOptionResponse {
    address: String,
    currency: String,
    amount: i64,
    payment_link: String,
}

/// `wallet_url` and `base_merchant_url` come from the VASP's environment
/// and are null when it is not configured.
#[derive(Debug, Deserialize)]
struct PaymentOptionsResponse {
    payment_id: String,
    fiat_price: i64,
    fiat_currency: String,
    options: Vec<PaymentOptionResponse>,
    #[serde(default)]
    wallet_url: Option<String>,
    #[serde(default)]
    base_merchant_url: Option<String>,
}

impl From<PaymentOptionsResponse> for PaymentOptions {
    fn from(raw: PaymentOptionsResponse) -> Self {
        PaymentOptions {
            payment_id: raw.payment_id,
            fiat_price: raw.fiat_price,
            fiat_currency: raw.fiat_currency,
            options: raw
                .options
                .into_iter()
                .map(|op| PaymentOption {
                    address: op.address,
                    currency: op.currency,
                    amount: op.amount,
                    payment_link: op.payment_link,
                })
                .collect(),
            wallet_url: raw.wallet_url.unwrap_or_default(),
            base_merchant_url: raw.base_merchant_url.unwrap_or_default(),
        }
    }
}

/// Client for the VASP backend's public checkout endpoints.
#[derive(Clone)]
pub struct VaspClient {
    http: HttpBackend,
}

impl VaspClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        VaspClient {
            http: HttpBackend::new("vasp", base_url, timeout),
        }
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }
}

#[async_trait]
impl VaspGateway for VaspClient {
    async fn payment_options(&self, payment_id: &str) -> Result<Option<PaymentOptions>, GatewayError> {
        let raw: Option<PaymentOptionsResponse> = self
            .http
            .get_optional(&format!("/payments/{}", payment_id))
            .await?;
        Ok(raw.map(PaymentOptions::from))
    }
}

const FIXTURE_ADDRESS: &str = "tlb1px0gsvlknj5z3kgxqe6jt3rdh38t3hxyewl7tmcg69kly5";

/// Canned payment options for running the widget without a VASP backend.
/// Only reachable through `VASP_MOCK=true`.
#[derive(Debug, Clone)]
pub struct FixtureVaspClient {
    wallet_url: String,
    base_merchant_url: String,
}

impl FixtureVaspClient {
    pub fn new(wallet_url: String, base_merchant_url: String) -> Self {
        FixtureVaspClient {
            wallet_url,
            base_merchant_url,
        }
    }

    fn option(currency: &str, amount: i64) -> PaymentOption {
        PaymentOption {
            address: FIXTURE_ADDRESS.to_string(),
            currency: currency.to_string(),
            amount,
            payment_link: format!(
                "diem://{}?c={}&am={}",
                FIXTURE_ADDRESS, currency, amount
            ),
        }
    }
}

#[async_trait]
impl VaspGateway for FixtureVaspClient {
    async fn payment_options(&self, payment_id: &str) -> Result<Option<PaymentOptions>, GatewayError> {
        tracing::debug!("Serving fixture payment options for {}", payment_id);
        Ok(Some(PaymentOptions {
            payment_id: payment_id.to_string(),
            fiat_price: 34_250_000,
            fiat_currency: "USD".to_string(),
            options: vec![
                Self::option("Coin1", 34_250_000),
                Self::option("Coin2", 31_712_966),
                Self::option("XUS", 32_932_676),
            ],
            wallet_url: self.wallet_url.clone(),
            base_merchant_url: self.base_merchant_url.clone(),
        }))
    }
}

/// Picks the live client or the fixture according to `VASP_MOCK`.
pub fn from_config(config: &Config) -> Arc<dyn VaspGateway> {
    if config.vasp_mock {
        tracing::warn!("VASP_MOCK is set; payment options come from a local fixture");
        Arc::new(FixtureVaspClient::new(
            config.wallet_url.clone(),
            config.base_merchant_url.clone(),
        ))
    } else {
        Arc::new(VaspClient::new(
            config.vasp_backend_url.clone(),
            config.request_timeout(),
        ))
    }
}
