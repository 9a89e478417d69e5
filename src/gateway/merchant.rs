use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::{append_query_param, HttpBackend, MerchantGateway, WireTimestamp};
use crate::error::GatewayError;
use crate::models::{
    BlockchainTx, Order, OrderPaymentStatus, PaymentEvent, PaymentProcessingDetails, PaymentStatus,
    PaymentStatusKind, Product, ProductOrder,
};

#[derive(Debug, Deserialize)]
struct ProductListResponse {
    products: Vec<Product>,
}

#[derive(Debug, Serialize)]
struct CheckoutRequest<'a> {
    items: Vec<CheckoutItem<'a>>,
}

#[derive(Debug, Serialize)]
struct CheckoutItem<'a> {
    gtin: &'a str,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    order_id: Uuid,
    vasp_payment_id: Uuid,
    payment_form_url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentEventResponse {
    timestamp: WireTimestamp,
    event_type: PaymentStatusKind,
}

/// The merchant's order schema only guarantees `tx_id` and `is_refund`.
#[derive(Debug, Deserialize)]
struct ChainTxResponse {
    tx_id: u64,
    is_refund: bool,
    #[serde(default)]
    sender_address: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PaymentStatusResponse {
    status: PaymentStatusKind,
    merchant_address: String,
    can_payout: bool,
    can_refund: bool,
    #[serde(default)]
    events: Vec<PaymentEventResponse>,
    #[serde(default)]
    chain_txs: Option<Vec<ChainTxResponse>>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: Uuid,
    created_at: WireTimestamp,
    vasp_payment_reference: String,
    total_price: i64,
    currency: String,
    products: Vec<ProductOrder>,
    payment_status: Option<PaymentStatusResponse>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TerseStatusResponse {
    status: PaymentStatusKind,
}

impl From<ChainTxResponse> for BlockchainTx {
    fn from(tx: ChainTxResponse) -> Self {
        BlockchainTx {
            transaction_id: tx.tx_id,
            sender_address: tx.sender_address,
            amount: tx.amount,
            currency: tx.currency,
            is_refund: tx.is_refund,
        }
    }
}

impl TryFrom<PaymentStatusResponse> for PaymentStatus {
    type Error = GatewayError;

    fn try_from(raw: PaymentStatusResponse) -> Result<Self, Self::Error> {
        let events = raw
            .events
            .into_iter()
            .map(|ev| {
                Ok(PaymentEvent {
                    timestamp: ev.timestamp.into_utc()?,
                    event_type: ev.event_type,
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;

        Ok(PaymentStatus {
            status: raw.status,
            merchant_address: raw.merchant_address,
            can_cash_out: raw.can_payout,
            can_refund: raw.can_refund,
            events,
            blockchain_txs: raw
                .chain_txs
                .unwrap_or_default()
                .into_iter()
                .map(BlockchainTx::from)
                .collect(),
        })
    }
}

impl TryFrom<OrderResponse> for Order {
    type Error = GatewayError;

    fn try_from(raw: OrderResponse) -> Result<Self, Self::Error> {
        let payment_status = raw.payment_status.ok_or_else(|| {
            GatewayError::InvalidResponse(format!("order {} has no payment status", raw.order_id))
        })?;

        Ok(Order {
            order_id: raw.order_id,
            created_at: raw.created_at.into_utc()?,
            vasp_payment_ref: raw.vasp_payment_reference,
            total_price: raw.total_price,
            currency: raw.currency,
            products: raw.products,
            payment_status: payment_status.try_into()?,
            image_url: raw.image_url,
        })
    }
}

/// Client for the merchant backend REST API.
#[derive(Clone)]
pub struct MerchantClient {
    http: HttpBackend,
}

impl MerchantClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        MerchantClient {
            http: HttpBackend::new("merchant", base_url, timeout),
        }
    }

    /// Creates a client with custom circuit breaker configuration
    pub fn with_circuit_breaker(
        base_url: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        MerchantClient {
            http: HttpBackend::with_circuit_breaker(
                "merchant",
                base_url,
                timeout,
                failure_threshold,
                reset_timeout_secs,
            ),
        }
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    pub fn circuit_state(&self) -> String {
        self.http.circuit_state()
    }
}

#[async_trait]
impl MerchantGateway for MerchantClient {
    async fn list_products(&self) -> Result<Vec<Product>, GatewayError> {
        let list: ProductListResponse = self.http.get("/products").await?;
        Ok(list.products)
    }

    async fn checkout_one(&self, gtin: &str) -> Result<PaymentProcessingDetails, GatewayError> {
        let request = CheckoutRequest {
            items: vec![CheckoutItem { gtin, quantity: 1 }],
        };
        let created: CheckoutResponse = self.http.post_json("/payments", &request).await?;

        tracing::info!(
            order_id = %created.order_id,
            vasp_payment_id = %created.vasp_payment_id,
            "Checkout created for product {}",
            gtin
        );

        Ok(PaymentProcessingDetails {
            payment_form_url: append_query_param(
                &created.payment_form_url,
                "orderId",
                &created.order_id.to_string(),
            ),
            vasp_payment_id: created.vasp_payment_id,
            order_id: created.order_id,
        })
    }

    async fn order_details(&self, order_id: Uuid) -> Result<Option<Order>, GatewayError> {
        let raw: Option<OrderResponse> = self
            .http
            .get_optional(&format!("/orders/{}", order_id))
            .await?;
        raw.map(Order::try_from).transpose()
    }

    async fn payment_log(&self, payment_id: &str) -> Result<Option<PaymentStatus>, GatewayError> {
        let raw: Option<PaymentStatusResponse> = self
            .http
            .get_optional(&format!("/payments/{}/log", payment_id))
            .await?;
        raw.map(PaymentStatus::try_from).transpose()
    }

    async fn order_payment_status(&self, order_id: Uuid) -> Result<OrderPaymentStatus, GatewayError> {
        let raw: Option<TerseStatusResponse> = self
            .http
            .get_optional_unguarded(&format!("/orders/{}/payment", order_id))
            .await?;
        Ok(raw
            .map(|r| OrderPaymentStatus::Known(r.status))
            .unwrap_or(OrderPaymentStatus::Unknown))
    }

    async fn payout(&self, payment_id: &str) -> Result<(), GatewayError> {
        tracing::info!("Requesting payout for payment {}", payment_id);
        self.http
            .post_empty(&format!("/payments/{}/payout", payment_id))
            .await
    }

    async fn refund(&self, payment_id: &str) -> Result<(), GatewayError> {
        tracing::info!("Requesting refund for payment {}", payment_id);
        self.http
            .post_empty(&format!("/payments/{}/refund", payment_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const ORDER_ID: &str = "5b7c2d1e-8f4a-4c3b-9d2e-1a2b3c4d5e6f";

    fn order_body(chain_txs: &str) -> String {
        format!(
            r#"{{
                "order_id": "{ORDER_ID}",
                "created_at": "2021-03-04T10:00:00",
                "vasp_payment_reference": "pay-ref-1",
                "total_price": 34250000,
                "currency": "USD",
                "products": [{{
                    "product": {{
                        "gtin": "00000000000001",
                        "name": "Hoodie",
                        "description": "Warm",
                        "price": 34250000,
                        "currency": "USD",
                        "payment_type": "direct"
                    }},
                    "quantity": 1
                }}],
                "payment_status": {{
                    "status": "cleared",
                    "merchant_address": "tdm1merchant",
                    "can_payout": true,
                    "can_refund": false,
                    "events": [
                        {{"timestamp": "2021-03-04T10:00:00", "event_type": "created"}},
                        {{"timestamp": "2021-03-04T10:01:00", "event_type": "cleared"}}
                    ],
                    "chain_txs": {chain_txs}
                }}
            }}"#
        )
    }

    fn client(server: &mockito::Server) -> MerchantClient {
        MerchantClient::new(server.url(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_order_details_translates_wire_fields() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/orders/{ORDER_ID}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(order_body(
                r#"[{"tx_id": 42, "is_refund": false, "sender_address": "tdm1payer", "amount": 34250000, "currency": "XUS"}]"#,
            ))
            .create_async()
            .await;

        let order = client(&server)
            .order_details(ORDER_ID.parse().unwrap())
            .await
            .unwrap()
            .expect("order present");

        assert_eq!(order.vasp_payment_ref, "pay-ref-1");
        assert!(order.payment_status.can_cash_out);
        assert!(!order.payment_status.can_refund);
        assert_eq!(order.payment_status.events.len(), 2);
        assert_eq!(order.payment_status.events[1].event_type, PaymentStatusKind::Cleared);
        assert_eq!(order.payment_status.blockchain_txs[0].transaction_id, 42);
        assert_eq!(order.payment_status.blockchain_txs[0].sender_address, "tdm1payer");
    }

    #[tokio::test]
    async fn test_null_chain_txs_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/orders/{ORDER_ID}").as_str())
            .with_status(200)
            .with_body(order_body("null"))
            .create_async()
            .await;

        let order = client(&server)
            .order_details(ORDER_ID.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(order.payment_status.blockchain_txs.is_empty());
    }

    #[tokio::test]
    async fn test_order_not_found_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/orders/[^/]+$".into()))
            .with_status(404)
            .create_async()
            .await;

        let result = client(&server).order_details(Uuid::new_v4()).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_server_error_propagates() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/orders/[^/]+$".into()))
            .with_status(500)
            .create_async()
            .await;

        let result = client(&server).order_details(Uuid::new_v4()).await;
        match result {
            Err(e) => assert_eq!(e.status_code(), Some(500)),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_checkout_one_posts_single_item() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/payments")
            .match_body(Matcher::Json(serde_json::json!({
                "items": [{"gtin": "00000000000001", "quantity": 1}]
            })))
            .with_status(200)
            .with_body(format!(
                r#"{{"order_id": "{ORDER_ID}",
                    "vasp_payment_id": "0f1e2d3c-4b5a-4978-8695-a4b3c2d1e0f9",
                    "payment_form_url": "http://vasp.test/checkout?paymentId=0f1e"}}"#
            ))
            .create_async()
            .await;

        let details = client(&server).checkout_one("00000000000001").await.unwrap();
        assert_eq!(details.order_id.to_string(), ORDER_ID);
        assert_eq!(
            details.payment_form_url,
            format!("http://vasp.test/checkout?paymentId=0f1e&orderId={ORDER_ID}")
        );
    }

    #[tokio::test]
    async fn test_payment_status_unknown_on_404() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/orders/[^/]+/payment$".into()))
            .with_status(404)
            .create_async()
            .await;

        let status = client(&server)
            .order_payment_status(Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(status, OrderPaymentStatus::Unknown);
    }

    #[tokio::test]
    async fn test_payout_hits_payment_reference() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/payments/pay-ref-1/payout")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        client(&server).payout("pay-ref-1").await.unwrap();
        mock.assert_async().await;
    }
}
