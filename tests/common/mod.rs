#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use checkout_core::error::GatewayError;
use checkout_core::gateway::MerchantGateway;
use checkout_core::models::{
    BlockchainTx, Order, OrderPaymentStatus, PaymentEvent, PaymentProcessingDetails, PaymentStatus,
    PaymentStatusKind, Product, ProductOrder,
};
use checkout_core::services::Sleeper;

pub fn product(gtin: &str) -> Product {
    Product {
        gtin: gtin.to_string(),
        name: format!("Product {gtin}"),
        description: "Test product".to_string(),
        price: 34_250_000,
        currency: "USD".to_string(),
        payment_type: "direct".to_string(),
        image_url: None,
    }
}

pub fn order(order_id: Uuid, can_cash_out: bool, can_refund: bool, txs: Vec<BlockchainTx>) -> Order {
    Order {
        order_id,
        created_at: Utc.with_ymd_and_hms(2021, 3, 4, 10, 0, 0).unwrap(),
        vasp_payment_ref: format!("pay-{}", order_id.simple()),
        total_price: 34_250_000,
        currency: "USD".to_string(),
        products: vec![ProductOrder {
            product: product("00000000000001"),
            quantity: 1,
        }],
        payment_status: PaymentStatus {
            status: PaymentStatusKind::Cleared,
            merchant_address: "tdm1merchant".to_string(),
            can_cash_out,
            can_refund,
            events: vec![PaymentEvent {
                timestamp: Utc.with_ymd_and_hms(2021, 3, 4, 10, 0, 0).unwrap(),
                event_type: PaymentStatusKind::Created,
            }],
            blockchain_txs: txs,
        },
        image_url: None,
    }
}

pub fn chain_tx(id: u64, is_refund: bool) -> BlockchainTx {
    BlockchainTx {
        transaction_id: id,
        sender_address: "tdm1payer".to_string(),
        amount: 34_250_000,
        currency: "XUS".to_string(),
        is_refund,
    }
}

/// Scripted merchant backend with call counters.
#[derive(Default)]
pub struct StubMerchant {
    pub fail_checkout: bool,
    pub checkout_delay: Option<Duration>,
    pub order_delay: Option<Duration>,
    pub status_delay: Option<Duration>,
    pub payout_delay: Option<Duration>,
    pub order_id: Mutex<Option<Uuid>>,
    pub statuses: Mutex<VecDeque<OrderPaymentStatus>>,
    pub orders: Mutex<VecDeque<Option<Order>>>,
    pub checkout_calls: AtomicU32,
    pub status_calls: AtomicU32,
    pub order_calls: AtomicU32,
    pub payout_calls: AtomicU32,
    pub refund_calls: AtomicU32,
}

impl StubMerchant {
    pub fn with_statuses(statuses: Vec<OrderPaymentStatus>) -> Self {
        StubMerchant {
            statuses: Mutex::new(statuses.into()),
            ..Default::default()
        }
    }

    pub fn with_orders(orders: Vec<Option<Order>>) -> Self {
        StubMerchant {
            orders: Mutex::new(orders.into()),
            ..Default::default()
        }
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MerchantGateway for StubMerchant {
    async fn list_products(&self) -> Result<Vec<Product>, GatewayError> {
        Ok(vec![product("00000000000001")])
    }

    async fn checkout_one(&self, _gtin: &str) -> Result<PaymentProcessingDetails, GatewayError> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.checkout_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_checkout {
            return Err(GatewayError::Status {
                status: 500,
                endpoint: "/payments".to_string(),
            });
        }

        let order_id = Uuid::new_v4();
        *self.order_id.lock().unwrap() = Some(order_id);
        Ok(PaymentProcessingDetails {
            payment_form_url: format!("http://vasp.test/form?paymentId=p1&orderId={order_id}"),
            vasp_payment_id: Uuid::new_v4(),
            order_id,
        })
    }

    async fn order_details(&self, _order_id: Uuid) -> Result<Option<Order>, GatewayError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.order_delay {
            tokio::time::sleep(delay).await;
        }
        let mut orders = self.orders.lock().unwrap();
        // The last scripted answer repeats.
        let next = if orders.len() > 1 {
            orders.pop_front()
        } else {
            orders.front().cloned()
        };
        Ok(next.flatten())
    }

    async fn payment_log(&self, _payment_id: &str) -> Result<Option<PaymentStatus>, GatewayError> {
        Ok(None)
    }

    async fn order_payment_status(&self, _order_id: Uuid) -> Result<OrderPaymentStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.status_delay {
            tokio::time::sleep(delay).await;
        }
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        Ok(next.unwrap_or(OrderPaymentStatus::Unknown))
    }

    async fn payout(&self, _payment_id: &str) -> Result<(), GatewayError> {
        self.payout_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.payout_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn refund(&self, _payment_id: &str) -> Result<(), GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Returns right away and records how long it was asked to wait.
#[derive(Default)]
pub struct RecordingSleeper {
    pub waits: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}
