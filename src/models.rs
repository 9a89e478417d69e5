use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub gtin: String,
    pub name: String,
    pub description: String,
    /// Scaled by 10^6.
    pub price: i64,
    pub currency: String,
    pub payment_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOrder {
    pub product: Product,
    pub quantity: u32,
}

/// Payment lifecycle state, shared by the current status and the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatusKind {
    Created,
    Cleared,
    Rejected,
    Error,
    PayoutProcessing,
    PayoutCompleted,
    RefundRequested,
    RefundRejected,
    RefundCompleted,
    RefundError,
}

impl PaymentStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatusKind::Created => "created",
            PaymentStatusKind::Cleared => "cleared",
            PaymentStatusKind::Rejected => "rejected",
            PaymentStatusKind::Error => "error",
            PaymentStatusKind::PayoutProcessing => "payout_processing",
            PaymentStatusKind::PayoutCompleted => "payout_completed",
            PaymentStatusKind::RefundRequested => "refund_requested",
            PaymentStatusKind::RefundRejected => "refund_rejected",
            PaymentStatusKind::RefundCompleted => "refund_completed",
            PaymentStatusKind::RefundError => "refund_error",
        }
    }
}

impl fmt::Display for PaymentStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: PaymentStatusKind,
}

impl PaymentEvent {
    pub fn local_timestamp(&self) -> DateTime<Local> {
        self.timestamp.with_timezone(&Local)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainTx {
    /// Ledger version of the transaction.
    pub transaction_id: u64,
    pub sender_address: String,
    pub amount: i64,
    pub currency: String,
    pub is_refund: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub status: PaymentStatusKind,
    pub merchant_address: String,
    /// Server-computed gate. Never derive eligibility locally.
    pub can_cash_out: bool,
    /// Server-computed gate. Never derive eligibility locally.
    pub can_refund: bool,
    pub events: Vec<PaymentEvent>,
    /// Order is significant: settlement first, refund (if any) second.
    pub blockchain_txs: Vec<BlockchainTx>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub vasp_payment_ref: String,
    pub total_price: i64,
    pub currency: String,
    pub products: Vec<ProductOrder>,
    pub payment_status: PaymentStatus,
    pub image_url: Option<String>,
}

impl Order {
    pub fn local_created_at(&self) -> DateTime<Local> {
        self.created_at.with_timezone(&Local)
    }
}

/// Terse settlement status looked up by order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPaymentStatus {
    Known(PaymentStatusKind),
    /// The backend has no payment for this order (404).
    Unknown,
}

impl OrderPaymentStatus {
    pub fn is_cleared(&self) -> bool {
        matches!(self, OrderPaymentStatus::Known(PaymentStatusKind::Cleared))
    }
}

impl fmt::Display for OrderPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderPaymentStatus::Known(kind) => kind.fmt(f),
            OrderPaymentStatus::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Result of initiating a checkout. Lives for one checkout attempt only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProcessingDetails {
    pub payment_form_url: String,
    pub vasp_payment_id: Uuid,
    pub order_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOption {
    pub address: String,
    pub currency: String,
    pub amount: i64,
    pub payment_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOptions {
    pub payment_id: String,
    pub fiat_price: i64,
    pub fiat_currency: String,
    pub options: Vec<PaymentOption>,
    pub wallet_url: String,
    pub base_merchant_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_kind_wire_names() {
        let kind: PaymentStatusKind = serde_json::from_str("\"payout_processing\"").unwrap();
        assert_eq!(kind, PaymentStatusKind::PayoutProcessing);
        assert_eq!(kind.to_string(), "payout_processing");
        assert_eq!(
            serde_json::to_string(&PaymentStatusKind::RefundCompleted).unwrap(),
            "\"refund_completed\""
        );
    }

    #[test]
    fn test_unknown_status_display() {
        assert_eq!(OrderPaymentStatus::Unknown.to_string(), "Unknown");
        assert!(!OrderPaymentStatus::Unknown.is_cleared());
        assert!(OrderPaymentStatus::Known(PaymentStatusKind::Cleared).is_cleared());
    }
}
