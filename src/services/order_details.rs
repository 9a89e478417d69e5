//! Order detail view model: order, payment status and chain transactions
//! merged into what the merchant's order page shows and can act on.

use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ActionError;
use crate::gateway::MerchantGateway;
use crate::models::{BlockchainTx, Order, PaymentStatus, PaymentStatusKind, ProductOrder};
use crate::money::{fiat_to_human_friendly, onchain_to_human_friendly};
use crate::services::attempt::{AttemptToken, Generation};

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    CashOut,
    Refund,
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAction::CashOut => f.write_str("cash out"),
            OrderAction::Refund => f.write_str("refund"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionControl {
    pub action: OrderAction,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub time: String,
    pub event: PaymentStatusKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetails {
    pub order: Order,
    pub primary_tx: Option<BlockchainTx>,
    pub refund_tx: Option<BlockchainTx>,
    pub cash_out: ActionControl,
    pub refund: ActionControl,
}

impl OrderDetails {
    /// Relies on the backend's ordering of `blockchain_txs`: settlement
    /// first, refund second.
    pub fn reconcile(order: Order) -> Self {
        let txs = &order.payment_status.blockchain_txs;
        let primary_tx = txs.first().cloned();
        let refund_tx = txs.get(1).filter(|tx| tx.is_refund).cloned();

        let cash_out = ActionControl {
            action: OrderAction::CashOut,
            enabled: order.payment_status.can_cash_out,
        };
        let refund = ActionControl {
            action: OrderAction::Refund,
            enabled: order.payment_status.can_refund,
        };

        OrderDetails {
            order,
            primary_tx,
            refund_tx,
            cash_out,
            refund,
        }
    }

    pub fn control(&self, action: OrderAction) -> ActionControl {
        match action {
            OrderAction::CashOut => self.cash_out,
            OrderAction::Refund => self.refund,
        }
    }

    pub fn status(&self) -> PaymentStatusKind {
        self.order.payment_status.status
    }

    pub fn payer_address(&self) -> &str {
        self.primary_tx
            .as_ref()
            .map(|tx| tx.sender_address.as_str())
            .filter(|addr| !addr.is_empty())
            .unwrap_or(NOT_AVAILABLE)
    }

    pub fn paid_amount(&self) -> String {
        match &self.primary_tx {
            Some(tx) => format!("{} {}", onchain_to_human_friendly(tx.amount), tx.currency),
            None => NOT_AVAILABLE.to_string(),
        }
    }

    pub fn total_display(&self) -> String {
        format!(
            "{} {}",
            fiat_to_human_friendly(self.order.total_price),
            self.order.currency
        )
    }

    pub fn primary_tx_url(&self, explorer_url: &str) -> Option<String> {
        self.primary_tx
            .as_ref()
            .map(|tx| explorer_link(explorer_url, tx.transaction_id))
    }

    pub fn refund_tx_url(&self, explorer_url: &str) -> Option<String> {
        self.refund_tx
            .as_ref()
            .map(|tx| explorer_link(explorer_url, tx.transaction_id))
    }

    pub fn event_rows(&self) -> Vec<EventRow> {
        self.order
            .payment_status
            .events
            .iter()
            .map(|ev| EventRow {
                time: ev.local_timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
                event: ev.event_type,
            })
            .collect()
    }
}

pub fn explorer_link(explorer_url: &str, transaction_id: u64) -> String {
    format!("{}/{}", explorer_url.trim_end_matches('/'), transaction_id)
}

/// Post-payment summary shown on the confirmation page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationSummary {
    pub first_item: Option<ProductOrder>,
    pub items_total: String,
    pub order_total: String,
}

impl ConfirmationSummary {
    pub fn from_order(order: &Order) -> Self {
        let total = format!(
            "{} {}",
            fiat_to_human_friendly(order.total_price),
            order.currency
        );
        ConfirmationSummary {
            first_item: order.products.first().cloned(),
            items_total: total.clone(),
            order_total: total,
        }
    }
}

/// `Loading` and `Unknown` are distinct: the former means no answer yet,
/// the latter that the backend has no such order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderView {
    Loading,
    Unknown,
    Loaded(OrderDetails),
}

/// Owns the view of one order. Each controller has its own generation, so
/// controllers for different orders never see each other's results.
pub struct OrderDetailsController<G: MerchantGateway> {
    gateway: Arc<G>,
    order_id: Uuid,
    generation: Generation,
    view: RwLock<OrderView>,
}

impl<G: MerchantGateway> OrderDetailsController<G> {
    pub fn new(gateway: Arc<G>, order_id: Uuid) -> Self {
        OrderDetailsController {
            gateway,
            order_id,
            generation: Generation::new(),
            view: RwLock::new(OrderView::Loading),
        }
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub async fn view(&self) -> OrderView {
        self.view.read().await.clone()
    }

    /// Fetches the order and replaces the view, unless a newer fetch or
    /// `close` came in meanwhile. Errors leave the view as it was.
    pub async fn load(&self) {
        let token = self.generation.begin();
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            fetched = self.gateway.order_details(self.order_id) => fetched,
        };

        let mut view = self.view.write().await;
        if !token.is_current() {
            return;
        }
        match fetched {
            Ok(Some(order)) => *view = OrderView::Loaded(OrderDetails::reconcile(order)),
            Ok(None) => {
                warn!(order_id = %self.order_id, "Unknown order");
                *view = OrderView::Unknown;
            }
            Err(e) => error!(order_id = %self.order_id, "Failed to fetch order: {}", e),
        }
    }

    pub async fn cash_out(&self) -> Result<(), ActionError> {
        self.run_action(OrderAction::CashOut).await
    }

    pub async fn refund(&self) -> Result<(), ActionError> {
        self.run_action(OrderAction::Refund).await
    }

    /// Discards any fetch or action still in flight.
    pub fn close(&self) {
        self.generation.invalidate();
    }

    /// Sends the action and refetches the order. `close()` while either
    /// call is in flight drops it and leaves the view untouched.
    async fn run_action(&self, action: OrderAction) -> Result<(), ActionError> {
        let payment_ref = match &*self.view.read().await {
            OrderView::Loaded(details) => {
                if !details.control(action).enabled {
                    return Err(ActionError::NotPermitted(action));
                }
                details.order.vasp_payment_ref.clone()
            }
            _ => return Err(ActionError::NotLoaded),
        };

        let token = self.generation.begin();
        let request = async {
            match action {
                OrderAction::CashOut => self.gateway.payout(&payment_ref).await,
                OrderAction::Refund => self.gateway.refund(&payment_ref).await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(order_id = %self.order_id, "Order view closed during {}", action);
                return Ok(());
            }
            result = request => result,
        };
        match result {
            Ok(()) => info!(order_id = %self.order_id, "Requested {}", action),
            // The refetch below shows whatever actually happened.
            Err(e) => warn!(order_id = %self.order_id, "{} request failed: {}", action, e),
        }

        self.refresh(&token).await;
        Ok(())
    }

    /// Refetch after an action under the action's token; keeps the current
    /// view when the order is no longer found.
    async fn refresh(&self, token: &AttemptToken) {
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            fetched = self.gateway.order_details(self.order_id) => fetched,
        };

        let mut view = self.view.write().await;
        if !token.is_current() {
            return;
        }
        match fetched {
            Ok(Some(order)) => *view = OrderView::Loaded(OrderDetails::reconcile(order)),
            Ok(None) => warn!(order_id = %self.order_id, "Order vanished after action"),
            Err(e) => error!(order_id = %self.order_id, "Failed to refetch order: {}", e),
        }
    }
}

/// Permalink view over a payment's detailed status log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentLogView {
    Unknown,
    Loaded(PaymentStatus),
}

pub async fn load_payment_log<G: MerchantGateway + ?Sized>(
    gateway: &G,
    payment_id: &str,
) -> Result<PaymentLogView, crate::error::GatewayError> {
    Ok(match gateway.payment_log(payment_id).await? {
        Some(status) => PaymentLogView::Loaded(status),
        None => PaymentLogView::Unknown,
    })
}
