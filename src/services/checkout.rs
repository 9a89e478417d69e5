//! Checkout state machine for one "buy now" surface.
//!
//! ```text
//! Inactive -> FetchingProcessingDetails -> Paying -> PaymentCleared
//!     ^                                                   |
//!     +-------------------- close() ----------------------+
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::gateway::{append_query_param, MerchantGateway};
use crate::models::{PaymentProcessingDetails, Product};
use crate::services::attempt::{AttemptToken, Generation};
use crate::services::poller::{OrderStatusPoller, PollOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    Inactive,
    FetchingProcessingDetails,
    Paying,
    PaymentCleared,
}

impl fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckoutState::Inactive => "inactive",
            CheckoutState::FetchingProcessingDetails => "fetchingProcessingDetails",
            CheckoutState::Paying => "paying",
            CheckoutState::PaymentCleared => "paymentCleared",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct Attempt {
    state: CheckoutState,
    product: Option<Product>,
    details: Option<PaymentProcessingDetails>,
}

impl Attempt {
    fn inactive() -> Self {
        Attempt {
            state: CheckoutState::Inactive,
            product: None,
            details: None,
        }
    }
}

/// Drives at most one checkout attempt at a time. Cloning shares the
/// attempt; separate `CheckoutFlow::new` instances never interfere.
pub struct CheckoutFlow<G: MerchantGateway + 'static> {
    gateway: Arc<G>,
    poller: OrderStatusPoller,
    generation: Generation,
    attempt: Arc<RwLock<Attempt>>,
    task: Arc<Mutex<Option<JoinHandle<CheckoutState>>>>,
    demo_mode: bool,
}

impl<G: MerchantGateway + 'static> Clone for CheckoutFlow<G> {
    fn clone(&self) -> Self {
        CheckoutFlow {
            gateway: self.gateway.clone(),
            poller: self.poller.clone(),
            generation: self.generation.clone(),
            attempt: self.attempt.clone(),
            task: self.task.clone(),
            demo_mode: self.demo_mode,
        }
    }
}

impl<G: MerchantGateway + 'static> CheckoutFlow<G> {
    pub fn new(gateway: Arc<G>, poller: OrderStatusPoller) -> Self {
        CheckoutFlow {
            gateway,
            poller,
            generation: Generation::new(),
            attempt: Arc::new(RwLock::new(Attempt::inactive())),
            task: Arc::new(Mutex::new(None)),
            demo_mode: false,
        }
    }

    pub fn with_demo_mode(mut self, demo_mode: bool) -> Self {
        self.demo_mode = demo_mode;
        self
    }

    pub async fn state(&self) -> CheckoutState {
        self.attempt.read().await.state
    }

    pub async fn product(&self) -> Option<Product> {
        self.attempt.read().await.product.clone()
    }

    pub async fn processing_details(&self) -> Option<PaymentProcessingDetails> {
        self.attempt.read().await.details.clone()
    }

    /// Hosted payment form to embed while paying. Demo mode tells the
    /// processor to run its simulated wallet.
    pub async fn payment_form_url(&self) -> Option<String> {
        let attempt = self.attempt.read().await;
        if attempt.state != CheckoutState::Paying {
            return None;
        }
        attempt.details.as_ref().map(|details| {
            if self.demo_mode {
                append_query_param(&details.payment_form_url, "demoMode", "True")
            } else {
                details.payment_form_url.clone()
            }
        })
    }

    /// Starts a fresh attempt for `product` in the background. Any attempt
    /// already running is abandoned.
    pub async fn open(&self, product: Product) {
        let token = self.begin(&product).await;
        let flow = self.clone();
        let handle = tokio::spawn(async move { flow.drive(token, product).await });

        let previous = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Runs a fresh attempt for `product` on the caller's task and returns
    /// the state it ended in.
    pub async fn checkout(&self, product: Product) -> CheckoutState {
        let token = self.begin(&product).await;
        self.drive(token, product).await
    }

    /// Waits for the attempt started by [`open`](Self::open), if any.
    pub async fn join(&self) -> Option<CheckoutState> {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        handle.await.ok()
    }

    /// Whether an attempt started by [`open`](Self::open) is still running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Tears the surface down: pending poll and in-flight fetches are
    /// discarded and the attempt is forgotten.
    pub async fn close(&self) {
        self.generation.invalidate();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }

        let mut attempt = self.attempt.write().await;
        *attempt = Attempt::inactive();
        info!("Checkout closed");
    }

    async fn begin(&self, product: &Product) -> AttemptToken {
        let token = self.generation.begin();
        let mut attempt = self.attempt.write().await;
        *attempt = Attempt {
            state: CheckoutState::FetchingProcessingDetails,
            product: Some(product.clone()),
            details: None,
        };
        info!(attempt = token.id(), gtin = %product.gtin, "Checkout opened");
        token
    }

    /// Applies `update` only while `token` is still the live attempt.
    async fn commit(&self, token: &AttemptToken, update: impl FnOnce(&mut Attempt)) -> bool {
        let mut attempt = self.attempt.write().await;
        if !token.is_current() {
            return false;
        }
        update(&mut attempt);
        true
    }

    async fn drive(&self, token: AttemptToken, product: Product) -> CheckoutState {
        let created = tokio::select! {
            biased;
            _ = token.cancelled() => return CheckoutState::Inactive,
            created = self.gateway.checkout_one(&product.gtin) => created,
        };

        let details = match created {
            Ok(details) => details,
            Err(e) => {
                // No retry: the attempt stays in FetchingProcessingDetails
                // until the surface is closed or reopened.
                error!(gtin = %product.gtin, "Failed to create checkout: {}", e);
                return self.state().await;
            }
        };

        let order_id = details.order_id;
        let committed = self
            .commit(&token, |attempt| {
                attempt.details = Some(details);
                attempt.state = CheckoutState::Paying;
            })
            .await;
        if !committed {
            return CheckoutState::Inactive;
        }
        info!(attempt = token.id(), %order_id, "Awaiting payment");

        let gateway = self.gateway.clone();
        let outcome = self
            .poller
            .poll_until(
                &token,
                || {
                    let gateway = gateway.clone();
                    async move { gateway.order_payment_status(order_id).await }
                },
                |status| status.is_cleared(),
            )
            .await;

        match outcome {
            PollOutcome::Settled { checks, .. } => {
                let committed = self
                    .commit(&token, |attempt| attempt.state = CheckoutState::PaymentCleared)
                    .await;
                if committed {
                    info!(%order_id, checks, "Payment cleared");
                    CheckoutState::PaymentCleared
                } else {
                    CheckoutState::Inactive
                }
            }
            PollOutcome::Cancelled => {
                warn!(%order_id, "Payment polling cancelled");
                CheckoutState::Inactive
            }
        }
    }
}
