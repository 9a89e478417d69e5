//! Settlement option selection for the VASP checkout widget.
//!
//! Everything a widget shows for the selected currency is derived in one
//! place, [`resolve`], from the payment options and the selected index
//! alone.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::sync::Arc;
use url::Url;

use crate::error::{GatewayError, ResolveError};
use crate::gateway::VaspGateway;
use crate::models::{PaymentOption, PaymentOptions};
use crate::money::{fiat_to_human_friendly, onchain_to_human_friendly};

pub const CHECKOUT_DATA_TYPE: &str = "PAYMENT_REQUEST";
pub const CHARGE_ACTION: &str = "charge";
pub const LINK_EXPIRATION_MINUTES: i64 = 10;

/// Per-checkout inputs to the wallet deep link that do not come from the
/// VASP payment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkContext {
    pub order_id: String,
    pub demo_mode: bool,
    pub merchant_name: String,
}

/// Everything derived from one selected option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOption {
    pub index: usize,
    pub currency: String,
    pub amount: i64,
    pub amount_display: String,
    pub fiat_display: String,
    pub address: String,
    pub vasp_address: String,
    /// Payload for the QR code; the option's payment link, verbatim.
    pub qr_payload: String,
    pub wallet_link: String,
}

pub fn resolve(
    options: &PaymentOptions,
    selected: usize,
    context: &LinkContext,
    now: DateTime<Utc>,
) -> Result<ResolvedOption, ResolveError> {
    if options.options.is_empty() {
        return Err(ResolveError::NoOptions);
    }
    let option = options
        .options
        .get(selected)
        .ok_or(ResolveError::OptionOutOfRange {
            index: selected,
            len: options.options.len(),
        })?;

    let vasp_address = parse_vasp_address(&option.address)?;
    let wallet_link = wallet_link(options, option, &vasp_address, context, now)?;

    Ok(ResolvedOption {
        index: selected,
        currency: option.currency.clone(),
        amount: option.amount,
        amount_display: format!(
            "{} {}",
            onchain_to_human_friendly(option.amount),
            option.currency
        ),
        fiat_display: format!(
            "{} {}",
            fiat_to_human_friendly(options.fiat_price),
            options.fiat_currency
        ),
        address: option.address.clone(),
        vasp_address,
        qr_payload: option.payment_link.clone(),
        wallet_link: wallet_link.to_string(),
    })
}

/// Extracts the VASP address from a raw option address. Accepts a bare
/// address or one carrying a `scheme://` prefix, a `:subaddress` suffix,
/// a path or a query.
pub fn parse_vasp_address(raw: &str) -> Result<String, ResolveError> {
    let trimmed = raw.trim();
    let without_scheme = match trimmed.find("://") {
        Some(pos) => &trimmed[pos + 3..],
        None => trimmed,
    };
    let address = without_scheme
        .split(|c| c == '?' || c == ':' || c == '/')
        .next()
        .unwrap_or_default();

    if address.is_empty() {
        return Err(ResolveError::InvalidAddress(raw.to_string()));
    }
    Ok(address.to_string())
}

fn wallet_link(
    options: &PaymentOptions,
    option: &PaymentOption,
    vasp_address: &str,
    context: &LinkContext,
    now: DateTime<Utc>,
) -> Result<Url, ResolveError> {
    let mut link = Url::parse(&options.wallet_url)?;
    {
        let mut query = link.query_pairs_mut();
        query
            .append_pair("vaspAddress", vasp_address)
            .append_pair("referenceId", &context.order_id);

        if context.demo_mode {
            let expiration = (now + Duration::minutes(LINK_EXPIRATION_MINUTES))
                .to_rfc3339_opts(SecondsFormat::Millis, true);
            query
                .append_pair("merchantName", &context.merchant_name)
                .append_pair("checkoutDataType", CHECKOUT_DATA_TYPE)
                .append_pair("action", CHARGE_ACTION)
                .append_pair("amount", &option.amount.to_string())
                .append_pair("currency", &option.currency)
                .append_pair("expiration", &expiration)
                .append_pair(
                    "redirectUrl",
                    &completion_url(&options.base_merchant_url, &context.order_id),
                );
        }
    }
    Ok(link)
}

/// Merchant route that shows the order confirmation after the wallet is done.
pub fn completion_url(base_merchant_url: &str, order_id: &str) -> String {
    format!(
        "{}/order/{}/confirmation",
        base_merchant_url.trim_end_matches('/'),
        order_id
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    ShowQr,
    ChooseWallet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetState {
    Loading,
    UnknownPayment,
    Ready {
        options: PaymentOptions,
        selected: ResolvedOption,
    },
}

/// Selection state of the checkout widget for one payment.
pub struct CheckoutWidget {
    gateway: Arc<dyn VaspGateway>,
    payment_id: String,
    context: LinkContext,
    state: WidgetState,
    mode: DisplayMode,
}

impl CheckoutWidget {
    pub fn new(gateway: Arc<dyn VaspGateway>, payment_id: String, context: LinkContext) -> Self {
        CheckoutWidget {
            gateway,
            payment_id,
            context,
            state: WidgetState::Loading,
            mode: DisplayMode::ChooseWallet,
        }
    }

    /// Fetches the payment's options and selects the first one. A backend
    /// error leaves the widget loading.
    pub async fn load(&mut self) -> Result<(), GatewayError> {
        match self.gateway.payment_options(&self.payment_id).await {
            Ok(Some(options)) => match resolve(&options, 0, &self.context, Utc::now()) {
                Ok(selected) => {
                    self.state = WidgetState::Ready { options, selected };
                }
                Err(e) => {
                    tracing::error!(payment_id = %self.payment_id, "Unusable payment options: {}", e);
                    self.state = WidgetState::UnknownPayment;
                }
            },
            Ok(None) => {
                tracing::warn!(payment_id = %self.payment_id, "Unknown payment");
                self.state = WidgetState::UnknownPayment;
            }
            Err(e) => {
                tracing::error!(payment_id = %self.payment_id, "Failed to fetch payment options: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn state(&self) -> &WidgetState {
        &self.state
    }

    pub fn selected(&self) -> Option<&ResolvedOption> {
        match &self.state {
            WidgetState::Ready { selected, .. } => Some(selected),
            _ => None,
        }
    }

    /// Switches the settlement currency. Purely local; the previous
    /// derived record is replaced, never patched.
    pub fn select_currency(&mut self, index: usize) -> Result<&ResolvedOption, ResolveError> {
        self.select_currency_at(index, Utc::now())
    }

    pub fn select_currency_at(
        &mut self,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<&ResolvedOption, ResolveError> {
        match &mut self.state {
            WidgetState::Ready { options, selected } => {
                *selected = resolve(options, index, &self.context, now)?;
                Ok(selected)
            }
            _ => Err(ResolveError::NoOptions),
        }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn show_qr(&mut self) {
        self.mode = DisplayMode::ShowQr;
    }

    pub fn choose_wallet(&mut self) {
        self.mode = DisplayMode::ChooseWallet;
    }
}
