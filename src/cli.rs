use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::gateway::{vasp, MerchantClient, MerchantGateway};
use crate::money::fiat_to_human_friendly;
use crate::services::order_details::{load_payment_log, ConfirmationSummary, PaymentLogView};
use crate::services::{
    CheckoutFlow, CheckoutState, CheckoutWidget, DisplayMode, LinkContext, OrderAction,
    OrderDetailsController, OrderStatusPoller, OrderView, WidgetState,
};

#[derive(Parser)]
#[command(name = "checkout-core")]
#[command(about = "Checkout Core - stablecoin storefront checkout driver", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the product catalog
    Products,

    /// Buy one unit of a product and wait until the payment clears
    Checkout {
        /// Product GTIN
        #[arg(value_name = "GTIN")]
        gtin: String,
    },

    /// Show order details
    Order {
        #[arg(value_name = "ORDER_ID")]
        order_id: Uuid,
    },

    /// Show the post-payment confirmation summary
    Confirmation {
        #[arg(value_name = "ORDER_ID")]
        order_id: Uuid,
    },

    /// Cash out a cleared order
    Payout {
        #[arg(value_name = "ORDER_ID")]
        order_id: Uuid,
    },

    /// Refund a cleared order
    Refund {
        #[arg(value_name = "ORDER_ID")]
        order_id: Uuid,
    },

    /// Show the detailed status log of a payment
    PaymentLog {
        #[arg(value_name = "PAYMENT_ID")]
        payment_id: String,
    },

    /// Show VASP settlement options, QR payload and wallet link
    Options {
        #[arg(value_name = "PAYMENT_ID")]
        payment_id: String,

        #[arg(value_name = "ORDER_ID")]
        order_id: String,

        /// Index of the settlement option to select
        #[arg(short, long, default_value_t = 0)]
        option: usize,

        /// Show the QR payload instead of the wallet link
        #[arg(long)]
        qr: bool,
    },

    /// Configuration validation
    Config,
}

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let merchant = Arc::new(MerchantClient::new(
        config.merchant_backend_url.clone(),
        config.request_timeout(),
    ));

    match cli.command {
        Commands::Products => handle_products(merchant.as_ref()).await,
        Commands::Checkout { gtin } => handle_checkout(merchant, &config, &gtin).await,
        Commands::Order { order_id } => handle_order(merchant, &config, order_id).await,
        Commands::Confirmation { order_id } => handle_confirmation(merchant.as_ref(), order_id).await,
        Commands::Payout { order_id } => handle_action(merchant, &config, order_id, OrderAction::CashOut).await,
        Commands::Refund { order_id } => handle_action(merchant, &config, order_id, OrderAction::Refund).await,
        Commands::PaymentLog { payment_id } => {
            handle_payment_log(merchant.as_ref(), &payment_id).await
        }
        Commands::Options {
            payment_id,
            order_id,
            option,
            qr,
        } => handle_options(&config, payment_id, order_id, option, qr).await,
        Commands::Config => handle_config_validate(&config),
    }
}

pub async fn handle_products<G: MerchantGateway + ?Sized>(gateway: &G) -> anyhow::Result<()> {
    let products = gateway.list_products().await?;

    println!("{:<16} {:<30} {:>14} {:<8}", "GTIN", "Name", "Price", "Type");
    println!("{}", "-".repeat(72));
    for product in products {
        println!(
            "{:<16} {:<30} {:>14} {:<8}",
            product.gtin,
            product.name,
            format!("{} {}", fiat_to_human_friendly(product.price), product.currency),
            product.payment_type
        );
    }
    Ok(())
}

pub async fn handle_checkout(
    merchant: Arc<MerchantClient>,
    config: &Config,
    gtin: &str,
) -> anyhow::Result<()> {
    let products = merchant.list_products().await?;
    let product = products
        .into_iter()
        .find(|p| p.gtin == gtin)
        .ok_or_else(|| anyhow::anyhow!("Product {} not found", gtin))?;

    let flow = CheckoutFlow::new(merchant, OrderStatusPoller::new(config.poll_interval()))
        .with_demo_mode(config.demo_mode);

    flow.open(product).await;

    // The form URL only exists once processing details arrived.
    loop {
        if let Some(url) = flow.payment_form_url().await {
            println!("Complete the payment at: {}", url);
            break;
        }
        if !flow.is_running() || flow.state().await != CheckoutState::FetchingProcessingDetails {
            break;
        }
        tokio::time::sleep(config.poll_interval()).await;
    }

    let state = tokio::select! {
        state = flow.join() => state.unwrap_or(CheckoutState::Inactive),
        _ = tokio::signal::ctrl_c() => {
            flow.close().await;
            CheckoutState::Inactive
        }
    };

    match (state, flow.processing_details().await) {
        (CheckoutState::PaymentCleared, Some(details)) => {
            println!("✓ Paid successfully! Order ID: {}", details.order_id);
            Ok(())
        }
        (CheckoutState::FetchingProcessingDetails, _) => {
            anyhow::bail!("Checkout could not be started; see the log for details")
        }
        _ => {
            println!("Checkout closed");
            Ok(())
        }
    }
}

pub async fn handle_order(
    merchant: Arc<MerchantClient>,
    config: &Config,
    order_id: Uuid,
) -> anyhow::Result<()> {
    let controller = OrderDetailsController::new(merchant, order_id);
    controller.load().await;
    print_order_view(&controller.view().await, config)
}

pub async fn handle_confirmation<G: MerchantGateway + ?Sized>(
    gateway: &G,
    order_id: Uuid,
) -> anyhow::Result<()> {
    let order = gateway
        .order_details(order_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Unknown order {}", order_id))?;
    let summary = ConfirmationSummary::from_order(&order);

    println!("Your order is on the way!");
    if let Some(item) = summary.first_item {
        println!("  {}  Qty. {}", item.product.name, item.quantity);
    }
    println!("  Items total: {}", summary.items_total);
    println!("  Order total: {}", summary.order_total);
    Ok(())
}

pub async fn handle_action(
    merchant: Arc<MerchantClient>,
    config: &Config,
    order_id: Uuid,
    action: OrderAction,
) -> anyhow::Result<()> {
    let controller = OrderDetailsController::new(merchant, order_id);
    controller.load().await;

    match action {
        OrderAction::CashOut => controller.cash_out().await?,
        OrderAction::Refund => controller.refund().await?,
    }

    tracing::info!("{} submitted for order {}", action, order_id);
    print_order_view(&controller.view().await, config)
}

pub async fn handle_payment_log<G: MerchantGateway + ?Sized>(
    gateway: &G,
    payment_id: &str,
) -> anyhow::Result<()> {
    match load_payment_log(gateway, payment_id).await? {
        PaymentLogView::Unknown => anyhow::bail!("Unknown payment {}", payment_id),
        PaymentLogView::Loaded(status) => {
            println!("Status:           {}", status.status);
            println!("Merchant address: {}", status.merchant_address);
            println!("Can cash out:     {}", status.can_cash_out);
            println!("Can refund:       {}", status.can_refund);
            for event in status.events {
                println!(
                    "  {}  {}",
                    event.local_timestamp().format("%Y-%m-%d %H:%M:%S"),
                    event.event_type
                );
            }
            Ok(())
        }
    }
}

pub async fn handle_options(
    config: &Config,
    payment_id: String,
    order_id: String,
    option: usize,
    qr: bool,
) -> anyhow::Result<()> {
    let gateway = vasp::from_config(config);
    let context = LinkContext {
        order_id,
        demo_mode: config.demo_mode,
        merchant_name: config.merchant_name.clone(),
    };
    let mut widget = CheckoutWidget::new(gateway, payment_id.clone(), context);
    widget.load().await?;

    if let WidgetState::UnknownPayment = widget.state() {
        anyhow::bail!("Unknown payment {}", payment_id);
    }
    if let WidgetState::Ready { options, .. } = widget.state() {
        let currencies: Vec<&str> = options.options.iter().map(|o| o.currency.as_str()).collect();
        println!("Available currencies: {}", currencies.join(", "));
    }

    if option != 0 {
        widget.select_currency(option)?;
    }
    if qr {
        widget.show_qr();
    }

    let selected = widget
        .selected()
        .ok_or_else(|| anyhow::anyhow!("No settlement option selected"))?;
    println!("Total price:      {}", selected.fiat_display);
    println!("Payment currency: {}", selected.currency);
    println!("Total to pay:     {}", selected.amount_display);
    match widget.mode() {
        DisplayMode::ShowQr => println!("Scan QR:          {}", selected.qr_payload),
        DisplayMode::ChooseWallet => println!("Open in wallet:   {}", selected.wallet_link),
    }
    Ok(())
}

fn print_order_view(view: &OrderView, config: &Config) -> anyhow::Result<()> {
    let details = match view {
        OrderView::Loading => anyhow::bail!("Order could not be loaded; see the log for details"),
        OrderView::Unknown => anyhow::bail!("Unknown order"),
        OrderView::Loaded(details) => details,
    };
    let order = &details.order;

    println!("Order ID:         {}", order.order_id.to_string().to_uppercase());
    println!("Creation time:    {}", order.local_created_at().format("%Y-%m-%d %H:%M:%S"));
    println!("Current status:   {}", details.status());
    for (i, line) in order.products.iter().enumerate() {
        println!(
            "  {}. {} x{}  {} {}",
            i + 1,
            line.product.name,
            line.quantity,
            fiat_to_human_friendly(line.product.price),
            line.product.currency
        );
    }
    println!("Total:            {}", details.total_display());
    println!("Payment ID:       {}", order.vasp_payment_ref.to_uppercase());
    println!("Merchant address: {}", order.payment_status.merchant_address);
    println!("Payer address:    {}", details.payer_address());
    println!("Amount paid:      {}", details.paid_amount());
    if let Some(url) = details.primary_tx_url(&config.explorer_url) {
        println!("Transaction:      {}", url);
    }
    if let Some(url) = details.refund_tx_url(&config.explorer_url) {
        println!("Refund tx:        {}", url);
    }
    println!("Payment events:");
    for row in details.event_rows() {
        println!("  {}  {}", row.time, row.event);
    }
    println!(
        "Cash out: {}   Refund: {}",
        if details.cash_out.enabled { "available" } else { "disabled" },
        if details.refund.enabled { "available" } else { "disabled" }
    );
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Merchant backend URL: {}", config.merchant_backend_url);
    println!("  VASP backend URL: {}", config.vasp_backend_url);
    println!("  VASP mock: {}", config.vasp_mock);
    println!("  Demo mode: {}", config.demo_mode);
    println!("  Merchant name: {}", config.merchant_name);
    println!("  Poll interval: {} ms", config.poll_interval_ms);

    url::Url::parse(&config.merchant_backend_url)?;
    url::Url::parse(&config.vasp_backend_url)?;

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}
