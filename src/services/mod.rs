pub mod attempt;
pub mod checkout;
pub mod order_details;
pub mod poller;
pub mod vasp_options;

pub use attempt::{AttemptToken, Generation};
pub use checkout::{CheckoutFlow, CheckoutState};
pub use order_details::{
    ConfirmationSummary, OrderAction, OrderDetails, OrderDetailsController, OrderView,
    PaymentLogView,
};
pub use poller::{OrderStatusPoller, PollOutcome, Sleeper, TokioSleeper};
pub use vasp_options::{CheckoutWidget, DisplayMode, LinkContext, ResolvedOption, WidgetState};
