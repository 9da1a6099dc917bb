mod format;
mod sink;

pub use format::{format_message, MessagePayload};
pub use sink::{
    DeliveryError, DeliveryReport, DryRunNotifier, HttpTransport, Notifier, RetryPolicy,
    TransportError, WebhookResponse, WebhookSink, WebhookTransport,
};
