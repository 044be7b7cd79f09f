use actix_web::HttpResponse;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

use crate::error::AppError;
use crate::models::message::MessageKind;

lazy_static::lazy_static! {
    static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "messaging_messages_sent_total",
        "Messages persisted by the send pipeline",
        &["kind"]
    )
    .expect("messaging_messages_sent_total metric registration");

    static ref SEND_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "messaging_send_rejected_total",
        "Sends rejected before any write",
        &["reason"]
    )
    .expect("messaging_send_rejected_total metric registration");

    static ref MESSAGES_READ_TOTAL: IntCounter = register_int_counter!(
        "messaging_messages_read_total",
        "Messages transitioned from unread to read"
    )
    .expect("messaging_messages_read_total metric registration");

    static ref IDEMPOTENT_REPLAYS_TOTAL: IntCounter = register_int_counter!(
        "messaging_idempotent_replays_total",
        "Sends answered from an earlier message with the same idempotency key"
    )
    .expect("messaging_idempotent_replays_total metric registration");

    static ref INBOX_DRIFT_REPAIRS_TOTAL: IntCounter = register_int_counter!(
        "messaging_inbox_drift_repairs_total",
        "Inbox projections rewritten after drift was detected"
    )
    .expect("messaging_inbox_drift_repairs_total metric registration");
}

pub fn record_message_sent(kind: MessageKind) {
    MESSAGES_SENT_TOTAL.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_send_rejected(reason: &str) {
    SEND_REJECTED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_messages_read(count: u64) {
    MESSAGES_READ_TOTAL.inc_by(count);
}

pub fn record_idempotent_replay() {
    IDEMPOTENT_REPLAYS_TOTAL.inc();
}

pub fn record_drift_repair() {
    INBOX_DRIFT_REPAIRS_TOTAL.inc();
}

/// Prometheus text exposition of the default registry.
pub async fn metrics_handler() -> Result<HttpResponse, AppError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|err| {
        tracing::error!(error = %err, "failed to encode metrics");
        AppError::Internal
    })?;

    Ok(HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer))
}
