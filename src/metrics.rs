use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

pub static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("tacedge_messages_total", "Total messages processed"),
        &["precedence", "status"]
    )
    .unwrap()
});

pub static MESSAGES_EXPIRED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("tacedge_messages_expired_total", "Total messages expired"),
        &["priority"]
    )
    .unwrap()
});

pub static AUTH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("tacedge_auth_failures_total", "Authentication failures"),
        &["reason"]
    )
    .unwrap()
});

pub static AUDIT_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("tacedge_audit_events_total", "Total audit events recorded"),
        &["control_family"]
    )
    .unwrap()
});

pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!("tacedge_queue_depth", "Current queue depth"),
        &["priority"]
    )
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
