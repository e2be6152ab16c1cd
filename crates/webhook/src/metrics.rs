use metrics::{
    register_gateway_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_gateway_histogram!(WEBHOOK_DELIVERY_SECONDS, "Duration of a single webhook delivery attempt", &STATUS_LABEL);
pub(crate) fn delivery_timer() -> StatusTimer {
    StatusTimer::new(&WEBHOOK_DELIVERY_SECONDS)
}
