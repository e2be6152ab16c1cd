use metrics::{
    register_gateway_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_gateway_histogram!(DB_TRANSACTION_SECONDS, "Duration of a database transaction", &STATUS_LABEL);
pub(crate) fn transaction_timer() -> StatusTimer {
    StatusTimer::new(&DB_TRANSACTION_SECONDS)
}
