use metrics::{
    register_gateway_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_gateway_histogram!(MULTIPART_INITIATE_SECONDS, "Duration of a multipart upload initiation", &STATUS_LABEL);
pub(crate) fn initiate_timer() -> StatusTimer {
    StatusTimer::new(&MULTIPART_INITIATE_SECONDS)
}

register_gateway_histogram!(MULTIPART_UPLOAD_PART_SECONDS, "Duration of a single part upload", &STATUS_LABEL);
pub(crate) fn upload_part_timer() -> StatusTimer {
    StatusTimer::new(&MULTIPART_UPLOAD_PART_SECONDS)
}

register_gateway_histogram!(MULTIPART_COMPLETE_SECONDS, "Duration of a multipart completion", &STATUS_LABEL);
pub(crate) fn complete_timer() -> StatusTimer {
    StatusTimer::new(&MULTIPART_COMPLETE_SECONDS)
}

register_gateway_histogram!(MULTIPART_ABORT_SECONDS, "Duration of a multipart abort", &STATUS_LABEL);
pub(crate) fn abort_timer() -> StatusTimer {
    StatusTimer::new(&MULTIPART_ABORT_SECONDS)
}
