use metrics::{
    register_gateway_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_gateway_histogram!(S3_UPLOAD_SECONDS, "Duration of an S3 object upload", &STATUS_LABEL);
pub(crate) fn upload_timer() -> StatusTimer {
    StatusTimer::new(&S3_UPLOAD_SECONDS)
}

register_gateway_histogram!(S3_GET_SECONDS, "Duration of an S3 object read", &STATUS_LABEL);
pub(crate) fn get_timer() -> StatusTimer {
    StatusTimer::new(&S3_GET_SECONDS)
}

register_gateway_histogram!(S3_UPLOAD_PART_SECONDS, "Duration of an S3 multipart part upload", &STATUS_LABEL);
pub(crate) fn upload_part_timer() -> StatusTimer {
    StatusTimer::new(&S3_UPLOAD_PART_SECONDS)
}
