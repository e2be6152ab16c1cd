use metrics::{
    register_gateway_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_gateway_histogram!(UPLOAD_OBJECT_SECONDS, "Duration of a full object upload", &STATUS_LABEL);
pub(crate) fn upload_timer() -> StatusTimer {
    StatusTimer::new(&UPLOAD_OBJECT_SECONDS)
}

register_gateway_histogram!(COPY_OBJECT_SECONDS, "Duration of an object copy", &STATUS_LABEL);
pub(crate) fn copy_timer() -> StatusTimer {
    StatusTimer::new(&COPY_OBJECT_SECONDS)
}

register_gateway_histogram!(MOVE_OBJECT_SECONDS, "Duration of an object move", &STATUS_LABEL);
pub(crate) fn move_timer() -> StatusTimer {
    StatusTimer::new(&MOVE_OBJECT_SECONDS)
}

register_gateway_histogram!(DELETE_OBJECTS_SECONDS, "Duration of a delete-many batch", &STATUS_LABEL);
pub(crate) fn delete_many_timer() -> StatusTimer {
    StatusTimer::new(&DELETE_OBJECTS_SECONDS)
}

register_gateway_histogram!(ORPHAN_SWEEP_SECONDS, "Duration of a single orphan-version cleanup job", &STATUS_LABEL);
pub(crate) fn orphan_sweep_timer() -> StatusTimer {
    StatusTimer::new(&ORPHAN_SWEEP_SECONDS)
}
