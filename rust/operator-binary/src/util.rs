use stackable_operator::k8s_openapi::chrono::Utc;

/// Current wall clock time in epoch milliseconds, the unit of all timestamps in the status
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
