use chrono::Utc;

/// Wall-clock epoch milliseconds as a decimal string, the timestamp format
/// written into room records.
pub fn now_millis_string() -> String {
    Utc::now().timestamp_millis().to_string()
}
