pub mod logger;
pub mod retry;

/// Milliseconds since the Unix epoch. Time-dependent components
/// (failover window, price TTL) take `now` as a parameter internally;
/// this is the production clock behind those parameters.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
