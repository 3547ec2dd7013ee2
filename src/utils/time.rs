use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Milliseconds since the unix epoch
pub(crate) fn get_now_as_u128() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
