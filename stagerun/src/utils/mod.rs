//! Small helpers for identifiers and timestamps.

use chrono::Utc;
use uuid::Uuid;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Generates a random v4 UUID.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a time-ordered v7 UUID, used for run identifiers.
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        assert_eq!(generate_uuid().get_version_num(), 4);
        assert_eq!(generate_uuid_v7().get_version_num(), 7);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
