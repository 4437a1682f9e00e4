//! Scan submissions and the wire response returned to scanner pages.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single code received from a scanner page, already trimmed.
#[derive(Debug, Clone)]
pub struct ScanSubmission {
    pub code: String,
    pub received_at: OffsetDateTime,
}

impl ScanSubmission {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            received_at: OffsetDateTime::now_utc(),
        }
    }
}

/// JSON body returned for every submission.
///
/// The scanner page treats any non-200 answer as a hard failure and stops
/// scanning, so `status` is always `"success"`. `processed` tells the page
/// whether the code was handed to a consumer or merely acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub barcode: String,
    pub processed: bool,
    pub message: String,
}

impl SubmitResponse {
    pub fn accepted(code: &str, processed: bool) -> Self {
        Self {
            status: "success".to_string(),
            barcode: code.to_string(),
            processed,
            message: if processed {
                "barcode received".to_string()
            } else {
                "barcode received but no consumer is attached".to_string()
            },
        }
    }

    /// Acknowledgement for an empty or unreadable body. Still shaped like a
    /// success so camera pages keep their scan loop running.
    pub fn empty() -> Self {
        Self {
            status: "success".to_string(),
            barcode: String::new(),
            processed: false,
            message: "empty scan ignored".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names_are_stable() {
        let json = serde_json::to_value(SubmitResponse::accepted("2000000420509", true)).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["barcode"], "2000000420509");
        assert_eq!(json["processed"], true);
        assert!(json["message"].is_string());
    }

    #[test]
    fn empty_acknowledgement_is_success_shaped() {
        let response = SubmitResponse::empty();
        assert_eq!(response.status, "success");
        assert_eq!(response.barcode, "");
        assert!(!response.processed);
    }

    #[test]
    fn submissions_carry_a_utc_timestamp() {
        let submission = ScanSubmission::new("2000000420509");
        assert_eq!(submission.code, "2000000420509");
        assert!(submission.received_at <= OffsetDateTime::now_utc());
    }
}
