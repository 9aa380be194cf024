use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::NormalizedAddress;

/// Length of one time bucket in seconds
pub const BUCKET_SECONDS: i64 = 3600;

/// One accepted recipient of a mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientAddress {
    /// Address as accepted during the SMTP session
    pub checked: String,

    /// Canonical form used as the storage lookup key
    pub normalized: String,
}

impl From<NormalizedAddress> for RecipientAddress {
    fn from(addr: NormalizedAddress) -> Self {
        Self {
            checked: addr.checked,
            normalized: addr.normalized,
        }
    }
}

/// Mail model representing one received message and its envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Sender address (checked form), empty for a null reverse-path
    pub sender: String,

    /// Recipients in the order they were accepted
    pub recipients: Vec<RecipientAddress>,

    /// Raw message content, unparsed
    pub body: String,

    /// Timestamp when the mail was accepted by this server
    pub receive_at: DateTime<Utc>,
}

impl Mail {
    /// Create a new mail stamped with the current time
    pub fn new(sender: String, recipients: Vec<RecipientAddress>, body: String) -> Self {
        Self {
            sender,
            recipients,
            body,
            receive_at: Utc::now(),
        }
    }

    /// Hour bucket this mail is filed under
    pub fn time_bucket(&self) -> i64 {
        time_bucket(self.receive_at)
    }
}

/// Count of whole hours since the Unix epoch
pub fn time_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(BUCKET_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_bucket_truncates_to_hour() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 59, 59).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
        assert_eq!(time_bucket(at), time_bucket(start));
        assert_eq!(time_bucket(next), time_bucket(start) + 1);
        assert_eq!(time_bucket(start), start.timestamp() / 3600);
    }

    #[test]
    fn test_time_bucket_before_epoch() {
        let at = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();
        assert_eq!(time_bucket(at), -1);
    }

    #[test]
    fn test_mail_serialization_field_names() {
        let mail = Mail {
            sender: "a@x".to_string(),
            recipients: vec![RecipientAddress {
                checked: "b@Y.com".to_string(),
                normalized: "b@y.com".to_string(),
            }],
            body: "hello".to_string(),
            receive_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };

        let value = serde_json::to_value(&mail).unwrap();
        assert_eq!(value["sender"], "a@x");
        assert_eq!(value["recipients"][0]["checked"], "b@Y.com");
        assert_eq!(value["recipients"][0]["normalized"], "b@y.com");
        assert_eq!(value["body"], "hello");
        assert_eq!(value["receive_at"], "2024-01-01T00:00:00Z");
    }
}
