//! Notification payloads exchanged between pipeline stages
//!
//! Two wire shapes travel over the broker:
//! - image- and purge-notifications: plain text `"<bucket>/<key>"`
//! - labeled-notifications: JSON `{"location": "<bucket>/<key>", "labels": [...]}`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a notification payload was rejected
///
/// Malformed messages are permanent failures: consumers log them and
/// acknowledge so the broker stops redelivering.
#[derive(Debug, Error)]
pub enum MalformedMessage {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("location must have format <bucket>/<key> [{0}]")]
    BadLocation(String),

    #[error("empty location field")]
    MissingLocation,

    #[error("empty labels field")]
    MissingLabels,

    #[error("invalid labeled-notification JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Address of an object in the local store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Location {
    pub bucket: String,
    pub key: String,
}

impl Location {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse a plain-text notification body
    pub fn from_payload(data: &[u8]) -> Result<Self, MalformedMessage> {
        let text = std::str::from_utf8(data).map_err(|_| MalformedMessage::NotUtf8)?;
        text.parse()
    }

    /// Plain-text notification body for this location
    pub fn to_payload(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl FromStr for Location {
    type Err = MalformedMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [bucket, key] if !bucket.is_empty() && !key.is_empty() => {
                Ok(Location::new(*bucket, *key))
            }
            _ => Err(MalformedMessage::BadLocation(s.to_string())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

impl From<Location> for String {
    fn from(location: Location) -> Self {
        location.to_string()
    }
}

impl TryFrom<String> for Location {
    type Error = MalformedMessage;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Labeled-notification: an image in the local store plus its ranked labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLabeledImage")]
pub struct LabeledImage {
    pub location: Location,
    pub labels: Vec<String>,
}

/// Wire form before validation; every field optional so that absence is
/// reported as a typed error instead of a generic JSON failure
#[derive(Debug, Deserialize)]
struct RawLabeledImage {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

impl TryFrom<RawLabeledImage> for LabeledImage {
    type Error = MalformedMessage;

    fn try_from(raw: RawLabeledImage) -> Result<Self, Self::Error> {
        let location = match raw.location {
            Some(location) if !location.is_empty() => location.parse()?,
            _ => return Err(MalformedMessage::MissingLocation),
        };
        let labels = match raw.labels {
            Some(labels) if !labels.is_empty() => labels,
            _ => return Err(MalformedMessage::MissingLabels),
        };
        Ok(LabeledImage { location, labels })
    }
}

impl LabeledImage {
    pub fn new(location: Location, labels: Vec<String>) -> Self {
        Self { location, labels }
    }

    /// Validating decoder for labeled-notification payloads
    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        let raw: RawLabeledImage = serde_json::from_slice(data)?;
        raw.try_into()
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// True when any label contains `target` (case-sensitive substring match)
    pub fn matches(&self, target: &str) -> bool {
        self.labels.iter().any(|label| label.contains(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_parses_bucket_and_key() {
        let location: Location = "bucket/cat1.jpg".parse().unwrap();
        assert_eq!(location.bucket, "bucket");
        assert_eq!(location.key, "cat1.jpg");
        assert_eq!(location.to_string(), "bucket/cat1.jpg");
    }

    #[test]
    fn location_rejects_wrong_segment_count() {
        for bad in ["a", "a/b/c", "", "/", "a/", "/b"] {
            assert!(
                matches!(bad.parse::<Location>(), Err(MalformedMessage::BadLocation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn location_from_payload_rejects_invalid_utf8() {
        let result = Location::from_payload(&[0xff, b'/', b'a']);
        assert!(matches!(result, Err(MalformedMessage::NotUtf8)));
    }

    #[test]
    fn labeled_image_wire_format() {
        let image = LabeledImage::new(
            Location::new("bucket", "cat1.jpg"),
            vec!["cat".into(), "tabby".into()],
        );
        let json: serde_json::Value = serde_json::from_slice(&image.encode().unwrap()).unwrap();
        assert_eq!(json["location"], "bucket/cat1.jpg");
        assert_eq!(json["labels"][1], "tabby");

        let decoded = LabeledImage::decode(br#"{"location":"bucket/cat1.jpg","labels":["cat","tabby"]}"#)
            .unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn decode_reports_missing_fields() {
        assert!(matches!(
            LabeledImage::decode(br#"{"labels":["cat"]}"#),
            Err(MalformedMessage::MissingLocation)
        ));
        assert!(matches!(
            LabeledImage::decode(br#"{"location":"","labels":["cat"]}"#),
            Err(MalformedMessage::MissingLocation)
        ));
        assert!(matches!(
            LabeledImage::decode(br#"{"location":"b/k"}"#),
            Err(MalformedMessage::MissingLabels)
        ));
        assert!(matches!(
            LabeledImage::decode(br#"{"location":"b/k","labels":[]}"#),
            Err(MalformedMessage::MissingLabels)
        ));
    }

    #[test]
    fn decode_reports_malformed_shapes() {
        assert!(matches!(
            LabeledImage::decode(br#"{"location":"a/b/c","labels":["cat"]}"#),
            Err(MalformedMessage::BadLocation(_))
        ));
        assert!(matches!(
            LabeledImage::decode(br#"{"location":"b/k","labels":[1,2]}"#),
            Err(MalformedMessage::Json(_))
        ));
        assert!(matches!(
            LabeledImage::decode(b"bucket/cat1.jpg"),
            Err(MalformedMessage::Json(_))
        ));
    }

    #[test]
    fn serde_deserialize_uses_same_validation() {
        let result: Result<LabeledImage, _> =
            serde_json::from_str(r#"{"location":"b/k","labels":[]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn matches_is_case_sensitive_substring() {
        let image = LabeledImage::new(
            Location::new("b", "k"),
            vec!["tabby".into(), "cat".into()],
        );
        assert!(image.matches("cat"));
        assert!(image.matches("tab"));
        assert!(!image.matches("dog"));
        assert!(!image.matches("Cat"));
    }
}
