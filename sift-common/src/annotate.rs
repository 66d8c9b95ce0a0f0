//! Image annotation port and Cloud Vision client
//!
//! The labeler asks for the top labels of an image. [`VisionAnnotator`]
//! calls the Cloud Vision `images:annotate` REST method with a single
//! LABEL_DETECTION feature and returns label descriptions in rank order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::auth::TokenSource;
use crate::{Error, Result};

pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com";

#[async_trait]
pub trait Annotator: Send + Sync {
    /// Up to `max_results` label descriptions, highest score first
    async fn labels(&self, image: &[u8], max_results: usize) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize)]
struct AnnotateBatch<'a> {
    requests: Vec<AnnotateRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct AnnotateRequest<'a> {
    image: ImageContent,
    features: Vec<Feature<'a>>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    max_results: usize,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotateBatchResponse {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResponse {
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct LabelAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

impl AnnotateBatchResponse {
    fn into_labels(self) -> Result<Vec<String>> {
        let Some(response) = self.responses.into_iter().next() else {
            return Ok(Vec::new());
        };
        if let Some(status) = response.error {
            return Err(Error::Annotation(format!(
                "annotation failed ({}): {}",
                status.code, status.message
            )));
        }
        Ok(response
            .label_annotations
            .into_iter()
            .map(|label| label.description)
            .filter(|description| !description.is_empty())
            .collect())
    }
}

/// Cloud Vision REST client
pub struct VisionAnnotator {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
}

impl VisionAnnotator {
    pub fn new(endpoint: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Annotation(e.to_string()))?;
        let endpoint: String = endpoint.into();

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            tokens,
        })
    }
}

#[async_trait]
impl Annotator for VisionAnnotator {
    async fn labels(&self, image: &[u8], max_results: usize) -> Result<Vec<String>> {
        let body = AnnotateBatch {
            requests: vec![AnnotateRequest {
                image: ImageContent {
                    content: STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: "LABEL_DETECTION",
                    max_results,
                }],
            }],
        };

        let mut request = self
            .http
            .post(format!("{}/v1/images:annotate", self.endpoint))
            .json(&body);
        if let Some(token) = self.tokens.token().await? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Annotation(format!("images:annotate request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Annotation(format!(
                "images:annotate returned HTTP {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: AnnotateBatchResponse = response
            .json()
            .await
            .map_err(|e| Error::Annotation(format!("images:annotate response: {}", e)))?;

        tracing::debug!(image_bytes = image.len(), "Annotated image");
        let mut labels = parsed.into_labels()?;
        labels.truncate(max_results);
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let body = AnnotateBatch {
            requests: vec![AnnotateRequest {
                image: ImageContent {
                    content: STANDARD.encode(b"img"),
                },
                features: vec![Feature {
                    kind: "LABEL_DETECTION",
                    max_results: 3,
                }],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["requests"][0]["image"]["content"], "aW1n");
        assert_eq!(json["requests"][0]["features"][0]["type"], "LABEL_DETECTION");
        assert_eq!(json["requests"][0]["features"][0]["maxResults"], 3);
    }

    #[test]
    fn labels_in_rank_order() {
        let json = r#"{"responses": [{"labelAnnotations": [
            {"mid": "/m/01yrx", "description": "cat", "score": 0.98},
            {"mid": "/m/0jbk", "description": "tabby", "score": 0.91},
            {"mid": "/m/0jbk", "description": "animal", "score": 0.88}
        ]}]}"#;
        let parsed: AnnotateBatchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.into_labels().unwrap(), vec!["cat", "tabby", "animal"]);
    }

    #[test]
    fn no_annotations_means_no_labels() {
        let parsed: AnnotateBatchResponse = serde_json::from_str(r#"{"responses": [{}]}"#).unwrap();
        assert!(parsed.into_labels().unwrap().is_empty());

        let parsed: AnnotateBatchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.into_labels().unwrap().is_empty());
    }

    #[test]
    fn per_image_error_is_reported() {
        let json = r#"{"responses": [{"error": {"code": 3, "message": "Bad image data."}}]}"#;
        let parsed: AnnotateBatchResponse = serde_json::from_str(json).unwrap();
        let err = parsed.into_labels().unwrap_err();
        assert!(matches!(err, Error::Annotation(msg) if msg.contains("Bad image data")));
    }
}
