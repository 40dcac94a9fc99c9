//! Natural-photo screening
//!
//! Uploads are sent to a remote multi-label image classification model. An
//! image counts as a natural photograph when any predicted label contains one
//! of [`NATURAL_PHOTO_LABELS`] with a score above [`ACCEPTANCE_THRESHOLD`].

use crate::config::ClassifierConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = concat!("realist-gallery/", env!("CARGO_PKG_VERSION"));

/// Label substrings that indicate a natural photograph
pub const NATURAL_PHOTO_LABELS: [&str; 10] = [
    "photograph",
    "photo",
    "picture",
    "image",
    "landscape",
    "portrait",
    "nature",
    "scenery",
    "person",
    "people",
];

/// A matching label must score strictly above this
pub const ACCEPTANCE_THRESHOLD: f32 = 0.7;

/// Classifier errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// One (label, confidence) pair returned by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

/// Outcome of screening an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// Remote image classification
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Labels for the image, typically sorted by descending score
    async fn classify(&self, image: &[u8]) -> Result<Vec<Prediction>, ClassifierError>;
}

/// Hugging Face inference API client
pub struct HuggingFaceClassifier {
    http_client: reqwest::Client,
    model_url: String,
    api_token: String,
}

impl HuggingFaceClassifier {
    pub fn new(config: &ClassifierConfig, timeout: Option<Duration>) -> Result<Self, ClassifierError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let http_client = builder
            .build()
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            model_url: format!(
                "{}/models/{}",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl ImageClassifier for HuggingFaceClassifier {
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn classify(&self, image: &[u8]) -> Result<Vec<Prediction>, ClassifierError> {
        let response = self
            .http_client
            .post(&self.model_url)
            .bearer_auth(&self.api_token)
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(status.as_u16(), body));
        }

        let predictions: Vec<Prediction> = response
            .json()
            .await
            .map_err(|e| ClassifierError::Decode(e.to_string()))?;

        debug!(predictions = predictions.len(), "Image classified");

        Ok(predictions)
    }
}

/// Whether any prediction marks the image as a natural photograph
pub fn is_natural_photo(predictions: &[Prediction]) -> bool {
    predictions.iter().any(|prediction| {
        let label = prediction.label.to_lowercase();
        prediction.score > ACCEPTANCE_THRESHOLD
            && NATURAL_PHOTO_LABELS
                .iter()
                .any(|needle| label.contains(needle))
    })
}

/// Applies the natural-photo rule on top of a remote classifier
#[derive(Clone)]
pub struct NaturalPhotoClassifier {
    classifier: Arc<dyn ImageClassifier>,
}

impl NaturalPhotoClassifier {
    pub fn new(classifier: Arc<dyn ImageClassifier>) -> Self {
        Self { classifier }
    }

    /// Screen an image, surfacing service failures to the caller
    pub async fn verify(&self, image: &[u8]) -> Result<Verdict, ClassifierError> {
        let predictions = self.classifier.classify(image).await?;

        if is_natural_photo(&predictions) {
            Ok(Verdict::Accepted)
        } else {
            Ok(Verdict::Rejected)
        }
    }

    /// Fail-closed screening: any error counts as a rejection
    pub async fn is_real_photo(&self, image: &[u8]) -> bool {
        match self.verify(image).await {
            Ok(verdict) => verdict == Verdict::Accepted,
            Err(e) => {
                warn!(error = %e, "Error detecting image type");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };

    fn prediction(label: &str, score: f32) -> Prediction {
        Prediction {
            label: label.to_string(),
            score,
        }
    }

    fn mock_returning(predictions: Vec<Prediction>) -> NaturalPhotoClassifier {
        let mut mock = MockImageClassifier::new();
        mock.expect_classify()
            .times(1)
            .returning(move |_| Ok(predictions.clone()));
        NaturalPhotoClassifier::new(Arc::new(mock))
    }

    /// Serve `router` on an ephemeral local port, returning its base URL
    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config_for(endpoint: String) -> ClassifierConfig {
        ClassifierConfig {
            endpoint,
            model: "microsoft/resnet-50".to_string(),
            api_token: "hf_test".to_string(),
            request_timeout_secs: None,
        }
    }

    #[test]
    fn test_accepts_matching_label_above_threshold() {
        assert!(is_natural_photo(&[prediction("seashore, coast, seacoast", 0.9), prediction("Portrait", 0.71)]));
        assert!(is_natural_photo(&[prediction("people", 0.95)]));
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!is_natural_photo(&[prediction("landscape", 0.7)]));
        assert!(!is_natural_photo(&[prediction("person", 0.69), prediction("nature", 0.5)]));
    }

    #[test]
    fn test_high_score_without_matching_label_rejected() {
        assert!(!is_natural_photo(&[prediction("comic book", 0.99), prediction("web site", 0.8)]));
        assert!(!is_natural_photo(&[]));
    }

    #[test]
    fn test_match_is_case_insensitive_and_order_independent() {
        let predictions = vec![
            prediction("cartoon", 0.1),
            prediction("jigsaw puzzle", 0.05),
            prediction("PICTURE FRAME", 0.85),
        ];
        assert!(is_natural_photo(&predictions));

        let mut reversed = predictions.clone();
        reversed.reverse();
        assert!(is_natural_photo(&reversed));
    }

    #[test]
    fn test_label_and_score_must_match_together() {
        // matching label is weak, strong label does not match
        assert!(!is_natural_photo(&[prediction("photo", 0.3), prediction("envelope", 0.95)]));
    }

    #[tokio::test]
    async fn test_verify_verdicts() {
        let accepted = mock_returning(vec![prediction("landscape", 0.92)]);
        assert_eq!(accepted.verify(b"jpeg").await.unwrap(), Verdict::Accepted);

        let rejected = mock_returning(vec![prediction("landscape", 0.4)]);
        assert_eq!(rejected.verify(b"jpeg").await.unwrap(), Verdict::Rejected);
    }

    #[tokio::test]
    async fn test_is_real_photo_fails_closed() {
        let mut mock = MockImageClassifier::new();
        mock.expect_classify()
            .times(1)
            .returning(|_| Err(ClassifierError::Transport("connection reset".to_string())));
        let classifier = NaturalPhotoClassifier::new(Arc::new(mock));

        assert!(!classifier.is_real_photo(b"jpeg").await);
        assert!(mock_returning(vec![prediction("person", 0.8)]).is_real_photo(b"jpeg").await);
    }

    #[tokio::test]
    async fn test_hugging_face_request_and_response() {
        let router = Router::new().route(
            "/models/microsoft/resnet-50",
            post(|headers: HeaderMap, body: axum::body::Bytes| async move {
                assert_eq!(headers["authorization"], "Bearer hf_test");
                assert_eq!(&body[..], b"image-bytes");
                Json(serde_json::json!([
                    {"label": "alp", "score": 0.81},
                    {"label": "valley, vale", "score": 0.12}
                ]))
            }),
        );
        let endpoint = spawn_server(router).await;

        let classifier = HuggingFaceClassifier::new(&config_for(endpoint), None).unwrap();
        let predictions = classifier.classify(b"image-bytes").await.unwrap();

        assert_eq!(
            predictions,
            vec![prediction("alp", 0.81), prediction("valley, vale", 0.12)]
        );
    }

    #[tokio::test]
    async fn test_hugging_face_service_error() {
        let router = Router::new().route(
            "/models/microsoft/resnet-50",
            post(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({"error": "Model is currently loading"})),
                )
            }),
        );
        let endpoint = spawn_server(router).await;

        let classifier = HuggingFaceClassifier::new(&config_for(endpoint), None).unwrap();
        let err = classifier.classify(b"image-bytes").await.unwrap_err();

        assert!(matches!(err, ClassifierError::Api(503, ref body) if body.contains("loading")));
    }

    #[tokio::test]
    async fn test_hugging_face_unreachable() {
        // nothing listens on port 1
        let classifier =
            HuggingFaceClassifier::new(&config_for("http://127.0.0.1:1".to_string()), None).unwrap();

        let err = classifier.classify(b"image-bytes").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Transport(_)));
    }
}
