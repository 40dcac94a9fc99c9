//! Upload pipeline
//!
//! A single upload walks a fixed sequence of states:
//!
//! ```text
//! Idle -> Validating -> Classifying -> Classified(verdict) -> Sanitizing -> Persisting -> Done
//!             |              |                 |                               |
//!             +--------------+-----------------+-------------------------------+--> Failed
//! ```
//!
//! Every failure is terminal for the attempt. Nothing is retried; callers
//! resubmit from scratch.

use crate::classifier::{NaturalPhotoClassifier, Verdict};
use crate::image_store::ImageStore;
use crate::metadata_store::{NewPhoto, PhotoRecord, PhotoStore};
use crate::storage_key::{generate_storage_key, sanitize_filename};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Why an upload attempt ended without a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("Unsupported file type: {content_type}")]
    InvalidFileType { content_type: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Classification failed: {0}")]
    ClassificationFailed(String),

    #[error("Image is not a natural photograph")]
    NotARealPhoto,

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),
}

impl UploadError {
    /// Message shown to the uploading user
    pub fn user_message(&self) -> String {
        match self {
            UploadError::InvalidFileType { .. } => "Please select an image file.".to_string(),
            UploadError::MissingField(field) => format!("Please provide a {field}."),
            UploadError::ClassificationFailed(_) => {
                "Error verifying image. Please try again.".to_string()
            }
            UploadError::NotARealPhoto => {
                "This image appears to be AI-generated or not a natural photo.".to_string()
            }
            UploadError::PersistenceFailed(_) => {
                "Failed to upload image. Please try again.".to_string()
            }
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::InvalidFileType { .. } => "INVALID_FILE_TYPE",
            UploadError::MissingField(_) => "MISSING_FIELD",
            UploadError::ClassificationFailed(_) => "CLASSIFICATION_FAILED",
            UploadError::NotARealPhoto => "NOT_A_REAL_PHOTO",
            UploadError::PersistenceFailed(_) => "PERSISTENCE_FAILED",
        }
    }
}

/// One file submitted for upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    /// MIME type declared by the client
    pub content_type: String,
    pub original_filename: String,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: String,
}

/// Where an upload attempt currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Idle,
    Validating,
    Classifying,
    Classified(Verdict),
    Sanitizing,
    Persisting {
        storage_key: String,
        display_name: String,
    },
    Done(PhotoRecord),
    Failed(UploadError),
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::Validating => "validating",
            UploadState::Classifying => "classifying",
            UploadState::Classified(Verdict::Accepted) => "classified_accepted",
            UploadState::Classified(Verdict::Rejected) => "classified_rejected",
            UploadState::Sanitizing => "sanitizing",
            UploadState::Persisting { .. } => "persisting",
            UploadState::Done(_) => "done",
            UploadState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Done(_) | UploadState::Failed(_))
    }
}

/// Orchestrates classification, key generation and persistence of uploads
pub struct UploadPipeline {
    classifier: NaturalPhotoClassifier,
    image_store: Arc<dyn ImageStore>,
    photo_store: Arc<dyn PhotoStore>,
}

impl UploadPipeline {
    pub fn new(
        classifier: NaturalPhotoClassifier,
        image_store: Arc<dyn ImageStore>,
        photo_store: Arc<dyn PhotoStore>,
    ) -> Self {
        Self {
            classifier,
            image_store,
            photo_store,
        }
    }

    /// Run an upload to completion
    #[instrument(skip(self, request), fields(owner_id = %request.owner_id, size_bytes = request.bytes.len()))]
    pub async fn run(&self, request: &UploadRequest) -> Result<PhotoRecord, UploadError> {
        let mut state = UploadState::Idle;

        loop {
            let next = self.step(state, request).await;
            debug!(state = next.name(), "Upload state changed");

            state = match next {
                UploadState::Done(record) => {
                    info!(photo_id = record.id, storage_key = %record.storage_key, "Photo uploaded");
                    metrics::counter!("gallery.uploads.accepted").increment(1);
                    return Ok(record);
                }
                UploadState::Failed(err) => {
                    if err == UploadError::NotARealPhoto {
                        metrics::counter!("gallery.uploads.rejected").increment(1);
                    } else {
                        metrics::counter!("gallery.uploads.failed").increment(1);
                    }
                    warn!(error = %err, code = err.code(), "Upload failed");
                    return Err(err);
                }
                other => other,
            };
        }
    }

    /// Perform a single transition
    pub async fn step(&self, state: UploadState, request: &UploadRequest) -> UploadState {
        match state {
            UploadState::Idle => UploadState::Validating,
            UploadState::Validating => match validate(request) {
                Ok(()) => UploadState::Classifying,
                Err(err) => UploadState::Failed(err),
            },
            UploadState::Classifying => {
                let started = Instant::now();
                let result = self.classifier.verify(&request.bytes).await;
                metrics::histogram!("gallery.classifier.duration_seconds")
                    .record(started.elapsed().as_secs_f64());

                match result {
                    Ok(verdict) => UploadState::Classified(verdict),
                    Err(e) => UploadState::Failed(UploadError::ClassificationFailed(e.to_string())),
                }
            }
            UploadState::Classified(Verdict::Rejected) => {
                UploadState::Failed(UploadError::NotARealPhoto)
            }
            UploadState::Classified(Verdict::Accepted) => UploadState::Sanitizing,
            UploadState::Sanitizing => {
                let display_name = sanitize_filename(&request.original_filename);
                let storage_key = generate_storage_key(&request.owner_id, Utc::now(), &display_name);
                UploadState::Persisting {
                    storage_key,
                    display_name,
                }
            }
            UploadState::Persisting {
                storage_key,
                display_name,
            } => match self.persist(request, storage_key, display_name).await {
                Ok(record) => UploadState::Done(record),
                Err(err) => UploadState::Failed(err),
            },
            terminal @ (UploadState::Done(_) | UploadState::Failed(_)) => terminal,
        }
    }

    async fn persist(
        &self,
        request: &UploadRequest,
        storage_key: String,
        display_name: String,
    ) -> Result<PhotoRecord, UploadError> {
        self.image_store
            .put_image(&storage_key, request.bytes.clone(), &request.content_type)
            .await
            .map_err(|e| UploadError::PersistenceFailed(e.to_string()))?;

        self.photo_store
            .create(NewPhoto {
                storage_key,
                owner_id: request.owner_id.clone(),
                title: request.title.trim().to_string(),
                description: request
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from),
                original_filename: display_name,
            })
            .await
            .map_err(|e| UploadError::PersistenceFailed(e.to_string()))
    }
}

fn validate(request: &UploadRequest) -> Result<(), UploadError> {
    if request.title.trim().is_empty() {
        return Err(UploadError::MissingField("title"));
    }
    if request.owner_id.trim().is_empty() {
        return Err(UploadError::MissingField("owner_id"));
    }
    if !request.content_type.to_ascii_lowercase().starts_with("image/") {
        return Err(UploadError::InvalidFileType {
            content_type: request.content_type.clone(),
        });
    }
    Ok(())
}
