//! Realist Gallery Service
//!
//! Photo sharing for the Realist platform. Signed-in users upload photos,
//! which are screened by a remote image classifier so that only natural
//! photographs are accepted, stored in S3 under collision-free keys, indexed
//! in SQLite, and shown to everyone in a responsive masonry gallery.
//!
//! ## Features
//!
//! - **Natural-Photo Screening**: Hugging Face image classification with a
//!   label allow-list and a strict confidence threshold
//! - **Upload Pipeline**: Explicit state machine from validation through
//!   classification to persistence, with user-facing error messages
//! - **Safe Storage Keys**: Sanitized filenames plus owner, timestamp and a
//!   random suffix
//! - **Hosted Identity**: OAuth 2.0 / OpenID Connect login and signup with
//!   PKCE, kept in a server-side session
//!
//! ## Architecture
//!
//! ```text
//!  Browser                    Gallery Service                    Backends
//! ┌──────────┐  multipart   ┌──────────────────┐   classify   ┌──────────────┐
//! │ Upload   │─────────────▶│ Upload Pipeline  │─────────────▶│ Hugging Face │
//! │ form     │              └──────────────────┘              └──────────────┘
//! └──────────┘                │            │
//!                             ▼            ▼
//! ┌──────────┐          ┌──────────┐ ┌──────────────┐
//! │ Masonry  │◀─────────│ Gallery  │ │ Image Store  │──────────▶ S3
//! │ page     │          └──────────┘ └──────────────┘
//! └──────────┘                ▲
//!                             │
//!                       ┌──────────────┐
//!                       │ Metadata     │──────────────────────▶ SQLite
//!                       │ Store        │
//!                       └──────────────┘
//! ```

pub mod api;
pub mod classifier;
pub mod config;
pub mod gallery;
pub mod identity;
pub mod image_store;
pub mod metadata_store;
pub mod storage_key;
pub mod upload_pipeline;

pub use api::{AppState, ErrorResponse};
pub use classifier::{HuggingFaceClassifier, NaturalPhotoClassifier, Prediction, Verdict};
pub use config::Config;
pub use gallery::{column_count, render_page, Gallery};
pub use identity::{IdentityProvider, OAuthIdentityProvider, SessionAdapter, SessionUser};
pub use image_store::{ImageStore, S3ImageStore};
pub use metadata_store::{MetadataStore, NewPhoto, PhotoRecord, PhotoStore};
pub use storage_key::{generate_storage_key, sanitize_filename};
pub use upload_pipeline::{UploadError, UploadPipeline, UploadRequest, UploadState};
