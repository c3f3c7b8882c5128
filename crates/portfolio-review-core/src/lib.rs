#![warn(missing_docs)]
//! # portfolio-review-core
//!
//! ## Purpose
//! Defines the pure data model and upload validation rules shared by the
//! `portfolio-review` workspace.
//!
//! ## Responsibilities
//! - Represent an upload candidate and the media types accepted for review.
//! - Validate candidates against size, type, and pixel-dimension limits.
//! - Model analysis outcomes and the persisted analysis record.
//!
//! ## Data flow
//! The client builds an [`UploadCandidate`] from a picked or dropped file.
//! [`validate`] gates it; only a valid candidate is handed to the gateway,
//! which answers with an [`AnalysisResponse`]. Successful responses may be
//! persisted as an [`AnalysisRecord`].
//!
//! ## Ownership and lifetimes
//! Candidates own their byte buffer (`Vec<u8>`) so they can move from the UI
//! session into the network layer without borrow coupling.
//!
//! ## Error model
//! Rule violations are [`ValidationError`] values whose `Display` text is the
//! user-facing alert message. Image decoding failures are [`CoreError`].
//!
//! ## Security and privacy notes
//! Upload bytes are never logged; only sizes, media types, and dimensions are.
//!
//! ## Example
//! ```rust
//! use portfolio_review_core::{UploadCandidate, validate};
//!
//! let candidate = UploadCandidate::new("cv.pdf", "application/pdf", vec![0; 64]);
//! assert!(validate(&candidate).is_valid);
//! ```

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted upload, in bytes (10 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Largest accepted image width or height, in pixels.
pub const MAX_IMAGE_DIMENSION: u32 = 8_000;

/// MIME types the client accepts before submission.
pub const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "application/pdf"];

/// Media types that can be forwarded to the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    /// JPEG image.
    Jpeg,
    /// PNG image.
    Png,
    /// PDF document.
    Pdf,
}

impl MediaType {
    /// Resolves a browser-declared MIME type against the client allow-list.
    ///
    /// `image/jpg` is accepted as an alias of `image/jpeg`.
    pub fn from_declared(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Resolves a media type from a file name extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, extension) = name.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jpe" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Canonical MIME string sent upstream.
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
        }
    }

    /// Returns `true` for raster image types.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }
}

/// One file offered for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    /// Original file name as picked or dropped.
    pub file_name: String,
    /// MIME type declared by the picker.
    pub declared_mime_type: String,
    /// File contents.
    pub bytes: Vec<u8>,
    /// Pixel dimensions once known (images only).
    pub dimensions: Option<(u32, u32)>,
}

impl UploadCandidate {
    /// Creates a candidate with unknown dimensions.
    pub fn new(
        file_name: impl Into<String>,
        declared_mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            declared_mime_type: declared_mime_type.into(),
            bytes,
            dimensions: None,
        }
    }

    /// Sets already-known pixel dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    /// File size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Media type resolved from the declared MIME type.
    pub fn media_type(&self) -> Option<MediaType> {
        MediaType::from_declared(&self.declared_mime_type)
    }

    /// Decodes the image header and records the pixel dimensions.
    ///
    /// Does nothing for PDFs or when dimensions are already known.
    ///
    /// # Errors
    /// Returns [`CoreError::ImageDecode`] when the bytes are not a readable image.
    pub fn resolve_dimensions(&mut self) -> Result<(), CoreError> {
        let is_image = self.media_type().is_some_and(|media| media.is_image());
        if !is_image || self.dimensions.is_some() {
            return Ok(());
        }

        self.dimensions = Some(probe_dimensions(&self.bytes)?);
        Ok(())
    }
}

/// Outcome of validating one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the candidate may be submitted.
    pub is_valid: bool,
    /// User-facing reason when invalid.
    pub error_message: Option<String>,
}

impl ValidationResult {
    /// A passing result.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error_message: None,
        }
    }

    /// A failing result carrying the error's message.
    pub fn invalid(error: &ValidationError) -> Self {
        Self {
            is_valid: false,
            error_message: Some(error.to_string()),
        }
    }
}

impl From<Result<(), ValidationError>> for ValidationResult {
    fn from(result: Result<(), ValidationError>) -> Self {
        match result {
            Ok(()) => Self::valid(),
            Err(error) => Self::invalid(&error),
        }
    }
}

/// Upload rule violations. `Display` yields the alert text shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// File exceeds [`MAX_UPLOAD_BYTES`].
    #[error("File size must be under 10MB. Please compress your file or upload a smaller one.")]
    TooLarge {
        /// Offending size in bytes.
        size_bytes: u64,
    },
    /// MIME type outside [`ALLOWED_MIME_TYPES`].
    #[error("Invalid file type. Please upload only JPG, PNG, or PDF files.")]
    UnsupportedType {
        /// Declared MIME type.
        declared: String,
    },
    /// Image wider or taller than [`MAX_IMAGE_DIMENSION`].
    #[error("Image resolution must be under 8000x8000 pixels.")]
    DimensionsTooLarge {
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
    },
    /// Image bytes could not be decoded to read dimensions.
    #[error("Unable to read image dimensions. Please upload a valid JPG or PNG file.")]
    UnreadableImage,
}

/// Checks the size limit.
///
/// # Errors
/// Returns [`ValidationError::TooLarge`] when `size_bytes > MAX_UPLOAD_BYTES`.
pub fn check_size(size_bytes: u64) -> Result<(), ValidationError> {
    if size_bytes > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge { size_bytes });
    }
    Ok(())
}

/// Checks the declared MIME type against the allow-list.
///
/// # Errors
/// Returns [`ValidationError::UnsupportedType`] for anything outside it.
pub fn check_media_type(declared: &str) -> Result<MediaType, ValidationError> {
    MediaType::from_declared(declared).ok_or_else(|| ValidationError::UnsupportedType {
        declared: declared.to_string(),
    })
}

/// Checks image pixel dimensions. The limit is inclusive.
///
/// # Errors
/// Returns [`ValidationError::DimensionsTooLarge`] when either side exceeds
/// [`MAX_IMAGE_DIMENSION`].
pub fn check_dimensions(width: u32, height: u32) -> Result<(), ValidationError> {
    if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        return Err(ValidationError::DimensionsTooLarge { width, height });
    }
    Ok(())
}

/// Reads pixel dimensions from an encoded image header.
///
/// # Errors
/// Returns [`CoreError::ImageDecode`] when the format is unknown or the header
/// is malformed.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), CoreError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|error| CoreError::ImageDecode(error.to_string()))?
        .into_dimensions()
        .map_err(|error| CoreError::ImageDecode(error.to_string()))
}

/// Applies the synchronous rules (size, then type). First failure wins.
pub fn validate_upload(candidate: &UploadCandidate) -> ValidationResult {
    check_sync_rules(candidate).map(|_| ()).into()
}

/// Applies every rule, including the image dimension check.
///
/// Known dimensions are used as-is; otherwise the image header is decoded.
/// An image whose header cannot be decoded is rejected.
pub fn validate(candidate: &UploadCandidate) -> ValidationResult {
    let result = check_sync_rules(candidate).and_then(|media| {
        if !media.is_image() {
            return Ok(());
        }

        let (width, height) = match candidate.dimensions {
            Some(dimensions) => dimensions,
            None => {
                probe_dimensions(&candidate.bytes).map_err(|_| ValidationError::UnreadableImage)?
            }
        };
        check_dimensions(width, height)
    });

    result.into()
}

fn check_sync_rules(candidate: &UploadCandidate) -> Result<MediaType, ValidationError> {
    check_size(candidate.size_bytes())?;
    check_media_type(&candidate.declared_mime_type)
}

/// Result of one analysis round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisResponse {
    /// HTML feedback text.
    Success(String),
    /// Human-readable failure message.
    Failure(String),
}

impl AnalysisResponse {
    /// Returns `true` for [`AnalysisResponse::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Error categories surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Size, type, or dimension rule violation.
    Validation,
    /// Missing or invalid security token.
    Security,
    /// Service credential missing.
    Configuration,
    /// Network failure or timeout reaching the analysis service.
    Transport,
    /// Analysis service answered with an explicit error.
    Upstream,
}

/// The persisted "latest" analysis for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Feedback HTML.
    pub html: String,
    /// Store time in Unix epoch milliseconds.
    pub stored_at_ms: u64,
}

/// Core decoding errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Image header could not be decoded.
    #[error("image decode failure: {0}")]
    ImageDecode(String),
}
