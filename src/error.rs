//! Error taxonomy for the sanitization pipeline.

use thiserror::Error;

/// Failures from format surgery or archive processing.
///
/// Container-level variants fail the whole input item; everything else stays
/// localized to the file or archive member being worked on, per the
/// "local errors are localized" rule.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SanitizeError {
    /// The dispatched operation does not handle this content type.
    #[error("content type not supported by this operation")]
    UnsupportedContent,

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF parse error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("ZIP archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
