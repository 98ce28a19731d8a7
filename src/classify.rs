//! Content-type detection from magic bytes, with extension reconciliation.
//!
//! Classification is a pure function of the byte prefix and the declared
//! extension, so identical inputs always classify identically. Magic bytes
//! are authoritative; the extension only decides which reconciliation
//! warning, if any, accompanies the verdict.

use std::path::Path;

use serde::Serialize;

use crate::report::{Warning, WarningCode};

/// Number of prefix bytes [`sniff`] needs to make a decision.
pub const SNIFF_LEN: usize = 16;

/// The closed set of content types the pipeline understands.
///
/// Adding a format means adding a variant and fixing every exhaustive match
/// the compiler then points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Jpeg,
    Png,
    Webp,
    Tiff,
    Pdf,
    Zip,
    Ooxml,
    Unknown,
}

impl ContentType {
    /// MIME-style name used in report messages.
    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Jpeg => "image/jpeg",
            ContentType::Png => "image/png",
            ContentType::Webp => "image/webp",
            ContentType::Tiff => "image/tiff",
            ContentType::Pdf => "application/pdf",
            ContentType::Zip => "application/zip",
            ContentType::Ooxml => "application/ooxml",
            ContentType::Unknown => "unknown",
        }
    }

    pub fn is_supported(self) -> bool {
        self != ContentType::Unknown
    }

    pub fn is_image(self) -> bool {
        matches!(
            self,
            ContentType::Jpeg | ContentType::Png | ContentType::Webp | ContentType::Tiff
        )
    }

    /// The type an extension (without the leading period) declares.
    pub fn from_extension_str(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => ContentType::Jpeg,
            "png" => ContentType::Png,
            "webp" => ContentType::Webp,
            "tif" | "tiff" => ContentType::Tiff,
            "pdf" => ContentType::Pdf,
            "zip" => ContentType::Zip,
            "docx" | "xlsx" | "pptx" | "docm" | "xlsm" | "pptm" | "dotm" | "xltm" | "potm"
            | "dotx" | "xltx" | "potx" => ContentType::Ooxml,
            _ => ContentType::Unknown,
        }
    }

    /// The type declared by a path's extension.
    pub fn from_extension(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(ContentType::Unknown, Self::from_extension_str)
    }
}

/// Sniff magic bytes.
///
/// ZIP containers come back as [`ContentType::Zip`]; callers holding the
/// central directory use [`refine_zip_container`] to tell OOXML apart.
pub fn sniff(prefix: &[u8]) -> ContentType {
    if prefix.starts_with(b"\xFF\xD8\xFF") {
        return ContentType::Jpeg;
    }
    if prefix.starts_with(b"\x89PNG\r\n\x1a\n") {
        return ContentType::Png;
    }
    if prefix.len() >= 12 && prefix.starts_with(b"RIFF") && &prefix[8..12] == b"WEBP" {
        return ContentType::Webp;
    }
    if prefix.starts_with(b"II*\x00") || prefix.starts_with(b"MM\x00*") {
        return ContentType::Tiff;
    }
    if prefix.starts_with(b"%PDF-") {
        return ContentType::Pdf;
    }
    if prefix.starts_with(b"PK\x03\x04") || prefix.starts_with(b"PK\x05\x06") {
        return ContentType::Zip;
    }
    ContentType::Unknown
}

/// Resolve a ZIP container to OOXML when its central directory carries both
/// `[Content_Types].xml` and a `docProps/` member.
pub fn refine_zip_container<'n>(names: impl Iterator<Item = &'n str>) -> ContentType {
    let mut has_content_types = false;
    let mut has_doc_props = false;
    for name in names {
        if name == "[Content_Types].xml" {
            has_content_types = true;
        } else if name.starts_with("docProps/") {
            has_doc_props = true;
        }
        if has_content_types && has_doc_props {
            return ContentType::Ooxml;
        }
    }
    ContentType::Zip
}

/// Compare the detected type against the declared extension.
///
/// Bytes win: a supported detection under a wrong extension is reported but
/// honored, while an extension promising a supported format over unknown
/// bytes downgrades the file to `unknown`.
pub fn reconcile(detected: ContentType, path: &Path) -> Option<Warning> {
    let declared = ContentType::from_extension(path);
    match detected {
        ContentType::Unknown if declared.is_supported() => Some(Warning::new(
            WarningCode::ContentTypeMismatch,
            format!(
                "{}: extension declares {} but the content does not match a supported format",
                path.display(),
                declared.mime()
            ),
        )),
        ContentType::Unknown => None,
        ContentType::Ooxml if declared != ContentType::Ooxml => Some(Warning::new(
            WarningCode::ContentTypeDetectedOoxml,
            format!("{}: ZIP container identified as an OOXML package", path.display()),
        )),
        _ if detected != declared => Some(Warning::new(
            WarningCode::ContentTypeDetected,
            format!(
                "{}: content is {} (extension declares {})",
                path.display(),
                detected.mime(),
                declared.mime()
            ),
        )),
        _ => None,
    }
}
