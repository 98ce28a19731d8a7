//! Risky-content trust policy: the single chokepoint that can turn warnings
//! into a withheld output.

use serde::Serialize;

use crate::report::{Action, Warning, WarningCode};

/// What to do with a record that carries risky findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RiskyPolicy {
    /// Emit the record as-is (the default).
    Warn,
    /// Withhold the output and rewrite the action to `blocked`.
    Block,
}

/// Whether a warning code belongs to the closed risky set.
pub fn is_risky(code: WarningCode) -> bool {
    use WarningCode::*;
    match code {
        PdfRiskOpenaction | PdfRiskJavascript | PdfRiskAction | PdfRiskForm
        | PdfRiskEmbeddedFile | PdfScanFailed | OfficeMacroEnabled
        | OfficeMacroIndicatorVbaproject | OfficeOoxmlScanFailed | ZipUnsafePath
        | ZipSymlinkSkipped | ZipEncryptedSkipped | ZipTooManyMembers | ZipMemberTooLarge
        | ZipRatioExceeded | ZipTotalBytesExceeded | ZipNestedArchiveSkipped
        | ZipNestedArchiveCopied | ZipNestedArchiveSanitized | ZipNestedArchiveFailed => true,
        ContentTypeDetected | ContentTypeDetectedOoxml | ContentTypeMismatch
        | ZipDuplicateSkipped | ZipUnsupportedSkipped | ExcludedByPattern | AllowlistSkipped
        | OutputExists => false,
    }
}

/// Decide whether a record that is about to be emitted must have its output
/// withheld. Traversal-level records are never gated.
pub fn blocks(policy: RiskyPolicy, action: Action, warnings: &[Warning]) -> bool {
    if policy != RiskyPolicy::Block {
        return false;
    }
    if matches!(action, Action::Excluded | Action::Truncated) {
        return false;
    }
    warnings.iter().any(|warning| is_risky(warning.code))
}
