//! Report records, the stable warning taxonomy, and the JSONL emitter.
//!
//! Every unit of work produces exactly one [`Record`]. Records are emitted in
//! the order the orchestrator processes them (byte-lexicographic by input
//! path) and flushed after every line so a crashed run still leaves a
//! parseable report behind. The optional [`Summary`] is always the last line.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

/// Schema version stamped into every record.
pub const REPORT_VERSION: u32 = 1;

/// The closed warning taxonomy.
///
/// Codes are stable identifiers for machine consumers; the accompanying
/// free-text message is advisory only. Adding a code here forces the risky
/// set in [`crate::policy`] to take a position on it, since that match is
/// exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    ContentTypeDetected,
    ContentTypeDetectedOoxml,
    ContentTypeMismatch,
    PdfRiskOpenaction,
    PdfRiskJavascript,
    PdfRiskAction,
    PdfRiskForm,
    PdfRiskEmbeddedFile,
    PdfScanFailed,
    OfficeMacroEnabled,
    OfficeMacroIndicatorVbaproject,
    OfficeOoxmlScanFailed,
    ZipUnsafePath,
    ZipSymlinkSkipped,
    ZipEncryptedSkipped,
    ZipDuplicateSkipped,
    ZipTooManyMembers,
    ZipMemberTooLarge,
    ZipRatioExceeded,
    ZipTotalBytesExceeded,
    ZipNestedArchiveSkipped,
    ZipNestedArchiveCopied,
    ZipNestedArchiveSanitized,
    ZipNestedArchiveFailed,
    ZipUnsupportedSkipped,
    ExcludedByPattern,
    AllowlistSkipped,
    OutputExists,
}

/// One finding attached to a record, in emission order.
#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
}

impl Warning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Warning { code, message: message.into() }
    }
}

/// What happened to one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ImageSanitized,
    PdfSanitized,
    OfficeSanitized,
    ZipSanitized,
    Copied,
    Skipped,
    Excluded,
    Blocked,
    Error,
    Truncated,
    WouldImageSanitize,
    WouldPdfSanitize,
    WouldOfficeSanitize,
    WouldZipSanitize,
    WouldCopy,
    WouldBlock,
}

impl Action {
    /// Stable string form, identical to the serialized representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::ImageSanitized => "image_sanitized",
            Action::PdfSanitized => "pdf_sanitized",
            Action::OfficeSanitized => "office_sanitized",
            Action::ZipSanitized => "zip_sanitized",
            Action::Copied => "copied",
            Action::Skipped => "skipped",
            Action::Excluded => "excluded",
            Action::Blocked => "blocked",
            Action::Error => "error",
            Action::Truncated => "truncated",
            Action::WouldImageSanitize => "would_image_sanitize",
            Action::WouldPdfSanitize => "would_pdf_sanitize",
            Action::WouldOfficeSanitize => "would_office_sanitize",
            Action::WouldZipSanitize => "would_zip_sanitize",
            Action::WouldCopy => "would_copy",
            Action::WouldBlock => "would_block",
        }
    }

    /// The dry-run analogue of this action.
    ///
    /// Actions that never write anything pass through unchanged.
    pub fn dry_run(self) -> Self {
        match self {
            Action::ImageSanitized => Action::WouldImageSanitize,
            Action::PdfSanitized => Action::WouldPdfSanitize,
            Action::OfficeSanitized => Action::WouldOfficeSanitize,
            Action::ZipSanitized => Action::WouldZipSanitize,
            Action::Copied => Action::WouldCopy,
            Action::Blocked => Action::WouldBlock,
            other => other,
        }
    }

    /// Whether this action drives the exit code to 2.
    ///
    /// `would_block` counts so a dry run predicts the real run's exit code.
    pub fn is_failure(self) -> bool {
        matches!(self, Action::Error | Action::Blocked | Action::WouldBlock)
    }
}

/// One JSONL line of the report.
#[derive(Debug, Serialize)]
pub struct Record {
    pub report_version: u32,
    pub input_path: String,
    pub output_path: Option<String>,
    pub action: Action,
    pub warnings: Vec<Warning>,
    pub error: Option<String>,
}

impl Record {
    pub fn new(input_path: &Path, action: Action) -> Self {
        Record {
            report_version: REPORT_VERSION,
            input_path: input_path.display().to_string(),
            output_path: None,
            action,
            warnings: Vec::new(),
            error: None,
        }
    }
}

/// Terminal summary line, appended when `--report-summary` is set.
#[derive(Debug, Serialize)]
pub struct Summary {
    #[serde(rename = "type")]
    pub record_type: &'static str,
    pub report_version: u32,
    pub dry_run: bool,
    pub exit_code: i32,
    pub files: u64,
    pub warnings: u64,
    pub errors: u64,
    pub counts: BTreeMap<&'static str, u64>,
    pub tool_version: &'static str,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: i64,
    pub input: String,
    pub out: Option<String>,
    pub report: Option<String>,
    pub options: serde_json::Value,
}

/// Append-only JSONL sink: a file, stdout (`-`), or nothing.
pub struct ReportWriter {
    sink: Sink,
}

enum Sink {
    File(BufWriter<File>),
    Stdout,
    Null,
}

impl ReportWriter {
    /// Open the sink named on the command line; `-` selects stdout.
    pub fn create(path: &str) -> io::Result<Self> {
        if path == "-" {
            return Ok(ReportWriter { sink: Sink::Stdout });
        }
        Ok(ReportWriter { sink: Sink::File(BufWriter::new(File::create(path)?)) })
    }

    /// A writer that discards everything (no `--report` given).
    pub fn null() -> Self {
        ReportWriter { sink: Sink::Null }
    }

    pub fn write_record(&mut self, record: &Record) -> io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.write_line(&line)
    }

    pub fn write_summary(&mut self, summary: &Summary) -> io::Result<()> {
        let line = serde_json::to_string(summary)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        match &mut self.sink {
            Sink::File(writer) => {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                // Flush per line so a crash mid-run loses at most the
                // in-flight record.
                writer.flush()
            },
            Sink::Stdout => {
                let stdout = io::stdout();
                let mut lock = stdout.lock();
                lock.write_all(line.as_bytes())?;
                lock.write_all(b"\n")?;
                lock.flush()
            },
            Sink::Null => Ok(()),
        }
    }
}

// Tests go below the code where they'll be out of the way when not the target of attention
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_stable_field_order() {
        let mut record = Record::new(Path::new("photo.jpg"), Action::ImageSanitized);
        record.output_path = Some("out/photo.jpg".to_owned());
        record.warnings.push(Warning::new(WarningCode::ContentTypeDetected, "renamed"));
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            "{\"report_version\":1,\"input_path\":\"photo.jpg\",\
             \"output_path\":\"out/photo.jpg\",\"action\":\"image_sanitized\",\
             \"warnings\":[{\"code\":\"content_type_detected\",\"message\":\"renamed\"}],\
             \"error\":null}"
        );
    }

    #[test]
    fn action_strings_match_serialized_form() {
        for action in [
            Action::ImageSanitized,
            Action::ZipSanitized,
            Action::WouldBlock,
            Action::Truncated,
        ] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn dry_run_mapping_covers_write_actions() {
        assert_eq!(Action::ImageSanitized.dry_run(), Action::WouldImageSanitize);
        assert_eq!(Action::ZipSanitized.dry_run(), Action::WouldZipSanitize);
        assert_eq!(Action::Blocked.dry_run(), Action::WouldBlock);
        assert_eq!(Action::Skipped.dry_run(), Action::Skipped);
        assert_eq!(Action::Error.dry_run(), Action::Error);
    }

    #[test]
    fn summary_record_is_tagged() {
        let summary = Summary {
            record_type: "summary",
            report_version: REPORT_VERSION,
            dry_run: false,
            exit_code: 0,
            files: 1,
            warnings: 0,
            errors: 0,
            counts: BTreeMap::new(),
            tool_version: "0.0.0",
            started_at: "2026-01-01T00:00:00.000Z".to_owned(),
            ended_at: "2026-01-01T00:00:01.000Z".to_owned(),
            duration_ms: 1000,
            input: "in".to_owned(),
            out: None,
            report: None,
            options: serde_json::Value::Null,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&summary).unwrap()).unwrap();
        assert_eq!(value["type"], "summary");
        assert_eq!(value["exit_code"], 0);
    }
}
