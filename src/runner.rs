//! Per-input dispatch, run accounting, and exit-code computation.
//!
//! The runner owns the only mutable run-wide state: the report sink and the
//! [`RunState`] counters. Everything else is scoped to the file or archive
//! member being worked on.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};

use crate::archive;
use crate::classify::{self, ContentType};
use crate::config::SanitizeConfig;
use crate::error::SanitizeError;
use crate::images;
use crate::office;
use crate::pdf;
use crate::policy;
use crate::report::{Action, Record, ReportWriter, Summary, Warning, WarningCode, REPORT_VERSION};
use crate::walk::{self, WalkControl, WalkEvent};
use crate::writeout::{self, AtomicFile};

pub const EXIT_OK: i32 = 0;
/// At least one record ended in `error` or `blocked`.
pub const EXIT_FINDINGS: i32 = 2;
/// `--fail-on-warnings` was set and at least one warning was emitted.
pub const EXIT_STRICT_WARNINGS: i32 = 3;

/// Per-invocation counters.
#[derive(Debug)]
pub struct RunState {
    pub files_seen: u64,
    pub bytes_seen: u64,
    pub counts: BTreeMap<&'static str, u64>,
    pub warnings: u64,
    pub errors: u64,
    pub failures: u64,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    fn new() -> Self {
        RunState {
            files_seen: 0,
            bytes_seen: 0,
            counts: BTreeMap::new(),
            warnings: 0,
            errors: 0,
            failures: 0,
            started_at: Utc::now(),
        }
    }

    fn tally(&mut self, record: &Record) {
        *self.counts.entry(record.action.as_str()).or_insert(0) += 1;
        self.warnings += record.warnings.len() as u64;
        if record.action == Action::Error {
            self.errors += 1;
        }
        if record.action.is_failure() {
            self.failures += 1;
        }
    }
}

/// What a dispatched sanitizer produced for the write step.
enum Payload<'a> {
    Bytes(Vec<u8>),
    CopyFrom(&'a Path),
}

/// Drives one invocation end to end.
pub struct Runner {
    cfg: SanitizeConfig,
    report: ReportWriter,
    state: RunState,
    flat_names: HashSet<String>,
}

impl Runner {
    pub fn new(cfg: SanitizeConfig) -> Result<Self> {
        let report = match cfg.report.as_deref() {
            Some(path) => ReportWriter::create(path)
                .with_context(|| format!("Failed to open report sink {}", path))?,
            None => ReportWriter::null(),
        };
        Ok(Runner { cfg, report, state: RunState::new(), flat_names: HashSet::new() })
    }

    pub fn cfg(&self) -> &SanitizeConfig {
        &self.cfg
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Process the input, emit all records (and the summary when asked),
    /// and return the exit code.
    pub fn run(&mut self) -> Result<i32> {
        let input = self.cfg.input.clone();
        let metadata = std::fs::metadata(&input)
            .with_context(|| format!("Failed to read input {}", input.display()))?;

        if metadata.is_dir() {
            self.run_directory(&input)?;
        } else {
            self.run_single_file(&input, metadata.len())?;
        }

        let exit_code = self.exit_code();
        info!("run finished with exit code {}", exit_code);
        if self.cfg.report_summary {
            let summary = self.build_summary(exit_code);
            self.report.write_summary(&summary).context("Failed to append summary record")?;
        }
        Ok(exit_code)
    }

    fn run_single_file(&mut self, input: &Path, size: u64) -> Result<()> {
        let rel = match input.file_name() {
            Some(name) => PathBuf::from(name),
            None => PathBuf::from("output"),
        };
        if self.over_ceiling(size) {
            self.emit(Record::new(input, Action::Truncated))?;
            return Ok(());
        }
        self.state.files_seen += 1;
        self.state.bytes_seen += size;
        let record = self.process_file(input, &rel);
        self.emit(record)
    }

    fn run_directory(&mut self, root: &Path) -> Result<()> {
        let skip_paths = self.traversal_skip_paths();
        let exclude = self.cfg.exclude.clone();

        if self.out_under_input(root) {
            // Snapshot the file set before the first write so freshly
            // written outputs are not re-consumed.
            debug!("output root lies under the input root; snapshotting the walk");
            let mut events = Vec::new();
            walk::walk(root, &exclude, &skip_paths, |event| {
                events.push(event);
                WalkControl::Continue
            })?;
            for event in events {
                if self.handle_event(root, event)? == WalkControl::Stop {
                    break;
                }
            }
            return Ok(());
        }

        let mut failure = None;
        walk::walk(root, &exclude, &skip_paths, |event| {
            match self.handle_event(root, event) {
                Ok(control) => control,
                Err(err) => {
                    failure = Some(err);
                    WalkControl::Stop
                },
            }
        })?;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn handle_event(&mut self, root: &Path, event: WalkEvent) -> Result<WalkControl> {
        match event {
            WalkEvent::Excluded { path, is_dir } => {
                let mut record = Record::new(&path, Action::Excluded);
                record.warnings.push(Warning::new(
                    WarningCode::ExcludedByPattern,
                    if is_dir {
                        "directory matched an exclude pattern and was pruned"
                    } else {
                        "file matched an exclude pattern"
                    },
                ));
                self.emit(record)?;
                Ok(WalkControl::Continue)
            },
            WalkEvent::File { path, rel, size } => {
                if self.over_ceiling(size) {
                    self.emit(Record::new(root, Action::Truncated))?;
                    return Ok(WalkControl::Stop);
                }
                self.state.files_seen += 1;
                self.state.bytes_seen += size;
                let record = self.process_file(&path, &rel);
                self.emit(record)?;
                Ok(WalkControl::Continue)
            },
        }
    }

    /// Whether processing one more file of `size` bytes would cross a
    /// traversal ceiling.
    fn over_ceiling(&self, size: u64) -> bool {
        if let Some(max) = self.cfg.max_files {
            if self.state.files_seen + 1 > max {
                return true;
            }
        }
        if let Some(max) = self.cfg.max_bytes {
            if self.state.bytes_seen + size > max {
                return true;
            }
        }
        false
    }

    fn process_file(&mut self, path: &Path, rel: &Path) -> Record {
        match self.try_process_file(path, rel) {
            Ok(record) => record,
            Err(err) => {
                let mut record = Record::new(path, Action::Error);
                record.error = Some(err.to_string());
                record
            },
        }
    }

    fn try_process_file(&mut self, path: &Path, rel: &Path) -> Result<Record, SanitizeError> {
        let detected = self.detect(path)?;
        debug!("{}: detected {}", path.display(), detected.mime());

        let mut warnings = Vec::new();
        if let Some(warning) = classify::reconcile(detected, path) {
            warnings.push(warning);
        }

        if let Some(allow) = &self.cfg.allow_types {
            if !allow.contains(&detected) {
                let mut record = Record::new(path, Action::Skipped);
                record.warnings = warnings;
                record.warnings.push(Warning::new(
                    WarningCode::AllowlistSkipped,
                    format!("detected type {} is not in the allowlist", detected.mime()),
                ));
                return Ok(record);
            }
        }

        match detected {
            ContentType::Zip => self.process_archive(path, rel, warnings),
            ContentType::Unknown => self.process_unsupported(path, rel, warnings),
            other => self.process_single(path, rel, other, warnings),
        }
    }

    /// Classify by prefix, refining ZIP containers via the central
    /// directory. An unreadable container stays `Zip` and fails later as an
    /// archive error.
    fn detect(&self, path: &Path) -> Result<ContentType, SanitizeError> {
        let mut prefix = Vec::with_capacity(classify::SNIFF_LEN);
        File::open(path)?.take(classify::SNIFF_LEN as u64).read_to_end(&mut prefix)?;
        let sniffed = classify::sniff(&prefix);
        if sniffed != ContentType::Zip {
            return Ok(sniffed);
        }
        match zip::read::ZipArchive::new(File::open(path)?) {
            Ok(container) => Ok(classify::refine_zip_container(container.file_names())),
            Err(_) => Ok(ContentType::Zip),
        }
    }

    fn process_single(
        &mut self,
        path: &Path,
        rel: &Path,
        kind: ContentType,
        mut warnings: Vec<Warning>,
    ) -> Result<Record, SanitizeError> {
        let data = std::fs::read(path)?;
        let (action, sanitized) = match kind {
            kind if kind.is_image() => match images::sanitize_image(&data, kind) {
                Ok(bytes) => (Action::ImageSanitized, bytes),
                Err(err) => return Ok(self.gated_error_record(path, warnings, &err)),
            },
            ContentType::Pdf => match pdf::sanitize_pdf(&data) {
                Ok(outcome) => {
                    warnings.extend(outcome.warnings);
                    (Action::PdfSanitized, outcome.bytes)
                },
                Err(err) => {
                    warnings.push(Warning::new(
                        WarningCode::PdfScanFailed,
                        format!("PDF could not be parsed: {}", err),
                    ));
                    return Ok(self.gated_error_record(path, warnings, &err));
                },
            },
            ContentType::Ooxml => match office::sanitize_ooxml(&data, path) {
                Ok(outcome) => {
                    warnings.extend(outcome.warnings);
                    (Action::OfficeSanitized, outcome.bytes)
                },
                Err(err) => {
                    warnings.push(Warning::new(
                        WarningCode::OfficeOoxmlScanFailed,
                        format!("OOXML package could not be read: {}", err),
                    ));
                    return Ok(self.gated_error_record(path, warnings, &err));
                },
            },
            _ => return Err(SanitizeError::UnsupportedContent),
        };
        Ok(self.finish_output(path, rel, action, warnings, Payload::Bytes(sanitized)))
    }

    fn process_unsupported(
        &mut self,
        path: &Path,
        rel: &Path,
        warnings: Vec<Warning>,
    ) -> Result<Record, SanitizeError> {
        if self.cfg.copy_unsupported {
            Ok(self.finish_output(path, rel, Action::Copied, warnings, Payload::CopyFrom(path)))
        } else {
            debug!("{}: unsupported type skipped", path.display());
            let mut record = Record::new(path, Action::Skipped);
            record.warnings = warnings;
            Ok(record)
        }
    }

    fn process_archive(
        &mut self,
        path: &Path,
        rel: &Path,
        mut warnings: Vec<Warning>,
    ) -> Result<Record, SanitizeError> {
        let reader = File::open(path)?;
        let mut nested_read = 0u64;

        if self.cfg.dry_run || self.cfg.out.is_none() {
            // Assemble into memory only to observe the warnings.
            let sink = Cursor::new(Vec::new());
            return Ok(
                match archive::sanitize_archive(reader, sink, &self.cfg, 0, &mut nested_read) {
                    Ok((_, outcome)) => {
                        warnings.extend(outcome.warnings);
                        let mut record = Record::new(path, Action::ZipSanitized);
                        record.warnings = warnings;
                        if policy::blocks(self.cfg.risky_policy, record.action, &record.warnings) {
                            record.action = Action::WouldBlock;
                        } else {
                            record.action = Action::WouldZipSanitize;
                            record.output_path =
                                self.dest_for(rel).map(|dest| dest.display().to_string());
                        }
                        record
                    },
                    Err(err) => self.gated_error_record(path, warnings, &err),
                },
            );
        }

        let dest = match self.dest_for(rel) {
            Some(dest) => dest,
            None => return Err(SanitizeError::UnsupportedContent),
        };
        if dest.exists() && !self.cfg.overwrite {
            let mut record = Record::new(path, Action::Skipped);
            record.warnings = warnings;
            record.warnings.push(Warning::new(
                WarningCode::OutputExists,
                format!("{} already exists", dest.display()),
            ));
            return Ok(record);
        }

        let out_file = AtomicFile::create(&dest)?;
        match archive::sanitize_archive(reader, out_file.file(), &self.cfg, 0, &mut nested_read) {
            Ok((_, outcome)) => {
                warnings.extend(outcome.warnings);
                let mut record = Record::new(path, Action::ZipSanitized);
                record.warnings = warnings;
                if policy::blocks(self.cfg.risky_policy, record.action, &record.warnings) {
                    // out_file is dropped uncommitted; nothing becomes visible.
                    record.action = Action::Blocked;
                } else {
                    match out_file.commit() {
                        Ok(()) => record.output_path = Some(dest.display().to_string()),
                        Err(err) => {
                            record.action = Action::Error;
                            record.error = Some(format!("write failed: {}", err));
                        },
                    }
                }
                Ok(record)
            },
            Err(err) => Ok(self.gated_error_record(path, warnings, &err)),
        }
    }

    /// Gate, then write (or pretend to, under dry-run), then shape the
    /// record. The single place output decisions are made for plain files.
    fn finish_output(
        &mut self,
        path: &Path,
        rel: &Path,
        action: Action,
        warnings: Vec<Warning>,
        payload: Payload<'_>,
    ) -> Record {
        let mut record = Record::new(path, action);
        record.warnings = warnings;

        if policy::blocks(self.cfg.risky_policy, action, &record.warnings) {
            record.action = if self.cfg.dry_run { Action::WouldBlock } else { Action::Blocked };
            return record;
        }

        let dest = match self.dest_for(rel) {
            Some(dest) => dest,
            None => {
                record.action = record.action.dry_run();
                return record;
            },
        };
        if dest.exists() && !self.cfg.overwrite {
            record.action = Action::Skipped;
            record.warnings.push(Warning::new(
                WarningCode::OutputExists,
                format!("{} already exists", dest.display()),
            ));
            return record;
        }
        if self.cfg.dry_run {
            record.action = record.action.dry_run();
            record.output_path = Some(dest.display().to_string());
            return record;
        }

        let written = match payload {
            Payload::Bytes(bytes) => writeout::write_atomic(&dest, &bytes),
            Payload::CopyFrom(src) => writeout::copy_atomic(src, &dest).map(|_| ()),
        };
        match written {
            Ok(()) => record.output_path = Some(dest.display().to_string()),
            Err(err) => {
                record.action = Action::Error;
                record.error = Some(format!("write failed: {}", err));
            },
        }
        record
    }

    fn gated_error_record(
        &self,
        path: &Path,
        warnings: Vec<Warning>,
        err: &SanitizeError,
    ) -> Record {
        let mut record = Record::new(path, Action::Error);
        record.warnings = warnings;
        record.error = Some(err.to_string());
        if policy::blocks(self.cfg.risky_policy, record.action, &record.warnings) {
            record.action = if self.cfg.dry_run { Action::WouldBlock } else { Action::Blocked };
        }
        record
    }

    /// Destination path for `rel`, flattened (with collision
    /// disambiguation) when `--flat` is set. `None` without an output root.
    fn dest_for(&mut self, rel: &Path) -> Option<PathBuf> {
        let out = self.cfg.out.as_ref()?.clone();
        if self.cfg.flat {
            let name = rel
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_owned());
            let claimed = self.claim_flat_name(name);
            Some(out.join(claimed))
        } else {
            Some(out.join(rel))
        }
    }

    /// `name`, or `name(1).ext`, `name(2).ext`, ... on collision.
    fn claim_flat_name(&mut self, name: String) -> String {
        if self.flat_names.insert(name.clone()) {
            return name;
        }
        let (stem, ext) = split_name(&name);
        let mut counter = 0u32;
        loop {
            counter += 1;
            let candidate = if ext.is_empty() {
                format!("{}({})", stem, counter)
            } else {
                format!("{}({}).{}", stem, counter, ext)
            };
            if self.flat_names.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// A report written to a real file must not be re-consumed as input;
    /// stdout mode is exempt, so a tree entry literally named `-` stays
    /// ordinary input.
    fn traversal_skip_paths(&self) -> Vec<PathBuf> {
        match self.cfg.report.as_deref() {
            Some(path) if path != "-" => {
                std::path::absolute(path).map(|abs| vec![abs]).unwrap_or_default()
            },
            _ => Vec::new(),
        }
    }

    fn out_under_input(&self, root: &Path) -> bool {
        let out = match &self.cfg.out {
            Some(out) => out,
            None => return false,
        };
        match (std::path::absolute(out), std::path::absolute(root)) {
            (Ok(out_abs), Ok(root_abs)) => out_abs.starts_with(&root_abs),
            _ => false,
        }
    }

    fn emit(&mut self, record: Record) -> Result<()> {
        self.state.tally(&record);
        self.report.write_record(&record).context("Failed to write report record")?;
        Ok(())
    }

    fn exit_code(&self) -> i32 {
        if self.state.failures > 0 {
            EXIT_FINDINGS
        } else if self.cfg.fail_on_warnings && self.state.warnings > 0 {
            EXIT_STRICT_WARNINGS
        } else {
            EXIT_OK
        }
    }

    fn build_summary(&self, exit_code: i32) -> Summary {
        let ended_at = Utc::now();
        Summary {
            record_type: "summary",
            report_version: REPORT_VERSION,
            dry_run: self.cfg.dry_run,
            exit_code,
            files: self.state.files_seen,
            warnings: self.state.warnings,
            errors: self.state.errors,
            counts: self.state.counts.clone(),
            tool_version: env!("CARGO_PKG_VERSION"),
            started_at: self.state.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ended_at: ended_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: (ended_at - self.state.started_at).num_milliseconds(),
            input: self.cfg.input.display().to_string(),
            out: self.cfg.out.as_ref().map(|out| out.display().to_string()),
            report: self.cfg.report.clone(),
            options: self.cfg.options_snapshot.clone(),
        }
    }
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos + 1..]),
        _ => (name, ""),
    }
}
