//! ZIP traversal with member hardening, bomb guardrails, and the
//! nested-archive policy.
//!
//! Every hardening decision is made from central-directory metadata before a
//! single byte is decompressed; reads then go through a hard cap so a lying
//! header cannot blow the budget either. Members are processed in
//! byte-lexicographic name order with at most one member's decompressed
//! bytes held at a time, and the output archive is assembled in that same
//! order from the members that survive.

use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use log::debug;
use zip::read::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::classify::{self, ContentType};
use crate::config::{NestedArchivePolicy, SanitizeConfig};
use crate::error::SanitizeError;
use crate::images;
use crate::office;
use crate::pdf;
use crate::report::{Warning, WarningCode};

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// What one archive pass produced. Warnings carry the member name in their
/// message and aggregate onto the archive's single report record.
#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    pub warnings: Vec<Warning>,
    pub members_written: u64,
}

/// Central-directory metadata for one entry, captured before any read.
struct MemberMeta {
    index: usize,
    name: String,
    size: u64,
    compressed_size: u64,
    unix_mode: Option<u32>,
    encrypted: bool,
    is_dir: bool,
}

/// Sanitize one archive from `reader` into `sink`.
///
/// `depth` is 0 for a top-level archive; `nested_read` accumulates the
/// aggregate decompressed bytes spent on nested archives across the whole
/// recursion. Only a failure to open the container itself is an `Err`;
/// everything member-local becomes a warning and the iteration continues.
pub fn sanitize_archive<R, W>(
    reader: R,
    sink: W,
    cfg: &SanitizeConfig,
    depth: u32,
    nested_read: &mut u64,
) -> Result<(W, ArchiveOutcome), SanitizeError>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut archive = ZipArchive::new(reader)?;
    let mut members = collect_members(&mut archive)?;
    members.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    let mut writer = ZipWriter::new(sink);
    let mut outcome = ArchiveOutcome::default();
    let mut total_read: u64 = 0;
    let mut processed: u64 = 0;
    let mut previous_name: Option<&str> = None;

    for member in &members {
        if member.is_dir {
            continue;
        }
        let duplicate = previous_name == Some(member.name.as_str());
        previous_name = Some(member.name.as_str());

        processed += 1;
        if processed > cfg.zip.max_members {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipTooManyMembers,
                format!("{}: archive exceeds {} members", member.name, cfg.zip.max_members),
            ));
            continue;
        }
        if is_unsafe_member_name(&member.name) {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipUnsafePath,
                format!("{}: member path escapes the archive root", member.name),
            ));
            continue;
        }
        if member.unix_mode.map_or(false, |mode| mode & S_IFMT == S_IFLNK) {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipSymlinkSkipped,
                format!("{}: symlink member skipped", member.name),
            ));
            continue;
        }
        if member.encrypted {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipEncryptedSkipped,
                format!("{}: encrypted member skipped", member.name),
            ));
            continue;
        }
        if duplicate {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipDuplicateSkipped,
                format!("{}: duplicate entry name skipped", member.name),
            ));
            continue;
        }
        if member.size > cfg.zip.max_member_bytes {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipMemberTooLarge,
                format!(
                    "{}: declares {} uncompressed bytes (limit {})",
                    member.name, member.size, cfg.zip.max_member_bytes
                ),
            ));
            continue;
        }
        let ratio = member.size / member.compressed_size.max(1);
        if ratio > cfg.zip.max_compression_ratio {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipRatioExceeded,
                format!(
                    "{}: compression ratio {} exceeds limit {}",
                    member.name, ratio, cfg.zip.max_compression_ratio
                ),
            ));
            continue;
        }
        if total_read.saturating_add(member.size) > cfg.zip.max_total_bytes {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipTotalBytesExceeded,
                format!(
                    "{}: aggregate uncompressed bytes would exceed limit {}",
                    member.name, cfg.zip.max_total_bytes
                ),
            ));
            continue;
        }

        let data = match read_member(&mut archive, member, cfg.zip.max_member_bytes) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                // The central directory lied about the size; the partial
                // bytes are already discarded.
                outcome.warnings.push(Warning::new(
                    WarningCode::ZipMemberTooLarge,
                    format!(
                        "{}: exceeded {} bytes while decompressing",
                        member.name, cfg.zip.max_member_bytes
                    ),
                ));
                continue;
            },
            Err(err) => {
                outcome.warnings.push(Warning::new(
                    WarningCode::ZipUnsupportedSkipped,
                    format!("{}: member could not be read: {}", member.name, err),
                ));
                continue;
            },
        };
        total_read += data.len() as u64;
        if total_read > cfg.zip.max_total_bytes {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipTotalBytesExceeded,
                format!(
                    "{}: aggregate uncompressed bytes exceed limit {}",
                    member.name, cfg.zip.max_total_bytes
                ),
            ));
            continue;
        }

        dispatch_member(
            &mut archive,
            &mut writer,
            member,
            &data,
            cfg,
            depth,
            nested_read,
            &mut outcome,
        )?;
    }

    let sink = writer.finish()?;
    Ok((sink, outcome))
}

fn collect_members<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<MemberMeta>, SanitizeError> {
    let mut members = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        members.push(MemberMeta {
            index,
            name: entry.name().to_owned(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
            unix_mode: entry.unix_mode(),
            encrypted: entry.encrypted(),
            is_dir: entry.is_dir(),
        });
    }
    Ok(members)
}

/// Decompress one member through a hard cap. `Ok(None)` means the cap was
/// hit before EOF.
fn read_member<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    member: &MemberMeta,
    cap: u64,
) -> Result<Option<Vec<u8>>, SanitizeError> {
    let entry = archive.by_index(member.index)?;
    let mut data = Vec::new();
    entry.take(cap.saturating_add(1)).read_to_end(&mut data)?;
    if data.len() as u64 > cap {
        return Ok(None);
    }
    Ok(Some(data))
}

/// Absolute paths, drive prefixes, and any `..` component are rejected
/// outright rather than normalized.
fn is_unsafe_member_name(name: &str) -> bool {
    if name.starts_with('/') || name.starts_with('\\') {
        return true;
    }
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }
    name.split(|c| c == '/' || c == '\\').any(|component| component == "..")
}

/// Reclassify a surviving member by content.
fn member_kind(data: &[u8]) -> ContentType {
    let sniffed = classify::sniff(data);
    if sniffed != ContentType::Zip {
        return sniffed;
    }
    match ZipArchive::new(Cursor::new(data)) {
        Ok(inner) => classify::refine_zip_container(inner.file_names()),
        Err(_) => ContentType::Unknown,
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_member<R, W>(
    archive: &mut ZipArchive<R>,
    writer: &mut ZipWriter<W>,
    member: &MemberMeta,
    data: &[u8],
    cfg: &SanitizeConfig,
    depth: u32,
    nested_read: &mut u64,
    outcome: &mut ArchiveOutcome,
) -> Result<(), SanitizeError>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let kind = member_kind(data);
    match kind {
        kind if kind.is_image() => match images::sanitize_image(data, kind) {
            Ok(bytes) => write_member(writer, &member.name, &bytes, outcome)?,
            Err(err) => copy_or_drop_unsupported(
                archive,
                writer,
                member,
                cfg,
                outcome,
                &format!("could not be decoded as {}: {}", kind.mime(), err),
            )?,
        },
        ContentType::Pdf => match pdf::sanitize_pdf(data) {
            Ok(done) => {
                merge_member_warnings(&member.name, done.warnings, outcome);
                write_member(writer, &member.name, &done.bytes, outcome)?;
            },
            Err(err) => outcome.warnings.push(Warning::new(
                WarningCode::PdfScanFailed,
                format!("{}: PDF member could not be parsed: {}", member.name, err),
            )),
        },
        ContentType::Ooxml => match office::sanitize_ooxml(data, Path::new(&member.name)) {
            Ok(done) => {
                merge_member_warnings(&member.name, done.warnings, outcome);
                write_member(writer, &member.name, &done.bytes, outcome)?;
            },
            Err(err) => outcome.warnings.push(Warning::new(
                WarningCode::OfficeOoxmlScanFailed,
                format!("{}: OOXML member could not be read: {}", member.name, err),
            )),
        },
        ContentType::Zip => {
            nested_member(archive, writer, member, data, cfg, depth, nested_read, outcome)?;
        },
        _ => copy_or_drop_unsupported(archive, writer, member, cfg, outcome, "unsupported type")?,
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn nested_member<R, W>(
    archive: &mut ZipArchive<R>,
    writer: &mut ZipWriter<W>,
    member: &MemberMeta,
    data: &[u8],
    cfg: &SanitizeConfig,
    depth: u32,
    nested_read: &mut u64,
    outcome: &mut ArchiveOutcome,
) -> Result<(), SanitizeError>
where
    R: Read + Seek,
    W: Write + Seek,
{
    match cfg.nested_policy {
        NestedArchivePolicy::Skip => {
            outcome.warnings.push(Warning::new(
                WarningCode::ZipNestedArchiveSkipped,
                format!("{}: nested archive dropped by policy", member.name),
            ));
        },
        NestedArchivePolicy::Copy => {
            raw_copy(archive, writer, member, outcome)?;
            outcome.warnings.push(Warning::new(
                WarningCode::ZipNestedArchiveCopied,
                format!("{}: nested archive copied without inspection", member.name),
            ));
        },
        NestedArchivePolicy::Sanitize => {
            let next_depth = depth + 1;
            if next_depth > cfg.nested_max_depth {
                outcome.warnings.push(Warning::new(
                    WarningCode::ZipNestedArchiveFailed,
                    format!(
                        "{}: nesting depth {} exceeds limit {}",
                        member.name, next_depth, cfg.nested_max_depth
                    ),
                ));
                return Ok(());
            }
            *nested_read += data.len() as u64;
            if *nested_read > cfg.nested_max_total_bytes {
                outcome.warnings.push(Warning::new(
                    WarningCode::ZipNestedArchiveFailed,
                    format!("{}: aggregate nested byte budget exhausted", member.name),
                ));
                return Ok(());
            }
            match sanitize_archive(
                Cursor::new(data),
                Cursor::new(Vec::new()),
                cfg,
                next_depth,
                nested_read,
            ) {
                Ok((inner_sink, inner_outcome)) => {
                    outcome.warnings.extend(inner_outcome.warnings);
                    outcome.warnings.push(Warning::new(
                        WarningCode::ZipNestedArchiveSanitized,
                        format!(
                            "{}: nested archive sanitized at depth {}",
                            member.name, next_depth
                        ),
                    ));
                    write_member(writer, &member.name, &inner_sink.into_inner(), outcome)?;
                },
                Err(err) => outcome.warnings.push(Warning::new(
                    WarningCode::ZipNestedArchiveFailed,
                    format!("{}: nested archive could not be sanitized: {}", member.name, err),
                )),
            }
        },
    }
    Ok(())
}

/// Keep the original member bit-for-bit, or drop it with a warning when raw
/// copies are not wanted.
fn copy_or_drop_unsupported<R, W>(
    archive: &mut ZipArchive<R>,
    writer: &mut ZipWriter<W>,
    member: &MemberMeta,
    cfg: &SanitizeConfig,
    outcome: &mut ArchiveOutcome,
    reason: &str,
) -> Result<(), SanitizeError>
where
    R: Read + Seek,
    W: Write + Seek,
{
    if cfg.copy_unsupported {
        debug!("{}: raw copy ({})", member.name, reason);
        raw_copy(archive, writer, member, outcome)
    } else {
        outcome.warnings.push(Warning::new(
            WarningCode::ZipUnsupportedSkipped,
            format!("{}: {}", member.name, reason),
        ));
        Ok(())
    }
}

fn raw_copy<R, W>(
    archive: &mut ZipArchive<R>,
    writer: &mut ZipWriter<W>,
    member: &MemberMeta,
    outcome: &mut ArchiveOutcome,
) -> Result<(), SanitizeError>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let entry = archive.by_index_raw(member.index)?;
    writer.raw_copy_file(entry)?;
    outcome.members_written += 1;
    Ok(())
}

fn write_member<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    bytes: &[u8],
    outcome: &mut ArchiveOutcome,
) -> Result<(), SanitizeError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(name, options)?;
    writer.write_all(bytes)?;
    outcome.members_written += 1;
    Ok(())
}

fn merge_member_warnings(name: &str, warnings: Vec<Warning>, outcome: &mut ArchiveOutcome) {
    outcome.warnings.extend(
        warnings
            .into_iter()
            .map(|warning| Warning::new(warning.code, format!("{}: {}", name, warning.message))),
    );
}
