//! OOXML package rewriting: `docProps/*` removal and macro surfacing.
//!
//! The package is treated purely as a ZIP container. Entries outside
//! `docProps/` are copied bit-for-bit without recompression, so the
//! document body (and any macro project) survives unchanged; macros are
//! reported, never removed.

use std::io::Cursor;
use std::path::Path;

use log::debug;
use zip::read::ZipArchive;
use zip::write::ZipWriter;

use crate::error::SanitizeError;
use crate::report::{Warning, WarningCode};

/// Extensions whose OOXML flavor is macro-enabled by definition.
const MACRO_EXTENSIONS: &[&str] = &["docm", "xlsm", "pptm", "dotm", "xltm", "potm"];

/// Rewritten package bytes plus macro findings.
pub struct OfficeOutcome {
    pub bytes: Vec<u8>,
    pub warnings: Vec<Warning>,
}

pub fn is_macro_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| MACRO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn is_doc_props(name: &str) -> bool {
    name.starts_with("docProps/")
}

fn is_vba_project(name: &str) -> bool {
    name == "vbaProject.bin" || name.ends_with("/vbaProject.bin")
}

/// Rewrite the package without any `docProps/` entry, copying every other
/// entry bit-for-bit in byte-lexicographic name order.
pub fn sanitize_ooxml(data: &[u8], declared_path: &Path) -> Result<OfficeOutcome, SanitizeError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;

    let mut warnings = Vec::new();
    if is_macro_extension(declared_path) {
        warnings.push(Warning::new(
            WarningCode::OfficeMacroEnabled,
            format!("{}: macro-enabled Office extension", declared_path.display()),
        ));
    }

    let mut entries: Vec<(usize, String)> = (0..archive.len())
        .map(|index| archive.by_index_raw(index).map(|entry| (index, entry.name().to_owned())))
        .collect::<Result<_, _>>()?;
    entries.sort_by(|a, b| a.1.as_bytes().cmp(b.1.as_bytes()));

    let mut vba_seen = false;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(data.len())));
    for (index, name) in entries {
        if is_doc_props(&name) {
            debug!("dropping package entry {}", name);
            continue;
        }
        if !vba_seen && is_vba_project(&name) {
            vba_seen = true;
            warnings.push(Warning::new(
                WarningCode::OfficeMacroIndicatorVbaproject,
                format!("package contains {}", name),
            ));
        }
        let entry = archive.by_index_raw(index)?;
        writer.raw_copy_file(entry)?;
    }

    let sink = writer.finish()?;
    Ok(OfficeOutcome { bytes: sink.into_inner(), warnings })
}

// Tests go below the code where they'll be out of the way when not the target of attention
#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn build_package(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn names(data: &[u8]) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(data)).unwrap();
        archive.file_names().map(str::to_owned).collect()
    }

    #[test]
    fn doc_props_entries_are_dropped_and_body_is_kept() {
        let package = build_package(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("docProps/core.xml", b"<coreProperties/>"),
            ("docProps/app.xml", b"<Properties/>"),
            ("docProps/custom.xml", b"<Properties/>"),
            ("docProps/thumbnail.jpeg", b"\xFF\xD8\xFF"),
            ("word/document.xml", b"<document/>"),
        ]);
        let outcome = sanitize_ooxml(&package, Path::new("report.docx")).unwrap();

        let kept = names(&outcome.bytes);
        assert_eq!(kept, vec!["[Content_Types].xml", "word/document.xml"]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn kept_entries_survive_byte_for_byte() {
        let package = build_package(&[
            ("docProps/core.xml", b"<coreProperties/>"),
            ("word/document.xml", b"<document>payload</document>"),
        ]);
        let outcome = sanitize_ooxml(&package, Path::new("report.docx")).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(&outcome.bytes[..])).unwrap();
        let mut body = Vec::new();
        std::io::Read::read_to_end(
            &mut archive.by_name("word/document.xml").unwrap(),
            &mut body,
        )
        .unwrap();
        assert_eq!(body, b"<document>payload</document>");
    }

    #[test]
    fn macro_extension_and_vba_project_are_reported() {
        let package = build_package(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("docProps/core.xml", b"<coreProperties/>"),
            ("word/document.xml", b"<document/>"),
            ("word/vbaProject.bin", b"\xCC\xAB"),
        ]);
        let outcome = sanitize_ooxml(&package, Path::new("invoice.docm")).unwrap();

        let codes: Vec<_> = outcome.warnings.iter().map(|w| w.code).collect();
        assert_eq!(
            codes,
            vec![
                WarningCode::OfficeMacroEnabled,
                WarningCode::OfficeMacroIndicatorVbaproject,
            ]
        );
        // The macro project itself is retained, not stripped.
        assert!(names(&outcome.bytes).contains(&"word/vbaProject.bin".to_owned()));
    }

    #[test]
    fn plain_transitional_extension_is_not_macro_enabled() {
        assert!(!is_macro_extension(Path::new("report.docx")));
        assert!(is_macro_extension(Path::new("report.DOCM")));
        assert!(is_macro_extension(Path::new("sheet.xlsm")));
    }

    #[test]
    fn corrupt_package_is_an_error() {
        assert!(sanitize_ooxml(b"PK\x03\x04 truncated", Path::new("x.docx")).is_err());
    }
}
