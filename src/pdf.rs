//! PDF document-info removal and active-content scanning.
//!
//! Only metadata is touched: the `/Info` dictionary and the XMP metadata
//! stream are removed and the document is written back otherwise intact.
//! Active content (actions, scripts, forms, attachments) is detected and
//! surfaced as warnings, never rewritten.

use lopdf::{Dictionary, Document, Object};
use log::debug;

use crate::error::SanitizeError;
use crate::report::{Warning, WarningCode};

/// Sanitized bytes plus the active-content findings from the scan.
pub struct PdfOutcome {
    pub bytes: Vec<u8>,
    pub warnings: Vec<Warning>,
}

/// Strip document metadata and scan for active-content indicators.
///
/// A parse failure is a hard error: no raw copy of an unparseable PDF is
/// ever produced.
pub fn sanitize_pdf(data: &[u8]) -> Result<PdfOutcome, SanitizeError> {
    let mut doc = Document::load_mem(data)?;

    let warnings = scan_active_content(&doc);
    strip_document_info(&mut doc);
    strip_xmp_metadata(&mut doc);

    let mut bytes = Vec::with_capacity(data.len());
    doc.save_to(&mut bytes)?;
    Ok(PdfOutcome { bytes, warnings })
}

/// Remove the trailer's `/Info` reference and the dictionary it points at.
fn strip_document_info(doc: &mut Document) {
    if let Ok(id) = doc.trailer.get(b"Info").and_then(Object::as_reference) {
        debug!("removing /Info object {:?}", id);
        doc.objects.remove(&id);
    }
    doc.trailer.remove(b"Info");
}

/// Remove the catalog's `/Metadata` XMP stream and the stream object itself.
fn strip_xmp_metadata(doc: &mut Document) {
    let metadata_id = doc
        .catalog()
        .and_then(|catalog| catalog.get(b"Metadata"))
        .and_then(Object::as_reference)
        .ok();
    if let Some(id) = metadata_id {
        debug!("removing /Metadata stream {:?}", id);
        doc.objects.remove(&id);
    }
    if let Ok(catalog) = doc.catalog_mut() {
        catalog.remove(b"Metadata");
    }
}

/// Walk every object dictionary once and report active-content indicators
/// in a fixed order, one warning per indicator.
fn scan_active_content(doc: &Document) -> Vec<Warning> {
    let mut warnings = Vec::new();
    let catalog = doc.catalog().ok();

    if catalog.map_or(false, |c| c.has(b"OpenAction")) {
        warnings.push(Warning::new(
            WarningCode::PdfRiskOpenaction,
            "document catalog contains /OpenAction",
        ));
    }

    let mut javascript = false;
    let mut additional_actions = false;
    for (_, object) in doc.objects.iter() {
        let dict = match object {
            Object::Dictionary(dict) => dict,
            Object::Stream(stream) => &stream.dict,
            _ => continue,
        };
        javascript = javascript || dict.has(b"JS") || dict.has(b"JavaScript");
        additional_actions = additional_actions || dict.has(b"AA");
    }
    if javascript {
        warnings.push(Warning::new(
            WarningCode::PdfRiskJavascript,
            "document references a /JS or /JavaScript action",
        ));
    }
    if additional_actions {
        warnings.push(Warning::new(
            WarningCode::PdfRiskAction,
            "document contains an /AA additional-actions entry",
        ));
    }
    if catalog.map_or(false, |c| c.has(b"AcroForm")) {
        warnings.push(Warning::new(
            WarningCode::PdfRiskForm,
            "document contains an /AcroForm interactive form",
        ));
    }
    if has_embedded_files(doc) {
        warnings.push(Warning::new(
            WarningCode::PdfRiskEmbeddedFile,
            "document carries an /EmbeddedFiles name tree",
        ));
    }
    warnings
}

fn has_embedded_files(doc: &Document) -> bool {
    let names = match doc.catalog().and_then(|catalog| catalog.get(b"Names")) {
        Ok(object) => object,
        Err(_) => return false,
    };
    resolve_dict(doc, names).map_or(false, |dict| dict.has(b"EmbeddedFiles"))
}

fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match object {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

// Tests go below the code where they'll be out of the way when not the target of attention
#[cfg(test)]
mod tests {
    use lopdf::content::Content;
    use lopdf::{dictionary, Stream};

    use super::*;

    /// A one-page document with an `/Info` dictionary and XMP metadata.
    /// Extra catalog entries come from the caller.
    fn build_pdf(catalog_extra: Vec<(&str, Object)>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let content = Content { operations: vec![] };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );

        let metadata_id = doc.add_object(Stream::new(
            dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
            b"<x:xmpmeta/>".to_vec(),
        ));
        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "Metadata" => metadata_id,
        };
        for (key, value) in catalog_extra {
            catalog.set(key, value);
        }
        let catalog_id = doc.add_object(catalog);

        let info_id = doc.add_object(dictionary! {
            "Author" => Object::string_literal("Bob"),
            "Producer" => Object::string_literal("typewriter 9000"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn info_and_xmp_are_gone_after_sanitization() {
        let outcome = sanitize_pdf(&build_pdf(vec![])).unwrap();
        let reread = Document::load_mem(&outcome.bytes).unwrap();
        assert!(reread.trailer.get(b"Info").is_err());
        assert!(!reread.catalog().unwrap().has(b"Metadata"));
        // Page tree survives.
        assert_eq!(reread.get_pages().len(), 1);
    }

    #[test]
    fn clean_document_yields_no_warnings() {
        let outcome = sanitize_pdf(&build_pdf(vec![])).unwrap();
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn openaction_and_acroform_are_reported() {
        let bytes = build_pdf(vec![
            ("OpenAction", Object::Dictionary(dictionary! { "S" => "GoTo" })),
            ("AcroForm", Object::Dictionary(dictionary! { "Fields" => Object::Array(vec![]) })),
        ]);
        let outcome = sanitize_pdf(&bytes).unwrap();
        let codes: Vec<_> = outcome.warnings.iter().map(|w| w.code).collect();
        assert_eq!(codes, vec![WarningCode::PdfRiskOpenaction, WarningCode::PdfRiskForm]);
    }

    #[test]
    fn javascript_action_is_reported_wherever_it_hides() {
        let bytes = build_pdf(vec![(
            "OpenAction",
            Object::Dictionary(dictionary! {
                "S" => "JavaScript",
                "JS" => Object::string_literal("app.alert('hi')"),
            }),
        )]);
        let outcome = sanitize_pdf(&bytes).unwrap();
        let codes: Vec<_> = outcome.warnings.iter().map(|w| w.code).collect();
        assert!(codes.contains(&WarningCode::PdfRiskJavascript));
        assert!(codes.contains(&WarningCode::PdfRiskOpenaction));
    }

    #[test]
    fn embedded_files_name_tree_is_reported() {
        let bytes = build_pdf(vec![(
            "Names",
            Object::Dictionary(dictionary! {
                "EmbeddedFiles" => Object::Dictionary(dictionary! {
                    "Names" => Object::Array(vec![]),
                }),
            }),
        )]);
        let outcome = sanitize_pdf(&bytes).unwrap();
        let codes: Vec<_> = outcome.warnings.iter().map(|w| w.code).collect();
        assert_eq!(codes, vec![WarningCode::PdfRiskEmbeddedFile]);
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert!(sanitize_pdf(b"%PDF-1.7 not actually a pdf").is_err());
    }

    #[test]
    fn sanitized_output_parses_and_resanitizes() {
        let once = sanitize_pdf(&build_pdf(vec![])).unwrap();
        let twice = sanitize_pdf(&once.bytes).unwrap();
        assert!(twice.warnings.is_empty());
    }
}
