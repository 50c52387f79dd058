use crate::error::IngestError;
use crate::ocr::{ImageFormat, OcrEngine, RasterImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;
use tracing::{debug, warn};

pub const EMPTY_PAGE_PLACEHOLDER: &str = "[No text or image content found on this page.]";
pub const OCR_FAILED_PLACEHOLDER: &str = "[OCR failed for this page.]";

const MAX_PAGE_TREE_DEPTH: usize = 32;
const MAX_FORM_DEPTH: usize = 8;

/// What a single page contributed to the document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    DirectText(String),
    /// Text layer was blank; recognized text of the page images, in the
    /// order the page draws them.
    OcrText(String),
    /// Neither a text layer nor any image.
    Empty,
    OcrFailed { reason: String },
}

impl PageOutcome {
    pub fn text(&self) -> &str {
        match self {
            PageOutcome::DirectText(text) | PageOutcome::OcrText(text) => text,
            PageOutcome::Empty => EMPTY_PAGE_PLACEHOLDER,
            PageOutcome::OcrFailed { .. } => OCR_FAILED_PLACEHOLDER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub outcome: PageOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub pages: Vec<PageText>,
    /// Set when the bytes could not be opened as a PDF at all.
    pub open_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageOutcomeCounts {
    pub direct: usize,
    pub ocr: usize,
    pub empty: usize,
    pub ocr_failed: usize,
}

impl ExtractedDocument {
    /// Page texts joined by newlines, in page order, with placeholders for
    /// empty and failed pages.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .map(|page| page.outcome.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn counts(&self) -> PageOutcomeCounts {
        let mut counts = PageOutcomeCounts::default();
        for page in &self.pages {
            match page.outcome {
                PageOutcome::DirectText(_) => counts.direct += 1,
                PageOutcome::OcrText(_) => counts.ocr += 1,
                PageOutcome::Empty => counts.empty += 1,
                PageOutcome::OcrFailed { .. } => counts.ocr_failed += 1,
            }
        }
        counts
    }
}

pub trait TextExtractor: Send + Sync {
    /// Never fails: unreadable documents come back with `open_error` set and
    /// no pages.
    fn extract(&self, document: &[u8]) -> ExtractedDocument;
}

pub struct PdfTextExtractor {
    ocr: Box<dyn OcrEngine>,
}

impl PdfTextExtractor {
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    pub fn extract_path(&self, path: &Path) -> Result<ExtractedDocument, IngestError> {
        let bytes = std::fs::read(path)?;
        Ok(self.extract(&bytes))
    }

    fn extract_page(&self, document: &Document, number: u32, page_id: ObjectId) -> PageOutcome {
        let text = match document.extract_text(&[number]) {
            Ok(text) => text,
            Err(error) => {
                debug!(page = number, %error, "text layer unreadable, treating as empty");
                String::new()
            }
        };

        if !text.trim().is_empty() {
            return PageOutcome::DirectText(text);
        }

        debug!(page = number, engine = self.ocr.name(), "falling back to OCR");
        match self.ocr_page(document, page_id) {
            Ok(Some(text)) => PageOutcome::OcrText(text),
            Ok(None) => PageOutcome::Empty,
            Err(error) => {
                warn!(page = number, %error, "OCR failed for page");
                PageOutcome::OcrFailed {
                    reason: error.to_string(),
                }
            }
        }
    }

    fn ocr_page(&self, document: &Document, page_id: ObjectId) -> Result<Option<String>, IngestError> {
        let images = page_images(document, page_id);
        if images.is_empty() {
            return Ok(None);
        }

        let mut recognized = Vec::with_capacity(images.len());
        for stream in images {
            let image = raster_from_stream(stream)?;
            recognized.push(self.ocr.recognize(&image)?);
        }

        Ok(Some(recognized.join("\n")))
    }
}

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, document: &[u8]) -> ExtractedDocument {
        let document = match Document::load_mem(document) {
            Ok(document) => document,
            Err(error) => {
                warn!(%error, "failed to open PDF");
                return ExtractedDocument {
                    pages: Vec::new(),
                    open_error: Some(error.to_string()),
                };
            }
        };

        let pages = document
            .get_pages()
            .into_iter()
            .map(|(number, page_id)| PageText {
                number,
                outcome: self.extract_page(&document, number, page_id),
            })
            .collect();

        ExtractedDocument {
            pages,
            open_error: None,
        }
    }
}

fn resolve_dictionary<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match object {
        Object::Dictionary(dictionary) => Some(dictionary),
        Object::Reference(id) => document.get_dictionary(*id).ok(),
        _ => None,
    }
}

/// Page resources, inherited from the nearest page-tree ancestor when the
/// page itself has none.
fn page_resources(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = document.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve_dictionary(document, resources);
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = document.get_dictionary(parent).ok()?;
    }
    None
}

fn xobject_stream<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Stream> {
    match object {
        Object::Stream(stream) => Some(stream),
        Object::Reference(id) => match document.get_object(*id).ok()? {
            Object::Stream(stream) => Some(stream),
            _ => None,
        },
        _ => None,
    }
}

fn subtype(stream: &Stream) -> Option<&[u8]> {
    match stream.dict.get(b"Subtype") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}

fn stream_bytes(stream: &Stream) -> Option<Vec<u8>> {
    if filter_names(&stream.dict).is_empty() {
        Some(stream.content.clone())
    } else {
        stream.decompressed_content().ok()
    }
}

/// Image XObjects of a page in the order its content stream paints them,
/// each at most once. Form XObjects are entered up to `MAX_FORM_DEPTH`
/// levels deep. Falls back to resource order when a content stream cannot
/// be decoded.
fn page_images(document: &Document, page_id: ObjectId) -> Vec<&Stream> {
    let operations = match document.get_and_decode_page_content(page_id) {
        Ok(content) => Some(content.operations),
        Err(error) => {
            debug!(%error, "page content undecodable, using resource order for images");
            None
        }
    };

    let mut images = Vec::new();
    collect_images(
        document,
        page_resources(document, page_id),
        operations,
        0,
        &mut images,
    );
    images
}

fn collect_images<'a>(
    document: &'a Document,
    resources: Option<&'a Dictionary>,
    operations: Option<Vec<Operation>>,
    depth: usize,
    images: &mut Vec<&'a Stream>,
) {
    let Some(xobjects) = resources
        .and_then(|resources| resources.get(b"XObject").ok())
        .and_then(|xobjects| resolve_dictionary(document, xobjects))
    else {
        return;
    };

    let names: Vec<Vec<u8>> = match operations {
        Some(operations) => {
            let mut names: Vec<Vec<u8>> = Vec::new();
            for operation in operations {
                if operation.operator != "Do" {
                    continue;
                }
                if let Some(Object::Name(name)) = operation.operands.first() {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
            names
        }
        None => xobjects.iter().map(|(name, _)| name.clone()).collect(),
    };

    for name in names {
        let Some(stream) = xobjects
            .get(&name)
            .ok()
            .and_then(|object| xobject_stream(document, object))
        else {
            continue;
        };

        match subtype(stream) {
            Some(b"Image") => {
                if !images.iter().any(|seen| std::ptr::eq(*seen, stream)) {
                    images.push(stream);
                }
            }
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|object| resolve_dictionary(document, object))
                    .or(resources);
                let operations = stream_bytes(stream)
                    .and_then(|bytes| Content::decode(&bytes).ok())
                    .map(|content| content.operations);
                collect_images(document, form_resources, operations, depth + 1, images);
            }
            _ => {}
        }
    }
}

fn integer(dictionary: &Dictionary, key: &[u8]) -> Option<i64> {
    match dictionary.get(key) {
        Ok(Object::Integer(value)) => Some(*value),
        _ => None,
    }
}

/// A positive dimension that fits in `u32`.
fn dimension(dictionary: &Dictionary, key: &[u8]) -> Result<u32, IngestError> {
    let label = String::from_utf8_lossy(key).to_lowercase();
    let value = integer(dictionary, key)
        .ok_or_else(|| IngestError::ImageDecode(format!("image has no {label}")))?;
    u32::try_from(value)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| IngestError::ImageDecode(format!("image {label} {value} is out of range")))
}

fn filter_names(dictionary: &Dictionary) -> Vec<Vec<u8>> {
    match dictionary.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn colour_components(dictionary: &Dictionary) -> Option<usize> {
    match dictionary.get(b"ColorSpace") {
        Ok(Object::Name(name)) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" => Some(1),
            b"DeviceRGB" | b"CalRGB" => Some(3),
            _ => None,
        },
        _ => None,
    }
}

/// Turns an image XObject into bytes an OCR engine accepts. JPEG and
/// JPEG 2000 pass through; 8-bit gray/RGB bitmaps become binary PNM.
pub fn raster_from_stream(stream: &Stream) -> Result<RasterImage, IngestError> {
    let dictionary = &stream.dict;
    let width = dimension(dictionary, b"Width")?;
    let height = dimension(dictionary, b"Height")?;

    let filters = filter_names(dictionary);
    match filters.iter().map(Vec::as_slice).collect::<Vec<_>>().as_slice() {
        [b"DCTDecode"] => {
            return Ok(RasterImage {
                format: ImageFormat::Jpeg,
                width,
                height,
                bytes: stream.content.clone(),
            })
        }
        [b"JPXDecode"] => {
            return Ok(RasterImage {
                format: ImageFormat::Jpeg2000,
                width,
                height,
                bytes: stream.content.clone(),
            })
        }
        [] | [b"FlateDecode"] => {}
        other => {
            let names = other
                .iter()
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(IngestError::ImageDecode(format!("filters [{names}]")));
        }
    }

    let bits = integer(dictionary, b"BitsPerComponent").unwrap_or(8);
    let components = colour_components(dictionary);
    let components = match (bits, components) {
        (8, Some(components)) => components,
        _ => {
            return Err(IngestError::ImageDecode(format!(
                "{bits}-bit bitmap in an unsupported colour space"
            )))
        }
    };

    let pixels = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|error| IngestError::ImageDecode(error.to_string()))?
    };

    let expected = usize::try_from(width)
        .ok()
        .zip(usize::try_from(height).ok())
        .and_then(|(width, height)| width.checked_mul(height))
        .and_then(|pixels| pixels.checked_mul(components))
        .ok_or_else(|| {
            IngestError::ImageDecode(format!("{width}x{height} bitmap is too large"))
        })?;
    if pixels.len() < expected {
        return Err(IngestError::ImageDecode(format!(
            "bitmap has {} bytes, expected {expected}",
            pixels.len()
        )));
    }

    let magic = if components == 1 { "P5" } else { "P6" };
    let mut bytes = format!("{magic}\n{width} {height}\n255\n").into_bytes();
    bytes.extend_from_slice(&pixels[..expected]);

    Ok(RasterImage {
        format: ImageFormat::Pnm,
        width,
        height,
        bytes,
    })
}
