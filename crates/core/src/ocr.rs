//! Optical character recognition for image-only PDF pages.
//!
//! [`OcrEngine`] is the seam; [`TesseractOcr`] shells out to a local
//! `tesseract`, [`HttpOcrEngine`] posts images to a multimodal OCR endpoint
//! and [`DisabledOcr`] refuses every image.

use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Jpeg2000,
    /// Binary PGM/PPM built from a raw bitmap.
    Pnm,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Jpeg2000 => "image/jp2",
            ImageFormat::Pnm => "image/x-portable-anymap",
        }
    }
}

/// An image pulled out of a page, already in a container recognizers read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Recognized text, possibly empty.
    fn recognize(&self, image: &RasterImage) -> Result<String, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn name(&self) -> &str {
        "disabled"
    }

    fn recognize(&self, _image: &RasterImage) -> Result<String, IngestError> {
        Err(IngestError::OcrFailed("no OCR engine configured".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub binary: String,
    pub language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &RasterImage) -> Result<String, IngestError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                IngestError::OcrFailed(format!("failed to start {}: {error}", self.binary))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&image.bytes)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest<'a> {
    image_base64: String,
    mime_type: &'a str,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    #[serde(default)]
    pages: Option<Vec<LlmOcrPage>>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// Blocking client: `recognize` runs on the extraction thread, never on the
/// async runtime, so the client is built per call there.
pub struct HttpOcrEngine {
    config: OcrEndpointConfig,
    timeout: Duration,
}

impl HttpOcrEngine {
    pub fn new(config: OcrEndpointConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

impl OcrEngine for HttpOcrEngine {
    fn name(&self) -> &str {
        "multimodal-endpoint"
    }

    fn recognize(&self, image: &RasterImage) -> Result<String, IngestError> {
        let payload = LlmOcrRequest {
            image_base64: STANDARD.encode(&image.bytes),
            mime_type: image.format.mime_type(),
            width: image.width,
            height: image.height,
        };

        let mut request = Client::builder()
            .timeout(self.timeout)
            .build()?
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json()?;
        payload_to_text(&payload)
    }
}

fn payload_to_text(payload: &LlmOcrResponse) -> Result<String, IngestError> {
    if let Some(listed) = &payload.pages {
        let joined = listed
            .iter()
            .filter_map(|page| page.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if !joined.is_empty() {
            return Ok(joined);
        }
    }

    match &payload.text {
        Some(text) => Ok(text.trim().to_string()),
        None if payload.pages.is_some() => Ok(String::new()),
        None => Err(IngestError::OcrFailed(
            "OCR response carried neither text nor pages".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> RasterImage {
        RasterImage {
            format: ImageFormat::Jpeg,
            width: 1,
            height: 1,
            bytes: vec![0xff, 0xd8, 0xff],
        }
    }

    #[test]
    fn ocr_payload_with_pages_keeps_only_nonempty_text() {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    text: Some("  ".to_string()),
                },
                LlmOcrPage {
                    text: Some("Invoice 42".to_string()),
                },
            ]),
            text: None,
        };

        assert_eq!(payload_to_text(&response).unwrap(), "Invoice 42");
    }

    #[test]
    fn ocr_payload_falls_back_to_plain_text() {
        let response = LlmOcrResponse {
            pages: None,
            text: Some(" Scanned receipt \n".to_string()),
        };
        assert_eq!(payload_to_text(&response).unwrap(), "Scanned receipt");
    }

    #[test]
    fn ocr_payload_without_content_is_a_failure() {
        let response = LlmOcrResponse {
            pages: None,
            text: None,
        };
        assert!(matches!(
            payload_to_text(&response),
            Err(IngestError::OcrFailed(_))
        ));
    }

    #[test]
    fn disabled_engine_always_fails() {
        assert!(DisabledOcr.recognize(&image()).is_err());
    }

    #[test]
    fn missing_tesseract_binary_is_an_ocr_failure() {
        let engine = TesseractOcr {
            binary: "definitely-not-a-real-tesseract-binary".to_string(),
            language: "eng".to_string(),
        };
        assert!(matches!(
            engine.recognize(&image()),
            Err(IngestError::OcrFailed(_))
        ));
    }
}
