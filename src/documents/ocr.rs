//! OCR engine seam
//!
//! The default engine shells out to the `tesseract` binary, feeding the
//! image over stdin and reading the recognized text from stdout.

use crate::error::{DocumentError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Extracts text from image bytes
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in the image; the caller treats errors as an empty caption
    async fn recognize(&self, image_bytes: &[u8]) -> Result<String>;
}

/// OCR via the tesseract command-line binary
pub struct TesseractOcr {
    command: String,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image_bytes: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.command)
            .arg("stdin")
            .arg("stdout")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DocumentError::OcrFailed(format!("spawn {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image_bytes)
                .await
                .map_err(|e| DocumentError::OcrFailed(format!("write stdin: {e}")))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DocumentError::OcrFailed(format!("wait: {e}")))?;

        if !output.status.success() {
            return Err(DocumentError::OcrFailed(format!(
                "{} exited with {}",
                self.command, output.status
            ))
            .into());
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("OCR produced {} chars", text.len());
        Ok(text)
    }
}

/// Engine that recognizes nothing; useful where OCR is unavailable
pub struct NoopOcr;

#[async_trait]
impl OcrEngine for NoopOcr {
    async fn recognize(&self, _image_bytes: &[u8]) -> Result<String> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_ocr() {
        let engine = NoopOcr;
        assert_eq!(engine.recognize(&[1, 2, 3]).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let engine = TesseractOcr::new("definitely-not-a-real-ocr-binary");
        assert!(engine.recognize(&[0u8; 4]).await.is_err());
    }
}
