use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::extract::Extractor;
use crate::orientation::{self, Normalized};
use crate::preprocess::{self, PreprocessError};
use crate::recognizer::{OcrBackend, OcrError};
use crate::types::{ExtractedReceipt, Rotation};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("Receipt worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// The result of a single receipt processing run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    /// Rotation applied before the text pass; `None` if the image was kept as is.
    pub rotation: Option<Rotation>,
    /// Mean token confidence of the chosen rotation.
    pub orientation_confidence: Option<f32>,
    /// Structured fields extracted from the OCR text.
    pub extracted: ExtractedReceipt,
}

/// Orchestrates: decode → prepare → orientation search → OCR → extract.
pub struct ReceiptPipeline<R> {
    recognizer: Arc<R>,
}

impl<R> Clone for ReceiptPipeline<R> {
    fn clone(&self) -> Self {
        Self { recognizer: Arc::clone(&self.recognizer) }
    }
}

impl<R: OcrBackend + 'static> ReceiptPipeline<R> {
    pub fn new(recognizer: R) -> Self {
        Self { recognizer: Arc::new(recognizer) }
    }

    /// Process a file on disk.
    pub async fn process_file(&self, path: &Path) -> Result<ScanResult, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        info!("Processing receipt: {}", path.display());
        self.process_bytes(bytes).await
    }

    /// Process raw bytes (upload or camera capture) on a blocking worker.
    pub async fn process_bytes(&self, data: Vec<u8>) -> Result<ScanResult, PipelineError> {
        let recognizer = Arc::clone(&self.recognizer);
        tokio::task::spawn_blocking(move || -> Result<ScanResult, PipelineError> {
            let image = preprocess::decode(&data)?;
            scan_image(recognizer.as_ref(), image)
        })
        .await?
    }

    /// Synchronous variant for callers that already own a decoded image.
    pub fn scan(&self, image: DynamicImage) -> Result<ScanResult, PipelineError> {
        scan_image(self.recognizer.as_ref(), image)
    }
}

fn scan_image<R: OcrBackend + ?Sized>(
    recognizer: &R,
    image: DynamicImage,
) -> Result<ScanResult, PipelineError> {
    // 1. Prepare and pick the best orientation.
    let normalized = orientation::normalize(image, recognizer);
    let orientation_confidence = normalized.confidence();
    let Normalized { image, rotation, .. } = normalized;

    // 2. Text pass on the chosen image.
    let ocr_text = recognizer.recognize_text(&image)?;

    // 3. Extract structured fields.
    let extracted = Extractor::extract(&ocr_text);
    info!(
        rotation = rotation.map(Rotation::degrees),
        store = extracted.store_name.as_deref(),
        date = extracted.date_text.as_deref(),
        total = extracted.total_text.as_deref(),
        "receipt extracted"
    );

    Ok(ScanResult { rotation, orientation_confidence, extracted })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::MockRecognizer;
    use crate::types::OcrOutput;
    use image::{GrayImage, ImageBuffer, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tiny_png() -> Vec<u8> {
        let img: GrayImage = ImageBuffer::from_fn(4, 4, |_, _| Luma([200u8]));
        preprocess::encode_as_png(&DynamicImage::ImageLuma8(img)).unwrap()
    }

    /// Fails the scoring pass on every angle but still answers the text pass.
    struct TextOnly {
        scoring_calls: AtomicUsize,
    }

    impl OcrBackend for TextOnly {
        fn recognize(&self, _image: &DynamicImage) -> Result<OcrOutput, OcrError> {
            self.scoring_calls.fetch_add(1, Ordering::SeqCst);
            Err(OcrError::Engine("no layout".into()))
        }

        fn recognize_text(&self, _image: &DynamicImage) -> Result<String, OcrError> {
            Ok("TARGET\n07/04/2025\nTOTAL $18.20".into())
        }
    }

    struct Broken;

    impl OcrBackend for Broken {
        fn recognize(&self, _image: &DynamicImage) -> Result<OcrOutput, OcrError> {
            Err(OcrError::Engine("engine crashed".into()))
        }
    }

    #[tokio::test]
    async fn process_bytes_produces_scan_result() {
        let pipeline = ReceiptPipeline::new(MockRecognizer::new(
            "STARBUCKS\n01/15/2025\nTotal $5.50\nVISA",
        ));

        let result = pipeline.process_bytes(tiny_png()).await.unwrap();

        assert_eq!(result.rotation, Some(Rotation::Deg0));
        assert_eq!(result.orientation_confidence, Some(90.0));
        assert_eq!(result.extracted.store_name.as_deref(), Some("STARBUCKS"));
        assert_eq!(result.extracted.date_text.as_deref(), Some("01/15/2025"));
        assert_eq!(result.extracted.total_text.as_deref(), Some("5.50"));
    }

    #[tokio::test]
    async fn process_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipt.png");
        std::fs::write(&path, tiny_png()).unwrap();

        let pipeline = ReceiptPipeline::new(MockRecognizer::new("COSTCO\nTOTAL 99.10"));
        let result = pipeline.process_file(&path).await.unwrap();
        assert_eq!(result.extracted.total_text.as_deref(), Some("99.10"));
    }

    #[tokio::test]
    async fn process_file_missing_is_io_error() {
        let pipeline = ReceiptPipeline::new(MockRecognizer::new(""));
        let err = pipeline
            .process_file(Path::new("/nonexistent/receipt.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[tokio::test]
    async fn corrupt_image_is_a_single_structured_error() {
        let pipeline = ReceiptPipeline::new(MockRecognizer::new("unused"));
        let err = pipeline.process_bytes(b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(PreprocessError::Load(_))));
    }

    #[test]
    fn scoring_failures_degrade_to_unrotated_image() {
        let pipeline = ReceiptPipeline::new(TextOnly { scoring_calls: AtomicUsize::new(0) });
        let image = preprocess::decode(&tiny_png()).unwrap();

        let result = pipeline.scan(image).unwrap();

        assert_eq!(pipeline.recognizer.scoring_calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.rotation, None);
        assert_eq!(result.orientation_confidence, None);
        assert_eq!(result.extracted.store_name.as_deref(), Some("TARGET"));
        assert_eq!(result.extracted.total_text.as_deref(), Some("18.20"));
    }

    #[test]
    fn text_pass_failure_is_surfaced() {
        let pipeline = ReceiptPipeline::new(Broken);
        let image = preprocess::decode(&tiny_png()).unwrap();
        assert!(matches!(pipeline.scan(image), Err(PipelineError::Ocr(_))));
    }

    #[tokio::test]
    async fn empty_text_yields_empty_receipt() {
        let pipeline = ReceiptPipeline::new(MockRecognizer::new(""));
        let result = pipeline.process_bytes(tiny_png()).await.unwrap();
        assert!(result.extracted.is_empty());
        assert_eq!(result.extracted.raw_text, "");
        // No tokens means no confident rotation.
        assert_eq!(result.rotation, None);
    }
}
