use std::sync::{mpsc, Arc};
use std::time::Duration;

use image::DynamicImage;
use thiserror::Error;

use crate::types::OcrOutput;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Tesseract not available; build with the `tesseract` feature")]
    NotAvailable,
}

/// Abstraction over an OCR engine.
///
/// `recognize` is used to score orientation candidates and must report
/// per-token confidences; `recognize_text` is the plain text pass run on the
/// chosen image.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, OcrError>;

    fn recognize_text(&self, image: &DynamicImage) -> Result<String, OcrError> {
        self.recognize(image).map(|out| out.text)
    }
}

impl<R: OcrBackend + ?Sized> OcrBackend for Box<R> {
    fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, OcrError> {
        (**self).recognize(image)
    }

    fn recognize_text(&self, image: &DynamicImage) -> Result<String, OcrError> {
        (**self).recognize_text(image)
    }
}

impl<R: OcrBackend + ?Sized> OcrBackend for Arc<R> {
    fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, OcrError> {
        (**self).recognize(image)
    }

    fn recognize_text(&self, image: &DynamicImage) -> Result<String, OcrError> {
        (**self).recognize_text(image)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns pre-set text and confidences regardless of the image.
pub struct MockRecognizer {
    pub text: String,
    pub token_confidences: Vec<i32>,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let token_confidences = text.split_whitespace().map(|_| 90).collect();
        Self { text, token_confidences }
    }

    pub fn with_confidences(mut self, token_confidences: Vec<i32>) -> Self {
        self.token_confidences = token_confidences;
        self
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image: &DynamicImage) -> Result<OcrOutput, OcrError> {
        Ok(OcrOutput {
            text: self.text.clone(),
            token_confidences: self.token_confidences.clone(),
        })
    }
}

// ── Per-call deadline ─────────────────────────────────────────────────────────

/// Bounds every call on the wrapped backend.
///
/// The engine call runs on its own thread; on timeout the caller gets
/// [`OcrError::Timeout`] and the thread is left to finish in the background.
pub struct TimeoutRecognizer<R> {
    inner: Arc<R>,
    timeout: Duration,
}

impl<R: OcrBackend + 'static> TimeoutRecognizer<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner: Arc::new(inner), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run<T: Send + 'static>(
        &self,
        image: &DynamicImage,
        call: fn(&R, &DynamicImage) -> Result<T, OcrError>,
    ) -> Result<T, OcrError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let image = image.clone();
        std::thread::Builder::new()
            .name("ocr-call".into())
            .spawn(move || {
                let _ = tx.send(call(inner.as_ref(), &image));
            })
            .map_err(|e| OcrError::Engine(format!("failed to spawn OCR thread: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(OcrError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(OcrError::Engine("OCR thread exited without a result".into()))
            }
        }
    }
}

impl<R: OcrBackend + 'static> OcrBackend for TimeoutRecognizer<R> {
    fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, OcrError> {
        self.run(image, R::recognize)
    }

    fn recognize_text(&self, image: &DynamicImage) -> Result<String, OcrError> {
        self.run(image, R::recognize_text)
    }
}

/// Pull the `conf` column out of Tesseract's TSV output, one entry per word
/// row. Rows with an unparseable confidence are skipped.
pub fn confidences_from_tsv(tsv: &str) -> Vec<i32> {
    tsv.lines()
        .filter(|line| !line.starts_with("level"))
        .filter_map(|line| {
            let mut cols = line.split('\t');
            let level = cols.next()?;
            let conf = cols.nth(9)?;
            (level == "5").then_some(conf)
        })
        .filter_map(|conf| conf.trim().parse::<f32>().ok())
        .map(|conf| conf.round() as i32)
        .collect()
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{confidences_from_tsv, OcrBackend, OcrError};
    use crate::preprocess::encode_as_png;
    use crate::types::OcrOutput;
    use image::DynamicImage;
    use leptess::LepTess;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }

        fn load(&self, image: &DynamicImage) -> Result<LepTess, OcrError> {
            let png = encode_as_png(image).map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            Ok(lt)
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, OcrError> {
            let mut lt = self.load(image)?;
            let text = lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let tsv = lt.get_tsv_text(0).map_err(|e| OcrError::Engine(e.to_string()))?;
            Ok(OcrOutput { text, token_confidences: confidences_from_tsv(&tsv) })
        }

        fn recognize_text(&self, image: &DynamicImage) -> Result<String, OcrError> {
            self.load(image)?
                .get_utf8_text()
                .map_err(|e| OcrError::Engine(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    fn blank() -> DynamicImage {
        let img: GrayImage = ImageBuffer::from_fn(2, 2, |_, _| Luma([255u8]));
        DynamicImage::ImageLuma8(img)
    }

    struct Slow(Duration);

    impl OcrBackend for Slow {
        fn recognize(&self, _image: &DynamicImage) -> Result<OcrOutput, OcrError> {
            std::thread::sleep(self.0);
            Ok(OcrOutput { text: "late".into(), token_confidences: vec![50] })
        }
    }

    #[test]
    fn mock_returns_preset_text() {
        let r = MockRecognizer::new("STARBUCKS\n$5.50\nVISA");
        let out = r.recognize(&blank()).unwrap();
        assert_eq!(out.text, "STARBUCKS\n$5.50\nVISA");
        assert_eq!(out.token_confidences, vec![90, 90, 90]);
        assert_eq!(r.recognize_text(&blank()).unwrap(), "STARBUCKS\n$5.50\nVISA");
    }

    #[test]
    fn mock_with_explicit_confidences() {
        let r = MockRecognizer::new("hello").with_confidences(vec![-1, 42]);
        assert_eq!(r.recognize(&blank()).unwrap().token_confidences, vec![-1, 42]);
    }

    #[test]
    fn boxed_backend_delegates() {
        let r: Box<dyn OcrBackend> = Box::new(MockRecognizer::new("boxed"));
        assert_eq!(r.recognize_text(&blank()).unwrap(), "boxed");
    }

    #[test]
    fn timeout_passes_fast_calls_through() {
        let r = TimeoutRecognizer::new(MockRecognizer::new("quick"), Duration::from_secs(5));
        assert_eq!(r.recognize(&blank()).unwrap().text, "quick");
        assert_eq!(r.recognize_text(&blank()).unwrap(), "quick");
    }

    #[test]
    fn timeout_reports_slow_calls() {
        let r = TimeoutRecognizer::new(Slow(Duration::from_millis(500)), Duration::from_millis(20));
        match r.recognize(&blank()) {
            Err(OcrError::Timeout(d)) => assert_eq!(d, Duration::from_millis(20)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn tsv_confidences_keep_word_rows_only() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
                   4\t1\t1\t1\t1\t0\t10\t10\t200\t20\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t10\t10\t90\t20\t96.5\tWALMART\n\
                   5\t1\t1\t1\t1\t2\t110\t10\t90\t20\t88.1\tSUPERCENTER\n\
                   5\t1\t1\t1\t2\t1\t10\t40\t10\t20\t-1\t \n";
        assert_eq!(confidences_from_tsv(tsv), vec![97, 88, -1]);
    }
}
