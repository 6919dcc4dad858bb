pub mod dates;
pub mod extract;
pub mod orientation;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use dates::{parse_date_text, parse_date_text_or_today};
pub use extract::{Extractor, Rule, DATE_RULES, STORE_RULES, TOTAL_RULES};
pub use orientation::{normalize, select_best, Normalized};
pub use pipeline::{PipelineError, ReceiptPipeline, ScanResult};
pub use preprocess::{decode, prepare, PreprocessError};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, TimeoutRecognizer};
pub use types::{ExtractedReceipt, OcrOutput, OrientationCandidate, Rotation, RuleOutcome};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
