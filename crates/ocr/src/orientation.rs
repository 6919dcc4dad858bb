//! Orientation search: pick the rotation the OCR engine reads most confidently.

use image::DynamicImage;
use tracing::{debug, warn};

use crate::preprocess;
use crate::recognizer::OcrBackend;
use crate::types::{OrientationCandidate, Rotation};

/// The image chosen for the text pass.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub image: DynamicImage,
    /// `None` when no rotation scored above zero, including when the engine
    /// failed on every angle. `image` is then the unrotated input.
    pub rotation: Option<Rotation>,
    pub candidate: Option<OrientationCandidate>,
}

impl Normalized {
    pub fn confidence(&self) -> Option<f32> {
        self.candidate.as_ref().map(OrientationCandidate::mean_confidence)
    }
}

/// Rotate clockwise by `rotation`.
pub fn rotate(image: &DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::Deg0 => image.clone(),
        Rotation::Deg90 => image.rotate90(),
        Rotation::Deg180 => image.rotate180(),
        Rotation::Deg270 => image.rotate270(),
    }
}

/// Keep the candidate with the strictly highest mean confidence. Candidates
/// are expected in search order, so ties go to the earlier angle; a candidate
/// scoring zero never wins.
pub fn select_best<I>(candidates: I) -> Option<OrientationCandidate>
where
    I: IntoIterator<Item = OrientationCandidate>,
{
    let mut best: Option<(f32, OrientationCandidate)> = None;
    for candidate in candidates {
        let score = candidate.mean_confidence();
        let best_score = best.as_ref().map_or(0.0, |(s, _)| *s);
        if score > best_score {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, c)| c)
}

/// Run the engine over all four rotations of an already prepared image.
/// Angles the engine fails on are skipped.
pub fn score_rotations<R: OcrBackend + ?Sized>(
    image: &DynamicImage,
    oracle: &R,
) -> Vec<OrientationCandidate> {
    Rotation::SEARCH_ORDER
        .into_iter()
        .filter_map(|rotation| match oracle.recognize(&rotate(image, rotation)) {
            Ok(output) => {
                let candidate = OrientationCandidate::new(rotation, output);
                debug!(
                    %rotation,
                    confidence = candidate.mean_confidence(),
                    tokens = candidate.token_confidences.len(),
                    "scored orientation"
                );
                Some(candidate)
            }
            Err(e) => {
                warn!(%rotation, error = %e, "OCR failed for orientation, skipping");
                None
            }
        })
        .collect()
}

/// Prepare `image` (RGB, contrast, sharpness) and rotate it to the
/// orientation the engine reads best. Never fails: if no rotation produces a
/// usable score the prepared, unrotated image is returned.
pub fn normalize<R: OcrBackend + ?Sized>(image: DynamicImage, oracle: &R) -> Normalized {
    let prepared = preprocess::prepare(image);
    let candidates = score_rotations(&prepared, oracle);
    let scored = candidates.len();

    match select_best(candidates) {
        Some(candidate) => {
            let rotation = candidate.rotation;
            debug!(%rotation, "selected orientation");
            Normalized {
                image: rotate(&prepared, rotation),
                rotation: Some(rotation),
                candidate: Some(candidate),
            }
        }
        None => {
            if scored == 0 {
                warn!("OCR failed for every orientation, keeping original image");
            } else {
                debug!("no orientation produced confident tokens, keeping original image");
            }
            Normalized { image: prepared, rotation: None, candidate: None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::OcrError;
    use crate::types::OcrOutput;
    use image::{GrayImage, ImageBuffer, Luma};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn candidate(rotation: Rotation, confidences: Vec<i32>) -> OrientationCandidate {
        OrientationCandidate::new(
            rotation,
            OcrOutput { text: format!("text at {rotation}"), token_confidences: confidences },
        )
    }

    /// Dark 8×6 image with a bright 2×2 block near the top-left corner.
    fn marked_image() -> DynamicImage {
        let img: GrayImage = ImageBuffer::from_fn(8, 6, |x, y| {
            if (1..=2).contains(&x) && (1..=2).contains(&y) {
                Luma([250u8])
            } else {
                Luma([10u8])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    /// Which rotation of `marked_image` this is, judged by the bright block.
    fn detect_rotation(image: &DynamicImage) -> Rotation {
        let gray = image.to_luma8();
        let (w, h) = gray.dimensions();
        let (x, y, _) = gray
            .enumerate_pixels()
            .max_by_key(|(_, _, p)| p[0])
            .expect("non-empty image");
        match (x < w / 2, y < h / 2) {
            (true, true) => Rotation::Deg0,
            (false, true) => Rotation::Deg90,
            (false, false) => Rotation::Deg180,
            (true, false) => Rotation::Deg270,
        }
    }

    /// Scores each rotation from a table; rotations missing from the table fail.
    struct ByRotation(HashMap<Rotation, Vec<i32>>);

    impl OcrBackend for ByRotation {
        fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, OcrError> {
            let rotation = detect_rotation(image);
            match self.0.get(&rotation) {
                Some(conf) => Ok(OcrOutput {
                    text: format!("read at {rotation}"),
                    token_confidences: conf.clone(),
                }),
                None => Err(OcrError::Engine(format!("unreadable at {rotation}"))),
            }
        }
    }

    /// Records every image it is shown.
    #[derive(Default)]
    struct Recording(Mutex<Vec<DynamicImage>>);

    impl OcrBackend for Recording {
        fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, OcrError> {
            self.0.lock().unwrap().push(image.clone());
            Ok(OcrOutput { text: "seen".into(), token_confidences: vec![50] })
        }
    }

    #[test]
    fn candidates_are_rotations_of_one_enhanced_image() {
        let oracle = Recording::default();
        normalize(marked_image(), &oracle);

        let enhanced = preprocess::prepare(marked_image());
        let seen = oracle.0.into_inner().unwrap();
        assert_eq!(seen.len(), 4);
        assert_ne!(seen[0].to_rgb8(), marked_image().to_rgb8());
        for (image, rotation) in seen.iter().zip(Rotation::SEARCH_ORDER) {
            assert_eq!(image.to_rgb8(), rotate(&enhanced, rotation).to_rgb8(), "{rotation}");
        }
    }

    #[test]
    fn detect_rotation_follows_clockwise_turns() {
        let img = marked_image();
        for r in Rotation::SEARCH_ORDER {
            assert_eq!(detect_rotation(&rotate(&img, r)), r);
        }
    }

    #[test]
    fn select_best_picks_highest_mean() {
        let best = select_best(vec![
            candidate(Rotation::Deg0, vec![40, 50]),
            candidate(Rotation::Deg90, vec![60, 70]),
            candidate(Rotation::Deg180, vec![90, 95]),
            candidate(Rotation::Deg270, vec![10]),
        ])
        .unwrap();
        assert_eq!(best.rotation, Rotation::Deg180);
    }

    #[test]
    fn select_best_ties_go_to_earlier_angle() {
        let best = select_best(vec![
            candidate(Rotation::Deg0, vec![50]),
            candidate(Rotation::Deg90, vec![80]),
            candidate(Rotation::Deg180, vec![70, 90]),
            candidate(Rotation::Deg270, vec![80]),
        ])
        .unwrap();
        assert_eq!(best.rotation, Rotation::Deg90);
    }

    #[test]
    fn select_best_ignores_noise_tokens() {
        let best = select_best(vec![
            candidate(Rotation::Deg0, vec![-1, -1, 60]),
            candidate(Rotation::Deg90, vec![55, 55, 55]),
        ])
        .unwrap();
        assert_eq!(best.rotation, Rotation::Deg0);
    }

    #[test]
    fn select_best_empty_confidences_never_win() {
        assert_eq!(select_best(vec![candidate(Rotation::Deg0, vec![])]), None);
        let best = select_best(vec![
            candidate(Rotation::Deg0, vec![]),
            candidate(Rotation::Deg90, vec![1]),
        ])
        .unwrap();
        assert_eq!(best.rotation, Rotation::Deg90);
    }

    #[test]
    fn normalize_rotates_to_most_confident_angle() {
        let oracle = ByRotation(HashMap::from([
            (Rotation::Deg0, vec![30, 40]),
            (Rotation::Deg90, vec![20]),
            (Rotation::Deg180, vec![85, 95]),
            (Rotation::Deg270, vec![50]),
        ]));
        let result = normalize(marked_image(), &oracle);
        assert_eq!(result.rotation, Some(Rotation::Deg180));
        assert_eq!(detect_rotation(&result.image), Rotation::Deg180);
        assert_eq!(result.confidence(), Some(90.0));
    }

    #[test]
    fn normalize_skips_failing_angles() {
        let oracle = ByRotation(HashMap::from([
            (Rotation::Deg90, vec![40]),
            (Rotation::Deg270, vec![60]),
        ]));
        let result = normalize(marked_image(), &oracle);
        assert_eq!(result.rotation, Some(Rotation::Deg270));
        assert_eq!((result.image.width(), result.image.height()), (6, 8));
    }

    #[test]
    fn normalize_keeps_original_when_every_angle_fails() {
        let oracle = ByRotation(HashMap::new());
        let result = normalize(marked_image(), &oracle);
        assert_eq!(result.rotation, None);
        assert!(result.candidate.is_none());
        assert_eq!(detect_rotation(&result.image), Rotation::Deg0);
        assert_eq!((result.image.width(), result.image.height()), (8, 6));
    }

    #[test]
    fn normalize_equal_scores_prefer_unrotated() {
        let oracle = ByRotation(HashMap::from([
            (Rotation::Deg0, vec![70]),
            (Rotation::Deg90, vec![70]),
            (Rotation::Deg180, vec![70]),
            (Rotation::Deg270, vec![70]),
        ]));
        let result = normalize(marked_image(), &oracle);
        assert_eq!(result.rotation, Some(Rotation::Deg0));
    }
}
