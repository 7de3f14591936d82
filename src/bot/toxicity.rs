// src/bot/toxicity.rs - Embedding similarity classifier for toxic vocabulary

use flate2::read::GzDecoder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

use crate::error::{ModerationError, Result};

pub const MIN_THRESHOLD: f64 = 0.1;
pub const MAX_THRESHOLD: f64 = 0.95;

const NORM_EPSILON: f64 = 1e-8;

/// Reference word and its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicTerm {
    pub term: String,
    pub vector: Vec<f32>,
}

/// Trained vocabulary, curated toxic terms and the base decision threshold.
///
/// Toxic terms keep the order of the artifact: when several terms exceed the
/// threshold for the same token, the first one wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToxicityModel {
    pub threshold: f64,
    pub vocabulary: HashMap<String, Vec<f32>>,
    pub toxic_terms: Vec<ToxicTerm>,
}

impl ToxicityModel {
    pub fn from_parts(
        vocabulary: HashMap<String, Vec<f32>>,
        toxic_terms: Vec<ToxicTerm>,
        threshold: f64,
    ) -> Result<Self> {
        let model = Self { threshold, vocabulary, toxic_terms };
        model.validate()?;
        Ok(model)
    }

    /// Load a JSON artifact, gzip-compressed when the file name ends in `.gz`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ModerationError::ModelUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;

        let reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "gz") {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let model: ToxicityModel = serde_json::from_reader(reader).map_err(|e| {
            ModerationError::ModelUnavailable(format!("corrupt model {}: {}", path.display(), e))
        })?;
        model.validate()?;

        info!(
            "Loaded toxicity model from {} ({} words, {} toxic terms, threshold {:.2})",
            path.display(),
            model.vocabulary.len(),
            model.toxic_terms.len(),
            model.threshold
        );
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&self.threshold) {
            return Err(ModerationError::ModelUnavailable(format!(
                "threshold {} outside [{}, {}]",
                self.threshold, MIN_THRESHOLD, MAX_THRESHOLD
            )));
        }
        if self.toxic_terms.is_empty() {
            warn!("Toxicity model has no toxic terms; nothing will be flagged");
        }
        Ok(())
    }
}

/// Outcome of one classification. `score`/`term` describe the best match
/// even when the text is not toxic, which helps tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ToxicityVerdict {
    pub is_toxic: bool,
    pub score: f64,
    pub term: String,
}

impl ToxicityVerdict {
    fn clean() -> Self {
        Self { is_toxic: false, score: 0.0, term: String::new() }
    }
}

/// Immutable classifier, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ToxicityDetector {
    model: ToxicityModel,
}

impl ToxicityDetector {
    pub fn new(model: ToxicityModel) -> Self {
        Self { model }
    }

    /// Load the model artifact. Failure is fatal for the detector and is not retried.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        ToxicityModel::load(path).map(Self::new)
    }

    pub fn base_threshold(&self) -> f64 {
        self.model.threshold
    }

    pub fn effective_threshold(&self, threshold_adjust: f64) -> f64 {
        (self.model.threshold + threshold_adjust).clamp(MIN_THRESHOLD, MAX_THRESHOLD)
    }

    pub fn classify(&self, text: &str, threshold_adjust: f64) -> ToxicityVerdict {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return ToxicityVerdict::clean();
        }

        let threshold = self.effective_threshold(threshold_adjust);
        let mut best = ToxicityVerdict::clean();

        for token in normalized.split_whitespace() {
            let Some(token_vector) = self.model.vocabulary.get(token) else {
                continue;
            };

            for toxic in &self.model.toxic_terms {
                let similarity = match cosine_similarity(token_vector, &toxic.vector) {
                    Ok(similarity) => similarity,
                    Err(e) => {
                        warn!("Error processing word '{}' against '{}': {}", token, toxic.term, e);
                        continue;
                    }
                };

                if similarity > best.score {
                    best.score = similarity;
                    best.term = toxic.term.clone();
                }

                if similarity > threshold {
                    debug!("Token '{}' matched toxic term '{}' ({:.3})", token, toxic.term, similarity);
                    return ToxicityVerdict {
                        is_toxic: true,
                        score: similarity,
                        term: toxic.term.clone(),
                    };
                }
            }
        }

        best
    }
}

/// Lowercase, keep only Latin and Cyrillic letters, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let composed: String = text.nfc().collect::<String>().to_lowercase();
    let filtered: String = composed
        .chars()
        .map(|c| if is_kept_letter(c) || c.is_whitespace() { c } else { ' ' })
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_kept_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || (('\u{0400}'..='\u{04FF}').contains(&c) && c.is_alphabetic())
}

/// Cosine similarity in [-1, 1]; zero when either vector is (nearly) zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(ModerationError::DimensionMismatch { left: a.len(), right: b.len() });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let (norm_a, norm_b) = (norm_a.sqrt(), norm_b.sqrt());
    if norm_a < NORM_EPSILON || norm_b < NORM_EPSILON {
        return Ok(0.0);
    }

    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}
