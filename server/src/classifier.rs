//! Chat-text direction classifier
//!
//! Turns free-form chat text into a movement direction. The classifier
//! slides a fixed-width window across the input and scores every offset
//! against a trained keyword model, restricted to the directions allowed
//! by the caller's mask. The best hit wins; the returned snippet is the
//! winning window with ellipses marking truncation.

use log::info;
use serde::{Deserialize, Serialize};
use shared::{Direction, DirectionMask};
use std::fs;
use std::io;
use std::path::Path;

/// Window width in characters; inputs are scored in chunks of this size.
const WINDOW: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeywordModel {
    entries: Vec<KeywordEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeywordEntry {
    direction: Direction,
    keyword: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub direction: Direction,
    /// In [0, 1]; 1.0 means a keyword matched an offset exactly.
    pub confidence: f32,
    /// The window slice the winner came from.
    pub matched: String,
}

pub struct DirectionClassifier {
    model: KeywordModel,
}

impl DirectionClassifier {
    /// Restores a trained model from disk; `None` when the file is
    /// missing or unreadable, in which case the caller trains fresh.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let raw = fs::read_to_string(path).ok()?;
        let model = serde_json::from_str(&raw).ok()?;
        Some(DirectionClassifier { model })
    }

    pub fn save_to_file(&self, path: &Path) -> io::Result<()> {
        let raw = serde_json::to_string_pretty(&self.model)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, raw)
    }

    /// Trains a fresh model from the built-in vocabulary.
    pub fn create_new() -> Self {
        let datasets: [(Direction, &[&str]); 4] = [
            (Direction::Up, &["up", "ascend", "rise", "hoch", "oben"]),
            (
                Direction::Down,
                &["down", "descend", "fall", "runter", "unten", "meep", "drop"],
            ),
            (Direction::Left, &["left", "links", "lol"]),
            (Direction::Right, &["right", "rechts", "re"]),
        ];

        let entries = datasets
            .iter()
            .flat_map(|(direction, words)| {
                words.iter().map(move |word| KeywordEntry {
                    direction: *direction,
                    keyword: (*word).to_string(),
                })
            })
            .collect();

        info!("Trained direction model from built-in vocabulary");
        DirectionClassifier {
            model: KeywordModel { entries },
        }
    }

    /// Scores every window offset of `text` and returns the best
    /// mask-allowed hit. With no hit at all the result is
    /// `Direction::None` at confidence 0.
    pub fn classify(&self, text: &str, mask: DirectionMask) -> Classification {
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        let mut best_offset = 0;
        let mut best_confidence = 0.0f32;
        let mut best_direction = Direction::None;

        for offset in 0..chars.len().max(1) {
            let window = &chars[offset.min(chars.len())..(offset + WINDOW).min(chars.len())];
            for entry in &self.model.entries {
                if !mask.allows(entry.direction) {
                    continue;
                }
                let confidence = window_score(window, &entry.keyword);
                if confidence > best_confidence {
                    best_confidence = confidence;
                    best_direction = entry.direction;
                    best_offset = offset;
                }
            }
        }

        Classification {
            direction: best_direction,
            confidence: best_confidence,
            matched: snippet(text, best_offset),
        }
    }
}

/// Positional character match between a window and a keyword: the share
/// of keyword characters found in place at the window start.
fn window_score(window: &[char], keyword: &str) -> f32 {
    let keyword: Vec<char> = keyword.chars().collect();
    if keyword.is_empty() {
        return 0.0;
    }
    let matches = keyword
        .iter()
        .zip(window.iter())
        .filter(|(k, w)| k == w)
        .count();
    matches as f32 / keyword.len() as f32
}

/// Window slice at the given offset of the original text, ellipsed on
/// the truncated sides.
fn snippet(text: &str, offset: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let offset = offset.min(chars.len());
    let end = (offset + WINDOW).min(chars.len());

    let mut out = String::new();
    if offset > 0 {
        out.push('…');
    }
    out.extend(&chars[offset..end]);
    if end < chars.len() {
        out.push('…');
    }
    out
}
