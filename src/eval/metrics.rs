//! Frame accuracy of decoded label sequences

use crate::error::{HmmError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// One decoded sequence: `{id, hyp, ref?}` with one label per frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeResult {
    pub id: String,
    pub hyp: Vec<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Vec<String>>,
}

/// Aggregate accuracy over a result set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Score {
    /// Results read
    pub sequences: usize,
    /// Results that carried a reference
    pub scored: usize,
    /// Reference frames
    pub frames: usize,
    /// Frames whose hypothesis label matches the reference
    pub correct: usize,
}

impl Score {
    /// Fraction of reference frames labeled correctly; 0 when nothing was scored
    pub fn accuracy(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.correct as f64 / self.frames as f64
        }
    }
}

/// Matching frames and reference length.
///
/// Frames missing from the hypothesis count as errors.
pub fn frame_accuracy<S: AsRef<str>>(hyp: &[S], reference: &[S]) -> (usize, usize) {
    let correct = hyp
        .iter()
        .zip(reference)
        .filter(|(h, r)| h.as_ref() == r.as_ref())
        .count();
    (correct, reference.len())
}

/// Score every result that has a reference
pub fn score<'a, I>(results: I) -> Score
where
    I: IntoIterator<Item = &'a DecodeResult>,
{
    let mut total = Score::default();
    for result in results {
        total.sequences += 1;
        let Some(reference) = &result.reference else { continue };
        if result.hyp.len() != reference.len() {
            tracing::warn!(
                "Result {}: {} hypothesis frames for {} reference frames",
                result.id,
                result.hyp.len(),
                reference.len()
            );
        }
        let (correct, frames) = frame_accuracy(&result.hyp, reference);
        total.scored += 1;
        total.correct += correct;
        total.frames += frames;
    }
    total
}

/// Read JSON-lines results
pub fn read_results<P: AsRef<Path>>(path: P) -> Result<Vec<DecodeResult>> {
    let reader = BufReader::new(File::open(path)?);
    let mut results = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let result = serde_json::from_str(&line)
            .map_err(|e| HmmError::field(&format!("line {}", n + 1), e.to_string()))?;
        results.push(result);
    }
    Ok(results)
}

/// Write results as JSON lines
pub fn write_results<W: Write>(mut writer: W, results: &[DecodeResult]) -> Result<()> {
    for result in results {
        serde_json::to_writer(&mut writer, result)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_frame_accuracy() {
        let (correct, total) = frame_accuracy(&["a", "a", "b"], &["a", "b", "b"]);
        assert_eq!((correct, total), (2, 3));
        let (correct, total) = frame_accuracy(&["a"], &["a", "b"]);
        assert_eq!((correct, total), (1, 2));
    }

    #[test]
    fn test_score_skips_unreferenced() {
        let results = vec![
            DecodeResult {
                id: "1".into(),
                hyp: labels(&["a", "b"]),
                reference: Some(labels(&["a", "a"])),
            },
            DecodeResult {
                id: "2".into(),
                hyp: labels(&["b"]),
                reference: None,
            },
        ];
        let s = score(&results);
        assert_eq!(s.sequences, 2);
        assert_eq!(s.scored, 1);
        assert_eq!(s.accuracy(), 0.5);
        assert_eq!(score(&[]).accuracy(), 0.0);
    }

    #[test]
    fn test_results_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let results = vec![DecodeResult {
            id: "u".into(),
            hyp: labels(&["x", "y"]),
            reference: Some(labels(&["x", "x"])),
        }];
        write_results(File::create(&path).unwrap(), &results).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"ref\":[\"x\",\"x\"]"));
        assert_eq!(read_results(&path).unwrap(), results);
    }
}
