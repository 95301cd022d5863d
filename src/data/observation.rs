//! Observation sequences

use super::alignment::ANode;
use crate::error::{HmmError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// A sequence of real-valued frames of fixed dimension.
///
/// Frames are the rows of a `T x D` matrix. Labels are either one string per
/// frame or an alignment tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatObsSequence {
    /// Opaque identifier
    pub id: String,
    /// Frame matrix (T x D)
    pub frames: Array2<f64>,
    /// Optional per-frame labels
    pub labels: Option<Vec<String>>,
    /// Optional alignment tree
    pub alignment: Option<ANode>,
}

impl FloatObsSequence {
    /// Create an unlabeled sequence
    pub fn new(id: impl Into<String>, frames: Array2<f64>) -> Self {
        Self {
            id: id.into(),
            frames,
            labels: None,
            alignment: None,
        }
    }

    /// Build from row vectors; every row must have the same length.
    pub fn from_rows(id: impl Into<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let id = id.into();
        let dim = rows.first().map_or(0, |r| r.len());
        let mut frames = Array2::zeros((rows.len(), dim));
        for (t, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(HmmError::DimensionMismatch {
                    expected: dim,
                    found: row.len(),
                });
            }
            for (d, &v) in row.iter().enumerate() {
                frames[[t, d]] = v;
            }
        }
        Ok(Self::new(id, frames))
    }

    /// Attach per-frame labels
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Attach an alignment tree
    pub fn with_alignment(mut self, alignment: ANode) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.nrows()
    }

    /// Whether there are no frames
    pub fn is_empty(&self) -> bool {
        self.frames.nrows() == 0
    }

    /// Frame dimension
    pub fn dim(&self) -> usize {
        self.frames.ncols()
    }

    /// Frame `t`
    pub fn frame(&self, t: usize) -> ArrayView1<'_, f64> {
        self.frames.row(t)
    }

    /// All frames
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.frames.view()
    }

    /// Token sequence used to build a chain.
    ///
    /// The alignment leaves win over frame labels; frame labels are collapsed
    /// into runs first.
    pub fn tokens(&self) -> Option<Vec<String>> {
        if let Some(alignment) = &self.alignment {
            return Some(
                alignment
                    .leaves()
                    .into_iter()
                    .map(|leaf| leaf.name.clone())
                    .collect(),
            );
        }
        self.labels.as_ref().map(|labels| {
            ANode::from_labels(labels)
                .leaves()
                .into_iter()
                .map(|leaf| leaf.name.clone())
                .collect()
        })
    }

    /// Per-frame reference labels, from the labels or the alignment leaves
    pub fn frame_labels(&self) -> Option<Vec<String>> {
        self.labels
            .clone()
            .or_else(|| self.alignment.as_ref().map(|a| a.frame_labels()))
    }
}

/// One line of an observation stream (`{id, vectors, labels?, alignments?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsRecord {
    #[serde(default)]
    pub id: String,
    pub vectors: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignments: Option<Vec<Vec<ANode>>>,
}

impl TryFrom<ObsRecord> for FloatObsSequence {
    type Error = HmmError;

    fn try_from(record: ObsRecord) -> Result<Self> {
        let mut seq = FloatObsSequence::from_rows(record.id, &record.vectors)?;
        if let Some(labels) = record.labels {
            if labels.len() != seq.len() {
                return Err(HmmError::field(
                    "labels",
                    format!("{} labels for {} frames", labels.len(), seq.len()),
                ));
            }
            seq.labels = Some(labels);
        }
        if let Some(levels) = record.alignments {
            let tree = ANode::tree_of(&levels)
                .map_err(|e| HmmError::field("alignments", e.to_string()))?;
            seq.alignment = Some(tree);
        }
        Ok(seq)
    }
}

impl From<&FloatObsSequence> for ObsRecord {
    fn from(seq: &FloatObsSequence) -> Self {
        ObsRecord {
            id: seq.id.clone(),
            vectors: seq.frames.rows().into_iter().map(|r| r.to_vec()).collect(),
            labels: seq.labels.clone(),
            alignments: seq.alignment.as_ref().map(|a| a.by_level()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_from_rows() {
        let seq = FloatObsSequence::from_rows("u1", &[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.dim(), 2);
        assert_eq!(seq.frame(1)[0], 3.0);
    }

    #[test]
    fn test_from_rows_ragged() {
        let err = FloatObsSequence::from_rows("u1", &[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, HmmError::DimensionMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn test_tokens_from_labels() {
        let seq = FloatObsSequence::new("u", arr2(&[[0.0], [0.0], [0.0], [0.0]])).with_labels(
            ["a", "a", "b", "a"].iter().map(|s| s.to_string()).collect(),
        );
        assert_eq!(seq.tokens().unwrap(), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_tokens_prefer_alignment() {
        let mut root = ANode::new(0, 2, "");
        root.append_child(1, "x").unwrap();
        root.append_child(2, "y").unwrap();
        let seq = FloatObsSequence::new("u", arr2(&[[0.0], [0.0]]))
            .with_labels(vec!["a".into(), "a".into()])
            .with_alignment(root);
        assert_eq!(seq.tokens().unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_record_label_count_checked() {
        let record = ObsRecord {
            id: "u".into(),
            vectors: vec![vec![1.0], vec![2.0]],
            labels: Some(vec!["a".into()]),
            alignments: None,
        };
        let err = FloatObsSequence::try_from(record).unwrap_err();
        assert!(matches!(err, HmmError::Serialization { .. }));
    }
}
