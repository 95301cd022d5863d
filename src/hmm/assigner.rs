//! Label to model-name translation

use crate::error::{HmmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Maps a token sequence to the sequence of net names that make up a chain
pub trait Assigner: Send + Sync {
    fn assign(&self, labels: &[String]) -> Result<Vec<String>>;
}

/// Each label is a net name
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAssigner;

impl Assigner for DirectAssigner {
    fn assign(&self, labels: &[String]) -> Result<Vec<String>> {
        Ok(labels.to_vec())
    }
}

/// Expands each label through a dictionary (e.g. word to phones)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DictionaryAssigner {
    dict: HashMap<String, Vec<String>>,
}

impl DictionaryAssigner {
    pub fn new(dict: HashMap<String, Vec<String>>) -> Self {
        Self { dict }
    }

    /// Load a JSON object mapping labels to name lists
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn insert(&mut self, label: impl Into<String>, names: Vec<String>) {
        self.dict.insert(label.into(), names);
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }
}

impl Assigner for DictionaryAssigner {
    fn assign(&self, labels: &[String]) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(labels.len() * 4);
        for label in labels {
            let expansion = self
                .dict
                .get(label)
                .ok_or_else(|| HmmError::UnknownLabel(label.clone()))?;
            names.extend(expansion.iter().cloned());
        }
        Ok(names)
    }
}
