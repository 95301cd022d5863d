//! JSON-lines observation streams and dataset manifests

use super::observation::{FloatObsSequence, ObsRecord};
use crate::error::{HmmError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Iterator over observation sequences, one JSON object per line.
///
/// Blank lines are skipped. EOF ends the iteration.
pub struct ObsReader<R> {
    reader: R,
    line: String,
    line_no: usize,
}

impl ObsReader<BufReader<File>> {
    /// Open a JSON-lines file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ObsReader<R> {
    /// Wrap a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for ObsReader<R> {
    type Item = Result<FloatObsSequence>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_no += 1;
                    let trimmed = self.line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let parsed = serde_json::from_str::<ObsRecord>(trimmed)
                        .map_err(|e| HmmError::field(&format!("line {}", self.line_no), e.to_string()))
                        .and_then(FloatObsSequence::try_from);
                    return Some(parsed);
                }
                Err(e) => return Some(Err(HmmError::Io(e))),
            }
        }
    }
}

/// Write sequences as JSON lines
pub fn write_sequences<W: Write>(mut writer: W, sequences: &[FloatObsSequence]) -> Result<()> {
    for seq in sequences {
        let record = ObsRecord::from(seq);
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Dataset manifest: a list of observation stream files.
///
/// Relative paths resolve against the manifest's directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// JSON-lines observation files
    pub files: Vec<PathBuf>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Manifest {
    /// Manifest over explicit files
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            base_dir: None,
        }
    }

    /// Load a manifest from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut manifest: Manifest = serde_json::from_str(&content)?;
        manifest.base_dir = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    /// Resolved file paths
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .map(|f| match &self.base_dir {
                Some(dir) if f.is_relative() => dir.join(f),
                _ => f.clone(),
            })
            .collect()
    }

    /// Read every sequence of every file.
    ///
    /// A malformed line fails the whole load.
    pub fn load(&self) -> Result<Vec<FloatObsSequence>> {
        let mut sequences = Vec::new();
        for path in self.paths() {
            for seq in ObsReader::open(&path)? {
                sequences.push(seq?);
            }
            tracing::debug!("Loaded {} sequences so far from {}", sequences.len(), path.display());
        }
        Ok(sequences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ANode;
    use std::io::Cursor;

    #[test]
    fn test_read_lines() {
        let input = r#"{"id":"a","vectors":[[1.0,2.0],[3.0,4.0]],"labels":["x","y"]}

{"id":"b","vectors":[[5.0,6.0]]}
"#;
        let seqs: Vec<_> = ObsReader::new(Cursor::new(input))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].id, "a");
        assert_eq!(seqs[0].labels.as_ref().unwrap()[1], "y");
        assert_eq!(seqs[1].frames[[0, 1]], 6.0);
        assert!(seqs[1].labels.is_none());
    }

    #[test]
    fn test_read_alignment() {
        let input = r#"{"id":"a","vectors":[[1.0],[2.0],[3.0]],"alignments":[[{"s":0,"e":1,"n":"p"},{"s":1,"e":3,"n":"q"}],[{"s":0,"e":3,"n":"w"}]]}"#;
        let seq = ObsReader::new(Cursor::new(input)).next().unwrap().unwrap();
        let tree = seq.alignment.unwrap();
        assert_eq!(tree.name, "w");
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[1].start, 1);
    }

    #[test]
    fn test_bad_line_reports_error() {
        let input = "{\"id\":\"a\",\"vectors\":[[1.0]]}\nnot json\n";
        let results: Vec<_> = ObsReader::new(Cursor::new(input)).collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(HmmError::Serialization { .. })));
    }

    #[test]
    fn test_write_then_read() {
        let mut root = ANode::new(0, 2, "w");
        root.append_child(1, "p").unwrap();
        root.append_child(2, "q").unwrap();
        let seq = FloatObsSequence::from_rows("u", &[vec![0.5], vec![-1.25]])
            .unwrap()
            .with_alignment(root);
        let mut buf = Vec::new();
        write_sequences(&mut buf, &[seq.clone()]).unwrap();
        let back = ObsReader::new(Cursor::new(buf)).next().unwrap().unwrap();
        assert_eq!(back, seq);
    }

    #[test]
    fn test_manifest_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("train.jsonl");
        std::fs::write(&data, "{\"id\":\"a\",\"vectors\":[[1.0]]}\n").unwrap();
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(&manifest_path, r#"{"files":["train.jsonl"]}"#).unwrap();

        let manifest = Manifest::from_file(&manifest_path).unwrap();
        assert_eq!(manifest.paths(), vec![data]);
        assert_eq!(manifest.load().unwrap().len(), 1);
    }
}
