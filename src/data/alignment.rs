//! Nested interval tree for labeled segments
//!
//! An [`ANode`] covers the half-open frame interval `[start, end)`. Children of
//! a node partition it exactly and every leaf sits at the same depth. In JSON
//! the children are never written inline: a tree is stored level by level,
//! `[[leaves...], [parents...], ..., [root]]`.

use crate::error::{HmmError, Result};
use serde::{Deserialize, Serialize};

/// Alignment node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ANode {
    /// First frame (inclusive)
    #[serde(rename = "s")]
    pub start: usize,
    /// Last frame (exclusive)
    #[serde(rename = "e")]
    pub end: usize,
    /// Segment name
    #[serde(rename = "n")]
    pub name: String,
    /// Optional user value
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Child segments, materialized only through [`ANode::tree_of`]
    #[serde(skip)]
    pub children: Vec<ANode>,
}

impl ANode {
    /// Create a childless node
    pub fn new(start: usize, end: usize, name: impl Into<String>) -> Self {
        Self {
            start,
            end,
            name: name.into(),
            value: None,
            children: Vec::new(),
        }
    }

    /// Attach a user value
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Number of frames covered
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the interval is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Append a child ending at `end`.
    ///
    /// The child starts where the previous sibling ends, or at `self.start`
    /// for the first child.
    pub fn append_child(&mut self, end: usize, name: impl Into<String>) -> Result<&mut ANode> {
        let start = self.children.last().map_or(self.start, |c| c.end);
        if end < start {
            return Err(HmmError::InvalidAlignment(format!(
                "child end {} is before its start {}",
                end, start
            )));
        }
        if end > self.end {
            return Err(HmmError::InvalidAlignment(format!(
                "child end {} exceeds parent end {}",
                end, self.end
            )));
        }
        self.children.push(ANode::new(start, end, name));
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    /// Height of the tree (0 for a leaf)
    pub fn height(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.height() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Check partitioning and balanced-depth invariants.
    pub fn is_valid(&self) -> bool {
        if self.start > self.end {
            return false;
        }
        self.partitions_ok() && self.leaf_depths_equal()
    }

    fn partitions_ok(&self) -> bool {
        if self.children.is_empty() {
            return true;
        }
        let mut cursor = self.start;
        for child in &self.children {
            if child.start != cursor || child.end < child.start || !child.partitions_ok() {
                return false;
            }
            cursor = child.end;
        }
        cursor == self.end
    }

    fn leaf_depths_equal(&self) -> bool {
        let mut depths = Vec::new();
        self.collect_leaf_depths(0, &mut depths);
        depths.windows(2).all(|w| w[0] == w[1])
    }

    fn collect_leaf_depths(&self, depth: usize, out: &mut Vec<usize>) {
        if self.children.is_empty() {
            out.push(depth);
        }
        for child in &self.children {
            child.collect_leaf_depths(depth + 1, out);
        }
    }

    /// Nodes grouped by level; index 0 holds the leaves, the last level the root.
    ///
    /// Returned nodes carry no children.
    pub fn by_level(&self) -> Vec<Vec<ANode>> {
        let height = self.height();
        let mut levels = vec![Vec::new(); height + 1];
        self.collect_levels(height, &mut levels);
        levels
    }

    fn collect_levels(&self, level: usize, levels: &mut [Vec<ANode>]) {
        let mut flat = self.clone();
        flat.children.clear();
        levels[level].push(flat);
        if level > 0 {
            for child in &self.children {
                child.collect_levels(level - 1, levels);
            }
        }
    }

    /// Rebuild a tree from its level-wise layout (inverse of [`ANode::by_level`]).
    pub fn tree_of(levels: &[Vec<ANode>]) -> Result<ANode> {
        let top = levels
            .last()
            .ok_or_else(|| HmmError::InvalidAlignment("no levels".into()))?;
        if top.len() != 1 {
            return Err(HmmError::InvalidAlignment(format!(
                "top level must hold exactly one root, found {}",
                top.len()
            )));
        }
        let mut current: Vec<ANode> = levels[0].iter().map(strip_children).collect();
        for (depth, parents) in levels.iter().enumerate().skip(1) {
            let mut children = current.into_iter().peekable();
            let mut built = Vec::with_capacity(parents.len());
            for parent in parents {
                let mut node = strip_children(parent);
                while let Some(child) = children.peek() {
                    let covered = node.children.last().map_or(node.start, |c| c.end);
                    let full = !node.children.is_empty() && covered == node.end;
                    if full || child.start != covered || child.end > node.end {
                        break;
                    }
                    if let Some(child) = children.next() {
                        node.children.push(child);
                    }
                }
                built.push(node);
            }
            if let Some(orphan) = children.next() {
                return Err(HmmError::InvalidAlignment(format!(
                    "node [{}, {}) at level {} has no parent",
                    orphan.start,
                    orphan.end,
                    depth - 1
                )));
            }
            current = built;
        }
        let root = current
            .pop()
            .ok_or_else(|| HmmError::InvalidAlignment("no root".into()))?;
        if !root.is_valid() {
            return Err(HmmError::InvalidAlignment(
                "levels do not form a valid tree".into(),
            ));
        }
        Ok(root)
    }

    /// Collapse consecutive equal labels into a two-level tree.
    ///
    /// The root spans every frame and each leaf covers one run of labels.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> ANode {
        let mut root = ANode::new(0, labels.len(), "");
        let mut run_start = 0;
        for t in 1..=labels.len() {
            if t == labels.len() || labels[t].as_ref() != labels[run_start].as_ref() {
                let name = labels[run_start].as_ref().to_string();
                root.children.push(ANode::new(run_start, t, name));
                run_start = t;
            }
        }
        root
    }

    /// Leaves in frame order
    pub fn leaves(&self) -> Vec<&ANode> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ANode>) {
        if self.children.is_empty() {
            out.push(self);
        }
        for child in &self.children {
            child.collect_leaves(out);
        }
    }

    /// Expand the leaves into one label per frame
    pub fn frame_labels(&self) -> Vec<String> {
        let mut labels = Vec::with_capacity(self.len());
        for leaf in self.leaves() {
            labels.extend(std::iter::repeat(leaf.name.clone()).take(leaf.len()));
        }
        labels
    }

    /// Serialize as level-wise JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.by_level())?)
    }

    /// Parse level-wise JSON
    pub fn from_json(s: &str) -> Result<ANode> {
        let levels: Vec<Vec<ANode>> = serde_json::from_str(s)?;
        ANode::tree_of(&levels)
    }
}

fn strip_children(node: &ANode) -> ANode {
    let mut node = node.clone();
    node.children.clear();
    node
}
