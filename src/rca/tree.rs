//! Call trees handed in by the call-tree source and the cause trees persisted per change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CauseSearchStrategy;
use crate::types::{Change, TestCase, VersionPair};

/// Separator between calls in a call path
pub const PATH_SEPARATOR: &str = ">";

/// One call in the merged call tree of both revisions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallTreeNode {
    /// Signature of the called method, e.g. `de.test.Callee#method1`
    pub call: String,
    #[serde(default)]
    pub children: Vec<CallTreeNode>,
}

impl CallTreeNode {
    pub fn leaf(call: &str) -> Self {
        Self {
            call: call.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_children(call: &str, children: Vec<CallTreeNode>) -> Self {
        Self {
            call: call.to_string(),
            children,
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(CallTreeNode::node_count).sum::<usize>()
    }
}

/// A node of the analyzed tree, keyed by its call path from the root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CauseNode {
    pub call_path: String,
    pub call: String,
    /// Whether the node was measured at all; level-wise search skips subtrees
    pub measured: bool,
    /// Significant difference between the revisions
    pub changed: bool,
    pub children: Vec<CauseNode>,
}

impl CauseNode {
    /// Changed nodes without changed children, i.e. the localized causes
    pub fn causes(&self) -> Vec<String> {
        let mut causes = Vec::new();
        self.collect_causes(&mut causes);
        causes
    }

    fn collect_causes(&self, causes: &mut Vec<String>) {
        if !self.changed {
            return;
        }
        if self.children.iter().any(|c| c.changed) {
            for child in &self.children {
                child.collect_causes(causes);
            }
        } else {
            causes.push(self.call_path.clone());
        }
    }

    pub fn measured_count(&self) -> usize {
        usize::from(self.measured) + self.children.iter().map(CauseNode::measured_count).sum::<usize>()
    }
}

/// The artifact stored at `rca-tree/<current>/<ShortClass>/<method>.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CauseSearchResult {
    pub pair: VersionPair,
    pub test: TestCase,
    pub change: Change,
    pub strategy: CauseSearchStrategy,
    pub finished_at: DateTime<Utc>,
    pub tree: CauseNode,
    pub causes: Vec<String>,
}
