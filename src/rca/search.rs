//! Root-cause search strategies.
//!
//! Both strategies walk the call tree of a changed test and ask a [`NodeMeasurer`]
//! which calls differ significantly between the revisions. The root is the test method
//! itself and is known to be changed.

use anyhow::{bail, Result};
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::tree::{CallTreeNode, CauseNode, PATH_SEPARATOR};
use crate::stages::{CauseSearchConfig, CauseSearcher};
use crate::types::{Change, TestCase};

/// Source of call trees and significance verdicts for call-tree nodes.
pub trait NodeMeasurer: Send + Sync {
    /// Merged call tree of the test on both revisions
    fn call_tree(&self, test: &TestCase, config: &CauseSearchConfig) -> Result<CallTreeNode>;

    /// Measure the given call paths on both revisions and return those with a
    /// significant difference
    fn changed_nodes(
        &self,
        test: &TestCase,
        call_paths: &[String],
        config: &CauseSearchConfig,
    ) -> Result<BTreeSet<String>>;
}

struct FlatNode {
    path: String,
    call: String,
    children: Vec<usize>,
    measured: bool,
    changed: bool,
}

/// Call tree flattened in breadth-first order; index 0 is the root.
struct FlatTree {
    nodes: Vec<FlatNode>,
}

impl FlatTree {
    fn new(root: &CallTreeNode) -> Self {
        let mut nodes = vec![FlatNode {
            path: root.call.clone(),
            call: root.call.clone(),
            children: Vec::new(),
            measured: true,
            changed: true,
        }];
        let mut queue = vec![(0usize, root)];
        while !queue.is_empty() {
            let mut next = Vec::new();
            for (index, node) in queue {
                for child in &node.children {
                    let child_index = nodes.len();
                    let path = format!("{}{}{}", nodes[index].path, PATH_SEPARATOR, child.call);
                    nodes.push(FlatNode {
                        path,
                        call: child.call.clone(),
                        children: Vec::new(),
                        measured: false,
                        changed: false,
                    });
                    nodes[index].children.push(child_index);
                    next.push((child_index, child));
                }
            }
            queue = next;
        }
        Self { nodes }
    }

    /// Measure a set of nodes and mark the result; returns the changed ones
    fn measure(
        &mut self,
        indices: &[usize],
        measurer: &dyn NodeMeasurer,
        test: &TestCase,
        config: &CauseSearchConfig,
    ) -> Result<Vec<usize>> {
        let paths: Vec<String> = indices.iter().map(|&i| self.nodes[i].path.clone()).collect();
        let changed = measurer.changed_nodes(test, &paths, config)?;
        let mut changed_indices = Vec::new();
        for &i in indices {
            let node = &mut self.nodes[i];
            node.measured = true;
            node.changed = changed.contains(&node.path);
            if node.changed {
                changed_indices.push(i);
            }
        }
        Ok(changed_indices)
    }

    fn into_cause_tree(self) -> CauseNode {
        fn build(nodes: &[FlatNode], index: usize) -> CauseNode {
            let node = &nodes[index];
            CauseNode {
                call_path: node.path.clone(),
                call: node.call.clone(),
                measured: node.measured,
                changed: node.changed,
                children: node.children.iter().map(|&c| build(nodes, c)).collect(),
            }
        }
        build(&self.nodes, 0)
    }
}

fn check_root(test: &TestCase, tree: &CallTreeNode) -> Result<()> {
    if tree.call.is_empty() {
        bail!("call tree of {} has an empty root", test);
    }
    Ok(())
}

/// Measures every node of the call tree in one go.
pub struct CompleteSearcher {
    measurer: Arc<dyn NodeMeasurer>,
}

impl CompleteSearcher {
    pub fn new(measurer: Arc<dyn NodeMeasurer>) -> Self {
        Self { measurer }
    }
}

impl CauseSearcher for CompleteSearcher {
    fn search(&self, test: &TestCase, change: &Change, config: &CauseSearchConfig) -> Result<CauseNode> {
        let call_tree = self.measurer.call_tree(test, config)?;
        check_root(test, &call_tree)?;
        debug!("Call tree of {} has {} nodes", test, call_tree.node_count());
        let mut tree = FlatTree::new(&call_tree);

        let all: Vec<usize> = (1..tree.nodes.len()).collect();
        if !all.is_empty() {
            tree.measure(&all, self.measurer.as_ref(), test, config)?;
        }
        info!(
            "Complete search of {} ({}): measured {} nodes",
            test,
            change.method,
            all.len()
        );
        Ok(tree.into_cause_tree())
    }
}

/// Measures the tree level by level and only descends below changed nodes.
///
/// Stops as soon as a level has no changed node, so causes hidden below an unchanged
/// call are not found.
pub struct LevelWiseSearcher {
    measurer: Arc<dyn NodeMeasurer>,
}

impl LevelWiseSearcher {
    pub fn new(measurer: Arc<dyn NodeMeasurer>) -> Self {
        Self { measurer }
    }
}

impl CauseSearcher for LevelWiseSearcher {
    fn search(&self, test: &TestCase, change: &Change, config: &CauseSearchConfig) -> Result<CauseNode> {
        let call_tree = self.measurer.call_tree(test, config)?;
        check_root(test, &call_tree)?;
        let mut tree = FlatTree::new(&call_tree);

        debug!("Call tree of {} has {} nodes", test, call_tree.node_count());
        let mut level = tree.nodes[0].children.clone();
        let mut depth = 1;
        while !level.is_empty() {
            let changed = tree.measure(&level, self.measurer.as_ref(), test, config)?;
            debug!(
                "{} level {}: {} of {} nodes changed",
                test,
                depth,
                changed.len(),
                level.len()
            );
            level = changed
                .iter()
                .flat_map(|&i| tree.nodes[i].children.clone())
                .collect();
            depth += 1;
        }
        info!("Level-wise search of {} ({}) finished after {} levels", test, change.method, depth - 1);
        Ok(tree.into_cause_tree())
    }
}
