//! Matching of node requirements against discovered hardware.
//!
//! Requirements are resolved in order, each one consuming the node it
//! matched, so earlier entries get first pick of the pool:
//!
//! 1. a MAC pins the entry to exactly one node;
//! 2. hardware bounds pick the first node within all bounds;
//! 3. an entry with neither takes the first node left.
//!
//! There is no backtracking: a bounds entry may take a node that a later
//! entry would also have fit.

use tracing::debug;

use crate::api::DiscoveredNode;
use crate::descriptor::NodeRequirement;
use crate::error::{CertifyError, Result};

/// A requirement together with the node chosen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedNode {
    /// The descriptor entry.
    pub requirement: NodeRequirement,
    /// The node it resolved to.
    pub node: DiscoveredNode,
}

/// Working pool of unassigned nodes, consumed as matches are made.
#[derive(Debug, Clone)]
pub struct NodeMatcher {
    pool: Vec<DiscoveredNode>,
}

impl NodeMatcher {
    /// Build a matcher over the unassigned nodes of `nodes`, keeping
    /// their order.
    #[must_use]
    pub fn new(nodes: Vec<DiscoveredNode>) -> Self {
        Self {
            pool: nodes.into_iter().filter(DiscoveredNode::is_unassigned).collect(),
        }
    }

    /// Nodes not yet taken.
    #[must_use]
    pub fn remaining(&self) -> &[DiscoveredNode] {
        &self.pool
    }

    /// Resolve one requirement and remove the chosen node from the pool.
    ///
    /// # Errors
    /// Returns [`CertifyError::NodeNotFound`] if no node satisfies the
    /// requirement, or if its MAC matches more than one node.
    pub fn take(&mut self, requirement: &NodeRequirement) -> Result<DiscoveredNode> {
        let index = self.find(requirement)?;
        let node = self.pool.remove(index);
        debug!(node_id = node.id, mac = %node.mac, requirement = %requirement, "Matched node");
        Ok(node)
    }

    fn find(&self, requirement: &NodeRequirement) -> Result<usize> {
        let not_found = |detail: String| CertifyError::NodeNotFound {
            requirement: detail,
        };

        if let Some(mac) = &requirement.mac {
            let mut hits = self
                .pool
                .iter()
                .enumerate()
                .filter(|(_, n)| n.mac.eq_ignore_ascii_case(mac))
                .map(|(i, _)| i);

            return match (hits.next(), hits.next()) {
                (Some(index), None) => Ok(index),
                (None, _) => Err(not_found(requirement.to_string())),
                (Some(_), Some(_)) => Err(not_found(format!(
                    "{requirement} (MAC shared by several discovered nodes)"
                ))),
            };
        }

        if let Some(bounds) = &requirement.requirements {
            return self
                .pool
                .iter()
                .position(|n| bounds.matches(n))
                .ok_or_else(|| not_found(requirement.to_string()));
        }

        if self.pool.is_empty() {
            Err(not_found(requirement.to_string()))
        } else {
            Ok(0)
        }
    }

    /// Resolve every requirement in order.
    ///
    /// # Errors
    /// Fails on the first requirement that cannot be matched; matches made
    /// before it are discarded.
    pub fn match_all(mut self, requirements: &[NodeRequirement]) -> Result<Vec<MatchedNode>> {
        requirements
            .iter()
            .map(|requirement| {
                self.take(requirement).map(|node| MatchedNode {
                    requirement: requirement.clone(),
                    node,
                })
            })
            .collect()
    }
}
