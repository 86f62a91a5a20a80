//! Head reconciliation.
//!
//! A thread normally has one head. When a block arrives that neither
//! descends from the local head nor is already behind it, the two lines of
//! history are joined by a MERGE block. Merge blocks carry no author, and
//! their parents are sorted and their date is the latest parent date, so
//! two peers merging the same heads derive the same block.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use skein_shared::BlockId;
use skein_store::{Database, StoreError};

use crate::error::CoreError;

/// Read access to the parent links of applied blocks.
pub trait BlockGraph {
    /// Parents of `id`, or `None` if the block is unknown.
    fn parents(&self, id: &BlockId) -> Result<Option<Vec<BlockId>>, CoreError>;
}

impl BlockGraph for Database {
    fn parents(&self, id: &BlockId) -> Result<Option<Vec<BlockId>>, CoreError> {
        match self.get_block(id) {
            Ok(block) => Ok(Some(block.parents)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl BlockGraph for HashMap<BlockId, Vec<BlockId>> {
    fn parents(&self, id: &BlockId) -> Result<Option<Vec<BlockId>>, CoreError> {
        Ok(self.get(id).cloned())
    }
}

/// Whether `ancestor` is `from` or reachable from it through parent links.
pub fn reaches(
    graph: &impl BlockGraph,
    from: &BlockId,
    ancestor: &BlockId,
) -> Result<bool, CoreError> {
    let mut stack = vec![*from];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == *ancestor {
            return Ok(true);
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(parents) = graph.parents(&id)? {
            stack.extend(parents);
        }
    }
    Ok(false)
}

/// What to do with the heads after applying a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The block is already part of the known history.
    Unchanged,
    /// The block descends from every head and replaces them.
    FastForward,
    /// The block diverges; merge these sorted parents.
    Merge { parents: Vec<BlockId> },
}

pub fn reconcile(
    graph: &impl BlockGraph,
    heads: &[BlockId],
    incoming: &BlockId,
) -> Result<Reconciled, CoreError> {
    for head in heads {
        if reaches(graph, head, incoming)? {
            return Ok(Reconciled::Unchanged);
        }
    }

    let mut survivors = Vec::new();
    for head in heads {
        if !reaches(graph, incoming, head)? {
            survivors.push(*head);
        }
    }
    if survivors.is_empty() {
        return Ok(Reconciled::FastForward);
    }

    survivors.push(*incoming);
    survivors.sort();
    survivors.dedup();
    Ok(Reconciled::Merge { parents: survivors })
}

/// Date of a merge over parents with the given dates.
pub fn merge_date(dates: impl IntoIterator<Item = DateTime<Utc>>) -> Option<DateTime<Utc>> {
    dates.into_iter().max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn id(b: u8) -> BlockId {
        BlockId([b; 32])
    }

    /// 1 <- 2 <- 3, and 2 <- 4 (a fork at 2).
    fn graph() -> HashMap<BlockId, Vec<BlockId>> {
        HashMap::from([
            (id(1), vec![]),
            (id(2), vec![id(1)]),
            (id(3), vec![id(2)]),
            (id(4), vec![id(2)]),
        ])
    }

    #[test]
    fn test_reaches() {
        let g = graph();
        assert!(reaches(&g, &id(3), &id(1)).unwrap());
        assert!(reaches(&g, &id(3), &id(3)).unwrap());
        assert!(!reaches(&g, &id(1), &id(3)).unwrap());
        assert!(!reaches(&g, &id(3), &id(4)).unwrap());
    }

    #[test]
    fn test_descendant_fast_forwards() {
        let g = graph();
        assert_eq!(reconcile(&g, &[id(2)], &id(3)).unwrap(), Reconciled::FastForward);
        assert_eq!(reconcile(&g, &[], &id(1)).unwrap(), Reconciled::FastForward);
    }

    #[test]
    fn test_known_block_is_unchanged() {
        let g = graph();
        assert_eq!(reconcile(&g, &[id(3)], &id(2)).unwrap(), Reconciled::Unchanged);
        assert_eq!(reconcile(&g, &[id(3)], &id(3)).unwrap(), Reconciled::Unchanged);
    }

    #[test]
    fn test_fork_merges_sorted_parents() {
        let g = graph();
        let expected = Reconciled::Merge {
            parents: vec![id(3), id(4)],
        };
        assert_eq!(reconcile(&g, &[id(4)], &id(3)).unwrap(), expected);
        // the other side of the fork derives the same parents
        assert_eq!(reconcile(&g, &[id(3)], &id(4)).unwrap(), expected);
    }

    #[test]
    fn test_merge_keeps_only_unreached_heads() {
        let mut g = graph();
        g.insert(id(5), vec![id(3)]);
        // heads 3 and 4; 5 descends from 3 only
        let out = reconcile(&g, &[id(3), id(4)], &id(5)).unwrap();
        assert_eq!(
            out,
            Reconciled::Merge {
                parents: vec![id(4), id(5)]
            }
        );
    }

    #[test]
    fn test_merge_date_is_latest() {
        let early = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let late = Utc.timestamp_opt(1_700_000_500, 0).unwrap();
        assert_eq!(merge_date([late, early]), Some(late));
        assert_eq!(merge_date(Vec::new()), None);
    }
}
