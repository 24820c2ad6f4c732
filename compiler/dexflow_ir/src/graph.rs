//! CFG utilities shared by the analyses.
//!
//! All traversals follow both normal and exceptional edges: a catch
//! handler is reachable from every block it protects.

use crate::code::{BlockId, IrCode};

/// Compute a postorder traversal of the CFG starting from the entry block.
///
/// Uses an iterative DFS with an explicit stack to avoid recursion depth
/// issues on deeply nested CFGs. Only visits reachable blocks.
pub fn compute_postorder(code: &IrCode) -> Vec<BlockId> {
    let num_blocks = code.num_blocks();
    let mut visited = vec![false; num_blocks];
    let mut postorder = Vec::with_capacity(num_blocks);

    // Stack entries: (block, children_processed).
    let mut stack: Vec<(BlockId, bool)> = vec![(code.entry(), false)];

    while let Some(&mut (block, ref mut children_done)) = stack.last_mut() {
        if *children_done {
            postorder.push(block);
            stack.pop();
            continue;
        }
        *children_done = true;

        if visited[block.index()] {
            stack.pop();
            continue;
        }
        visited[block.index()] = true;

        for succ in code.successors(block) {
            if !visited[succ.index()] {
                stack.push((succ, false));
            }
        }
    }

    postorder
}

pub fn compute_reverse_postorder(code: &IrCode) -> Vec<BlockId> {
    let mut rpo = compute_postorder(code);
    rpo.reverse();
    rpo
}

/// Whether a dominator enumeration includes the block itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inclusive {
    Yes,
    No,
}

/// Dominator tree over a snapshot of an [`IrCode`]'s CFG.
///
/// Uses the Cooper-Harvey-Kennedy iterative algorithm on reverse postorder.
/// Unreachable blocks have no immediate dominator; they dominate nothing
/// and are dominated only by themselves.
///
/// The tree records the code's modification count at build time so users
/// can detect a stale tree.
///
/// Reference: Cooper, Harvey, Kennedy, "A Simple, Fast Dominance Algorithm" (2001)
#[derive(Clone, Debug)]
pub struct DominatorTree {
    /// Immediate dominator per block. `idom[entry] == Some(entry)`,
    /// unreachable blocks are `None`.
    idom: Vec<Option<usize>>,
    entry: usize,
    built_at: u64,
}

impl DominatorTree {
    pub fn build(code: &IrCode) -> Self {
        let n = code.num_blocks();
        let entry = code.entry().index();
        let rpo = compute_reverse_postorder(code);

        let mut rpo_pos = vec![usize::MAX; n];
        for (pos, &block) in rpo.iter().enumerate() {
            rpo_pos[block.index()] = pos;
        }

        let mut idom: Vec<Option<usize>> = vec![None; n];
        idom[entry] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let preds = code.predecessors(block);
                let Some(mut new_idom) = preds
                    .iter()
                    .map(|p| p.index())
                    .find(|&p| idom[p].is_some())
                else {
                    continue;
                };

                for pred in preds.iter().map(|p| p.index()) {
                    if pred != new_idom && idom[pred].is_some() {
                        new_idom = Self::intersect(pred, new_idom, &idom, &rpo_pos);
                    }
                }

                if idom[block.index()] != Some(new_idom) {
                    idom[block.index()] = Some(new_idom);
                    changed = true;
                }
            }
        }

        Self {
            idom,
            entry,
            built_at: code.modification_count(),
        }
    }

    /// Modification count of the code this tree was built from.
    #[inline]
    pub fn built_at(&self) -> u64 {
        self.built_at
    }

    #[inline]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.idom[block.index()].is_some()
    }

    /// Does block `a` dominate block `b`? A block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let a_idx = a.index();
        let mut current = b.index();
        loop {
            if current == a_idx {
                return true;
            }
            match self.idom[current] {
                Some(dom) if dom != current => current = dom,
                _ => return false,
            }
        }
    }

    /// Does `a` dominate every block in `blocks`?
    pub fn dominates_all_of(&self, a: BlockId, blocks: &[BlockId]) -> bool {
        blocks.iter().all(|&b| self.dominates(a, b))
    }

    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        match self.idom[block.index()] {
            Some(dom) if dom != block.index() => Some(BlockId::from_usize(dom)),
            _ => None,
        }
    }

    /// Dominators of `block`, nearest first, ending at the entry block.
    pub fn dominator_blocks(&self, block: BlockId, inclusive: Inclusive) -> DominatorBlocks<'_> {
        let next = match inclusive {
            Inclusive::Yes => Some(block),
            Inclusive::No => self.immediate_dominator(block),
        };
        DominatorBlocks { tree: self, next }
    }

    /// CHK intersect: walk two fingers upward until they meet.
    fn intersect(mut a: usize, mut b: usize, idom: &[Option<usize>], rpo_pos: &[usize]) -> usize {
        while a != b {
            while rpo_pos[a] > rpo_pos[b] {
                let Some(next) = idom[a] else {
                    debug_assert!(false, "intersect: broken idom chain at {a}");
                    return a;
                };
                a = next;
            }
            while rpo_pos[b] > rpo_pos[a] {
                let Some(next) = idom[b] else {
                    debug_assert!(false, "intersect: broken idom chain at {b}");
                    return b;
                };
                b = next;
            }
        }
        a
    }
}

/// Iterator returned by [`DominatorTree::dominator_blocks`].
pub struct DominatorBlocks<'a> {
    tree: &'a DominatorTree,
    next: Option<BlockId>,
}

impl Iterator for DominatorBlocks<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let current = self.next?;
        self.next = if current.index() == self.tree.entry {
            None
        } else {
            self.tree.immediate_dominator(current)
        };
        Some(current)
    }
}

/// Blocks from which a target block is reachable.
///
/// A reusable marking buffer owned by whoever queries it: compute once per
/// target, query many times, drop (or [`clear`](Self::clear)) when done.
#[derive(Clone, Debug, Default)]
pub struct PredecessorMarks {
    target: Option<BlockId>,
    marked: Vec<bool>,
}

impl PredecessorMarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `target` and every block with a path to it.
    pub fn mark_transitive_predecessors(&mut self, code: &IrCode, target: BlockId) {
        self.marked.clear();
        self.marked.resize(code.num_blocks(), false);
        self.target = Some(target);

        let mut worklist = vec![target];
        self.marked[target.index()] = true;
        while let Some(block) = worklist.pop() {
            for &pred in code.predecessors(block) {
                if !self.marked[pred.index()] {
                    self.marked[pred.index()] = true;
                    worklist.push(pred);
                }
            }
        }
    }

    pub fn compute(code: &IrCode, target: BlockId) -> Self {
        let mut marks = Self::new();
        marks.mark_transitive_predecessors(code, target);
        marks
    }

    /// The block the marks were computed for.
    #[inline]
    pub fn target(&self) -> Option<BlockId> {
        self.target
    }

    #[inline]
    pub fn is_marked(&self, block: BlockId) -> bool {
        self.marked.get(block.index()).copied().unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.target = None;
        self.marked.clear();
    }
}
