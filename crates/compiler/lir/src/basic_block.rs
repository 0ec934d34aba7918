//! # LIR Basic Block
//!
//! This module defines basic blocks, the fundamental building blocks of the CFG.
//! A basic block is a straight-line sequence of instructions with exactly one entry
//! point and one exit point.

use crate::{BasicBlockId, InstId, Terminator};

/// A basic block in the Control Flow Graph
///
/// A basic block holds an ordered list of instruction ids into the function's
/// instruction arena, plus the terminator that transfers control out.
///
/// # Invariants
///
/// - Every basic block must have exactly one terminator
/// - Instructions within a block execute sequentially
/// - Control can only enter at the beginning and exit at the end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Optional name for debugging purposes
    pub name: Option<String>,

    /// The ordered instructions of this block, by arena id
    pub insts: Vec<InstId>,

    /// The terminator that ends this block and transfers control
    pub terminator: Terminator,

    /// Explicit CFG edges - predecessors of this block
    pub preds: Vec<BasicBlockId>,
}

impl BasicBlock {
    /// Creates a new empty basic block with an unreachable terminator
    ///
    /// The unreachable terminator serves as a placeholder until the real
    /// terminator is set during construction.
    pub const fn new() -> Self {
        Self {
            name: None,
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
            preds: Vec::new(),
        }
    }

    /// Creates a new basic block with a name
    pub const fn with_name(name: String) -> Self {
        Self {
            name: Some(name),
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
            preds: Vec::new(),
        }
    }

    /// Sets the terminator for this block
    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    /// Returns the number of instructions in this block
    pub const fn instruction_count(&self) -> usize {
        self.insts.len()
    }

    /// Returns true if this block is empty (no instructions)
    pub const fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Returns the position of an instruction within this block
    pub fn position_of(&self, inst: InstId) -> Option<usize> {
        self.insts.iter().position(|&i| i == inst)
    }

    /// Add a predecessor, avoiding duplicates
    pub fn add_pred(&mut self, pred: BasicBlockId) {
        if !self.preds.contains(&pred) {
            self.preds.push(pred);
        }
    }

    /// Remove a predecessor
    pub fn remove_pred(&mut self, pred: BasicBlockId) {
        self.preds.retain(|&p| p != pred);
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self::new()
    }
}
