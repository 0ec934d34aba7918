//! # Definite Initialization
//!
//! This pass proves that every element of every memory allocation is written
//! before it is read, passed by reference, captured, or destroyed, and
//! diagnoses the uses it cannot prove. Along the way it performs the two
//! transformations that depend on the same per-element facts:
//!
//! 1. **Assign lowering**: the raw `assign` opcode carries "store or
//!    replace" semantics. Once the analysis knows whether the destination is
//!    initialized at the assign, the opcode is rewritten into a plain store
//!    (uninitialized or trivially-typed destination) or a
//!    load/store/destroy sequence (initialized, non-trivial destination).
//! 2. **Load promotion**: a load whose value is fully determined by earlier
//!    stores on the same path is replaced by the stored values directly,
//!    reconstructing aggregates as needed. This seeds the later SSA
//!    construction with values instead of memory traffic.
//!
//! The analysis is per-allocation and per-element: tuples are split into
//! their leaves, structs are treated as a single element (a partial store
//! into a struct that is not yet fully initialized is an error, while
//! element-wise initialization of a tuple is fine).
//!
//! After every allocation has been processed, a final sweep lowers the
//! surviving raw opcodes: leftover assigns become assignments,
//! `mark_uninit` resolves to its operand, and `mark_func_escape` is erased.
//! Diagnostics always come from the analysis phase, before the sweep
//! rewrites anything.

mod access_path;
mod element_promotion;
mod use_collector;

#[cfg(test)]
mod tests;

use opal_compiler_diagnostics::DiagnosticCollection;

use crate::passes::LirPass;
use crate::{InstBuilder, InstId, InstructionKind, LirFunction, LirModule, LirType, PrettyPrint};

use access_path::top_level_element_count;
use element_promotion::ElementPromotion;
use use_collector::{ElementUse, ElementUses, ElementUseCollector, UseKind};

/// Configuration for the definite initialization pass
#[derive(Debug, Clone, Default)]
pub struct DefiniteInitOptions {
    /// Gates the experimental forwarding of `copy_addr` sources during load
    /// promotion, and dumps each function after analysis for debugging.
    /// The forwarding path is not implemented; copies conservatively clobber
    /// the tracked values either way.
    pub enable_copy_addr_forwarding: bool,
}

/// Counters reported by the definite initialization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefiniteInitStats {
    /// Number of loads promoted to direct value references
    pub loads_promoted: usize,
    /// Number of assign instructions rewritten
    pub assigns_rewritten: usize,
}

/// Perform definite initialization analysis on every function of the module,
/// promote the loads it enables, and lower the raw-only opcodes.
///
/// Returns the diagnostics produced by the analysis and the transformation
/// counters. The module is left in canonical form: no `assign`,
/// `mark_uninit`, or `mark_func_escape` instructions remain, even in
/// functions that produced diagnostics.
pub fn perform_definite_initialization(
    module: &mut LirModule,
    options: &DefiniteInitOptions,
) -> (DiagnosticCollection, DefiniteInitStats) {
    let mut diagnostics = DiagnosticCollection::new();
    let mut stats = DefiniteInitStats::default();

    for function in module.functions_mut() {
        check_definite_initialization(function, &mut stats, &mut diagnostics);

        if options.enable_copy_addr_forwarding {
            tracing::debug!("function after analysis:\n{}", function.pretty_print(0));
        }

        lower_raw_operations(function, &mut stats);
    }

    (diagnostics, stats)
}

/// The definite initialization pass, packaged for a [`PassManager`] pipeline
///
/// Diagnostics and counters accumulate across the functions the pass runs on
/// and can be read back after the pipeline completes.
///
/// [`PassManager`]: crate::passes::PassManager
#[derive(Default)]
pub struct DefiniteInitPass {
    options: DefiniteInitOptions,
    pub diagnostics: DiagnosticCollection,
    pub stats: DefiniteInitStats,
}

impl DefiniteInitPass {
    /// Create the pass with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the pass with explicit options
    pub fn with_options(options: DefiniteInitOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }
}

impl LirPass for DefiniteInitPass {
    fn run(&mut self, function: &mut LirFunction) -> bool {
        let before = self.stats.clone();
        let diags_before = self.diagnostics.len();

        check_definite_initialization(function, &mut self.stats, &mut self.diagnostics);

        if self.options.enable_copy_addr_forwarding {
            tracing::debug!("function after analysis:\n{}", function.pretty_print(0));
        }

        let swept = lower_raw_operations(function, &mut self.stats);

        swept || self.stats != before || self.diagnostics.len() != diags_before
    }

    fn name(&self) -> &'static str {
        "DefiniteInitialization"
    }
}

/// The element type of an allocation's memory
pub(crate) fn memory_element_type(function: &LirFunction, memory: InstId) -> LirType {
    match &function.inst(memory).kind {
        InstructionKind::AllocBox { ty, .. } | InstructionKind::AllocStack { ty, .. } => ty.clone(),
        InstructionKind::MarkUninit { dest, .. } => function
            .get_value_type(*dest)
            .and_then(LirType::pointee)
            .cloned()
            .unwrap_or(LirType::Unknown),
        other => panic!("not an allocation: {other:?}"),
    }
}

/// Check every allocation of the function, in program order
fn check_definite_initialization(
    function: &mut LirFunction,
    stats: &mut DefiniteInitStats,
    diagnostics: &mut DiagnosticCollection,
) {
    // Snapshot the allocation sites first; processing inserts and erases
    // instructions but never creates new allocations.
    let allocations: Vec<InstId> = function
        .basic_blocks
        .iter()
        .flat_map(|block| block.insts.iter().copied())
        .filter(|&id| function.inst(id).is_allocation())
        .collect();

    for memory in allocations {
        tracing::debug!(
            "definite-init looking at: {}",
            function.inst(memory).pretty_print(0)
        );

        process_allocation(function, memory, stats, diagnostics);

        // A box that promotion has drained of every use can go away.
        if matches!(function.inst(memory).kind, InstructionKind::AllocBox { .. }) {
            let dest = function
                .inst(memory)
                .destination()
                .expect("allocations define their address");
            if !function.value_has_uses(dest) {
                function.erase_instruction(memory);
            }
        }
    }
}

/// Collect the uses of one allocation and run the per-element pipeline
fn process_allocation(
    function: &mut LirFunction,
    memory: InstId,
    stats: &mut DefiniteInitStats,
    diagnostics: &mut DiagnosticCollection,
) {
    let root = function
        .inst(memory)
        .destination()
        .expect("allocations define their address");
    let memory_ty = memory_element_type(function, memory);

    // Uses are bucketed by top-level element: tuples element-wise, structs
    // as a whole.
    let element_count = top_level_element_count(&memory_ty);
    let mut uses: Vec<ElementUses> = (0..element_count).map(|_| Vec::new()).collect();

    ElementUseCollector::new(function, &mut uses).collect_uses(root, 0);

    // A release or dealloc ends the lifetime of every element at once, so it
    // lands in every bucket. Uninitialized-memory markers have no lifetime
    // of their own and collect none.
    if !matches!(function.inst(memory).kind, InstructionKind::MarkUninit { .. }) {
        for user in function.users_of(root) {
            if matches!(
                function.inst(user).kind,
                InstructionKind::Release { .. } | InstructionKind::DeallocStack { .. }
            ) {
                for bucket in uses.iter_mut() {
                    bucket.push(ElementUse {
                        inst: Some(user),
                        kind: UseKind::Release,
                    });
                }
            }
        }
    }

    for (element, element_uses) in uses.iter_mut().enumerate() {
        ElementPromotion::new(function, memory, element, element_uses, stats, diagnostics).run();
    }
}

/// Emit the sequence an assign instruction lowers to once we know whether it
/// is an initialization. Returns the ids of the instructions that replaced
/// it, in order.
pub(crate) fn lower_assign(
    function: &mut LirFunction,
    assign: InstId,
    is_initialization: bool,
    stats: &mut DefiniteInitStats,
) -> Vec<InstId> {
    let (value, address) = match &function.inst(assign).kind {
        InstructionKind::Assign { value, address } => (*value, *address),
        other => panic!("lower_assign on non-assign: {other:?}"),
    };
    let span = function.inst(assign).span;

    tracing::debug!(
        is_initialization,
        "lowering: {}",
        function.inst(assign).pretty_print(0)
    );
    stats.assigns_rewritten += 1;

    let dest_ty = function.address_pointee(address);
    let mut builder = InstBuilder::before(function, assign).with_span(span);

    if is_initialization || dest_ty.is_trivial() {
        // Nothing lives at the destination, or nothing needs destroying.
        builder.store(value, address);
    } else {
        // The incoming value already carries its ownership; load the old
        // value out of the way, install the new one, then destroy the old.
        let old = builder.load(address);
        builder.store(value, address);
        builder.destroy_value(crate::Value::Operand(old));
    }

    let inserted = builder.into_inserted();
    function.erase_instruction(assign);
    inserted
}

/// Lower the raw opcodes that only exist for this pass. Assigns that were
/// never classified (their element errored out) lower as assignments.
fn lower_raw_operations(function: &mut LirFunction, stats: &mut DefiniteInitStats) -> bool {
    let mut modified = false;

    let ids: Vec<InstId> = function
        .basic_blocks
        .iter()
        .flat_map(|block| block.insts.iter().copied())
        .collect();

    for id in ids {
        if function.inst(id).parent_block().is_none() {
            continue;
        }

        match &function.inst(id).kind {
            InstructionKind::Assign { .. } => {
                lower_assign(function, id, false, stats);
                modified = true;
            }
            InstructionKind::MarkUninit { dest, address } => {
                let (dest, address) = (*dest, *address);
                function.replace_all_uses(dest, address);
                function.erase_instruction(id);
                modified = true;
            }
            InstructionKind::MarkFuncEscape { .. } => {
                function.erase_instruction(id);
                modified = true;
            }
            _ => {}
        }
    }

    modified
}
