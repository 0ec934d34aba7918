//! # Per-Element Promotion
//!
//! The heavy lifting for one element of one allocation: decide whether every
//! use observes initialized memory, rewrite assigns once their
//! initialization status is known, and promote loads whose values are fully
//! determined by earlier stores in the same block.

use chumsky::span::SimpleSpan;
use opal_compiler_diagnostics::{Diagnostic, DiagnosticCollection};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    BasicBlockId, InstBuilder, InstId, InstructionKind, LirFunction, LirType, PrettyPrint, Value,
};

use super::access_path::{
    compute_access_path, extract_sub_element, path_string_to_element, sub_element_count,
};
use super::use_collector::{ElementUses, UseKind};
use super::{lower_assign, memory_element_type, DefiniteInitStats};

/// Initialization status of an element at a program point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiKind {
    Yes,
    No,
    /// Initialized on some paths but not others. The dataflow does not
    /// currently distinguish this from No; partial-initialization errors are
    /// reached through partial stores instead.
    #[allow(dead_code)]
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum EscapeKind {
    #[default]
    Unknown,
    Yes,
}

/// Memoized cross-block liveness of the element's initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Availability {
    #[default]
    Unknown,
    NotLiveOut,
    LiveOut,
    /// Set while this block's liveness is being computed; a recursive query
    /// hitting it is a CFG cycle and speculates live-out.
    Computing,
}

/// Per-block facts about one element, filled in lazily
#[derive(Debug, Clone, Copy, Default)]
struct LiveOutBlockState {
    /// A path to the end of this block crosses an escape site. Tracked for a
    /// future block-sensitive escape refinement; promotion currently bails
    /// on any escape in the function.
    #[allow(dead_code)]
    escape: EscapeKind,

    /// A store, inout use, or escape of the element occurs in this block
    has_non_load_use: bool,

    availability: Availability,
}

/// Analysis and transformation of a single element's uses
pub(crate) struct ElementPromotion<'a> {
    function: &'a mut LirFunction,

    /// The allocation instruction; the start of the element's lifetime
    memory: InstId,
    element: usize,

    /// Sub-element count of the whole allocation, the width of the
    /// availability bit-vectors
    num_memory_sub_elements: usize,

    uses: &'a mut ElementUses,

    per_block_info: FxHashMap<BasicBlockId, LiveOutBlockState>,

    /// The uses that are not loads: stores, inout uses, and escapes.
    /// The allocation itself is included so backward scans can find the
    /// start of the lifetime.
    non_load_uses: FxHashSet<InstId>,

    /// Does this element escape anywhere in the function
    has_any_escape: bool,

    /// One error per element as a policy decision; nothing further is
    /// checked or promoted once set.
    had_error: bool,

    stats: &'a mut DefiniteInitStats,
    diagnostics: &'a mut DiagnosticCollection,
}

impl<'a> ElementPromotion<'a> {
    pub(crate) fn new(
        function: &'a mut LirFunction,
        memory: InstId,
        element: usize,
        uses: &'a mut ElementUses,
        stats: &'a mut DefiniteInitStats,
        diagnostics: &'a mut DiagnosticCollection,
    ) -> Self {
        let memory_ty = memory_element_type(function, memory);
        let num_memory_sub_elements = sub_element_count(&memory_ty);

        let mut this = Self {
            function,
            memory,
            element,
            num_memory_sub_elements,
            uses,
            per_block_info: FxHashMap::default(),
            non_load_uses: FxHashSet::default(),
            has_any_escape: false,
            had_error: false,
            stats,
            diagnostics,
        };
        this.analyze_uses();
        this
    }

    /// First step: fold the use list into the per-block state the dataflow
    /// queries are answered from.
    fn analyze_uses(&mut self) {
        for i in 0..self.uses.len() {
            let (inst, kind) = (self.uses[i].inst, self.uses[i].kind);
            let inst = inst.expect("use entries are intact before processing starts");

            if kind == UseKind::Load {
                continue;
            }

            self.non_load_uses.insert(inst);

            let block = self
                .function
                .inst(inst)
                .parent_block()
                .expect("uses live in blocks");
            let info = self.per_block_info.entry(block).or_default();
            info.has_non_load_use = true;

            // Every non-load use is checked to be live-in or a full-element
            // store, so for cross-block purposes its block ends initialized.
            info.availability = Availability::LiveOut;

            if kind == UseKind::Escape {
                self.has_any_escape = true;
                info.escape = EscapeKind::Yes;
            }
        }

        // The allocation is not really a use, but seeding it here lets the
        // dataflow walks find the start of the lifetime.
        self.non_load_uses.insert(self.memory);
        let memory_block = self
            .function
            .inst(self.memory)
            .parent_block()
            .expect("allocation lives in a block");
        let info = self.per_block_info.entry(memory_block).or_default();
        info.has_non_load_use = true;

        // Unless a later store in the definition block said otherwise, the
        // element is not live out of it.
        if info.availability == Availability::Unknown {
            info.availability = Availability::NotLiveOut;
        }
    }

    /// Work through all the uses: check definitive initialization, rewrite
    /// assigns, then promote loads.
    pub(crate) fn run(&mut self) {
        // The use list can grow while assigns are rewritten, so iterate by
        // index and skip entries that were expanded away.
        let mut i = 0;
        while i < self.uses.len() {
            let (inst, kind) = (self.uses[i].inst, self.uses[i].kind);
            i += 1;

            let Some(inst) = inst else { continue };

            match kind {
                UseKind::Load => self.handle_load_use(inst),
                UseKind::Store => self.handle_store_use(inst, false),
                UseKind::PartialStore => self.handle_store_use(inst, true),
                UseKind::InOutUse => self.handle_inout_use(inst),
                UseKind::Escape => self.handle_escape(inst),
                UseKind::Release => self.handle_release(inst),
            }

            if self.had_error {
                return;
            }
        }

        // All the definitive initialization requirements hold; try to
        // promote loads.
        for i in 0..self.uses.len() {
            let (inst, kind) = (self.uses[i].inst, self.uses[i].kind);
            if let Some(inst) = inst {
                if kind == UseKind::Load {
                    self.promote_load(inst);
                }
            }
        }
    }

    // ==================== Initialization checking ====================

    /// A load-like use: the element must be definitely initialized
    fn handle_load_use(&mut self, inst: InstId) {
        if self.check_definitely_init(inst) != DiKind::Yes {
            self.diagnose_init_error(inst, Diagnostic::variable_used_before_initialized);
        }
    }

    fn handle_store_use(&mut self, inst: InstId, is_partial_store: bool) {
        // Full-element writes that are already known to be initializations
        // need no checking: plain stores, variable initializations, and
        // copies or weak stores carrying the initialization flag are only
        // produced when they are correct. Assigns, non-init copies, and
        // every partial store still have to be classified.
        if !is_partial_store {
            match &self.function.inst(inst).kind {
                InstructionKind::Assign { .. } => {}
                InstructionKind::CopyAddr { is_init, .. }
                | InstructionKind::StoreWeak { is_init, .. } => {
                    if *is_init {
                        return;
                    }
                }
                InstructionKind::InitExistential { .. }
                | InstructionKind::UpcastExistential { .. }
                | InstructionKind::EnumDataAddr { .. }
                | InstructionKind::InjectEnumAddr { .. } => return,
                _ => return,
            }
        }

        let di = self.check_definitely_init(inst);

        // A partial store into a struct that is not fully initialized yet
        // cannot be expressed without member-wise lifetimes; diagnose it.
        if is_partial_store && di != DiKind::Yes {
            self.diagnose_init_error(inst, Diagnostic::struct_not_fully_initialized);
            return;
        }

        if di == DiKind::Partial {
            self.diagnose_init_error(inst, Diagnostic::variable_initialized_on_some_paths);
            return;
        }

        // Copies and weak stores are not rewritten; they just learn whether
        // they are initializing their destination.
        match &mut self.function.inst_mut(inst).kind {
            InstructionKind::CopyAddr { is_init, .. }
            | InstructionKind::StoreWeak { is_init, .. } => {
                *is_init = di == DiKind::No;
                return;
            }
            _ => {}
        }

        // Assigns lower now that their initialization status is known.
        if matches!(self.function.inst(inst).kind, InstructionKind::Assign { .. }) {
            self.non_load_uses.remove(&inst);

            let inserted = lower_assign(self.function, inst, di == DiKind::No, self.stats);

            // The lowering's stores and loads are uses of this element too;
            // feed them back so later phases see them.
            for new_inst in inserted {
                match &self.function.inst(new_inst).kind {
                    InstructionKind::Store { .. } => {
                        self.non_load_uses.insert(new_inst);
                        self.uses.push(super::use_collector::ElementUse {
                            inst: Some(new_inst),
                            kind: UseKind::Store,
                        });
                    }
                    InstructionKind::Load { .. } => {
                        self.uses.push(super::use_collector::ElementUse {
                            inst: Some(new_inst),
                            kind: UseKind::Load,
                        });
                    }
                    _ => {}
                }
            }
        }
    }

    fn handle_inout_use(&mut self, inst: InstId) {
        if self.check_definitely_init(inst) != DiKind::Yes {
            self.diagnose_init_error(inst, Diagnostic::variable_inout_before_initialized);
        }
    }

    fn handle_escape(&mut self, inst: InstId) {
        if self.check_definitely_init(inst) == DiKind::Yes {
            return;
        }

        if matches!(
            self.function.inst(inst).kind,
            InstructionKind::MarkFuncEscape { .. }
        ) {
            self.diagnose_init_error(inst, Diagnostic::global_variable_function_use_uninit);
        } else {
            self.diagnose_init_error(inst, Diagnostic::variable_escape_before_initialized);
        }
    }

    /// When the allocation is destroyed it might be completely or partially
    /// uninitialized. Every element must be initialized at a release.
    fn handle_release(&mut self, inst: InstId) {
        if self.check_definitely_init(inst) != DiKind::Yes {
            self.diagnose_init_error(inst, Diagnostic::variable_destroyed_before_initialized);
        }
    }

    /// Determine whether the element is definitely initialized immediately
    /// before `inst`.
    fn check_definitely_init(&mut self, inst: InstId) -> DiKind {
        let (block, position) = self
            .function
            .position_of_inst(inst)
            .expect("use must be in a block");

        // If something touches the element in this block, scan backward: the
        // closest prior touch decides. Finding the allocation itself means
        // nothing has been stored yet.
        let has_local_use = self
            .per_block_info
            .get(&block)
            .is_some_and(|info| info.has_non_load_use);
        if has_local_use {
            for j in (0..position).rev() {
                let prior = self.function.basic_blocks[block].insts[j];
                if !self.non_load_uses.contains(&prior) {
                    continue;
                }
                if prior == self.memory {
                    return DiKind::No;
                }
                return DiKind::Yes;
            }
        }

        // Not locally decidable; the element must be live out of every
        // predecessor.
        let preds = self.function.basic_blocks[block].preds.clone();
        for pred in preds {
            if !self.is_live_out(pred) {
                return DiKind::No;
            }
        }

        DiKind::Yes
    }

    /// Is the element initialized on every path leaving `block`?
    /// Memoized; cycles are broken by speculating live-out, which is sound
    /// because a block containing any non-load use ends initialized on every
    /// path through it.
    fn is_live_out(&mut self, block: BasicBlockId) -> bool {
        match self.per_block_info.entry(block).or_default().availability {
            Availability::NotLiveOut => return false,
            Availability::LiveOut => return true,
            Availability::Computing => return true,
            Availability::Unknown => {}
        }

        self.set_availability(block, Availability::Computing);

        let preds = self.function.basic_blocks[block].preds.clone();
        for pred in preds {
            if !self.is_live_out(pred) {
                self.set_availability(block, Availability::NotLiveOut);
                return false;
            }
        }

        self.set_availability(block, Availability::LiveOut);
        true
    }

    fn set_availability(&mut self, block: BasicBlockId, availability: Availability) {
        self.per_block_info
            .entry(block)
            .or_default()
            .availability = availability;
    }

    // ==================== Diagnostics ====================

    fn diagnose_init_error(
        &mut self,
        use_inst: InstId,
        make: fn(&str, SimpleSpan<usize>) -> Diagnostic,
    ) {
        self.had_error = true;

        let mut name = self.memory_name();

        // If the allocation is a tuple with multiple elements, dive in to
        // explain which element is at fault.
        let memory_ty = memory_element_type(self.function, self.memory);
        path_string_to_element(&memory_ty, self.element, &mut name);

        let use_span = self.span_of(use_inst);
        let def_span = self.span_of(self.memory);

        self.diagnostics.add(
            make(&name, use_span).with_related_span(def_span, "variable defined here".to_string()),
        );
    }

    fn memory_name(&self) -> String {
        match &self.function.inst(self.memory).kind {
            InstructionKind::AllocBox { name, .. } | InstructionKind::AllocStack { name, .. } => {
                name.clone().unwrap_or_else(|| "<unknown>".to_string())
            }
            _ => "<unknown>".to_string(),
        }
    }

    fn span_of(&self, inst: InstId) -> SimpleSpan<usize> {
        self.function
            .inst(inst)
            .span
            .unwrap_or_else(|| SimpleSpan::from(0..0))
    }

    // ==================== Load promotion ====================

    /// This element passed its initialization checks; see whether the values
    /// a load observes are all known, and if so rebuild them as SSA values.
    fn promote_load(&mut self, inst: InstId) {
        // Only plain loads. Weak loads are skipped because the referent can
        // be deallocated asynchronously, and copies are not forwarded.
        let (dest, address) = match &self.function.inst(inst).kind {
            InstructionKind::Load { dest, address } => (*dest, *address),
            _ => return,
        };

        // Promotion is not allowed anywhere in a function the element
        // escapes from.
        if self.has_any_escape {
            return;
        }

        let load_ty = self
            .function
            .get_value_type(dest)
            .cloned()
            .unwrap_or(LirType::Unknown);
        let first_element = compute_access_path(self.function, address, self.memory);
        let load_sub_elements = sub_element_count(&load_ty);

        let mut required = vec![false; self.num_memory_sub_elements];
        for bit in required
            .iter_mut()
            .skip(first_element)
            .take(load_sub_elements)
        {
            *bit = true;
        }

        let mut available: Vec<Option<(Value, usize)>> =
            vec![None; self.num_memory_sub_elements];

        if !self.compute_available_values(inst, &mut required, &mut available) {
            return;
        }

        debug_assert!(
            load_sub_elements == 0 || available.iter().any(Option::is_some),
            "claimed available values but found none"
        );

        let span = self.function.inst(inst).span;
        let mut builder = InstBuilder::before(self.function, inst).with_span(span);
        let new_value = aggregate_available_values(
            &mut builder,
            &load_ty,
            Some(address),
            &available,
            first_element,
        );
        drop(builder);

        tracing::debug!(
            "promoting load: {} to value {}",
            self.function.inst(inst).pretty_print(0),
            new_value.pretty_print(0)
        );

        self.function.replace_all_uses(dest, new_value);
        self.function.erase_instruction(inst);
        remove_dead_addressing_instructions(self.function, address);
        self.stats.loads_promoted += 1;
    }

    /// Find available values for the demanded sub-elements, scanning the
    /// load's block backward. Cross-block discovery is not performed; a load
    /// fed only by stores in other blocks is simply left in place.
    ///
    /// Returns true if promotion can proceed: some value was found, or no
    /// sub-elements were demanded at all (a load of an empty aggregate).
    fn compute_available_values(
        &self,
        starting_from: InstId,
        required: &mut [bool],
        result: &mut [Option<(Value, usize)>],
    ) -> bool {
        if required.iter().all(|r| !r) {
            return true;
        }

        let mut found_some_values = false;
        let (block, position) = self
            .function
            .position_of_inst(starting_from)
            .expect("load must be in a block");

        let has_local_use = self
            .per_block_info
            .get(&block)
            .is_some_and(|info| info.has_non_load_use);
        if has_local_use {
            for j in (0..position).rev() {
                let prior = self.function.basic_blocks[block].insts[j];
                if !self.non_load_uses.contains(&prior) {
                    continue;
                }

                found_some_values |= self.update_available_values(prior, required, result);

                if required.iter().all(|r| !r) {
                    return found_some_values;
                }
            }
        }

        found_some_values
    }

    /// One non-load use found while scanning backward: a store or assign
    /// provides values for the sub-elements it covers; anything else
    /// (an inout call, an escape, or the allocation itself) clobbers every
    /// value still being looked for.
    fn update_available_values(
        &self,
        inst: InstId,
        required: &mut [bool],
        result: &mut [Option<(Value, usize)>],
    ) -> bool {
        match &self.function.inst(inst).kind {
            InstructionKind::Store { value, address }
            | InstructionKind::Assign { value, address } => {
                let start = compute_access_path(self.function, *address, self.memory);
                let value_ty = self.function.type_of_value(*value);

                let mut produced_something = false;
                for i in 0..sub_element_count(&value_ty) {
                    if !required[start + i] {
                        continue;
                    }
                    result[start + i] = Some((*value, i));
                    required[start + i] = false;
                    produced_something = true;
                }

                produced_something
            }
            _ => {
                for bit in required.iter_mut() {
                    *bit = false;
                }
                false
            }
        }
    }
}

/// Are any of the sub-elements in the range missing a value?
fn any_missing(
    first: usize,
    count: usize,
    values: &[Option<(Value, usize)>],
) -> bool {
    values[first..first + count].iter().any(Option::is_none)
}

/// Build a value of `load_ty` out of the available sub-element values,
/// emitting aggregate constructions as needed and falling back to sub-loads
/// from `address` for anything missing.
fn aggregate_available_values(
    builder: &mut InstBuilder,
    load_ty: &LirType,
    address: Option<Value>,
    available: &[Option<(Value, usize)>],
    first_element: usize,
) -> Value {
    // Fast path: if one stored value covers the whole requested range with
    // sequential offsets and already has the right type, hand it back
    // directly rather than rebuilding single-field aggregates.
    if first_element < available.len() {
        if let Some((first_value, 0)) = available[first_element] {
            if builder.function().type_of_value(first_value) == *load_ty {
                let count = sub_element_count(load_ty);
                let all_match = (0..count)
                    .all(|i| available[first_element + i] == Some((first_value, i)));
                if all_match {
                    return first_value;
                }
            }
        }
    }

    match load_ty {
        LirType::Tuple(fields) => {
            let mut result_elements = Vec::with_capacity(fields.len());
            let mut first = first_element;

            for (element_no, field_ty) in fields.iter().enumerate() {
                let count = sub_element_count(field_ty);

                // If anything in this field is missing, compute an address
                // to load the gaps from.
                let element_addr = if any_missing(first, count, available) {
                    let base = address.expect("missing sub-elements need a source address");
                    Some(Value::Operand(builder.tuple_element_addr(base, element_no)))
                } else {
                    None
                };

                result_elements.push(aggregate_available_values(
                    builder,
                    field_ty,
                    element_addr,
                    available,
                    first,
                ));
                first += count;
            }

            Value::Operand(builder.tuple(result_elements, load_ty.clone()))
        }

        LirType::Struct { fields, .. } => {
            let mut result_fields = Vec::with_capacity(fields.len());
            let mut first = first_element;

            for (field_no, (_, field_ty)) in fields.iter().enumerate() {
                let count = sub_element_count(field_ty);

                let field_addr = if any_missing(first, count, available) {
                    let base = address.expect("missing sub-elements need a source address");
                    Some(Value::Operand(builder.struct_element_addr(base, field_no)))
                } else {
                    None
                };

                result_fields.push(aggregate_available_values(
                    builder,
                    field_ty,
                    field_addr,
                    available,
                    first,
                ));
                first += count;
            }

            Value::Operand(builder.struct_value(result_fields, load_ty.clone()))
        }

        // A scalar: use the recorded value if there is one, otherwise emit a
        // (smaller) load.
        _ => match available[first_element] {
            None => {
                let base = address.expect("missing sub-elements need a source address");
                Value::Operand(builder.load(base))
            }
            Some((value, offset)) => extract_sub_element(builder, value, offset),
        },
    }
}

/// After a promoted load is erased, its feeding projection chain may be
/// dead; peel it off from the leaf upward.
fn remove_dead_addressing_instructions(function: &mut LirFunction, pointer: Value) {
    let Value::Operand(id) = pointer else { return };
    if function.value_has_uses(id) {
        return;
    }
    let Some(def) = function.def_of_value(id) else {
        return;
    };
    let base = match &function.inst(def).kind {
        InstructionKind::TupleElementAddr { base, .. }
        | InstructionKind::StructElementAddr { base, .. } => *base,
        _ => return,
    };
    function.erase_instruction(def);
    remove_dead_addressing_instructions(function, base);
}
