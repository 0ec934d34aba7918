//! # Element Use Collection
//!
//! Walks the users of an allocation's address and buckets every access into
//! the top-level element it touches, classified by how it observes the
//! memory. Whole-tuple loads, stores, and assigns are scalarized into
//! per-field operations first so that later phases only ever see accesses
//! confined to a single element.

use crate::{
    InstBuilder, InstId, InstructionKind, LirFunction, ParamConvention, PrettyPrint, Value,
    ValueId,
};

use super::access_path::top_level_element_count;

/// How an instruction observes an element of the allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UseKind {
    /// The instruction reads the element
    Load,

    /// The instruction writes the whole element
    Store,

    /// The instruction writes into a member of a larger struct element
    PartialStore,

    /// The element is passed by mutable reference to a callee; both a read
    /// and a may-write
    InOutUse,

    /// The element escapes the analysis, e.g. captured by a closure
    Escape,

    /// The allocation is being destroyed; the element must be fully
    /// initialized here
    Release,
}

/// One recorded use of an element. The instruction slot is cleared when the
/// instruction is expanded away mid-analysis; cleared entries are skipped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ElementUse {
    pub inst: Option<InstId>,
    pub kind: UseKind,
}

/// All recorded uses of a single element, in discovery order.
/// The list grows while it is iterated, so consumers index rather than
/// borrow an iterator.
pub(crate) type ElementUses = Vec<ElementUse>;

/// Walks an allocation's use lists and populates the per-element buckets
pub(crate) struct ElementUseCollector<'a> {
    function: &'a mut LirFunction,
    uses: &'a mut Vec<ElementUses>,

    /// When walking below a struct field projection, stores no longer cover
    /// a whole element; they become partial stores, and aggregate operations
    /// stop fanning out across tuple buckets.
    in_struct_sub_element: bool,

    /// Set while walking below an enum payload projection, which narrows
    /// aggregate operations the same way.
    in_enum_sub_element: bool,
}

impl<'a> ElementUseCollector<'a> {
    pub(crate) fn new(function: &'a mut LirFunction, uses: &'a mut Vec<ElementUses>) -> Self {
        Self {
            function,
            uses,
            in_struct_sub_element: false,
            in_enum_sub_element: false,
        }
    }

    /// Collect every use of `pointer`, attributing them to buckets starting
    /// at `base_element`.
    pub(crate) fn collect_uses(&mut self, pointer: ValueId, base_element: usize) {
        let pointee = self.function.address_pointee(Value::Operand(pointer));
        let as_value = Value::Operand(pointer);

        // Whole-aggregate accesses that need to be split into per-field
        // operations. Rewriting happens after the walk so the user list
        // stays stable while we read it.
        let mut uses_to_scalarize: Vec<InstId> = Vec::new();

        for user in self.function.users_of(pointer) {
            let kind = self.function.inst(user).kind.clone();
            match kind {
                // Projections compute a sub-address; a helper adjusts the
                // bucket index and recurses.
                InstructionKind::TupleElementAddr { .. }
                | InstructionKind::StructElementAddr { .. } => {
                    self.collect_element_uses(user, base_element);
                }

                InstructionKind::Load { .. } => {
                    if pointee.is_tuple() {
                        uses_to_scalarize.push(user);
                    } else {
                        self.push_use(base_element, user, UseKind::Load);
                    }
                }

                // Weak loads read the whole cell and are never split.
                InstructionKind::LoadWeak { .. } => {
                    self.push_use(base_element, user, UseKind::Load);
                }

                InstructionKind::Store { value, address }
                | InstructionKind::Assign { value, address } => {
                    if address == as_value {
                        if pointee.is_tuple() {
                            uses_to_scalarize.push(user);
                        } else {
                            self.push_use(base_element, user, self.store_kind());
                        }
                    }
                    // Storing the address itself somewhere is an escape.
                    if value == as_value {
                        self.add_element_uses(base_element, &pointee, user, UseKind::Escape);
                    }
                }

                InstructionKind::StoreWeak { value, address, .. } => {
                    if address == as_value {
                        debug_assert!(!pointee.is_tuple(), "weak stores cover whole cells");
                        self.push_use(base_element, user, self.store_kind());
                    }
                    if value == as_value {
                        self.add_element_uses(base_element, &pointee, user, UseKind::Escape);
                    }
                }

                // A copy spans the whole aggregate on both sides; the same
                // instruction can appear as both a load and a store of this
                // allocation.
                InstructionKind::CopyAddr { src, dest_addr, .. } => {
                    if src == as_value {
                        self.add_element_uses(base_element, &pointee, user, UseKind::Load);
                    }
                    if dest_addr == as_value {
                        self.add_element_uses(base_element, &pointee, user, self.store_kind());
                    }
                }

                InstructionKind::InitializeVar { .. } => {
                    self.add_element_uses(base_element, &pointee, user, self.store_kind());
                }

                // Calls classify each address argument by the callee's
                // convention for that parameter.
                InstructionKind::Apply { args, signature, .. } => {
                    for (arg, (_, convention)) in args.iter().zip(signature.params.iter()) {
                        if *arg != as_value {
                            continue;
                        }
                        match convention {
                            ParamConvention::IndirectResult => {
                                debug_assert!(
                                    !self.in_struct_sub_element,
                                    "indirect results initialize whole elements"
                                );
                                self.add_element_uses(base_element, &pointee, user, UseKind::Store);
                            }
                            ParamConvention::IndirectInOut => {
                                self.add_element_uses(base_element, &pointee, user, UseKind::InOutUse);
                            }
                            ParamConvention::Direct => {
                                self.add_element_uses(base_element, &pointee, user, UseKind::Escape);
                            }
                        }
                    }
                }

                // Walking into an enum payload: subsequent accesses still
                // charge this bucket, but no longer as whole-element writes.
                InstructionKind::EnumDataAddr { dest, .. } => {
                    let saved = self.in_enum_sub_element;
                    self.in_enum_sub_element = true;
                    self.collect_uses(dest, base_element);
                    self.in_enum_sub_element = saved;
                }

                // Initializing an existential writes the container, and the
                // concrete storage it returns is a sub-element of it.
                InstructionKind::InitExistential { dest, .. } => {
                    self.push_use(base_element, user, UseKind::Store);

                    let saved = self.in_struct_sub_element;
                    self.in_struct_sub_element = true;
                    self.collect_uses(dest, base_element);
                    self.in_struct_sub_element = saved;
                }

                InstructionKind::InjectEnumAddr { .. } => {
                    self.push_use(base_element, user, UseKind::Store);
                }

                InstructionKind::UpcastExistential { src, dest_addr } => {
                    if dest_addr == as_value {
                        self.push_use(base_element, user, UseKind::Store);
                    }
                    if src == as_value {
                        self.push_use(base_element, user, UseKind::Load);
                    }
                }

                InstructionKind::ProjectExistential { .. }
                | InstructionKind::ProtocolMethod { .. } => {
                    self.push_use(base_element, user, UseKind::Load);
                }

                // Lifetime-ending users of the allocation itself are
                // bucketed by the driver, across every element.
                InstructionKind::Release { .. } | InstructionKind::DeallocStack { .. } => {}

                // Anything else is beyond the analysis: the address escapes.
                _ => {
                    self.add_element_uses(base_element, &pointee, user, UseKind::Escape);
                }
            }
        }

        // Split the whole-tuple accesses into per-field operations, then
        // recurse into the new element addresses. This can scalarize further
        // levels of nesting.
        if !uses_to_scalarize.is_empty() {
            let element_addrs = self.scalarized_element_addresses(pointer);

            for user in uses_to_scalarize {
                tracing::debug!("scalarizing: {}", self.function.inst(user).pretty_print(0));
                self.scalarize_access(user, &element_addrs);
            }

            for &element_addr in &element_addrs {
                self.collect_element_uses(element_addr, base_element);
            }
        }
    }

    /// Whether stores at the current walk depth cover a whole element
    const fn store_kind(&self) -> UseKind {
        if self.in_struct_sub_element {
            UseKind::PartialStore
        } else {
            UseKind::Store
        }
    }

    fn push_use(&mut self, element: usize, inst: InstId, kind: UseKind) {
        self.uses[element].push(ElementUse {
            inst: Some(inst),
            kind,
        });
    }

    /// An operation on an aggregate acts on every element it spans. Record
    /// it in each covered bucket, unless we are inside a struct or enum
    /// sub-element, where accesses only ever charge the one bucket.
    fn add_element_uses(
        &mut self,
        base_element: usize,
        use_ty: &crate::LirType,
        user: InstId,
        kind: UseKind,
    ) {
        let slots = if self.in_struct_sub_element || self.in_enum_sub_element {
            1
        } else {
            top_level_element_count(use_ty)
        };

        for i in 0..slots {
            self.push_use(base_element + i, user, kind);
        }
    }

    /// Given a projection of the current pointer, compute the bucket index
    /// implied by the selected member and recurse into its uses.
    fn collect_element_uses(&mut self, element_ptr: InstId, base_element: usize) {
        match self.function.inst(element_ptr).kind.clone() {
            // Struct projections keep the bucket but mark that we are below
            // a struct field.
            InstructionKind::StructElementAddr { dest, .. } => {
                let saved = self.in_struct_sub_element;
                self.in_struct_sub_element = true;
                self.collect_uses(dest, base_element);
                self.in_struct_sub_element = saved;
            }

            InstructionKind::TupleElementAddr { dest, base, index } => {
                // A tuple inside a struct does not get its own buckets; its
                // accesses are accesses of the struct.
                if self.in_struct_sub_element {
                    return self.collect_uses(dest, base_element);
                }

                let tuple_ty = self.function.address_pointee(base);
                let mut new_base = base_element;
                for i in 0..index {
                    new_base += top_level_element_count(
                        tuple_ty
                            .tuple_element_type(i)
                            .expect("projection index in range"),
                    );
                }
                self.collect_uses(dest, new_base);
            }

            other => unreachable!("collect_element_uses on non-projection: {other:?}"),
        }
    }

    /// Materialize the per-field addresses of a tuple-typed pointer, right
    /// after the instruction that defines it.
    fn scalarized_element_addresses(&mut self, pointer: ValueId) -> Vec<InstId> {
        let def = self
            .function
            .def_of_value(pointer)
            .expect("scalarized address must be instruction-defined");
        let span = self.function.inst(def).span;

        let field_count = match self.function.address_pointee(Value::Operand(pointer)) {
            crate::LirType::Tuple(types) => types.len(),
            other => panic!("scalarizing access to non-tuple type {other}"),
        };

        let mut builder = InstBuilder::after(self.function, def).with_span(span);
        for index in 0..field_count {
            builder.tuple_element_addr(Value::Operand(pointer), index);
        }
        builder.into_inserted()
    }

    /// Rewrite one whole-tuple access into per-field operations and erase it
    fn scalarize_access(&mut self, user: InstId, element_addrs: &[InstId]) {
        let span = self.function.inst(user).span;
        let addr_values: Vec<Value> = element_addrs
            .iter()
            .map(|&id| {
                Value::Operand(
                    self.function
                        .inst(id)
                        .destination()
                        .expect("projections define their address"),
                )
            })
            .collect();

        match self.function.inst(user).kind.clone() {
            InstructionKind::Load { dest, address } => {
                let tuple_ty = self.function.address_pointee(address);
                let mut builder = InstBuilder::before(self.function, user).with_span(span);
                let element_vals: Vec<Value> = addr_values
                    .iter()
                    .map(|&addr| Value::Operand(builder.load(addr)))
                    .collect();
                let result = builder.tuple(element_vals, tuple_ty);
                self.function.replace_all_uses(dest, Value::Operand(result));
                self.function.erase_instruction(user);
            }

            InstructionKind::Store { value, .. } => {
                let mut builder = InstBuilder::before(self.function, user).with_span(span);
                let element_vals = scalarized_elements(&mut builder, value);
                for (element_val, &addr) in element_vals.iter().zip(addr_values.iter()) {
                    builder.store(*element_val, addr);
                }
                self.function.erase_instruction(user);
            }

            InstructionKind::Assign { value, .. } => {
                let mut builder = InstBuilder::before(self.function, user).with_span(span);
                let element_vals = scalarized_elements(&mut builder, value);
                for (element_val, &addr) in element_vals.iter().zip(addr_values.iter()) {
                    builder.assign(*element_val, addr);
                }
                self.function.erase_instruction(user);
            }

            other => unreachable!("scalarize_access on non-access: {other:?}"),
        }
    }
}

/// The per-field values of a tuple-typed operand. A value built by a tuple
/// instruction is taken apart directly; anything else gets extractions.
fn scalarized_elements(builder: &mut InstBuilder, value: Value) -> Vec<Value> {
    let ty = builder.function().type_of_value(value);
    let crate::LirType::Tuple(fields) = ty else {
        panic!("scalarizing non-tuple value of type {ty}");
    };

    if let Value::Operand(id) = value {
        if let Some(def) = builder.function().def_of_value(id) {
            if let InstructionKind::Tuple { elements, .. } = &builder.function().inst(def).kind {
                return elements.clone();
            }
        }
    }

    (0..fields.len())
        .map(|index| Value::Operand(builder.tuple_extract(value, index)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use crate::LirType;

    fn pair_ty() -> LirType {
        LirType::struct_type(
            "Pair",
            vec![
                ("a".to_string(), LirType::Int),
                ("b".to_string(), LirType::Int),
            ],
        )
    }

    fn collect(f: &mut crate::LirFunction, root: ValueId, buckets: usize) -> Vec<ElementUses> {
        let mut uses: Vec<ElementUses> = (0..buckets).map(|_| Vec::new()).collect();
        ElementUseCollector::new(f, &mut uses).collect_uses(root, 0);
        uses
    }

    fn kinds(uses: &ElementUses) -> Vec<UseKind> {
        uses.iter().map(|u| u.kind).collect()
    }

    #[test]
    fn test_tuple_projections_shift_buckets() {
        let mut f = new_function("buckets");
        let entry = f.entry_block;
        let ty = LirType::tuple(vec![LirType::Int, LirType::Int]);

        let x = alloc_stack(&mut f, entry, ty, "x");
        let a0 = tuple_element_addr(&mut f, entry, x, 0);
        let a1 = tuple_element_addr(&mut f, entry, x, 1);
        store(&mut f, entry, Value::integer(1), a0);
        let _ = load(&mut f, entry, a1);

        let uses = collect(&mut f, x, 2);
        assert_eq!(kinds(&uses[0]), vec![UseKind::Store]);
        assert_eq!(kinds(&uses[1]), vec![UseKind::Load]);
    }

    #[test]
    fn test_struct_projection_demotes_stores_to_partial() {
        let mut f = new_function("partial");
        let entry = f.entry_block;

        let x = alloc_stack(&mut f, entry, pair_ty(), "x");
        let a = struct_element_addr(&mut f, entry, x, 0);
        store(&mut f, entry, Value::integer(1), a);

        let uses = collect(&mut f, x, 1);
        assert_eq!(kinds(&uses[0]), vec![UseKind::PartialStore]);
    }

    #[test]
    fn test_copy_addr_spans_every_bucket_in_both_roles() {
        let mut f = new_function("copies");
        let entry = f.entry_block;
        let ty = LirType::tuple(vec![LirType::Int, pair_ty()]);

        let x = alloc_stack(&mut f, entry, ty.clone(), "x");
        let y = alloc_stack(&mut f, entry, ty, "y");
        copy_addr(&mut f, entry, x, y, false, true);

        // As the source, the copy reads both top-level elements of x.
        let uses = collect(&mut f, x, 2);
        assert_eq!(kinds(&uses[0]), vec![UseKind::Load]);
        assert_eq!(kinds(&uses[1]), vec![UseKind::Load]);

        // As the destination, it writes both elements of y.
        let uses = collect(&mut f, y, 2);
        assert_eq!(kinds(&uses[0]), vec![UseKind::Store]);
        assert_eq!(kinds(&uses[1]), vec![UseKind::Store]);
    }

    #[test]
    fn test_whole_tuple_store_scalarizes() {
        let mut f = new_function("scalarize");
        let entry = f.entry_block;
        let ty = LirType::tuple(vec![LirType::Int, LirType::Int]);

        let x = alloc_stack(&mut f, entry, ty.clone(), "x");
        let t = tuple_value(
            &mut f,
            entry,
            vec![Value::integer(1), Value::integer(2)],
            ty,
        );
        store(&mut f, entry, Value::Operand(t), x);

        let uses = collect(&mut f, x, 2);

        // The aggregate store became one store per field, each in its own
        // bucket, and the original instruction is gone.
        assert_eq!(kinds(&uses[0]), vec![UseKind::Store]);
        assert_eq!(kinds(&uses[1]), vec![UseKind::Store]);
        assert_eq!(
            count_matching(&f, |k| matches!(
                k,
                InstructionKind::Store { value: Value::Operand(_), .. }
            )),
            0
        );
        assert_eq!(
            count_matching(&f, |k| matches!(k, InstructionKind::Store { .. })),
            2
        );
        assert_eq!(
            count_matching(&f, |k| matches!(k, InstructionKind::TupleElementAddr { .. })),
            2
        );
    }

    #[test]
    fn test_unknown_user_escapes_all_covered_buckets() {
        let mut f = new_function("escapes");
        let entry = f.entry_block;
        let ty = LirType::tuple(vec![LirType::Int, LirType::Int]);

        let x = alloc_stack(&mut f, entry, ty, "x");
        partial_apply(&mut f, entry, "closure", vec![Value::Operand(x)]);

        let uses = collect(&mut f, x, 2);
        assert_eq!(kinds(&uses[0]), vec![UseKind::Escape]);
        assert_eq!(kinds(&uses[1]), vec![UseKind::Escape]);
    }
}
