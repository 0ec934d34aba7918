//! # Access Path Calculus
//!
//! Aggregate types flatten into a sequence of primitive sub-elements, and a
//! chain of element-address projections from an allocation resolves to a
//! contiguous range within that flattening. These helpers compute the
//! flattened counts, chase projection chains back to their root, and rebuild
//! sub-values out of materialized aggregates.

use crate::{InstBuilder, InstId, InstructionKind, LirFunction, LirType, Value};

/// Number of primitive sub-elements in the flattened type.
/// Tuples and structs both flatten recursively; everything else is a leaf.
pub(crate) fn sub_element_count(ty: &LirType) -> usize {
    match ty {
        LirType::Tuple(types) => types.iter().map(sub_element_count).sum(),
        LirType::Struct { fields, .. } => {
            fields.iter().map(|(_, field)| sub_element_count(field)).sum()
        }
        _ => 1,
    }
}

/// Number of top-level elements: tuples flatten recursively, but a struct
/// counts as a single element. This drives use bucketing, where struct
/// storage is treated as one unit.
pub(crate) fn top_level_element_count(ty: &LirType) -> usize {
    match ty {
        LirType::Tuple(types) => types.iter().map(top_level_element_count).sum(),
        _ => 1,
    }
}

/// Append the dotted path from `ty` down to the given top-level element.
/// Only tuples subdivide at this granularity, so the path is made of tuple
/// positions; a scalar or struct root contributes nothing.
pub(crate) fn path_string_to_element(ty: &LirType, mut element: usize, result: &mut String) {
    let LirType::Tuple(fields) = ty else { return };

    for (field_no, field_ty) in fields.iter().enumerate() {
        let elements_for_field = top_level_element_count(field_ty);

        if element < elements_for_field {
            result.push('.');
            result.push_str(&field_no.to_string());
            return path_string_to_element(field_ty, element, result);
        }

        element -= elements_for_field;
    }
    panic!("element number {element} is out of range for type {ty}");
}

/// Chase `pointer` back through element-address projections to `root`,
/// accumulating the first sub-element its range covers. Returns None if the
/// chain passes through anything that is not a projection of the root.
pub(crate) fn try_compute_access_path(
    function: &LirFunction,
    mut pointer: Value,
    root: InstId,
) -> Option<usize> {
    let mut first_sub_element = 0;

    loop {
        let Value::Operand(id) = pointer else {
            return None;
        };
        let def = function.def_of_value(id)?;

        if def == root {
            return Some(first_sub_element);
        }

        match &function.inst(def).kind {
            InstructionKind::TupleElementAddr { base, index, .. } => {
                let tuple_ty = function.address_pointee(*base);
                for i in 0..*index {
                    first_sub_element += sub_element_count(tuple_ty.tuple_element_type(i)?);
                }
                pointer = *base;
            }
            InstructionKind::StructElementAddr { base, field, .. } => {
                let struct_ty = function.address_pointee(*base);
                for i in 0..*field {
                    first_sub_element += sub_element_count(struct_ty.struct_field_type(i)?);
                }
                pointer = *base;
            }
            _ => return None,
        }
    }
}

/// Like [`try_compute_access_path`] but for pointers known to derive from the
/// root; failing to reach it is a programming error.
pub(crate) fn compute_access_path(function: &LirFunction, pointer: Value, root: InstId) -> usize {
    try_compute_access_path(function, pointer, root)
        .expect("failed to compute an access path to the allocation root")
}

/// Given a materialized aggregate value, emit the extractions that descend to
/// the sub-element at `sub_element`, returning the leaf value.
pub(crate) fn extract_sub_element(
    builder: &mut InstBuilder,
    value: Value,
    mut sub_element: usize,
) -> Value {
    let ty = builder.function().type_of_value(value);

    match ty {
        LirType::Tuple(fields) => {
            for (element_no, field_ty) in fields.iter().enumerate() {
                let count = sub_element_count(field_ty);
                if sub_element < count {
                    let extracted = builder.tuple_extract(value, element_no);
                    return extract_sub_element(builder, Value::Operand(extracted), sub_element);
                }
                sub_element -= count;
            }
            panic!("sub-element {sub_element} not found in tuple");
        }
        LirType::Struct { fields, .. } => {
            for (field_no, (_, field_ty)) in fields.iter().enumerate() {
                let count = sub_element_count(field_ty);
                if sub_element < count {
                    let extracted = builder.struct_extract(value, field_no);
                    return extract_sub_element(builder, Value::Operand(extracted), sub_element);
                }
                sub_element -= count;
            }
            panic!("sub-element {sub_element} not found in struct");
        }
        _ => {
            // Down to a scalar.
            assert_eq!(sub_element, 0, "sub-element miscount while extracting");
            value
        }
    }
}
