//! # Testing Utilities for LIR
//!
//! Helpers for constructing functions in unit tests. Each helper appends one
//! instruction to a block and returns the interesting handle (the defined
//! value, or the instruction id for non-defining instructions).

use crate::instruction::{CalleeSignature, ParamConvention};
use crate::{
    BasicBlockId, InstBuilder, InstId, Instruction, InstructionKind, LirFunction, LirType, Value,
    ValueId,
};

pub fn new_function(name: &str) -> LirFunction {
    LirFunction::new(name.to_string())
}

/// Allocates a stack slot, returning its address value
pub fn alloc_stack(f: &mut LirFunction, block: BasicBlockId, ty: LirType, name: &str) -> ValueId {
    let dest = f.new_typed_value_id(LirType::address(ty.clone()));
    f.push_instruction(
        block,
        Instruction::alloc_stack(dest, ty, Some(name.to_string())),
    );
    dest
}

/// Allocates a heap box, returning its address value
pub fn alloc_box(f: &mut LirFunction, block: BasicBlockId, ty: LirType, name: &str) -> ValueId {
    let dest = f.new_typed_value_id(LirType::address(ty.clone()));
    f.push_instruction(
        block,
        Instruction::alloc_box(dest, ty, Some(name.to_string())),
    );
    dest
}

/// Wraps an address in an uninitialized-memory marker
pub fn mark_uninit(f: &mut LirFunction, block: BasicBlockId, address: ValueId) -> ValueId {
    let ty = f
        .get_value_type(address)
        .cloned()
        .unwrap_or(LirType::Unknown);
    let dest = f.new_typed_value_id(ty);
    f.push_instruction(
        block,
        Instruction::mark_uninit(dest, Value::Operand(address)),
    );
    dest
}

pub fn store(f: &mut LirFunction, block: BasicBlockId, value: Value, address: ValueId) -> InstId {
    f.push_instruction(block, Instruction::store(value, Value::Operand(address)))
}

pub fn assign(f: &mut LirFunction, block: BasicBlockId, value: Value, address: ValueId) -> InstId {
    f.push_instruction(block, Instruction::assign(value, Value::Operand(address)))
}

pub fn store_weak(
    f: &mut LirFunction,
    block: BasicBlockId,
    value: Value,
    address: ValueId,
    is_init: bool,
) -> InstId {
    f.push_instruction(
        block,
        Instruction::new(InstructionKind::StoreWeak {
            value,
            address: Value::Operand(address),
            is_init,
        }),
    )
}

pub fn copy_addr(
    f: &mut LirFunction,
    block: BasicBlockId,
    src: ValueId,
    dest_addr: ValueId,
    is_take: bool,
    is_init: bool,
) -> InstId {
    f.push_instruction(
        block,
        Instruction::copy_addr(
            Value::Operand(src),
            Value::Operand(dest_addr),
            is_take,
            is_init,
        ),
    )
}

/// Loads from an address, returning the loaded value
pub fn load(f: &mut LirFunction, block: BasicBlockId, address: ValueId) -> ValueId {
    InstBuilder::at_end(f, block).load(Value::Operand(address))
}

pub fn tuple_element_addr(
    f: &mut LirFunction,
    block: BasicBlockId,
    base: ValueId,
    index: usize,
) -> ValueId {
    InstBuilder::at_end(f, block).tuple_element_addr(Value::Operand(base), index)
}

pub fn struct_element_addr(
    f: &mut LirFunction,
    block: BasicBlockId,
    base: ValueId,
    field: usize,
) -> ValueId {
    InstBuilder::at_end(f, block).struct_element_addr(Value::Operand(base), field)
}

/// Builds a tuple value of the given type
pub fn tuple_value(
    f: &mut LirFunction,
    block: BasicBlockId,
    elements: Vec<Value>,
    ty: LirType,
) -> ValueId {
    InstBuilder::at_end(f, block).tuple(elements, ty)
}

pub fn release(f: &mut LirFunction, block: BasicBlockId, value: ValueId) -> InstId {
    f.push_instruction(block, Instruction::release(Value::Operand(value)))
}

pub fn dealloc_stack(f: &mut LirFunction, block: BasicBlockId, address: ValueId) -> InstId {
    f.push_instruction(block, Instruction::dealloc_stack(Value::Operand(address)))
}

/// Calls a function with the given argument conventions
pub fn apply(
    f: &mut LirFunction,
    block: BasicBlockId,
    callee: &str,
    args: Vec<Value>,
    params: Vec<(LirType, ParamConvention)>,
) -> InstId {
    let signature = CalleeSignature {
        params,
        return_types: vec![],
    };
    f.push_instruction(block, Instruction::apply(None, callee, args, signature))
}

/// Forms a closure capturing the given arguments
pub fn partial_apply(
    f: &mut LirFunction,
    block: BasicBlockId,
    callee: &str,
    args: Vec<Value>,
) -> ValueId {
    let dest = f.new_typed_value_id(LirType::Unknown);
    f.push_instruction(block, Instruction::partial_apply(dest, callee, args));
    dest
}

pub fn mark_func_escape(f: &mut LirFunction, block: BasicBlockId, address: ValueId) -> InstId {
    f.push_instruction(
        block,
        Instruction::new(InstructionKind::MarkFuncEscape {
            address: Value::Operand(address),
        }),
    )
}

/// Counts the linked-in instructions matching a predicate
pub fn count_matching(f: &LirFunction, pred: impl Fn(&InstructionKind) -> bool) -> usize {
    f.basic_blocks
        .iter()
        .flat_map(|block| block.insts.iter())
        .filter(|&&id| pred(&f.inst(id).kind))
        .count()
}

/// The instruction kinds of a block, in order
pub fn block_kinds(f: &LirFunction, block: BasicBlockId) -> Vec<InstructionKind> {
    f.basic_blocks[block]
        .insts
        .iter()
        .map(|&id| f.inst(id).kind.clone())
        .collect()
}
