//! # Instruction Builder
//!
//! This module provides a positioned builder for emitting LIR instructions.
//! It centralizes result-value allocation and typing, and records every
//! instruction it inserts so callers can post-process them (the definite
//! initialization pass re-feeds inserted loads and stores into its use lists).

use chumsky::span::SimpleSpan;

use crate::{BasicBlockId, InstId, Instruction, LirFunction, LirType, Value, ValueId};

/// A builder that inserts instructions at a fixed point in a block
///
/// The insertion point advances as instructions are emitted, so a sequence of
/// calls produces instructions in source order.
pub struct InstBuilder<'f> {
    function: &'f mut LirFunction,
    block: BasicBlockId,
    position: usize,
    span: Option<SimpleSpan<usize>>,
    inserted: Vec<InstId>,
}

impl<'f> InstBuilder<'f> {
    /// Creates a builder inserting immediately before `anchor`
    pub fn before(function: &'f mut LirFunction, anchor: InstId) -> Self {
        let (block, position) = function
            .position_of_inst(anchor)
            .expect("builder anchor must be in a block");
        Self {
            function,
            block,
            position,
            span: None,
            inserted: Vec::new(),
        }
    }

    /// Creates a builder inserting immediately after `anchor`
    pub fn after(function: &'f mut LirFunction, anchor: InstId) -> Self {
        let (block, position) = function
            .position_of_inst(anchor)
            .expect("builder anchor must be in a block");
        Self {
            function,
            block,
            position: position + 1,
            span: None,
            inserted: Vec::new(),
        }
    }

    /// Creates a builder inserting at the end of a block
    pub fn at_end(function: &'f mut LirFunction, block: BasicBlockId) -> Self {
        let position = function.basic_blocks[block].insts.len();
        Self {
            function,
            block,
            position,
            span: None,
            inserted: Vec::new(),
        }
    }

    /// Sets the span applied to subsequently emitted instructions
    pub fn with_span(mut self, span: Option<SimpleSpan<usize>>) -> Self {
        self.span = span;
        self
    }

    /// The function being built into
    pub fn function(&mut self) -> &mut LirFunction {
        self.function
    }

    /// Ids of every instruction emitted through this builder, in order
    pub fn inserted(&self) -> &[InstId] {
        &self.inserted
    }

    /// Consumes the builder, returning the emitted instruction ids
    pub fn into_inserted(self) -> Vec<InstId> {
        self.inserted
    }

    /// Inserts an instruction at the current position and advances
    pub fn emit(&mut self, mut inst: Instruction) -> InstId {
        if inst.span.is_none() {
            inst.span = self.span;
        }
        let id = self
            .function
            .insert_instruction_at(self.block, self.position, inst);
        self.position += 1;
        self.inserted.push(id);
        id
    }

    /// Emits a load; the result type is the pointee of the address
    pub fn load(&mut self, address: Value) -> ValueId {
        let ty = self.function.address_pointee(address);
        let dest = self.function.new_typed_value_id(ty);
        self.emit(Instruction::load(dest, address));
        dest
    }

    /// Emits a store
    pub fn store(&mut self, value: Value, address: Value) -> InstId {
        self.emit(Instruction::store(value, address))
    }

    /// Emits a two-form assignment
    pub fn assign(&mut self, value: Value, address: Value) -> InstId {
        self.emit(Instruction::assign(value, address))
    }

    /// Emits a destruction of an owned value
    pub fn destroy_value(&mut self, value: Value) -> InstId {
        self.emit(Instruction::destroy_value(value))
    }

    /// Emits a tuple element address projection
    pub fn tuple_element_addr(&mut self, base: Value, index: usize) -> ValueId {
        let elt_ty = self
            .function
            .address_pointee(base)
            .tuple_element_type(index)
            .cloned()
            .unwrap_or(LirType::Unknown);
        let dest = self.function.new_typed_value_id(LirType::address(elt_ty));
        self.emit(Instruction::tuple_element_addr(dest, base, index));
        dest
    }

    /// Emits a struct field address projection
    pub fn struct_element_addr(&mut self, base: Value, field: usize) -> ValueId {
        let field_ty = self
            .function
            .address_pointee(base)
            .struct_field_type(field)
            .cloned()
            .unwrap_or(LirType::Unknown);
        let dest = self.function.new_typed_value_id(LirType::address(field_ty));
        self.emit(Instruction::struct_element_addr(dest, base, field));
        dest
    }

    /// Emits a tuple element extraction from a materialized value
    pub fn tuple_extract(&mut self, aggregate: Value, index: usize) -> ValueId {
        let elt_ty = self
            .function
            .type_of_value(aggregate)
            .tuple_element_type(index)
            .cloned()
            .unwrap_or(LirType::Unknown);
        let dest = self.function.new_typed_value_id(elt_ty);
        self.emit(Instruction::tuple_extract(dest, aggregate, index));
        dest
    }

    /// Emits a struct field extraction from a materialized value
    pub fn struct_extract(&mut self, aggregate: Value, field: usize) -> ValueId {
        let field_ty = self
            .function
            .type_of_value(aggregate)
            .struct_field_type(field)
            .cloned()
            .unwrap_or(LirType::Unknown);
        let dest = self.function.new_typed_value_id(field_ty);
        self.emit(Instruction::struct_extract(dest, aggregate, field));
        dest
    }

    /// Emits a tuple construction of the given type
    pub fn tuple(&mut self, elements: Vec<Value>, ty: LirType) -> ValueId {
        let dest = self.function.new_typed_value_id(ty);
        self.emit(Instruction::tuple(dest, elements));
        dest
    }

    /// Emits a struct construction of the given type
    pub fn struct_value(&mut self, fields: Vec<Value>, ty: LirType) -> ValueId {
        let dest = self.function.new_typed_value_id(ty);
        self.emit(Instruction::struct_value(dest, fields));
        dest
    }
}
