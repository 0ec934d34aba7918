//! # LIR Function
//!
//! This module defines the function-level LIR representation: an instruction
//! arena plus the Control Flow Graph (CFG) of basic blocks that order it.

use index_vec::IndexVec;
use rustc_hash::FxHashMap;

use crate::{
    indent_str, BasicBlock, BasicBlockId, InstId, Instruction, LirType, PrettyPrint, Terminator,
    Value, ValueId,
};

/// The LIR for a single function, laid out as a Control Flow Graph (CFG)
///
/// # Design Notes
///
/// - Instructions live in an arena (`IndexVec<InstId, Instruction>`) so that
///   ids stay stable while passes insert and erase instructions; blocks hold
///   the ordered id lists
/// - Erased instructions keep their arena slot but lose their parent block,
///   so a stale `InstId` held by an analysis can never alias a new instruction
/// - Each value is defined by exactly one instruction or function parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LirFunction {
    /// The name of the function (for debugging and linking)
    pub name: String,

    /// All instructions of the function, addressed by stable id
    pub instructions: IndexVec<InstId, Instruction>,

    /// All basic blocks in this function, forming the CFG
    pub basic_blocks: IndexVec<BasicBlockId, BasicBlock>,

    /// The entry point of the function (always valid if function has blocks)
    pub entry_block: BasicBlockId,

    /// Function parameters mapped to their LIR values
    /// The order matches the function signature
    pub parameters: Vec<ValueId>,

    /// Next available value ID for generating new temporaries
    pub(crate) next_value_id: u32,

    /// Type information for each value in the function
    pub value_types: FxHashMap<ValueId, LirType>,

    /// The defining instruction of each instruction-produced value
    pub(crate) value_defs: FxHashMap<ValueId, InstId>,
}

impl LirFunction {
    /// Creates a new empty function with the given name
    pub fn new(name: String) -> Self {
        let mut basic_blocks = IndexVec::new();
        let entry_block = basic_blocks.push(BasicBlock::new());

        Self {
            name,
            instructions: IndexVec::new(),
            basic_blocks,
            entry_block,
            parameters: Vec::new(),
            next_value_id: 0,
            value_types: FxHashMap::default(),
            value_defs: FxHashMap::default(),
        }
    }

    /// Adds a new basic block and returns its ID
    pub fn add_basic_block(&mut self) -> BasicBlockId {
        self.basic_blocks.push(BasicBlock::new())
    }

    /// Adds a new basic block with a name and returns its ID
    pub fn add_basic_block_with_name(&mut self, name: String) -> BasicBlockId {
        self.basic_blocks.push(BasicBlock::with_name(name))
    }

    /// Gets a basic block by ID
    pub fn get_basic_block(&self, id: BasicBlockId) -> Option<&BasicBlock> {
        self.basic_blocks.get(id)
    }

    /// Gets a mutable reference to a basic block by ID
    pub fn get_basic_block_mut(&mut self, id: BasicBlockId) -> Option<&mut BasicBlock> {
        self.basic_blocks.get_mut(id)
    }

    /// Generates a new unique value ID within this function
    pub fn new_value_id(&mut self) -> ValueId {
        let id = ValueId::new(self.next_value_id as usize);
        self.next_value_id += 1;
        id
    }

    /// Generates a new unique value ID with type information
    pub fn new_typed_value_id(&mut self, ty: LirType) -> ValueId {
        let id = self.new_value_id();
        self.value_types.insert(id, ty);
        id
    }

    /// Adds a typed function parameter and returns its value
    pub fn add_parameter(&mut self, ty: LirType) -> ValueId {
        let id = self.new_typed_value_id(ty);
        self.parameters.push(id);
        id
    }

    /// Sets the type for a value ID
    pub fn set_value_type(&mut self, value_id: ValueId, ty: LirType) {
        self.value_types.insert(value_id, ty);
    }

    /// Gets the type for a value ID
    pub fn get_value_type(&self, value_id: ValueId) -> Option<&LirType> {
        self.value_types.get(&value_id)
    }

    /// Returns the type of a value, falling back to Unknown
    pub fn type_of_value(&self, value: Value) -> LirType {
        match value {
            Value::Operand(id) => self
                .value_types
                .get(&id)
                .cloned()
                .unwrap_or(LirType::Unknown),
            Value::Literal(crate::Literal::Integer(_)) => LirType::Int,
            Value::Literal(crate::Literal::Boolean(_)) => LirType::Bool,
        }
    }

    /// Returns the element type behind an address-typed value
    pub fn address_pointee(&self, value: Value) -> LirType {
        self.type_of_value(value)
            .pointee()
            .cloned()
            .unwrap_or(LirType::Unknown)
    }

    // ==================== Instruction arena ====================

    /// Gets an instruction by id
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.instructions[id]
    }

    /// Gets a mutable instruction by id
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.instructions[id]
    }

    /// Appends an instruction to the end of a block and returns its id
    pub fn push_instruction(&mut self, block: BasicBlockId, mut inst: Instruction) -> InstId {
        inst.block = Some(block);
        let id = self.instructions.push(inst);
        self.basic_blocks[block].insts.push(id);
        self.note_definition(id);
        id
    }

    /// Inserts an instruction into a block at the given position
    pub fn insert_instruction_at(
        &mut self,
        block: BasicBlockId,
        position: usize,
        mut inst: Instruction,
    ) -> InstId {
        inst.block = Some(block);
        let id = self.instructions.push(inst);
        self.basic_blocks[block].insts.insert(position, id);
        self.note_definition(id);
        id
    }

    /// Inserts an instruction immediately before an existing one
    pub fn insert_instruction_before(&mut self, anchor: InstId, inst: Instruction) -> InstId {
        let (block, position) = self
            .position_of_inst(anchor)
            .expect("insertion anchor must be in a block");
        self.insert_instruction_at(block, position, inst)
    }

    /// Inserts an instruction immediately after an existing one
    pub fn insert_instruction_after(&mut self, anchor: InstId, inst: Instruction) -> InstId {
        let (block, position) = self
            .position_of_inst(anchor)
            .expect("insertion anchor must be in a block");
        self.insert_instruction_at(block, position + 1, inst)
    }

    /// Erases an instruction: unlinks it from its block and drops its
    /// definition. The arena slot is retained so stale ids stay inert.
    pub fn erase_instruction(&mut self, id: InstId) {
        if let Some(block) = self.instructions[id].block.take() {
            self.basic_blocks[block].insts.retain(|&i| i != id);
        }
        if let Some(dest) = self.instructions[id].destination() {
            self.value_defs.remove(&dest);
        }
    }

    fn note_definition(&mut self, id: InstId) {
        if let Some(dest) = self.instructions[id].destination() {
            self.value_defs.insert(dest, id);
        }
    }

    /// The instruction that defines a value, if any (parameters have none)
    pub fn def_of_value(&self, value: ValueId) -> Option<InstId> {
        self.value_defs.get(&value).copied()
    }

    /// The block and in-block position of an instruction, if it is linked in
    pub fn position_of_inst(&self, id: InstId) -> Option<(BasicBlockId, usize)> {
        let block = self.instructions[id].block?;
        let position = self.basic_blocks[block].position_of(id)?;
        Some((block, position))
    }

    /// All instructions currently using `value`, in program order
    /// (block id order, then position). Terminator uses are not included;
    /// see [`Self::value_used_by_terminator`].
    pub fn users_of(&self, value: ValueId) -> Vec<InstId> {
        let mut users = Vec::new();
        for block in self.basic_blocks.iter() {
            for &inst_id in &block.insts {
                if self.instructions[inst_id].used_values().contains(&value) {
                    users.push(inst_id);
                }
            }
        }
        users
    }

    /// Whether any terminator in the function uses `value`
    pub fn value_used_by_terminator(&self, value: ValueId) -> bool {
        self.basic_blocks
            .iter()
            .any(|block| block.terminator.used_values().contains(&value))
    }

    /// Whether `value` has any remaining use, instruction or terminator
    pub fn value_has_uses(&self, value: ValueId) -> bool {
        !self.users_of(value).is_empty() || self.value_used_by_terminator(value)
    }

    /// Replace all occurrences of `from` with `to` throughout the function
    pub fn replace_all_uses(&mut self, from: ValueId, to: Value) {
        if Value::Operand(from) == to {
            return;
        }

        for inst in self.instructions.iter_mut() {
            if inst.block.is_some() {
                inst.replace_value_uses(from, to);
            }
        }
        for block in self.basic_blocks.iter_mut() {
            block.terminator.replace_value_uses(from, to);
        }
    }

    // ==================== CFG edges ====================

    /// Connect two blocks by adding a pred edge
    /// This is the canonical way to add CFG edges; the terminator of the
    /// predecessor block is set separately.
    pub fn connect(&mut self, pred: BasicBlockId, succ: BasicBlockId) {
        let succ_block = self
            .basic_blocks
            .get_mut(succ)
            .unwrap_or_else(|| panic!("Successor block {succ:?} does not exist"));
        succ_block.add_pred(pred);
    }

    /// Disconnect two blocks by removing the pred edge
    pub fn disconnect(&mut self, pred: BasicBlockId, succ: BasicBlockId) {
        let succ_block = self
            .basic_blocks
            .get_mut(succ)
            .unwrap_or_else(|| panic!("Successor block {succ:?} does not exist"));
        succ_block.remove_pred(pred);
    }

    /// Set a terminator while maintaining CFG predecessor lists
    pub fn set_terminator_with_edges(&mut self, block_id: BasicBlockId, new_term: Terminator) {
        let old_targets = match self.basic_blocks.get(block_id) {
            Some(block) => block.terminator.target_blocks(),
            None => return,
        };

        for target in old_targets {
            self.disconnect(block_id, target);
        }

        for target in new_term.target_blocks() {
            self.connect(block_id, target);
        }

        self.basic_blocks[block_id].set_terminator(new_term);
    }

    /// Returns an iterator over all basic blocks
    pub fn blocks(&self) -> impl Iterator<Item = (BasicBlockId, &BasicBlock)> {
        self.basic_blocks.iter_enumerated()
    }

    /// Returns the number of basic blocks in this function
    pub fn block_count(&self) -> usize {
        self.basic_blocks.len()
    }

    /// Validates the function structure
    ///
    /// Checks:
    /// - Entry block exists
    /// - Terminator targets exist and match predecessor lists
    /// - Block instruction lists agree with instruction parent pointers
    pub fn validate(&self) -> Result<(), String> {
        if self.basic_blocks.get(self.entry_block).is_none() {
            return Err(format!("Entry block {:?} does not exist", self.entry_block));
        }

        for (block_id, block) in self.blocks() {
            for target in block.terminator.target_blocks() {
                let Some(succ) = self.basic_blocks.get(target) else {
                    return Err(format!(
                        "Block {block_id:?} targets non-existent block {target:?}"
                    ));
                };
                if !succ.preds.contains(&block_id) {
                    return Err(format!(
                        "Block {block_id:?} targets {target:?} but is not in its predecessor list"
                    ));
                }
            }

            for &inst_id in &block.insts {
                let Some(inst) = self.instructions.get(inst_id) else {
                    return Err(format!(
                        "Block {block_id:?} lists non-existent instruction {inst_id:?}"
                    ));
                };
                if inst.block != Some(block_id) {
                    return Err(format!(
                        "Instruction {inst_id:?} is listed in block {block_id:?} but claims parent {:?}",
                        inst.block
                    ));
                }
            }
        }

        Ok(())
    }
}

impl PrettyPrint for LirFunction {
    fn pretty_print(&self, indent: usize) -> String {
        let mut result = String::new();
        let base_indent = indent_str(indent);

        result.push_str(&format!("{}fn {} {{\n", base_indent, self.name));

        if !self.parameters.is_empty() {
            result.push_str(&format!(
                "{}  parameters: {:?}\n",
                base_indent, self.parameters
            ));
        }

        result.push_str(&format!(
            "{}  entry: {entry:?}\n\n",
            base_indent,
            entry = self.entry_block
        ));

        for (block_id, block) in self.blocks() {
            let block_display = if let Some(ref name) = block.name {
                format!("{block_id:?} ({name})")
            } else {
                format!("{block_id:?}")
            };
            result.push_str(&format!("{base_indent}  {block_display}:\n"));
            for &inst_id in &block.insts {
                result.push_str(&format!(
                    "{base_indent}    {}\n",
                    self.instructions[inst_id].pretty_print(0)
                ));
            }
            result.push_str(&format!(
                "{base_indent}    {}\n\n",
                block.terminator.pretty_print(0)
            ));
        }

        result.push_str(&format!("{base_indent}}}\n"));
        result
    }
}

#[cfg(test)]
#[path = "function_tests.rs"]
mod tests;
