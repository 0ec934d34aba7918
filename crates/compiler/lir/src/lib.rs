//! # Opal Low-Level Intermediate Representation (LIR)
//!
//! This crate defines the data structures for the low-level, address-taken
//! intermediate representation of the Opal compiler, together with the
//! analysis passes that run on it before SSA construction.
//!
//! ## Design Principles
//!
//! 1. **Control Flow Graph (CFG)**: Functions are directed graphs of basic blocks
//! 2. **Explicit memory**: Local variables live in allocations (`alloc_box`,
//!    `alloc_stack`) whose addresses are projected, loaded, and stored
//! 3. **Single definition per value**: every `ValueId` is defined by exactly
//!    one instruction, so stores and loads are the only way state changes
//! 4. **Explicit Control Flow**: All control flow is explicit through terminators
//!
//! ## Architecture
//!
//! ```text
//! LirModule
//! functions: IndexVec<FunctionId, LirFunction>
//!
//! LirFunction
//! instructions: IndexVec<InstId, Instruction>   (arena)
//! basic_blocks: IndexVec<BasicBlockId, BasicBlock>
//! entry_block: BasicBlockId
//!
//! BasicBlock
//! insts: Vec<InstId>                            (ordered)
//! terminator: Terminator
//! ```
//!
//! ## Passes
//!
//! The main client of this crate is the definite initialization pass in
//! [`passes::definite_init`], which verifies that every memory element is
//! written before it is read, lowers the two-form `assign` opcode, and
//! promotes loads of known values into direct value references.

// Re-export commonly used types from submodules
pub use basic_block::BasicBlock;
pub use builder::InstBuilder;
pub use function::LirFunction;
pub use instruction::{CalleeSignature, Instruction, InstructionKind, ParamConvention};
pub use module::LirModule;
pub use passes::{
    perform_definite_initialization, DefiniteInitOptions, DefiniteInitPass, DefiniteInitStats,
    LirPass, PassManager,
};
pub use terminator::Terminator;
pub use types::LirType;
pub use value::{Literal, Value};

pub mod basic_block;
pub mod builder;
pub mod function;
pub mod instruction;
pub mod module;
pub mod passes;
pub mod terminator;
pub mod types;
pub mod value;

#[cfg(test)]
pub mod testing;

// --- Core Identifiers ---

index_vec::define_index_type! {
    /// Unique identifier for a function within a LIR module
    pub struct FunctionId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for a basic block within a function
    pub struct BasicBlockId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for a value (virtual register) within a function
    pub struct ValueId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for an instruction within a function's arena
    pub struct InstId = usize;
}

// --- Error Types ---

/// Represents an error in LIR construction or validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LirError {
    /// Invalid LIR structure (validation error)
    ValidationError {
        message: String,
        function_id: Option<FunctionId>,
        block_id: Option<BasicBlockId>,
    },
}

impl std::fmt::Display for LirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ValidationError {
                message,
                function_id,
                block_id,
            } => {
                write!(f, "Validation error: {message}")?;
                if let Some(func_id) = function_id {
                    write!(f, " in function {func_id:?}")?;
                }
                if let Some(block_id) = block_id {
                    write!(f, " in block {block_id:?}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for LirError {}

/// Result type for LIR operations
pub type LirResult<T> = Result<T, LirError>;

// --- Pretty Printing Support ---

/// Trait for pretty-printing LIR constructs
pub trait PrettyPrint {
    fn pretty_print(&self, indent: usize) -> String;
}

/// Helper function to create indentation
pub(crate) fn indent_str(level: usize) -> String {
    "  ".repeat(level)
}
