//! # LIR Instructions
//!
//! This module defines the instruction types for LIR.
//! Instructions perform computations but do not transfer control flow.

use chumsky::span::SimpleSpan;

use crate::{BasicBlockId, LirType, PrettyPrint, Value, ValueId};

/// Calling convention of a single callee parameter
///
/// The memory analyses only care whether an address passed to a call is
/// written (indirect result), read-and-maybe-written (inout), or captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamConvention {
    /// The argument is passed by value
    Direct,
    /// The argument is an address the callee initializes with its result
    IndirectResult,
    /// The argument is an address the callee may read and write
    IndirectInOut,
}

/// Represents the signature of a called function
///
/// This carries the parameter types and conventions of the callee so that
/// analyses can classify address arguments without a module-wide lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalleeSignature {
    pub params: Vec<(LirType, ParamConvention)>,
    pub return_types: Vec<LirType>,
}

/// An instruction performs an operation but does NOT transfer control
///
/// Instructions always fall through to the next instruction in the block.
/// Control flow changes are handled exclusively by terminators.
///
/// # Design Notes
///
/// - Each instruction defines at most one value
/// - Instructions live in a per-function arena and know their parent block;
///   an erased instruction keeps its arena slot but has no parent
/// - Source location is preserved for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The kind of instruction and its operands
    pub kind: InstructionKind,

    /// Source location for diagnostics and debugging
    pub span: Option<SimpleSpan<usize>>,

    /// The block this instruction currently lives in, if any
    pub(crate) block: Option<BasicBlockId>,
}

/// The different kinds of instructions available in LIR
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    /// Allocate a heap box: `dest = alloc_box T`
    /// `dest` is the address of the boxed cell. The optional name is the
    /// source-level variable this box backs, used in diagnostics.
    AllocBox {
        dest: ValueId,
        ty: LirType,
        name: Option<String>,
    },

    /// Allocate a stack slot: `dest = alloc_stack T`
    AllocStack {
        dest: ValueId,
        ty: LirType,
        name: Option<String>,
    },

    /// Mark an address as uninitialized memory requiring definite
    /// initialization checking: `dest = mark_uninit address`
    /// Resolves to its operand once checking is complete.
    MarkUninit { dest: ValueId, address: Value },

    /// Address of a tuple element: `dest = tuple_element_addr base, index`
    TupleElementAddr {
        dest: ValueId,
        base: Value,
        index: usize,
    },

    /// Address of a struct stored property:
    /// `dest = struct_element_addr base, #field`
    StructElementAddr {
        dest: ValueId,
        base: Value,
        field: usize,
    },

    /// Load from memory: `dest = load address`
    Load { dest: ValueId, address: Value },

    /// Load from a weak reference cell: `dest = load_weak address`
    LoadWeak { dest: ValueId, address: Value },

    /// Store to memory: `store value, address`
    /// Plain stores are always initializations at this IR level.
    Store { value: Value, address: Value },

    /// Store into a weak reference cell: `store_weak value, address`
    /// `is_init` records whether the cell was uninitialized beforehand.
    StoreWeak {
        value: Value,
        address: Value,
        is_init: bool,
    },

    /// Two-form assignment: `assign value, address`
    /// Lowered by definite initialization into either a plain store (when the
    /// destination is known uninitialized or trivial) or a
    /// load/store/destroy sequence.
    Assign { value: Value, address: Value },

    /// Memory-to-memory copy: `copy_addr src, dest`
    /// `is_take` consumes the source; `is_init` records whether the
    /// destination was uninitialized beforehand.
    CopyAddr {
        src: Value,
        dest_addr: Value,
        is_take: bool,
        is_init: bool,
    },

    /// Build a tuple value: `dest = tuple (elements...)`
    Tuple {
        dest: ValueId,
        elements: Vec<Value>,
    },

    /// Build a struct value: `dest = struct T (fields...)`
    Struct { dest: ValueId, fields: Vec<Value> },

    /// Extract a tuple element from a value: `dest = tuple_extract agg, index`
    TupleExtract {
        dest: ValueId,
        aggregate: Value,
        index: usize,
    },

    /// Extract a struct field from a value: `dest = struct_extract agg, #field`
    StructExtract {
        dest: ValueId,
        aggregate: Value,
        field: usize,
    },

    /// Function call: `dest = apply callee(args)`
    /// Address arguments are classified by the signature's conventions.
    Apply {
        dest: Option<ValueId>,
        callee: String,
        args: Vec<Value>,
        signature: CalleeSignature,
    },

    /// Closure formation: `dest = partial_apply callee(args)`
    /// Always captures its address arguments.
    PartialApply {
        dest: ValueId,
        callee: String,
        args: Vec<Value>,
    },

    /// Runtime default-initialization of a variable's storage:
    /// `initialize_var address`
    InitializeVar { address: Value },

    /// Write an enum tag: `inject_enum_addr address, #variant`
    InjectEnumAddr { address: Value, variant: usize },

    /// Address of an enum payload: `dest = enum_data_addr address, #variant`
    EnumDataAddr {
        dest: ValueId,
        address: Value,
        variant: usize,
    },

    /// Initialize an existential container in place, producing the address of
    /// its concrete storage: `dest = init_existential address, $T`
    InitExistential {
        dest: ValueId,
        address: Value,
        concrete_ty: LirType,
    },

    /// Upcast one existential container into another:
    /// `upcast_existential src, dest`
    UpcastExistential { src: Value, dest_addr: Value },

    /// Project the concrete value address out of an existential:
    /// `dest = project_existential address`
    ProjectExistential { dest: ValueId, address: Value },

    /// Look up a protocol witness method on an existential:
    /// `dest = protocol_method address, #method`
    ProtocolMethod {
        dest: ValueId,
        address: Value,
        method: String,
    },

    /// Record that a global's storage is referenced by a nested function:
    /// `mark_func_escape address`
    /// Erased once definite initialization checking is complete.
    MarkFuncEscape { address: Value },

    /// Release a box, destroying its contents: `release value`
    Release { value: Value },

    /// Free a stack slot: `dealloc_stack address`
    DeallocStack { address: Value },

    /// Destroy a loaded value: `destroy_value value`
    DestroyValue { value: Value },
}

impl Instruction {
    pub const fn new(kind: InstructionKind) -> Self {
        Self {
            kind,
            span: None,
            block: None,
        }
    }

    /// Creates a heap box allocation
    pub fn alloc_box(dest: ValueId, ty: LirType, name: Option<String>) -> Self {
        Self::new(InstructionKind::AllocBox { dest, ty, name })
    }

    /// Creates a stack slot allocation
    pub fn alloc_stack(dest: ValueId, ty: LirType, name: Option<String>) -> Self {
        Self::new(InstructionKind::AllocStack { dest, ty, name })
    }

    /// Creates an uninitialized-memory marker
    pub const fn mark_uninit(dest: ValueId, address: Value) -> Self {
        Self::new(InstructionKind::MarkUninit { dest, address })
    }

    /// Creates a tuple element address projection
    pub const fn tuple_element_addr(dest: ValueId, base: Value, index: usize) -> Self {
        Self::new(InstructionKind::TupleElementAddr { dest, base, index })
    }

    /// Creates a struct field address projection
    pub const fn struct_element_addr(dest: ValueId, base: Value, field: usize) -> Self {
        Self::new(InstructionKind::StructElementAddr { dest, base, field })
    }

    /// Creates a load
    pub const fn load(dest: ValueId, address: Value) -> Self {
        Self::new(InstructionKind::Load { dest, address })
    }

    /// Creates a store
    pub const fn store(value: Value, address: Value) -> Self {
        Self::new(InstructionKind::Store { value, address })
    }

    /// Creates a two-form assignment
    pub const fn assign(value: Value, address: Value) -> Self {
        Self::new(InstructionKind::Assign { value, address })
    }

    /// Creates a memory-to-memory copy
    pub const fn copy_addr(src: Value, dest_addr: Value, is_take: bool, is_init: bool) -> Self {
        Self::new(InstructionKind::CopyAddr {
            src,
            dest_addr,
            is_take,
            is_init,
        })
    }

    /// Creates a tuple construction
    pub const fn tuple(dest: ValueId, elements: Vec<Value>) -> Self {
        Self::new(InstructionKind::Tuple { dest, elements })
    }

    /// Creates a struct construction
    pub const fn struct_value(dest: ValueId, fields: Vec<Value>) -> Self {
        Self::new(InstructionKind::Struct { dest, fields })
    }

    /// Creates a tuple element extraction
    pub const fn tuple_extract(dest: ValueId, aggregate: Value, index: usize) -> Self {
        Self::new(InstructionKind::TupleExtract {
            dest,
            aggregate,
            index,
        })
    }

    /// Creates a struct field extraction
    pub const fn struct_extract(dest: ValueId, aggregate: Value, field: usize) -> Self {
        Self::new(InstructionKind::StructExtract {
            dest,
            aggregate,
            field,
        })
    }

    /// Creates a function call
    pub fn apply(
        dest: Option<ValueId>,
        callee: impl Into<String>,
        args: Vec<Value>,
        signature: CalleeSignature,
    ) -> Self {
        debug_assert_eq!(
            args.len(),
            signature.params.len(),
            "Apply argument count mismatch with signature parameter count"
        );
        Self::new(InstructionKind::Apply {
            dest,
            callee: callee.into(),
            args,
            signature,
        })
    }

    /// Creates a closure formation
    pub fn partial_apply(dest: ValueId, callee: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(InstructionKind::PartialApply {
            dest,
            callee: callee.into(),
            args,
        })
    }

    /// Creates a box release
    pub const fn release(value: Value) -> Self {
        Self::new(InstructionKind::Release { value })
    }

    /// Creates a stack slot deallocation
    pub const fn dealloc_stack(address: Value) -> Self {
        Self::new(InstructionKind::DeallocStack { address })
    }

    /// Creates a value destruction
    pub const fn destroy_value(value: Value) -> Self {
        Self::new(InstructionKind::DestroyValue { value })
    }

    /// Sets the source span for this instruction
    pub const fn with_span(mut self, span: SimpleSpan<usize>) -> Self {
        self.span = Some(span);
        self
    }

    /// The block this instruction currently lives in, or None if erased
    pub const fn parent_block(&self) -> Option<BasicBlockId> {
        self.block
    }

    /// Returns true if this instruction is one of the three allocation kinds
    /// that root a definite-initialization analysis.
    pub const fn is_allocation(&self) -> bool {
        matches!(
            self.kind,
            InstructionKind::AllocBox { .. }
                | InstructionKind::AllocStack { .. }
                | InstructionKind::MarkUninit { .. }
        )
    }

    /// Returns the destination value if this instruction defines one
    pub fn destination(&self) -> Option<ValueId> {
        match &self.kind {
            InstructionKind::AllocBox { dest, .. }
            | InstructionKind::AllocStack { dest, .. }
            | InstructionKind::MarkUninit { dest, .. }
            | InstructionKind::TupleElementAddr { dest, .. }
            | InstructionKind::StructElementAddr { dest, .. }
            | InstructionKind::Load { dest, .. }
            | InstructionKind::LoadWeak { dest, .. }
            | InstructionKind::Tuple { dest, .. }
            | InstructionKind::Struct { dest, .. }
            | InstructionKind::TupleExtract { dest, .. }
            | InstructionKind::StructExtract { dest, .. }
            | InstructionKind::PartialApply { dest, .. }
            | InstructionKind::EnumDataAddr { dest, .. }
            | InstructionKind::InitExistential { dest, .. }
            | InstructionKind::ProjectExistential { dest, .. }
            | InstructionKind::ProtocolMethod { dest, .. } => Some(*dest),

            InstructionKind::Apply { dest, .. } => *dest,

            InstructionKind::Store { .. }
            | InstructionKind::StoreWeak { .. }
            | InstructionKind::Assign { .. }
            | InstructionKind::CopyAddr { .. }
            | InstructionKind::InitializeVar { .. }
            | InstructionKind::InjectEnumAddr { .. }
            | InstructionKind::UpcastExistential { .. }
            | InstructionKind::MarkFuncEscape { .. }
            | InstructionKind::Release { .. }
            | InstructionKind::DeallocStack { .. }
            | InstructionKind::DestroyValue { .. } => None,
        }
    }

    /// Returns all values used by this instruction, one entry per operand
    /// position (a value used twice appears twice).
    pub fn used_values(&self) -> Vec<ValueId> {
        let mut used = Vec::new();
        let mut add = |v: &Value| {
            if let Value::Operand(id) = v {
                used.push(*id);
            }
        };

        match &self.kind {
            InstructionKind::AllocBox { .. } | InstructionKind::AllocStack { .. } => {}

            InstructionKind::MarkUninit { address, .. }
            | InstructionKind::Load { address, .. }
            | InstructionKind::LoadWeak { address, .. }
            | InstructionKind::InitializeVar { address }
            | InstructionKind::InjectEnumAddr { address, .. }
            | InstructionKind::EnumDataAddr { address, .. }
            | InstructionKind::InitExistential { address, .. }
            | InstructionKind::ProjectExistential { address, .. }
            | InstructionKind::ProtocolMethod { address, .. }
            | InstructionKind::MarkFuncEscape { address }
            | InstructionKind::DeallocStack { address } => add(address),

            InstructionKind::TupleElementAddr { base, .. }
            | InstructionKind::StructElementAddr { base, .. } => add(base),

            InstructionKind::Store { value, address }
            | InstructionKind::StoreWeak { value, address, .. }
            | InstructionKind::Assign { value, address } => {
                add(value);
                add(address);
            }

            InstructionKind::CopyAddr { src, dest_addr, .. } => {
                add(src);
                add(dest_addr);
            }

            InstructionKind::UpcastExistential { src, dest_addr } => {
                add(src);
                add(dest_addr);
            }

            InstructionKind::Tuple { elements, .. } => elements.iter().for_each(add),
            InstructionKind::Struct { fields, .. } => fields.iter().for_each(add),

            InstructionKind::TupleExtract { aggregate, .. }
            | InstructionKind::StructExtract { aggregate, .. } => add(aggregate),

            InstructionKind::Apply { args, .. } | InstructionKind::PartialApply { args, .. } => {
                args.iter().for_each(add)
            }

            InstructionKind::Release { value } | InstructionKind::DestroyValue { value } => {
                add(value)
            }
        }

        used
    }

    /// Replaces every use of `from` in this instruction's operands with `to`.
    /// Definitions are never rewritten.
    pub fn replace_value_uses(&mut self, from: ValueId, to: Value) {
        let repl = |v: &mut Value| {
            if *v == Value::Operand(from) {
                *v = to;
            }
        };

        match &mut self.kind {
            InstructionKind::AllocBox { .. } | InstructionKind::AllocStack { .. } => {}

            InstructionKind::MarkUninit { address, .. }
            | InstructionKind::Load { address, .. }
            | InstructionKind::LoadWeak { address, .. }
            | InstructionKind::InitializeVar { address }
            | InstructionKind::InjectEnumAddr { address, .. }
            | InstructionKind::EnumDataAddr { address, .. }
            | InstructionKind::InitExistential { address, .. }
            | InstructionKind::ProjectExistential { address, .. }
            | InstructionKind::ProtocolMethod { address, .. }
            | InstructionKind::MarkFuncEscape { address }
            | InstructionKind::DeallocStack { address } => repl(address),

            InstructionKind::TupleElementAddr { base, .. }
            | InstructionKind::StructElementAddr { base, .. } => repl(base),

            InstructionKind::Store { value, address }
            | InstructionKind::StoreWeak { value, address, .. }
            | InstructionKind::Assign { value, address } => {
                repl(value);
                repl(address);
            }

            InstructionKind::CopyAddr { src, dest_addr, .. } => {
                repl(src);
                repl(dest_addr);
            }

            InstructionKind::UpcastExistential { src, dest_addr } => {
                repl(src);
                repl(dest_addr);
            }

            InstructionKind::Tuple { elements, .. } => elements.iter_mut().for_each(repl),
            InstructionKind::Struct { fields, .. } => fields.iter_mut().for_each(repl),

            InstructionKind::TupleExtract { aggregate, .. }
            | InstructionKind::StructExtract { aggregate, .. } => repl(aggregate),

            InstructionKind::Apply { args, .. } | InstructionKind::PartialApply { args, .. } => {
                args.iter_mut().for_each(repl)
            }

            InstructionKind::Release { value } | InstructionKind::DestroyValue { value } => {
                repl(value)
            }
        }
    }
}

impl PrettyPrint for Instruction {
    fn pretty_print(&self, _indent: usize) -> String {
        let p = |v: &Value| v.pretty_print(0);
        match &self.kind {
            InstructionKind::AllocBox { dest, ty, name } => {
                let name = name
                    .as_deref()
                    .map(|n| format!(" // {n}"))
                    .unwrap_or_default();
                format!("%{} = alloc_box {ty}{name}", dest.index())
            }
            InstructionKind::AllocStack { dest, ty, name } => {
                let name = name
                    .as_deref()
                    .map(|n| format!(" // {n}"))
                    .unwrap_or_default();
                format!("%{} = alloc_stack {ty}{name}", dest.index())
            }
            InstructionKind::MarkUninit { dest, address } => {
                format!("%{} = mark_uninit {}", dest.index(), p(address))
            }
            InstructionKind::TupleElementAddr { dest, base, index } => {
                format!("%{} = tuple_element_addr {}, {index}", dest.index(), p(base))
            }
            InstructionKind::StructElementAddr { dest, base, field } => {
                format!(
                    "%{} = struct_element_addr {}, #{field}",
                    dest.index(),
                    p(base)
                )
            }
            InstructionKind::Load { dest, address } => {
                format!("%{} = load {}", dest.index(), p(address))
            }
            InstructionKind::LoadWeak { dest, address } => {
                format!("%{} = load_weak {}", dest.index(), p(address))
            }
            InstructionKind::Store { value, address } => {
                format!("store {}, {}", p(value), p(address))
            }
            InstructionKind::StoreWeak {
                value,
                address,
                is_init,
            } => {
                format!("store_weak {}, {} [init={is_init}]", p(value), p(address))
            }
            InstructionKind::Assign { value, address } => {
                format!("assign {}, {}", p(value), p(address))
            }
            InstructionKind::CopyAddr {
                src,
                dest_addr,
                is_take,
                is_init,
            } => {
                format!(
                    "copy_addr {}, {} [take={is_take}, init={is_init}]",
                    p(src),
                    p(dest_addr)
                )
            }
            InstructionKind::Tuple { dest, elements } => {
                let elts = elements.iter().map(p).collect::<Vec<_>>().join(", ");
                format!("%{} = tuple ({elts})", dest.index())
            }
            InstructionKind::Struct { dest, fields } => {
                let flds = fields.iter().map(p).collect::<Vec<_>>().join(", ");
                format!("%{} = struct ({flds})", dest.index())
            }
            InstructionKind::TupleExtract {
                dest,
                aggregate,
                index,
            } => {
                format!("%{} = tuple_extract {}, {index}", dest.index(), p(aggregate))
            }
            InstructionKind::StructExtract {
                dest,
                aggregate,
                field,
            } => {
                format!(
                    "%{} = struct_extract {}, #{field}",
                    dest.index(),
                    p(aggregate)
                )
            }
            InstructionKind::Apply {
                dest, callee, args, ..
            } => {
                let args_str = args.iter().map(p).collect::<Vec<_>>().join(", ");
                match dest {
                    Some(d) => format!("%{} = apply {callee}({args_str})", d.index()),
                    None => format!("apply {callee}({args_str})"),
                }
            }
            InstructionKind::PartialApply { dest, callee, args } => {
                let args_str = args.iter().map(p).collect::<Vec<_>>().join(", ");
                format!("%{} = partial_apply {callee}({args_str})", dest.index())
            }
            InstructionKind::InitializeVar { address } => {
                format!("initialize_var {}", p(address))
            }
            InstructionKind::InjectEnumAddr { address, variant } => {
                format!("inject_enum_addr {}, #{variant}", p(address))
            }
            InstructionKind::EnumDataAddr {
                dest,
                address,
                variant,
            } => {
                format!("%{} = enum_data_addr {}, #{variant}", dest.index(), p(address))
            }
            InstructionKind::InitExistential {
                dest,
                address,
                concrete_ty,
            } => {
                format!(
                    "%{} = init_existential {}, ${concrete_ty}",
                    dest.index(),
                    p(address)
                )
            }
            InstructionKind::UpcastExistential { src, dest_addr } => {
                format!("upcast_existential {}, {}", p(src), p(dest_addr))
            }
            InstructionKind::ProjectExistential { dest, address } => {
                format!("%{} = project_existential {}", dest.index(), p(address))
            }
            InstructionKind::ProtocolMethod {
                dest,
                address,
                method,
            } => {
                format!("%{} = protocol_method {}, #{method}", dest.index(), p(address))
            }
            InstructionKind::MarkFuncEscape { address } => {
                format!("mark_func_escape {}", p(address))
            }
            InstructionKind::Release { value } => format!("release {}", p(value)),
            InstructionKind::DeallocStack { address } => {
                format!("dealloc_stack {}", p(address))
            }
            InstructionKind::DestroyValue { value } => format!("destroy_value {}", p(value)),
        }
    }
}
