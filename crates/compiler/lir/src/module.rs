//! # LIR Module
//!
//! A module is the unit of analysis: the set of functions the passes run on.

use index_vec::IndexVec;
use rustc_hash::FxHashMap;

use crate::{FunctionId, LirFunction, PrettyPrint};

/// A collection of LIR functions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LirModule {
    /// All functions in the module
    pub functions: IndexVec<FunctionId, LirFunction>,

    /// Function name lookup
    function_names: FxHashMap<String, FunctionId>,
}

impl LirModule {
    /// Creates a new empty module
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function to the module and returns its ID
    pub fn add_function(&mut self, function: LirFunction) -> FunctionId {
        let name = function.name.clone();
        let id = self.functions.push(function);
        self.function_names.insert(name, id);
        id
    }

    /// Gets a function by ID
    pub fn get_function(&self, id: FunctionId) -> Option<&LirFunction> {
        self.functions.get(id)
    }

    /// Gets a mutable function by ID
    pub fn get_function_mut(&mut self, id: FunctionId) -> Option<&mut LirFunction> {
        self.functions.get_mut(id)
    }

    /// Looks up a function by name
    pub fn lookup_function(&self, name: &str) -> Option<FunctionId> {
        self.function_names.get(name).copied()
    }

    /// Returns the number of functions in the module
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Returns an iterator over all functions
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &LirFunction)> {
        self.functions.iter_enumerated()
    }

    /// Returns a mutable iterator over all functions
    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut LirFunction> {
        self.functions.iter_mut()
    }

    /// Validates every function in the module
    pub fn validate(&self) -> crate::LirResult<()> {
        for (id, function) in self.functions() {
            function
                .validate()
                .map_err(|message| crate::LirError::ValidationError {
                    message: format!("'{}': {message}", function.name),
                    function_id: Some(id),
                    block_id: None,
                })?;
        }
        Ok(())
    }
}

impl PrettyPrint for LirModule {
    fn pretty_print(&self, indent: usize) -> String {
        let mut result = String::new();
        for function in self.functions.iter() {
            result.push_str(&function.pretty_print(indent));
            result.push('\n');
        }
        result
    }
}
