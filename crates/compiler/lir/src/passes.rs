//! # LIR Passes
//!
//! This module hosts the analysis and transformation passes that run on LIR
//! functions, together with the pass manager that sequences them.

pub mod definite_init;

pub use definite_init::{
    perform_definite_initialization, DefiniteInitOptions, DefiniteInitPass, DefiniteInitStats,
};

use crate::{LirFunction, LirModule};

/// A trait for LIR passes
pub trait LirPass {
    /// Apply this pass to a LIR function
    /// Returns true if the function was modified
    fn run(&mut self, function: &mut LirFunction) -> bool;

    /// Get the name of this pass for debugging
    fn name(&self) -> &'static str;
}

/// A pass manager that can run multiple passes in sequence
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn LirPass>>,
}

impl PassManager {
    /// Create a new pass manager
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add a pass to the manager
    pub fn add_pass<P: LirPass + 'static>(mut self, pass: P) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Run all passes over every function of the module
    /// Returns true if any pass modified any function
    pub fn run(&mut self, module: &mut LirModule) -> bool {
        let mut modified = false;

        for function in module.functions_mut() {
            for pass in &mut self.passes {
                if pass.run(function) {
                    modified = true;
                    tracing::debug!(
                        pass = pass.name(),
                        function = %function.name,
                        "pass modified function"
                    );
                }
            }
        }

        modified
    }

    /// The raw-to-canonical pipeline: definite initialization checking plus
    /// lowering of the raw-only opcodes.
    pub fn raw_lowering_pipeline() -> Self {
        Self::new().add_pass(DefiniteInitPass::new())
    }
}
