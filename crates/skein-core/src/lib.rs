//! Skein compiler front end
//!
//! Whole-program type inference for a statically-inferable subset of
//! Python. The pipeline loads a main module and everything it imports,
//! declares every module, class, function and variable, runs the
//! constraint-graph engine to a fixpoint and hands the merged types to a
//! [`backend::Backend`].
//!
//! ```no_run
//! use skein_core::{CompilerOptions, SkeinPipeline};
//!
//! let pipeline = SkeinPipeline::new(CompilerOptions::default());
//! let analyzed = pipeline.analyze_source("demo", "x = 1 + 2\n").unwrap();
//! println!("{}", analyzed.describe_global("x").unwrap());
//! ```

pub mod annotate;
pub mod ast_bridge;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hierarchy;
pub mod hir;
pub mod infer;
pub mod loader;
pub mod program;
pub mod types;
pub mod typestr;
pub mod visitor;

pub use backend::{Backend, ManifestBackend};
pub use config::{CompilerOptions, InferenceConfig, WorklistOrder};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity};
pub use error::{Result, SkeinError};
pub use infer::{InferenceEngine, InferenceResult, MergedTypeMap};
pub use loader::{LoadedProgram, Loader};
pub use program::Program;

use std::path::{Path, PathBuf};
use tracing::info;

/// A declared program together with its inference result.
#[derive(Debug)]
pub struct Analyzed {
    pub program: Program,
    pub result: InferenceResult,
}

impl Analyzed {
    /// Loader and engine diagnostics, deduplicated and sorted.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.result.diagnostics.sorted()
    }

    /// Merged type of a global of the main module, rendered.
    pub fn describe_global(&self, name: &str) -> Option<String> {
        let main = self.program.main_module()?;
        let var = main.visitor.globals.get(name)?;
        typestr::describe(&self.program, &self.result.merged, self.result.merged.var(*var)?)
    }
}

pub struct SkeinPipeline {
    options: CompilerOptions,
}

impl SkeinPipeline {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Load and analyze the program whose main module is `path`.
    pub fn analyze_path(&self, path: &Path) -> Result<Analyzed> {
        let loaded = Loader::new(&self.options).load(path)?;
        self.infer(loaded)
    }

    /// Analyze an in-memory main module named `name`.
    pub fn analyze_source(&self, name: &str, source: &str) -> Result<Analyzed> {
        let loaded = Loader::new(&self.options).load_source(name, source)?;
        self.infer(loaded)
    }

    fn infer(&self, loaded: LoadedProgram) -> Result<Analyzed> {
        let LoadedProgram { program, diagnostics } = loaded;
        let mut result = InferenceEngine::analyze(&program, &self.options.inference)?;
        result.diagnostics.extend(diagnostics);
        info!("{} warnings", result.diagnostics.warning_count());
        Ok(Analyzed { program, result })
    }

    /// Write the annotated sources (when enabled) and the backend output.
    pub fn emit(&self, analyzed: &Analyzed, backend: &dyn Backend) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if self.options.annotate {
            written.extend(annotate::annotate_program(&analyzed.program, &analyzed.result, &self.options)?);
        }
        written.extend(backend.generate(&analyzed.program, &analyzed.result, &self.options)?);
        Ok(written)
    }
}
