//! Compiler and engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Options that shape a whole compilation run.
///
/// Most flags are forwarded untouched to the code generator through the
/// type-map hand-off; the engine itself only reads `libdirs`, `annotate`
/// and `inference`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerOptions {
    pub bounds_checking: bool,
    pub extension_module: bool,
    pub annotate: bool,
    pub debug_level: u8,
    pub long_integers: bool,
    pub gc_warnings: bool,
    pub wrap_around_check: bool,
    pub fast_random: bool,
    pub assertions: bool,
    pub makefile_name: String,
    pub flags_file: Option<PathBuf>,
    pub silent: bool,
    pub fast_hash: bool,
    pub backtrace: bool,
    /// Extra library search directories, searched in order after the
    /// directory of the main module.
    pub libdirs: Vec<PathBuf>,
    /// Where generated files go; defaults to the main module's directory.
    pub output_dir: Option<PathBuf>,
    #[serde(skip)]
    pub inference: InferenceConfig,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            bounds_checking: true,
            extension_module: false,
            annotate: false,
            debug_level: 0,
            long_integers: false,
            gc_warnings: true,
            wrap_around_check: true,
            fast_random: false,
            assertions: true,
            makefile_name: "Makefile".to_string(),
            flags_file: None,
            silent: false,
            fast_hash: false,
            backtrace: false,
            libdirs: Vec::new(),
            output_dir: None,
            inference: InferenceConfig::default(),
        }
    }
}

/// Order in which the propagator drains its worklist.
///
/// The final type map does not depend on it; it only exists so tests can
/// check that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorklistOrder {
    #[default]
    Fifo,
    Lifo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Variants per function before excess signatures fold into one
    /// generic fallback context.
    pub max_variants: usize,
    pub worklist_order: WorklistOrder,
    /// Stop after this many resolution rounds, keeping partial results.
    pub round_limit: Option<usize>,
    /// Stop once this much wall time has passed, keeping partial results.
    pub deadline: Option<Duration>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_variants: 32,
            worklist_order: WorklistOrder::Fifo,
            round_limit: None,
            deadline: None,
        }
    }
}

impl InferenceConfig {
    pub fn with_order(mut self, order: WorklistOrder) -> Self {
        self.worklist_order = order;
        self
    }

    pub fn with_max_variants(mut self, max: usize) -> Self {
        self.max_variants = max.max(1);
        self
    }

    pub fn with_round_limit(mut self, rounds: usize) -> Self {
        self.round_limit = Some(rounds);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
