//! Code generator hand-off
//!
//! A [`Backend`] consumes the finished inference result. The bundled
//! [`ManifestBackend`] serializes the per-variant and merged types to
//! `<stem>.types.json` for an external code generator.

use crate::config::CompilerOptions;
use crate::error::{Result, SkeinError};
use crate::infer::{InferenceResult, InferenceStats};
use crate::program::{Function, Module, Program};
use crate::typestr::describe;
use crate::types::TypeSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

pub trait Backend {
    fn name(&self) -> &'static str;

    /// Generate output for a program whose inference reached a fixpoint.
    /// Returns the files written.
    fn generate(&self, program: &Program, result: &InferenceResult, options: &CompilerOptions) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Serialize)]
pub struct Manifest<'a> {
    pub main: String,
    pub options: &'a CompilerOptions,
    pub stats: &'a InferenceStats,
    pub modules: Vec<ModuleManifest>,
}

#[derive(Debug, Serialize)]
pub struct ModuleManifest {
    pub name: String,
    pub path: PathBuf,
    pub builtin: bool,
    pub globals: BTreeMap<String, String>,
    pub functions: Vec<FunctionManifest>,
    pub classes: Vec<ClassManifest>,
}

#[derive(Debug, Serialize)]
pub struct FunctionManifest {
    pub name: String,
    pub inherited: bool,
    pub returns: String,
    pub variants: Vec<VariantManifest>,
}

#[derive(Debug, Serialize)]
pub struct VariantManifest {
    pub context: String,
    pub fallback: bool,
    pub params: Vec<(String, String)>,
    pub returns: String,
}

#[derive(Debug, Serialize)]
pub struct ClassManifest {
    pub name: String,
    pub bases: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub methods: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestBackend;

impl ManifestBackend {
    pub fn manifest<'a>(
        &self,
        program: &Program,
        result: &'a InferenceResult,
        options: &'a CompilerOptions,
    ) -> Manifest<'a> {
        let text = |types: Option<&TypeSet>| {
            types
                .and_then(|t| describe(program, &result.merged, t))
                .unwrap_or_else(|| "?".to_string())
        };
        let function = |f: &Function| FunctionManifest {
            name: program.function_name(f.id),
            inherited: f.inherited,
            returns: text(result.merged.ret(f.id)),
            variants: result
                .variants(f.id)
                .into_iter()
                .map(|ctx| VariantManifest {
                    context: ctx.to_string(),
                    fallback: result.contexts.get(ctx).fallback,
                    params: f
                        .formals
                        .iter()
                        .enumerate()
                        .map(|(i, name)| (name.clone(), text(Some(&result.param_types(program, f.id, ctx, i)))))
                        .collect(),
                    returns: text(Some(&result.return_types(ctx))),
                })
                .collect(),
        };
        let module = |m: &Module| ModuleManifest {
            name: m.name.clone(),
            path: m.path.clone(),
            builtin: m.builtin,
            globals: m
                .visitor
                .globals
                .iter()
                .map(|(name, v)| (name.clone(), text(result.merged.var(*v))))
                .collect(),
            functions: program
                .functions_of(m.id)
                .filter(|f| f.class.is_none())
                .map(&function)
                .collect(),
            classes: program
                .classes
                .iter()
                .filter(|c| c.module == m.id)
                .map(|c| ClassManifest {
                    name: c.name.clone(),
                    bases: program
                        .hierarchy
                        .bases(c.id)
                        .iter()
                        .map(|b| program.class(*b).name.clone())
                        .collect(),
                    attributes: c
                        .vars
                        .iter()
                        .map(|(name, v)| (name.clone(), text(result.merged.var(*v))))
                        .collect(),
                    methods: c.funcs.keys().cloned().collect(),
                })
                .collect(),
        };
        let mut modules: Vec<ModuleManifest> = program.modules.iter().map(module).collect();
        // methods are listed with their module, after the free functions
        for (m, manifest) in program.modules.iter().zip(modules.iter_mut()) {
            manifest
                .functions
                .extend(program.functions_of(m.id).filter(|f| f.class.is_some()).map(&function));
        }
        Manifest {
            main: program.main_module().map(|m| m.name.clone()).unwrap_or_default(),
            options,
            stats: &result.stats,
            modules,
        }
    }
}

impl Backend for ManifestBackend {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn generate(&self, program: &Program, result: &InferenceResult, options: &CompilerOptions) -> Result<Vec<PathBuf>> {
        let Some(main) = program.main_module() else {
            return Ok(Vec::new());
        };
        let dir = options
            .output_dir
            .clone()
            .or_else(|| main.path.parent().map(PathBuf::from))
            .unwrap_or_default();
        let path = dir.join(format!("{}.types.json", main.name));
        let manifest = self.manifest(program, result, options);
        let json = serde_json::to_string_pretty(&manifest).map_err(|e| SkeinError::Io(std::io::Error::other(e)))?;
        std::fs::write(&path, json)?;
        info!("wrote type manifest {}", path.display());
        Ok(vec![path])
    }
}
