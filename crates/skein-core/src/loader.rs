//! Program loader
//!
//! Reads the main module, follows its imports breadth first and hands the
//! parsed modules to the declaration pass. All file reading happens here;
//! nothing touches the filesystem once inference starts.

use crate::ast_bridge::AstBridge;
use crate::config::CompilerOptions;
use crate::diagnostics::DiagnosticSink;
use crate::error::{Result, SkeinError};
use crate::hir::{walk_block, StmtKind};
use crate::program::{Module, ModuleId, ModuleVisitor, Program};
use crate::visitor::declare_program;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output of a successful load: the declared program and any warnings the
/// declaration pass produced.
#[derive(Debug)]
pub struct LoadedProgram {
    pub program: Program,
    pub diagnostics: DiagnosticSink,
}

struct PendingModule {
    name: String,
    path: PathBuf,
    builtin: bool,
    source: Option<String>,
}

pub struct Loader {
    libdirs: Vec<PathBuf>,
}

impl Loader {
    pub fn new(options: &CompilerOptions) -> Self {
        Self {
            libdirs: options.libdirs.clone(),
        }
    }

    /// Load the program rooted at the file `path`.
    pub fn load(&self, path: &Path) -> Result<LoadedProgram> {
        let name = module_name(path);
        if !path.is_file() {
            return Err(SkeinError::load(name, path, "no such file"));
        }
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.load_all(
            PendingModule {
                name,
                path: path.to_path_buf(),
                builtin: false,
                source: None,
            },
            root,
        )
    }

    /// Load an in-memory main module. Imports resolve against the library
    /// directories and the current directory.
    pub fn load_source(&self, name: &str, source: &str) -> Result<LoadedProgram> {
        self.load_all(
            PendingModule {
                name: name.to_string(),
                path: PathBuf::from(format!("{name}.py")),
                builtin: false,
                source: Some(source.to_string()),
            },
            PathBuf::from("."),
        )
    }

    fn load_all(&self, main: PendingModule, root: PathBuf) -> Result<LoadedProgram> {
        let mut program = Program::default();
        let mut module_ids: HashMap<String, ModuleId> = HashMap::new();
        let mut queue = VecDeque::from([main]);
        let mut next_expr = 0u32;

        module_ids.insert(queue[0].name.clone(), ModuleId(0));
        while let Some(pending) = queue.pop_front() {
            let source = match pending.source {
                Some(s) => s,
                None => fs::read_to_string(&pending.path)
                    .map_err(|e| SkeinError::load(&pending.name, &pending.path, e))?,
            };
            let (hir, next) = AstBridge::parse_module(
                &pending.name,
                &source,
                &pending.path.to_string_lossy(),
                next_expr,
            )
            .map_err(|e| SkeinError::load(&pending.name, &pending.path, e))?;
            next_expr = next;

            let id = ModuleId(program.modules.len() as u32);
            debug!("loaded module {} from {}", pending.name, pending.path.display());

            let mut imported = Vec::new();
            walk_block(&hir.body, &mut |stmt| match &stmt.kind {
                StmtKind::Import(aliases) => imported.extend(aliases.iter().map(|a| (a.name.clone(), stmt.line))),
                StmtKind::ImportFrom { module, .. } => imported.push((module.clone(), stmt.line)),
                _ => {}
            });
            for (name, _line) in imported {
                if module_ids.contains_key(&name) {
                    continue;
                }
                let (path, builtin) = self
                    .locate(&root, &name)
                    .ok_or_else(|| SkeinError::load(&name, &pending.path, "imported module not found"))?;
                module_ids.insert(name.clone(), ModuleId(module_ids.len() as u32));
                queue.push_back(PendingModule {
                    name,
                    path,
                    builtin,
                    source: None,
                });
            }

            program.modules.push(Module {
                id,
                name: pending.name,
                path: pending.path,
                builtin: pending.builtin,
                source,
                hir,
                visitor: ModuleVisitor::default(),
            });
        }
        program.main = Some(ModuleId(0));

        let mut diagnostics = DiagnosticSink::new();
        declare_program(&mut program, &module_ids, &mut diagnostics)?;
        info!(
            "loaded {} modules, {} expressions",
            program.modules.len(),
            next_expr
        );
        Ok(LoadedProgram { program, diagnostics })
    }

    /// Search the main directory first, then each library directory.
    fn locate(&self, root: &Path, name: &str) -> Option<(PathBuf, bool)> {
        let relative: PathBuf = name.split('.').collect();
        let candidates = |dir: &Path| {
            [
                dir.join(&relative).with_extension("py"),
                dir.join(&relative).join("__init__.py"),
            ]
        };
        if let Some(found) = candidates(root).into_iter().find(|p| p.is_file()) {
            return Some((found, false));
        }
        self.libdirs
            .iter()
            .flat_map(|dir| candidates(dir))
            .find(|p| p.is_file())
            .map(|p| (p, true))
    }
}

/// Module name of a source file: its stem.
pub fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "__main__".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_follows_imports() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.py"), "import helper\nx = helper.double(2)\n").unwrap();
        fs::write(dir.path().join("helper.py"), "def double(n):\n    return n * 2\n").unwrap();

        let loaded = Loader::new(&CompilerOptions::default())
            .load(&dir.path().join("main.py"))
            .unwrap();
        let names: Vec<_> = loaded.program.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["main", "helper"]);
        assert!(!loaded.program.modules[1].builtin);
        assert!(loaded.program.universe.is_frozen());
    }

    #[test]
    fn test_libdir_modules_are_builtin() {
        let main_dir = TempDir::new().unwrap();
        let lib_dir = TempDir::new().unwrap();
        fs::write(main_dir.path().join("app.py"), "from util import square\ny = square(3)\n").unwrap();
        fs::write(lib_dir.path().join("util.py"), "def square(v):\n    return v * v\n").unwrap();

        let options = CompilerOptions {
            libdirs: vec![lib_dir.path().to_path_buf()],
            ..CompilerOptions::default()
        };
        let loaded = Loader::new(&options).load(&main_dir.path().join("app.py")).unwrap();
        let util = loaded.program.module_by_name("util").unwrap();
        assert!(util.builtin);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let dir = TempDir::new().unwrap();
        let err = Loader::new(&CompilerOptions::default())
            .load(&dir.path().join("absent.py"))
            .unwrap_err();
        assert!(matches!(err, SkeinError::Load { .. }));
    }

    #[test]
    fn test_unresolved_import_is_load_error() {
        let err = Loader::new(&CompilerOptions::default())
            .load_source("m", "import no_such_module_anywhere\n")
            .unwrap_err();
        assert!(err.to_string().contains("no_such_module_anywhere"));
    }

    #[test]
    fn test_parse_error_is_load_error() {
        let err = Loader::new(&CompilerOptions::default())
            .load_source("bad", "def f(:\n")
            .unwrap_err();
        assert!(matches!(err, SkeinError::Load { .. }));
    }

    #[test]
    fn test_declarations() {
        let src = "\
class A:
    def __init__(self, v):
        self.x = v
    def get(self):
        return self.x

class B(A):
    def put(self, w):
        self.y = w

def f(a, b):
    global counter
    c = a + b
    return c

counter = 0
";
        let loaded = Loader::new(&CompilerOptions::default()).load_source("m", src).unwrap();
        let p = &loaded.program;
        let main = p.main.unwrap();
        let a = p.module(main).visitor.classes["A"];
        let b = p.module(main).visitor.classes["B"];
        assert!(p.class(a).vars.contains_key("x"));
        assert!(p.class(b).vars.contains_key("y"));
        assert_eq!(p.hierarchy.bases(b), &[a]);

        // B inherits __init__ and get
        let get = p.class(b).funcs["get"];
        assert!(p.function(get).inherited);
        assert!(!p.function(p.class(b).funcs["put"]).inherited);

        let f = p.function(p.module(main).visitor.funcs["f"]);
        assert_eq!(f.formals, vec!["a", "b"]);
        assert!(f.vars.contains_key("c"));
        assert!(!f.vars.contains_key("counter"));
        assert!(p.module(main).visitor.globals.contains_key("counter"));
    }
}
