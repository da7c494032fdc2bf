//! Source annotation
//!
//! Writes a copy of every user module with the inferred types pasted as
//! trailing comments (`<stem>.ss.py`). The annotation of one module is a
//! pure projection over its source lines, see [`annotate_module`].

use crate::config::CompilerOptions;
use crate::error::{Result, SkeinError};
use crate::hir::{ExprId, ExprKind, HirExpr, StmtKind};
use crate::infer::InferenceResult;
use crate::program::{ModuleId, Program};
use crate::typestr::describe;
use crate::visitor::{all_stmts_deep, visit_stmts_deep};
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Column trailing comments are aligned to.
const COMMENT_COLUMN: usize = 40;

/// Annotate every non-builtin module. Returns the files written; a file
/// that cannot be written is skipped.
pub fn annotate_program(program: &Program, result: &InferenceResult, options: &CompilerOptions) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for module in program.modules.iter().filter(|m| !m.builtin) {
        let lines = annotate_module(program, result, module.id)?;
        let dir = options
            .output_dir
            .clone()
            .or_else(|| module.path.parent().map(PathBuf::from))
            .unwrap_or_default();
        let path = dir.join(format!("{}.ss.py", module.name));
        let mut text = lines.join("\n");
        text.push('\n');
        match std::fs::write(&path, text) {
            Ok(()) => {
                info!("annotated {}", path.display());
                written.push(path);
            }
            Err(e) => debug!("skipping annotation of {}: {}", path.display(), e),
        }
    }
    Ok(written)
}

/// Annotated source lines of one module.
pub fn annotate_module(program: &Program, result: &InferenceResult, module: ModuleId) -> Result<Vec<String>> {
    let m = program.module(module);
    let merged = &result.merged;
    let mut paster = Paster::new(m.source.lines().map(str::to_string).collect())?;

    let mut exprs: Vec<&HirExpr> = Vec::new();
    visit_stmts_deep(&m.hir.body, &mut |e| exprs.push(e), &mut |_| {});
    let by_id: HashMap<ExprId, &HirExpr> = exprs.iter().map(|e| (e.id, *e)).collect();
    let stmts = all_stmts_deep(&m.hir.body);

    let has_node = |id: ExprId| {
        program.module_of_expr(id) == Some(module) && !result.nodes.nodes_of_expr(id).is_empty()
    };
    let text_of = |id: ExprId| merged.expr(id).and_then(|t| describe(program, merged, t));

    let passes: [fn(&ExprKind) -> bool; 3] = [
        |k| matches!(k, ExprKind::Literal(_) | ExprKind::Name(_)),
        |k| matches!(k, ExprKind::Attribute { .. }),
        |k| matches!(k, ExprKind::Tuple(_) | ExprKind::List(_) | ExprKind::Dict(_)),
    ];
    for pass in passes {
        for e in exprs.iter().filter(|e| pass(&e.kind)) {
            if has_node(e.id) {
                paster.paste(e.line, text_of(e.id));
            }
        }
    }

    for class in program.classes.iter().filter(|c| c.module == module) {
        if result.contexts.class_ctx(class.id).is_none() {
            continue;
        }
        let labels: Vec<String> = class
            .vars
            .iter()
            .filter(|(name, _)| !name.starts_with("__"))
            .filter_map(|(name, v)| {
                let text = merged.var(*v).and_then(|t| describe(program, merged, t))?;
                Some(format!("{name}: {text}"))
            })
            .collect();
        if !labels.is_empty() {
            paster.paste(class.def.line, Some(labels.join(", ")));
        }
    }

    for func in program.functions_of(module).filter(|f| !f.inherited) {
        if result.variants(func.id).is_empty() {
            paster.paste(func.def.line, None);
            continue;
        }
        let labels: Vec<String> = func
            .formals
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.starts_with("__"))
            .map(|(i, name)| {
                let types = func.formal_var(i).and_then(|v| merged.var(v));
                let text = types.and_then(|t| describe(program, merged, t)).unwrap_or_else(|| "?".into());
                format!("{name}: {text}")
            })
            .collect();
        paster.paste(func.def.line, Some(labels.join(", ")).filter(|s| !s.is_empty()));
    }

    for call in &m.visitor.callfuncs {
        let Some(ExprKind::Call { func, .. }) = by_id.get(call).map(|e| &e.kind) else {
            continue;
        };
        if !has_node(*call) {
            continue;
        }
        let line = match &func.kind {
            ExprKind::Attribute { value, .. } => value.line,
            _ => func.line,
        };
        paster.paste(line, text_of(*call));
    }

    for e in exprs.iter().filter(|e| matches!(e.kind, ExprKind::ListComp { .. })) {
        if has_node(e.id) {
            paster.paste(e.line, text_of(e.id));
        }
    }
    for stmt in &stmts {
        if let StmtKind::Return(Some(value)) = &stmt.kind {
            if has_node(value.id) {
                paster.paste(stmt.line, text_of(value.id));
            }
        }
    }

    for stmt in &stmts {
        match &stmt.kind {
            StmtKind::Assign { targets, value } if has_node(value.id) => {
                let pairs = assigned_pairs(targets.first(), value);
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|id| text_of(*id).unwrap_or_default())
                    .collect();
                let text = parts.join(", ");
                paster.paste(stmt.line, Some(text).filter(|t| !t.trim_matches(|c: char| c == ',' || c == ' ').is_empty()));
            }
            StmtKind::AugAssign { value, .. } if has_node(value.id) => {
                paster.paste(stmt.line, text_of(value.id));
            }
            _ => {}
        }
    }

    Ok(paster.lines)
}

/// Right-hand expressions paired with the targets they end up in: a tuple
/// assigned from a display of the same length pairs up element-wise.
fn assigned_pairs(target: Option<&HirExpr>, value: &HirExpr) -> Vec<ExprId> {
    match (target.map(|t| &t.kind), &value.kind) {
        (
            Some(ExprKind::Tuple(lhs) | ExprKind::List(lhs)),
            ExprKind::Tuple(rhs) | ExprKind::List(rhs),
        ) if lhs.len() == rhs.len() => lhs
            .iter()
            .zip(rhs)
            .flat_map(|(l, r)| assigned_pairs(Some(l), r))
            .collect(),
        _ => vec![value.id],
    }
}

struct Paster {
    lines: Vec<String>,
    comment: Regex,
}

impl Paster {
    fn new(lines: Vec<String>) -> Result<Self> {
        let comment = Regex::new(r#"#[^"']*$"#)
            .map_err(|e| SkeinError::InternalInvariant(format!("comment pattern: {e}")))?;
        Ok(Self { lines, comment })
    }

    /// Replace any trailing comment on `line` (1-based) with `# text`,
    /// aligned to the comment column. `None` only strips.
    fn paste(&mut self, line: usize, text: Option<String>) {
        let Some(slot) = line.checked_sub(1).and_then(|i| self.lines.get_mut(i)) else {
            return;
        };
        let mut code = match self.comment.find(slot) {
            Some(m) => slot[..m.start()].to_string(),
            None => slot.clone(),
        };
        code.truncate(code.trim_end().len());
        if let Some(text) = text {
            if code.len() < COMMENT_COLUMN {
                code.push_str(&" ".repeat(COMMENT_COLUMN - code.len()));
            }
            code.push_str(" # ");
            code.push_str(&text);
        }
        *slot = code;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paste_pads_and_replaces_comment() {
        let mut p = Paster::new(vec!["x = 1  # old".into(), "s = '#'".into()]).unwrap();
        p.paste(1, Some("int".into()));
        assert_eq!(p.lines[0], format!("{:<40} # int", "x = 1"));
        // a hash inside quotes is not a comment
        p.paste(2, Some("str".into()));
        assert_eq!(p.lines[1], format!("{:<40} # str", "s = '#'"));
    }

    #[test]
    fn test_paste_without_text_strips() {
        let mut p = Paster::new(vec!["y = f()   # stale".into()]).unwrap();
        p.paste(1, None);
        assert_eq!(p.lines[0], "y = f()");
        p.paste(0, Some("int".into()));
        p.paste(7, Some("int".into()));
        assert_eq!(p.lines.len(), 1);
    }

    #[test]
    fn test_long_lines_are_not_padded() {
        let long = "value = compute_something(with_many, arguments)";
        let mut p = Paster::new(vec![long.into()]).unwrap();
        p.paste(1, Some("float".into()));
        assert_eq!(p.lines[0], format!("{long} # float"));
    }
}
