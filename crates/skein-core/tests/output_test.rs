use skein_core::annotate::{annotate_module, annotate_program};
use skein_core::{Backend, CompilerOptions, ManifestBackend, SkeinPipeline};
use std::fs;
use tempfile::TempDir;

const PROGRAM: &str = r#"import shapes

def inc(argument):  # bump
    return argument + 1

a = inc(1)
b = inc(2.5)
sq = shapes.Square(2)
area = sq.area()
"#;

const SHAPES: &str = r#"class Square:
    def __init__(self, side):
        self.side = side

    def area(self):
        return self.side * self.side
"#;

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("main.py"), PROGRAM).unwrap();
    fs::write(dir.path().join("shapes.py"), SHAPES).unwrap();
    dir
}

fn padded(code: &str, text: &str) -> String {
    format!("{code:<40} # {text}")
}

#[test]
fn test_annotated_source_lines() {
    let dir = project();
    let pipeline = SkeinPipeline::new(CompilerOptions::default());
    let analyzed = pipeline.analyze_path(&dir.path().join("main.py")).unwrap();
    let main = analyzed.program.main_module().unwrap().id;

    let lines = annotate_module(&analyzed.program, &analyzed.result, main).unwrap();
    assert_eq!(lines.len(), PROGRAM.lines().count());
    assert_eq!(lines[0], "import shapes");
    assert_eq!(lines[2], padded("def inc(argument):", "argument: int | float"));
    assert_eq!(lines[3], padded("    return argument + 1", "int | float"));
    assert_eq!(lines[5], padded("a = inc(1)", "int"));
    assert_eq!(lines[6], padded("b = inc(2.5)", "float"));
    assert_eq!(lines[7], padded("sq = shapes.Square(2)", "Square"));
    assert_eq!(lines[8], padded("area = sq.area()", "int"));
}

#[test]
fn test_uncalled_function_loses_stale_comment() {
    let pipeline = SkeinPipeline::new(CompilerOptions::default());
    let analyzed = pipeline
        .analyze_source("demo", "def unused(v):   # v: int\n    return v\n\nx = 1\n")
        .unwrap();
    let main = analyzed.program.main_module().unwrap().id;

    let lines = annotate_module(&analyzed.program, &analyzed.result, main).unwrap();
    assert_eq!(lines[0], "def unused(v):");
    assert_eq!(lines[1], "    return v");
    assert_eq!(lines[3], padded("x = 1", "int"));
}

#[test]
fn test_annotate_program_writes_user_modules() {
    let dir = project();
    let options = CompilerOptions {
        annotate: true,
        ..CompilerOptions::default()
    };
    let pipeline = SkeinPipeline::new(options.clone());
    let analyzed = pipeline.analyze_path(&dir.path().join("main.py")).unwrap();

    let written = annotate_program(&analyzed.program, &analyzed.result, &options).unwrap();
    assert_eq!(written.len(), 2);
    let shapes = fs::read_to_string(dir.path().join("shapes.ss.py")).unwrap();
    let first = shapes.lines().next().unwrap();
    assert_eq!(first, padded("class Square:", "side: int"));
}

#[test]
fn test_unwritable_output_is_skipped() {
    let dir = project();
    let options = CompilerOptions {
        annotate: true,
        output_dir: Some(dir.path().join("does").join("not").join("exist")),
        ..CompilerOptions::default()
    };
    let pipeline = SkeinPipeline::new(options.clone());
    let analyzed = pipeline.analyze_path(&dir.path().join("main.py")).unwrap();

    let written = annotate_program(&analyzed.program, &analyzed.result, &options).unwrap();
    assert!(written.is_empty());
}

#[test]
fn test_manifest_hand_off() {
    let dir = project();
    let out = TempDir::new().unwrap();
    let options = CompilerOptions {
        output_dir: Some(out.path().to_path_buf()),
        bounds_checking: false,
        ..CompilerOptions::default()
    };
    let pipeline = SkeinPipeline::new(options);
    let analyzed = pipeline.analyze_path(&dir.path().join("main.py")).unwrap();

    let written = pipeline.emit(&analyzed, &ManifestBackend).unwrap();
    assert_eq!(written, vec![out.path().join("main.types.json")]);

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
    assert_eq!(json["main"], "main");
    assert_eq!(json["options"]["bounds_checking"], false);
    let main = &json["modules"][0];
    assert_eq!(main["globals"]["b"], "float");
    let inc = &main["functions"][0];
    assert_eq!(inc["name"], "inc");
    assert_eq!(inc["variants"].as_array().unwrap().len(), 2);
    assert_eq!(inc["variants"][1]["params"][0][1], "float");

    let shapes = &json["modules"][1];
    assert_eq!(shapes["classes"][0]["attributes"]["side"], "int");
    assert_eq!(ManifestBackend.name(), "manifest");
}
