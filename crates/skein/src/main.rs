//! Skein command-line interface
//!
//! Loads a program, runs whole-program type inference, prints the
//! diagnostics and hands the result to the code generator backend.

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use colored::Colorize;
use skein_core::{Backend, CompilerOptions, ManifestBackend, SkeinError, SkeinPipeline};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(version, about = "Whole-program type inference for a static subset of Python", long_about = None)]
struct Cli {
    /// Main module of the program; `.py` is appended when missing
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Write annotated copies of the sources (<name>.ss.py)
    #[arg(short = 'a', long = "ann")]
    annotate: bool,

    /// Disable bounds checking
    #[arg(short = 'b', long)]
    nobounds: bool,

    /// Generate an extension module
    #[arg(short = 'e', long)]
    extmod: bool,

    /// Extra compiler flags file
    #[arg(short = 'f', long, value_name = "FILE")]
    flags: Option<PathBuf>,

    /// Disable GC warnings
    #[arg(short = 'g', long)]
    nogcwarns: bool,

    /// Use 64-bit integers
    #[arg(short = 'l', long)]
    long: bool,

    /// Name of the generated build file
    #[arg(short = 'm', long, value_name = "NAME", default_value = "Makefile")]
    makefile: String,

    /// Silent mode, only show warnings
    #[arg(short = 'n', long)]
    silent: bool,

    /// Disable assert statements
    #[arg(short = 'o', long)]
    noassert: bool,

    /// Use a fast random number generator
    #[arg(short = 'r', long)]
    random: bool,

    /// Use a fast string hashing algorithm
    #[arg(short = 's', long)]
    strhash: bool,

    /// Disable wrap-around checking
    #[arg(short = 'w', long)]
    nowrap: bool,

    /// Print a traceback for uncaught exceptions
    #[arg(short = 'x', long)]
    traceback: bool,

    /// Add a library directory (may be repeated)
    #[arg(short = 'L', long = "lib", value_name = "DIR")]
    libdirs: Vec<PathBuf>,

    /// Debug level: 0 warn, 1 info, 2 debug, 3 trace
    #[arg(short = 'd', long, value_name = "LEVEL", default_value_t = 0)]
    debug: u8,
}

impl Cli {
    fn options(&self) -> CompilerOptions {
        CompilerOptions {
            bounds_checking: !self.nobounds,
            extension_module: self.extmod,
            annotate: self.annotate,
            debug_level: self.debug,
            long_integers: self.long,
            gc_warnings: !self.nogcwarns,
            wrap_around_check: !self.nowrap,
            fast_random: self.random,
            assertions: !self.noassert,
            makefile_name: self.makefile.clone(),
            flags_file: self.flags.clone(),
            silent: self.silent,
            fast_hash: self.strhash,
            backtrace: self.traceback,
            libdirs: self.libdirs.clone(),
            ..CompilerOptions::default()
        }
    }

    fn source_path(&self) -> PathBuf {
        match self.file.extension() {
            Some(ext) if ext == "py" => self.file.clone(),
            _ => {
                let mut name = self.file.clone().into_os_string();
                name.push(".py");
                PathBuf::from(name)
            }
        }
    }
}

fn init_logging(level: u8) {
    let default = match level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // help is a usage message like any other; only --version succeeds
            return match e.kind() {
                ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    init_logging(cli.debug);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<SkeinError>().map_or(1, SkeinError::exit_code);
            if e.downcast_ref::<SkeinError>().is_some_and(SkeinError::is_defect) {
                eprintln!("{} {:#}", "internal error:".red().bold(), e);
            } else {
                eprintln!("{} {:#}", "error:".red().bold(), e);
            }
            ExitCode::from(code)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let started = Instant::now();
    let options = cli.options();
    if !options.silent {
        println!("{}", format!("*** SKEIN type inference {} ***", env!("CARGO_PKG_VERSION")).bold());
        println!();
    }

    let path = cli.source_path();
    if !path.is_file() {
        let module = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        return Err(SkeinError::load(module, &path, "no such file").into());
    }
    if let Some(flags) = &options.flags_file {
        check_flags_file(flags)?;
    }
    debug!("options: {:?}", options);

    let pipeline = SkeinPipeline::new(options);
    if !pipeline.options().silent {
        println!("[analyzing types..]");
    }
    let analyzed = pipeline
        .analyze_path(&path)
        .with_context(|| format!("analyzing {}", path.display()))?;

    let diagnostics = &analyzed.result.diagnostics;
    if !diagnostics.is_empty() {
        print!("{}", diagnostics.render(colored::control::SHOULD_COLORIZE.should_colorize()));
    }

    let backend = ManifestBackend;
    if !pipeline.options().silent {
        println!("[generating {} output..]", backend.name());
    }
    let written = pipeline
        .emit(&analyzed, &backend)
        .context("writing output")?;
    for file in &written {
        info!("wrote {}", file.display());
    }

    if !pipeline.options().silent {
        println!("[elapsed time: {:.2} seconds]", started.elapsed().as_secs_f64());
    }
    Ok(())
}

fn check_flags_file(flags: &Path) -> Result<()> {
    if !flags.is_file() {
        bail!(SkeinError::Usage(format!("flags file '{}' does not exist", flags.display())));
    }
    Ok(())
}
