//! Minimal CLI: check JSON documents against a schema, or dump the compiled
//! validator program.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde::de::DeserializeOwned;

use crate::options::Options;
use crate::schema::Schema;
use crate::ValidateError;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// validate JSON documents against a declarative schema
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// validate one or more JSON documents against a schema
    Check(CheckArgs),
    /// print the compiled validator program for a schema
    Program(ProgramArgs),
}

#[derive(Args, Debug, Clone)]
struct ValidationSettings {
    /// drop undeclared root properties instead of rejecting them
    #[arg(long, default_value_t = false)]
    extract_top: bool,

    /// drop undeclared properties at every nesting depth
    #[arg(long, default_value_t = false)]
    extract_all: bool,

    /// collect every violation instead of stopping at the first
    #[arg(long, default_value_t = false)]
    all_errors: bool,
}

impl ValidationSettings {
    fn to_options(&self) -> Options {
        let mut opts = Options::NONE;
        if self.extract_top {
            opts = opts | Options::EXTRACT_TOP;
        }
        if self.extract_all {
            opts = opts | Options::EXTRACT_ALL;
        }
        if self.all_errors {
            opts = opts | Options::ALL_ERRORS;
        }
        opts
    }
}

#[derive(clap::Parser, Debug)]
struct CheckArgs {
    /// schema file (JSON)
    #[arg(short, long)]
    schema: PathBuf,

    #[command(flatten)]
    settings: ValidationSettings,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,

    /// only report failures
    #[arg(long, short, default_value_t = false)]
    quiet: bool,
}

#[derive(clap::Parser, Debug)]
struct ProgramArgs {
    /// schema file (JSON)
    #[arg(short, long)]
    schema: PathBuf,

    #[command(flatten)]
    settings: ValidationSettings,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<ExitCode> {
        match &self.cmd {
            Command::Check(args) => args.run(),
            Command::Program(args) => args.run(),
        }
    }
}

impl CheckArgs {
    fn run(&self) -> anyhow::Result<ExitCode> {
        let schema = load_schema(&self.schema)?;
        let opts = self.settings.to_options();
        let paths = resolve_file_path_patterns(&self.input)?;

        let results: Vec<(PathBuf, Result<(), Vec<String>>)> = paths
            .par_iter()
            .map(|path| (path.clone(), check_one(&schema, path, opts)))
            .collect();

        let mut failures = 0usize;
        for (path, outcome) in &results {
            match outcome {
                Ok(()) => {
                    if !self.quiet {
                        println!("{} {}", "ok".green().bold(), path.display());
                    }
                }
                Err(report) => {
                    failures += 1;
                    println!("{} {}", "FAIL".red().bold(), path.display());
                    for line in report {
                        println!("  {line}");
                    }
                }
            }
        }
        if failures > 0 {
            eprintln!("{failures} of {} document(s) failed", results.len());
            Ok(ExitCode::from(1))
        } else {
            Ok(ExitCode::SUCCESS)
        }
    }
}

impl ProgramArgs {
    fn run(&self) -> anyhow::Result<ExitCode> {
        let schema = load_schema(&self.schema)?;
        let listing = schema.listing(self.settings.to_options())?;
        println!("{listing}");
        Ok(ExitCode::SUCCESS)
    }
}

fn load_schema(path: &PathBuf) -> anyhow::Result<Schema> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    let raw: serde_json::Value = from_str_with_path(&source)
        .with_context(|| format!("failed to parse schema file {}", path.display()))?;
    Schema::compile(&raw).with_context(|| format!("invalid schema {}", path.display()))
}

fn check_one(schema: &Schema, path: &PathBuf, opts: Options) -> Result<(), Vec<String>> {
    let source =
        std::fs::read_to_string(path).map_err(|err| vec![format!("cannot read: {err}")])?;
    let value: serde_json::Value =
        from_str_with_path(&source).map_err(|err| vec![format!("not valid JSON: {err:#}")])?;
    match schema.validate_with(&value, opts) {
        Ok(_) => Ok(()),
        Err(ValidateError::Compile(err)) => Err(vec![format!("compiler defect: {err}")]),
        Err(err) => Err(err
            .violations()
            .iter()
            .map(|v| {
                let at = if v.path.is_empty() { "<root>" } else { v.path.as_str() };
                let mut line = format!("{}: {}", at.blue(), v.code.to_string().red());
                if let Some(keys) = &v.unexpected {
                    line.push_str(&format!(" ({})", keys.join(", ")));
                }
                line
            })
            .collect()),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

/// Deserialize with JSON-path context in error messages.
fn from_str_with_path<T: DeserializeOwned>(src: &str) -> anyhow::Result<T> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| {
        let path = err.path().to_string();
        anyhow::anyhow!("at JSON path {path}: {}", err.into_inner())
    })
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            // An explicit glob that matches nothing is an error.
            if !matched_any {
                anyhow::bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }
    Ok(out)
}
