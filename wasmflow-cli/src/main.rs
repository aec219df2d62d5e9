//! Thin CLI wrapper around the AArch64 Wasm JIT core (§6.4): `run`,
//! `test`, `explore`. Mirrors `wasmtime-cli`'s `src/bin/wasmtime.rs` in
//! spirit — parse flags with `clap`, install `env_logger`, delegate
//! everything real to the library crates, map failures to the documented
//! exit codes.

mod binary;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use wasmflow_codegen::isa::aarch64::emit::EmittedFunction;
use wasmflow_codegen::{compile_function, OptLevel};
use wasmflow_environ::{DefinedFuncIndex, TranslationEnvironment, Value};
use wasmflow_jit::{Instance, RuntimeConfig};

const EXIT_OK: u8 = 0;
const EXIT_TRAP: u8 = 1;
const EXIT_COMPILE_ERROR: u8 = 2;
const EXIT_USAGE: u8 = 64;

#[derive(Parser)]
#[command(name = "wasmflow", about = "AArch64 Wasm JIT core CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Instantiate a module and invoke an exported function.
    Run {
        file: PathBuf,
        #[arg(long)]
        invoke: Option<String>,
        #[arg(long = "arg")]
        args: Vec<String>,
    },
    /// Run a `.wast` test script. Not implemented: the WAST harness is an
    /// external collaborator (spec.md §1), not part of this core.
    Test { file: PathBuf },
    /// Print one pipeline stage's output for a module's functions.
    Explore {
        file: PathBuf,
        #[arg(long)]
        stage: Stage,
        #[arg(long)]
        func: Option<u32>,
    },
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum Stage {
    Ir,
    Vcode,
    Mc,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn run(command: Command) -> anyhow::Result<u8> {
    match command {
        Command::Run { file, invoke, args } => cmd_run(&file, invoke.as_deref(), &args),
        Command::Test { file } => cmd_test(&file),
        Command::Explore { file, stage, func } => cmd_explore(&file, stage, func),
    }
}

fn parse_arg(s: &str) -> anyhow::Result<Value> {
    if let Ok(v) = s.parse::<i64>() {
        return Ok(if i32::try_from(v).is_ok() {
            Value::I32(v as i32)
        } else {
            Value::I64(v)
        });
    }
    if let Ok(v) = s.parse::<f64>() {
        return Ok(Value::F64(v));
    }
    anyhow::bail!("unrecognized --arg value `{s}` (expected an integer or float)")
}

fn cmd_run(file: &PathBuf, invoke: Option<&str>, raw_args: &[String]) -> anyhow::Result<u8> {
    let bytes = std::fs::read(file)?;
    let binary = binary::text_to_binary(&bytes)?;
    let module = match binary::parse_module(&binary) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("compile error: {e}");
            return Ok(EXIT_COMPILE_ERROR);
        }
    };

    let config = RuntimeConfig::from_env();
    let (mut instance, _stats) = match Instance::instantiate(Arc::new(module), &binary::NoImports, &config) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("compile error: {e}");
            return Ok(EXIT_COMPILE_ERROR);
        }
    };

    if let Err(e) = instance.run_start() {
        eprintln!("trap: {e}");
        return Ok(EXIT_TRAP);
    }

    let Some(name) = invoke else {
        return Ok(EXIT_OK);
    };
    let args = raw_args
        .iter()
        .map(|s| parse_arg(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    match instance.call_export(name, &args) {
        Ok(results) => {
            let rendered: Vec<String> = results.iter().map(|v| format!("{v:?}")).collect();
            println!("{}", rendered.join(" "));
            Ok(EXIT_OK)
        }
        Err(wasmflow_jit::CallError::Trap(report)) => {
            eprintln!("trap: {report}");
            Ok(EXIT_TRAP)
        }
        Err(e) => {
            eprintln!("error invoking `{name}`: {e}");
            Ok(EXIT_USAGE)
        }
    }
}

fn cmd_test(file: &PathBuf) -> anyhow::Result<u8> {
    eprintln!(
        "error: `test` needs a `.wast` script harness, which is an external collaborator, \
         not part of this core (asked to run {})",
        file.display()
    );
    Ok(EXIT_USAGE)
}

struct ExploreEnvironment<'a> {
    module: &'a wasmflow_environ::Module,
}

impl<'a> TranslationEnvironment for ExploreEnvironment<'a> {
    fn module(&self) -> &wasmflow_environ::Module {
        self.module
    }

    fn global_address(&self, _index: wasmflow_environ::GlobalIndex) -> u64 {
        0
    }
}

fn cmd_explore(file: &PathBuf, stage: Stage, only_func: Option<u32>) -> anyhow::Result<u8> {
    let bytes = std::fs::read(file)?;
    let binary = binary::text_to_binary(&bytes)?;
    let module = match binary::parse_module(&binary) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("compile error: {e}");
            return Ok(EXIT_COMPILE_ERROR);
        }
    };
    let env = ExploreEnvironment { module: &module };

    for (defined_index, _) in module.function_bodies.iter() {
        if let Some(only) = only_func {
            if module.func_index(defined_index).as_u32() != only {
                continue;
            }
        }
        println!("== function {} ==", module.func_index(defined_index).as_u32());
        match stage {
            Stage::Ir => match wasmflow_codegen::translate_function(&env, defined_index) {
                Ok(func) => println!("{func:#?}"),
                Err(e) => {
                    eprintln!("compile error: {e}");
                    return Ok(EXIT_COMPILE_ERROR);
                }
            },
            Stage::Vcode => match compile_to(&env, defined_index, Pipeline::Vcode) {
                Ok(Rendered::Vcode(vcode)) => println!("{vcode:#?}"),
                Ok(_) => unreachable!(),
                Err(e) => {
                    eprintln!("compile error: {e}");
                    return Ok(EXIT_COMPILE_ERROR);
                }
            },
            Stage::Mc => match compile_function(&env, defined_index, OptLevel::Speed) {
                Ok(EmittedFunction { code, .. }) => {
                    for line in wasmflow_codegen::disassemble(&code) {
                        println!("{line}");
                    }
                }
                Err(e) => {
                    eprintln!("compile error: {e}");
                    return Ok(EXIT_COMPILE_ERROR);
                }
            },
        }
    }
    Ok(EXIT_OK)
}

enum Pipeline {
    Vcode,
}

enum Rendered {
    Vcode(wasmflow_codegen::isa::aarch64::vcode::VCodeFunction),
}

fn compile_to(
    env: &dyn TranslationEnvironment,
    defined_index: DefinedFuncIndex,
    which: Pipeline,
) -> wasmflow_codegen::CompileResult<Rendered> {
    let func = wasmflow_codegen::translate_function(env, defined_index)?;
    let func = wasmflow_codegen::opt::optimize(func, OptLevel::Speed);
    let vcode = wasmflow_codegen::isa::aarch64::lower::lower(&func)?;
    match which {
        Pipeline::Vcode => Ok(Rendered::Vcode(vcode)),
    }
}
