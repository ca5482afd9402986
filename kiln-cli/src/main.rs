//! kiln - command-line driver
//!
//! Runs files, evaluates expressions, prints kIR and hosts the REPL.

mod args;
mod repl;

use anyhow::{anyhow, Context, Result};
use args::{Args, Command};
use clap::Parser;
use kiln::Compiler;
use log::info;
use std::fs;

/// Native stack for the evaluation thread; deep non-tail recursion in
/// compiled code runs on it
const EVAL_STACK: usize = 256 << 20;

/// Headroom kept below `EVAL_STACK` for the compiler and natives
const STACK_RESERVE: usize = 8 << 20;

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level()))
        .init();

    let worker = std::thread::Builder::new()
        .name("kiln-eval".to_string())
        .stack_size(EVAL_STACK)
        .spawn(move || run(args))
        .context("failed to start the evaluation thread")?;
    worker
        .join()
        .map_err(|_| anyhow!("evaluation thread panicked"))?
}

fn run(args: Args) -> Result<()> {
    let mut compiler = Compiler::new(args.options());
    compiler
        .runtime()
        .set_stack_budget(EVAL_STACK - STACK_RESERVE);
    match args.command.clone().unwrap_or(Command::Repl { preload: Vec::new() }) {
        Command::Run { file } => {
            info!("loading {}", file.display());
            let result = compiler.load_file(&file);
            report_warnings(&mut compiler);
            let value = result.map_err(|e| anyhow!("{}", e))?;
            if !value.is_nil() {
                println!("{}", value);
            }
        }
        Command::Eval { expr } => {
            let result = compiler.load_str(&expr);
            report_warnings(&mut compiler);
            let value = result.map_err(|e| anyhow!("{}", e))?;
            println!("{}", value);
        }
        Command::Disasm { file, expr } => {
            let source = match (expr, file) {
                (Some(expr), _) => expr,
                (None, Some(file)) => {
                    compiler.options_mut().file = Some(file.display().to_string());
                    fs::read_to_string(&file)
                        .with_context(|| format!("failed to read {}", file.display()))?
                }
                (None, None) => return Err(anyhow!("nothing to disassemble")),
            };
            let result = compiler.disasm(&source);
            report_warnings(&mut compiler);
            print!("{}", result.map_err(|e| anyhow!("{}", e))?);
        }
        Command::Repl { preload } => {
            let mut session = repl::Session::new(compiler);
            for file in &preload {
                session.load(file);
            }
            repl::run(session)?;
        }
    }
    Ok(())
}

pub(crate) fn report_warnings(compiler: &mut Compiler) {
    for warning in compiler.take_warnings() {
        eprintln!("{}", warning);
    }
}
