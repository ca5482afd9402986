use clap::{Parser, Subcommand};
use kiln::CompileOptions;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "kiln")]
#[command(about = "kiln - compile and run kiln source on the kIR VM")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Fail on host calls that cannot be resolved instead of reflecting
    #[arg(long, global = true)]
    pub strict: bool,

    /// Warn when a host call falls back to reflection
    #[arg(long = "warn-reflection", global = true)]
    pub warn_reflection: bool,

    /// Warn when a loop local loses its primitive type
    #[arg(long = "warn-boxing", global = true)]
    pub warn_boxing: bool,

    /// Keep locals alive until the end of their method
    #[arg(long = "no-clearing", global = true)]
    pub no_clearing: bool,

    /// Verbose output (repeat for more)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load a source file and print the value of its last form
    Run {
        file: PathBuf,
    },
    /// Evaluate an expression
    Eval {
        expr: String,
    },
    /// Print the kIR of every form in a file or expression
    Disasm {
        #[arg(required_unless_present = "expr")]
        file: Option<PathBuf>,

        /// Disassemble this source text instead of a file
        #[arg(short = 'e', long)]
        expr: Option<String>,
    },
    /// Start an interactive session (the default)
    Repl {
        /// Files to load before the first prompt
        #[arg(long = "load", action = clap::ArgAction::Append)]
        preload: Vec<PathBuf>,
    },
}

impl Args {
    pub fn options(&self) -> CompileOptions {
        CompileOptions::new()
            .strict(self.strict)
            .warn_on_reflection(self.warn_reflection)
            .warn_on_boxing(self.warn_boxing)
            .disable_locals_clearing(self.no_clearing)
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
