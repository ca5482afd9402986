//! Interactive session
//!
//! Input is buffered until it reads as complete forms, so a definition can
//! span several lines.

use crate::report_warnings;
use anyhow::Result;
use kiln::Compiler;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;

const BANNER: &str = r#"
kiln REPL
Type expressions to evaluate, :help for commands, :quit to exit
"#;

fn print_help() {
    println!(
        r#"
Commands:
  :help, :h       Show this help
  :quit, :q       Exit the REPL
  :load FILE      Load and evaluate a file
  :disasm EXPR    Show the kIR for an expression without keeping it
  :warn           Toggle reflection warnings

Examples:
  (+ 1 2)                         ; => 3
  (defn sq [^long x] (* x x))
  (sq 5)                          ; => 25
  (loop [i 0] (if (< i 3) (recur (inc i)) i))  ; => 3
"#
    );
}

/// What the caller should do after a line was handled
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// More input is needed to finish the current form
    Pending,
    Quit,
}

pub struct Session {
    compiler: Compiler,
    buffer: String,
}

impl Session {
    pub fn new(compiler: Compiler) -> Self {
        Self {
            compiler,
            buffer: String::new(),
        }
    }

    pub fn prompt(&self) -> &'static str {
        if self.buffer.is_empty() {
            "kiln> "
        } else {
            "  ... "
        }
    }

    pub fn load(&mut self, path: &Path) {
        let result = self.compiler.load_file(path);
        report_warnings(&mut self.compiler);
        match result {
            Ok(value) => println!("{}", value),
            Err(e) => eprintln!("{}", e),
        }
    }

    pub fn handle_line(&mut self, line: &str) -> Step {
        if self.buffer.is_empty() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return Step::Continue;
            }
            if trimmed.starts_with(':') {
                return self.command(trimmed);
            }
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');
        if let Err(e) = kdn::read_all(&self.buffer) {
            if e.message().starts_with("EOF while reading") {
                return Step::Pending;
            }
        }

        let source = std::mem::take(&mut self.buffer);
        let result = self.compiler.load_str(&source);
        report_warnings(&mut self.compiler);
        match result {
            Ok(value) => println!("{}", value),
            Err(e) => eprintln!("{}", e),
        }
        Step::Continue
    }

    fn command(&mut self, line: &str) -> Step {
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match cmd {
            ":help" | ":h" => print_help(),
            ":quit" | ":q" => return Step::Quit,
            ":load" => {
                if rest.is_empty() {
                    println!("Usage: :load <file>");
                } else {
                    self.load(Path::new(rest));
                }
            }
            ":disasm" => {
                if rest.is_empty() {
                    println!("Usage: :disasm <expression>");
                    return Step::Continue;
                }
                let compiled = kdn::read_str(rest)
                    .map_err(|e| kiln::CompileError::read(&e))
                    .and_then(|form| self.compiler.compile(&form));
                report_warnings(&mut self.compiler);
                match compiled {
                    Ok(unit) => print!("{}", unit),
                    Err(e) => eprintln!("{}", e),
                }
            }
            ":warn" => {
                let options = self.compiler.options_mut();
                options.warn_on_reflection = !options.warn_on_reflection;
                println!("reflection warnings {}", if options.warn_on_reflection { "on" } else { "off" });
            }
            _ => println!("Unknown command: {}. Type :help for help.", line),
        }
        Step::Continue
    }
}

pub fn run(mut session: Session) -> Result<()> {
    println!("{}", BANNER);
    let mut rl = DefaultEditor::new()?;

    loop {
        match rl.readline(session.prompt()) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                if session.handle_line(&line) == Step::Quit {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                session.buffer.clear();
            }
            Err(ReadlineError::Eof) => {
                println!("Bye!");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_form_waits_for_more_input() {
        let mut session = Session::new(Compiler::default());
        assert_eq!(session.handle_line("(defn sq [x]"), Step::Pending);
        assert_eq!(session.prompt(), "  ... ");
        assert_eq!(session.handle_line("  (* x x))"), Step::Continue);
        assert_eq!(session.prompt(), "kiln> ");
        assert!(session.compiler.eval_str("(sq 4)").is_ok());
    }

    #[test]
    fn test_commands() {
        let mut session = Session::new(Compiler::default());
        assert_eq!(session.handle_line(":warn"), Step::Continue);
        assert!(session.compiler.options().warn_on_reflection);
        assert_eq!(session.handle_line(":q"), Step::Quit);
    }

    #[test]
    fn test_errors_do_not_end_the_session() {
        let mut session = Session::new(Compiler::default());
        assert_eq!(session.handle_line("(nope)"), Step::Continue);
        assert_eq!(session.handle_line("(+ 1 2)"), Step::Continue);
    }
}
