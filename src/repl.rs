use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use crate::backend::interpreter::Evaluator;
use crate::value::Value;
use crate::{lexer, parser};

const PROMPT: &str = ">> ";
const CONTINUATION_PROMPT: &str = "       ";

/// Line-oriented REPL. A submission is complete once its braces balance;
/// each submission runs in one persistent evaluator, so bindings (and
/// defined functions) survive between lines and across errors.
pub struct Repl {
    evaluator: Evaluator,
    pending: String,
    depth: usize,
}

impl Repl {
    pub fn new() -> Self {
        Self {
            evaluator: Evaluator::new(),
            pending: String::new(),
            depth: 0,
        }
    }

    pub fn banner() -> String {
        format!(
            "gslang REPL (version {})\nOperating System: {}\nArchitecture: {}",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }

    pub fn run(&mut self) -> Result<()> {
        println!("{}", Self::banner());
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            print!("{}", self.prompt());
            io::stdout().flush().context("flushing prompt")?;

            let Some(line) = lines.next() else {
                // EOF ends the session.
                println!();
                return Ok(());
            };
            let line = line.context("reading stdin")?;

            if let Some(submission) = self.feed(&line) {
                for output in self.execute(&submission) {
                    println!("{output}");
                }
            }
        }
    }

    fn prompt(&self) -> &'static str {
        if self.depth > 0 {
            CONTINUATION_PROMPT
        } else {
            PROMPT
        }
    }

    /// Accumulate one input line. Returns the full submission once every
    /// opened brace has been closed. Empty lines outside a continuation
    /// are ignored.
    fn feed(&mut self, line: &str) -> Option<String> {
        if self.depth == 0 && line.trim().is_empty() {
            return None;
        }

        for c in line.chars() {
            match c {
                '{' => self.depth += 1,
                '}' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        }

        if !self.pending.is_empty() {
            self.pending.push('\n');
        }
        self.pending.push_str(line);

        if self.depth > 0 {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Run one submission and collect the lines to display: buffered
    /// print output, non-nil statement values, and diagnostics. Evaluator
    /// state is kept on errors.
    fn execute(&mut self, source: &str) -> Vec<String> {
        let tokens = match lexer::tokenize(source) {
            Ok(tokens) => tokens,
            Err(error) => return vec![error.to_string()],
        };
        let program = match parser::parse_tokens(tokens) {
            Ok(program) => program,
            Err(error) => return vec![error.to_string()],
        };

        let mut display = Vec::new();
        for node in &program.statements {
            match self.evaluator.eval_toplevel(node) {
                Ok(value) => {
                    display.extend(self.evaluator.take_output());
                    if value != Value::Nil {
                        display.push(value.to_string());
                    }
                }
                Err(error) => {
                    display.extend(self.evaluator.take_output());
                    display.push(error.to_string());
                    break;
                }
            }
        }
        display
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}
