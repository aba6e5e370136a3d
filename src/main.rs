use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use gslang::backend::vm::Vm;
use gslang::bytecode::compile;
use gslang::linter::{self, LintOutcome};
use gslang::parser;
use gslang::repl::Repl;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut debug = false;
    let mut input_path: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" => debug = true,
            "-version" | "--version" => {
                println!("gslang {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "lint" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing file name after 'lint'"))?;
                return lint(&path);
            }
            _ => {
                input_path = Some(arg);
                if args.next().is_some() {
                    bail!("only one input file is supported");
                }
                break;
            }
        }
    }

    match input_path {
        Some(path) if path.ends_with(".gs") => run_file(&path, debug),
        Some(other) => bail!("unknown command '{other}' (expected a .gs file)"),
        None => Repl::new().run(),
    }
}

fn run_file(path: &str, debug: bool) -> Result<()> {
    let source = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let program = parser::parse_source(&source)?;
    let code = compile(&program);

    let mut vm = Vm::new().with_debug(debug);
    match vm.execute(code) {
        Ok(_) => {
            for line in vm.take_output() {
                println!("{line}");
            }
            Ok(())
        }
        Err(error) => {
            eprint!("{}", vm.stack_trace(&error));
            std::process::exit(1);
        }
    }
}

fn lint(path: &str) -> Result<()> {
    match linter::lint_file(Path::new(path))? {
        LintOutcome::Clean => println!("File {path} is already formatted"),
        LintOutcome::Rewritten => println!("File {path} has been formatted"),
    }
    Ok(())
}
