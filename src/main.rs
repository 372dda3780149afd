use std::process;

use yal::{repl, run_source, Engine, YalError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = Engine::Vm;
    let mut script: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--engine" | "-engine" => {
                let Some(value) = args.next() else {
                    usage();
                };
                engine = value.parse().unwrap_or_else(|e| {
                    eprintln!("{e}");
                    process::exit(1);
                });
            }
            _ if arg.starts_with('-') => usage(),
            _ => script = Some(arg),
        }
    }

    match script {
        Some(path) => {
            println!("[Processing in {engine} mode]");
            let src = match std::fs::read_to_string(&path) {
                Ok(src) => src,
                Err(e) => {
                    println!("Error reading file: {e}");
                    return Ok(());
                }
            };
            process(&src, engine);
            Ok(())
        }
        None => {
            repl::start(engine)?;
            Ok(())
        }
    }
}

/// Run a whole script and print its result (or error) the way the REPL
/// would.
fn process(src: &str, engine: Engine) {
    match run_source(src, engine) {
        Ok(Some(value)) => println!("{value}"),
        Ok(None) => {}
        // Evaluator faults print in value-inspect form.
        Err(YalError::Eval(e)) => println!("ERROR: {e}"),
        Err(e) => println!("{e}"),
    }
}

fn usage() -> ! {
    eprintln!("Usage: yal [--engine vm|eval] [script]");
    process::exit(1);
}
