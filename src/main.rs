//! Schist CLI - REPL and file execution

use std::env;
use std::fs;
use std::process::ExitCode;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use schist::{Interpreter, Lexer, Parser};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() > 1 {
        run_file(&args[1])
    } else {
        repl()
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let tokens = match Lexer::new(&source).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let phrases = match Parser::new(tokens).parse_program() {
        Ok(phrases) => phrases,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut interpreter = Interpreter::new();
    let mut failed = false;
    for phrase in &phrases {
        // a runtime error discards the phrase; the rest of the script
        // still runs against the surviving state
        match interpreter.obey(phrase) {
            Ok(shown) => println!("{}", shown),
            Err(e) => {
                eprintln!("Runtime error: {}", e);
                failed = true;
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn repl() -> ExitCode {
    println!("Schist v0.1.0 - Type :help for help, :quit to exit");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error starting line editor: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut interpreter = Interpreter::new();

    loop {
        match rl.readline("schist> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(command) = line.strip_prefix(':') {
                    match command {
                        "quit" | "q" => break,
                        "help" | "h" => {
                            println!("Commands:");
                            println!("  :quit, :q    Exit the REPL");
                            println!("  :help, :h    Show this help");
                            println!("  :env         List bound names");
                            println!();
                        }
                        "env" => {
                            for name in interpreter.env().names() {
                                println!("  {}", name);
                            }
                        }
                        _ => eprintln!("Unknown command: {}", line),
                    }
                    continue;
                }

                run_line(&mut interpreter, line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    println!("Goodbye!");
    ExitCode::SUCCESS
}

fn run_line(interpreter: &mut Interpreter, line: &str) {
    let tokens = match Lexer::new(line).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            return;
        }
    };

    let phrase = match Parser::new(tokens).parse_phrase() {
        Ok(phrase) => phrase,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            return;
        }
    };

    // a runtime error discards the phrase; the session continues
    match interpreter.obey(&phrase) {
        Ok(shown) => println!("{}", shown),
        Err(e) => eprintln!("Runtime error: {}", e),
    }
}
