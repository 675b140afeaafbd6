use cpscheme::ast::Value;
use cpscheme::scheme::indentation_depth;
use cpscheme::{Error, Interpreter};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("cpscheme - a Scheme on a CPS register machine");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Unfinished forms continue on the next line.");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut interp = Interpreter::new();

    // Register custom function that can be called from user code for demonstration purposes
    interp.register_operation::<(), _>("help", print_help);

    if let Some(path) = std::env::args().nth(1) {
        match interp.load(&path) {
            Ok(_) => println!("Loaded {path}"),
            Err(e) => println!("Error: {e}"),
        }
    }

    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "cpscheme> " } else { "      ... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    match command {
                        ":help" => {
                            _ = print_help().is_ok();
                            let _ = rl.add_history_entry(command);
                            continue;
                        }
                        ":env" => {
                            print_environment(&interp);
                            let _ = rl.add_history_entry(command);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                buffer.push_str(&line);
                buffer.push('\n');
                if indentation_depth(&buffer) > 0 {
                    continue;
                }

                let source = std::mem::take(&mut buffer);
                let _ = rl.add_history_entry(source.trim_end());

                match interp.eval_str(&source) {
                    // Don't print the void value (e.g., from define)
                    Ok(Value::Nothing) => {}
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Interrupted) if !buffer.is_empty() => {
                println!("(input discarded)");
                buffer.clear();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() -> Result<Value, Error> {
    println!("cpscheme commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show global bindings and native procedures");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Discard unfinished input, or exit");
    println!();
    println!("Special forms:");
    println!("  quote lambda let letrec begin if set! define");
    println!("  call/cc letcc and or");
    println!();
    println!("Examples:");
    println!("  (define fact (lambda (n) (if (= n 0) 1 (* n (fact (- n 1))))))");
    println!("  (fact 10)");
    println!("  (+ 1 (call/cc (lambda (k) (k 41))))");
    println!("  (call-with-values (lambda () (values 1 2)) cons)");
    println!();
    println!("Run with RUST_LOG=cpscheme=debug to trace evaluation.");
    println!();

    Ok(Value::Nothing)
}

fn print_environment(interp: &Interpreter) {
    let natives = interp.native_names();
    println!("Native procedures ({}):", natives.len());
    // Print in columns for readability
    let mut col = 0;
    for name in natives {
        print!("  {name:<17}");
        col += 1;
        if col % 4 == 0 {
            println!();
        }
    }
    if col % 4 != 0 {
        println!();
    }
    println!();

    let bindings = interp.global().get_all_bindings();
    if bindings.is_empty() {
        println!("No global definitions yet.");
        return;
    }

    println!("Global definitions ({}):", bindings.len());
    for (name, value) in bindings {
        println!("  {name} = {value}");
    }
}
