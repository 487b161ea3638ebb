//! NAAb command-line driver.
//!
//! Thin shell over `naab-runtime`: run a file or evaluate an inline
//! expression. Exit codes: 0 success, 1 uncaught thrown value or
//! runtime error, 2 parse/import error surfaced before execution,
//! 124 top-level timeout.

use clap::{Parser, Subcommand};
use naab_runtime::{exit_code_for, EvalOptions, OutputSink, Runtime, Session};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "naab")]
#[command(about = "NAAb polyglot language runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program file
    #[command(alias = "r")]
    Run {
        /// Path to the .naab source file
        file: PathBuf,
        /// Foreign-call timeout in milliseconds (0 = default 30s)
        #[arg(long, default_value = "0")]
        timeout: u64,
        /// Maximum native call depth
        #[arg(long, default_value = "10000")]
        call_depth: u32,
        /// Render errors in colour
        #[arg(long)]
        color: bool,
        /// Scrub paths and secret-shaped strings from error output
        #[arg(long)]
        production: bool,
        /// Disable parallel dispatch of independent polyglot blocks
        #[arg(long)]
        no_parallel: bool,
    },

    /// Evaluate an inline expression and print its value
    Eval {
        /// Code to evaluate
        code: String,
        /// Foreign-call timeout in milliseconds (0 = default 30s)
        #[arg(long, default_value = "0")]
        timeout: u64,
        /// Render errors in colour
        #[arg(long)]
        color: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            file,
            timeout,
            call_depth,
            color,
            production,
            no_parallel,
        } => {
            let mut options = EvalOptions::default();
            if timeout > 0 {
                options.foreign_timeout = Duration::from_millis(timeout);
            }
            options.max_call_depth = call_depth as usize;
            options.production_errors = production;
            options.parallel_blocks = !no_parallel;
            run_file(&file, options, color, production)
        }
        Commands::Eval {
            code,
            timeout,
            color,
        } => {
            let mut options = EvalOptions::default();
            if timeout > 0 {
                options.foreign_timeout = Duration::from_millis(timeout);
            }
            eval_code(&code, options, color)
        }
    };
    std::process::exit(code);
}

fn run_file(file: &PathBuf, options: EvalOptions, color: bool, production: bool) -> i32 {
    let runtime = match Runtime::new(options, OutputSink::Stdout) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", e.format_plain(production));
            return exit_code_for(&e);
        }
    };
    let code = match runtime.run_file(file) {
        Ok(_) => 0,
        Err(e) => {
            report(&e, color, production);
            exit_code_for(&e)
        }
    };
    runtime.shutdown();
    code
}

fn eval_code(code: &str, options: EvalOptions, color: bool) -> i32 {
    let mut session = match Session::new(options, OutputSink::Stdout) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e.format_plain(false));
            return exit_code_for(&e);
        }
    };
    match session.eval(code) {
        Ok(value) => {
            println!("{}", session.format_value(&value));
            0
        }
        Err(e) => {
            report(&e, color, false);
            exit_code_for(&e)
        }
    }
}

fn report(error: &naab_core::NaabError, color: bool, production: bool) {
    if color {
        eprintln!("{}", error.format_colored(production));
    } else {
        eprintln!("{}", error.format_plain(production));
    }
}
