//! `cogloop interactive` — Read requests from stdin until `exit`.
//!
//! The orchestrator lives for the whole session, so the resident model is
//! reused between requests.

use super::{
    build_orchestrator, load_config, print_failure, print_report, stop_stream, stream_events,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// A parsed REPL line.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Exit,
    Load(&'a str),
    Files,
    Clear,
    Query(&'a str),
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "exit" | "quit" => Input::Exit,
        "files" => Input::Files,
        "clear" => Input::Clear,
        _ => match line.strip_prefix("load ") {
            Some(path) if !path.trim().is_empty() => Input::Load(path.trim()),
            _ => Input::Query(line),
        },
    }
}

pub async fn run(initial_files: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(&config)?;
    let mut files = initial_files;

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        Cogloop — Interactive Mode            ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Primary:    {}", config.models.primary.file);
    println!("  Secondary:  {}", config.models.secondary.file);
    println!();
    println!("  Type a request and press Enter.");
    println!("  'load <path>' adds a file, 'files' lists them, 'clear' forgets them.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Load(path) => {
                if std::path::Path::new(path).is_file() {
                    files.push(path.to_string());
                    println!("  📄 Loaded {path}");
                } else {
                    println!("  ⚠️  No such file: {path}");
                }
            }
            Input::Files => {
                if files.is_empty() {
                    println!("  (no files)");
                }
                for file in &files {
                    println!("  📄 {file}");
                }
            }
            Input::Clear => {
                files.clear();
                println!("  Files cleared");
            }
            Input::Query(query) => {
                let (id, handle) = stream_events(orchestrator.pipeline());
                let outcome = orchestrator.run(query, files.clone()).await;
                stop_stream(orchestrator.pipeline(), id, handle).await;

                match outcome {
                    Ok(report) => print_report(&report),
                    Err(failure) => print_failure(&failure),
                }
                println!();
            }
        }
    }

    orchestrator.shutdown().await;
    println!("  Goodbye!");
    Ok(())
}
