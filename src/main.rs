// memviz: run a JSON command script against the memory engine and print the result

use std::fs;
use std::path::Path;

use memviz::engine::{EngineConfig, MemoryEngine};
use memviz::script::{parse_script, run_script};
use memviz::snapshot::dump::{dump_heap, dump_ram, dump_stack};

fn print_usage(program_name: &str) {
    eprintln!(
        "Usage: {} [--config <config.json>] [--json] [--verbose] <script.json>",
        program_name
    );
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <file>   Engine configuration (capacity, null_guard, ...)");
    eprintln!("  --json            Print the final snapshot and every step's diff as JSON");
    eprintln!("  --verbose         Log engine activity at debug level");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let args: Vec<String> = std::env::args().collect();
    let program_name = args.first().map(|s| s.as_str()).unwrap_or("memviz");

    let mut config_path = None;
    let mut script_path = None;
    let mut json = false;
    let mut verbose = false;

    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--verbose" | "-v" => verbose = true,
            "--config" => match rest.next() {
                Some(path) => config_path = Some(path.clone()),
                None => {
                    eprintln!("Error: --config needs a file");
                    std::process::exit(1);
                }
            },
            "--help" | "-h" => {
                print_usage(program_name);
                return Ok(());
            }
            _ if script_path.is_none() => script_path = Some(arg.clone()),
            _ => {
                eprintln!("Error: unexpected argument '{}'", arg);
                print_usage(program_name);
                std::process::exit(1);
            }
        }
    }

    let Some(script_path) = script_path else {
        eprintln!("Error: No script provided");
        eprintln!();
        print_usage(program_name);
        std::process::exit(1);
    };

    // Engine activity on stderr; --verbose enables debug; RUST_LOG overrides
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_module("memviz", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();

    if !Path::new(&script_path).exists() {
        eprintln!("Error: File '{}' not found", script_path);
        std::process::exit(1);
    }

    let config = match &config_path {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    let commands = parse_script(&fs::read_to_string(&script_path)?)?;
    log::debug!("loaded {} commands from {}", commands.len(), script_path);

    let mut engine = MemoryEngine::new(config)?;
    let (steps, history) = run_script(&mut engine, &commands)?;
    let snapshot = match history.latest() {
        Some(snapshot) => snapshot,
        None => return Ok(()),
    };

    if json {
        let output = serde_json::json!({
            "steps": steps,
            "snapshot": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for step in &steps {
        match &step.error {
            Some(err) => println!("{}  !! {}", step.command, err),
            None => {
                let names: Vec<&str> = step.events.iter().map(|e| e.name()).collect();
                println!("{}  [{}]", step.command, names.join(", "));
            }
        }
    }
    println!();
    print!("{}", dump_stack(snapshot));
    println!();
    print!("{}", dump_heap(snapshot));
    println!();
    print!("{}", dump_ram(snapshot));

    Ok(())
}
