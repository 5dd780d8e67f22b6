// src/main.rs

use canary_track::cli::Args;
use canary_track::config::Config;
use canary_track::instrument;
use clap::Parser;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(verbose: bool) {
    let default = if verbose { "canary_track=debug" } else { "canary_track=info" };
    let filter = EnvFilter::try_from_env("CANARY_TRACK_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);
    let start_time = Instant::now();

    let result = Config::load(&args.repo, args.config.as_deref(), &args.overrides())
        .and_then(|config| instrument::run(&args.run_options(), &config));

    match result {
        Ok(report) => {
            println!(
                "Instrumentation finished in {:.2?}. {} probes in {} of {} changed files.",
                start_time.elapsed(),
                report.total_probes,
                report.instrumented_files(),
                report.intervals.len()
            );
            for component in &report.components {
                println!("  {:>3} {:<30} {} probes", component.id, component.name, component.track_ids.len());
            }
            match &report.generated_file {
                Some(path) => println!("Generated {}", path.display()),
                None => println!("No probes inserted, generated file removed."),
            }
        }
        Err(e) => {
            eprintln!("Error instrumenting repository: {}", e);
            std::process::exit(1);
        }
    }
}
