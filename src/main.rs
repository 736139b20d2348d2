use clap::Parser;
use clap::error::ErrorKind;
use log::{LevelFilter, info};
use lywsd03mmc_listener::app::{Options, RunError, run};
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(default)
        .parse_default_env()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = match Options::try_parse() {
        Ok(options) => options,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_ERROR);
        }
    };

    init_logging(options.verbose);

    // Interrupts end the process at once; in-flight BLE calls are abandoned.
    let result: Result<(), RunError> = tokio::select! {
        result = run(options) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            std::process::exit(EXIT_SUCCESS);
        }
    };

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
