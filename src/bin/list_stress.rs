//! Runs concurrent readers and writers against one of the list sets and reports aggregate totals.
//!
//! ```bash
//! RUST_LOG=lockfree_listset=debug cargo run --release --bin list_stress -- 8 8 1000000 1
//! ```

use std::env;
use std::process::ExitCode;

use lockfree_listset::stress::{self, StressConfig, USAGE};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match StressConfig::from_args(env::args().skip(1)).and_then(|config| stress::run(&config)) {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            eprintln!("{USAGE}");
            ExitCode::FAILURE
        }
    }
}
