use anyhow::Result;
use clap::Parser;
use pagerun::harness::{self, HarnessArgs};
use pagerun::spec::load_registry;
use pagerun::types::RuntimeKind;
use pagerun::{i18n, t};
use std::path::PathBuf;
use std::process::ExitCode;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(version, author, about = t!("cli-about"))]
struct Cli {
    // TEST_PATHS: YAML manifests or directories containing them
    #[arg(value_name = "TEST_PATHS", required = true, help = t!("cli-test-paths"))]
    tests: Vec<PathBuf>,

    #[command(flatten)]
    harness: HarnessArgs,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Initialize localization first
    i18n::init();

    let cli = Cli::parse();
    harness::init_tracing(cli.harness.verbose);

    let registry = load_registry(&cli.tests)?;
    harness::run(registry, &cli.harness, RuntimeKind::Sandboxed).await
}
