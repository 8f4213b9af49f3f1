//! End-to-end run shared by the `pagerun` binary and custom `harness = false` test
//! binaries: list or run the registry, print progress, write the TRX report and map the
//! outcome to an exit code.

use crate::backend::{Backend, LocalBackend};
use crate::cdp::{CdpChannel, find_browser};
use crate::engine::run_registry;
use crate::registry::TestRegistry;
use crate::report::{ConsoleReporter, print_summary, render_list};
use crate::sandbox::SandboxBackend;
use crate::trx::{RunInfo, write_trx};
use crate::types::RuntimeKind;
use crate::{t, t_args};
use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, ValueEnum};
use colored::Colorize;
use colored::control::set_override as set_color_override;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Exit status when any test failed.
pub const EXIT_FAILED: u8 = 1;
/// Exit status for a bad invocation, such as an out-of-range `--index`.
pub const EXIT_USAGE: u8 = 2;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RuntimeOpt {
    Local,
    Sandboxed,
}

impl From<RuntimeOpt> for RuntimeKind {
    fn from(v: RuntimeOpt) -> Self {
        match v {
            RuntimeOpt::Local => RuntimeKind::Local,
            RuntimeOpt::Sandboxed => RuntimeKind::Sandboxed,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct HarnessArgs {
    // Where tests run; each entry point picks its own default
    #[arg(long, value_enum, help = t!("cli-runtime"))]
    pub runtime: Option<RuntimeOpt>,

    // 1-based position in the full test list
    #[arg(short = 'i', long = "index", value_name = "N", help = t!("cli-index"))]
    pub index: Option<usize>,

    #[arg(short = 'l', long = "list", help = t!("cli-list"))]
    pub list: bool,

    #[arg(long = "trx", value_name = "FILE", help = t!("cli-trx"))]
    pub trx: Option<PathBuf>,

    // Existing DevTools websocket; otherwise a browser is launched
    #[arg(
        long = "cdp-endpoint",
        value_name = "URL",
        env = "PAGERUN_CDP_ENDPOINT",
        help = t!("cli-cdp-endpoint")
    )]
    pub cdp_endpoint: Option<String>,

    #[arg(
        long = "browser",
        value_name = "PATH",
        env = "PAGERUN_BROWSER",
        help = t!("cli-browser")
    )]
    pub browser: Option<PathBuf>,

    // Anchor for relative dependency paths (default: current directory)
    #[arg(long = "source-dir", value_name = "DIR", help = t!("cli-source-dir"))]
    pub source_dir: Option<PathBuf>,

    #[arg(short = 'q', long = "silent", help = t!("cli-silent"))]
    pub silent: bool,

    #[arg(long = "no-color", help = t!("cli-no-color"))]
    pub no_color: bool,

    #[arg(short = 'v', long = "verbose", help = t!("cli-verbose"))]
    pub verbose: bool,
}

/// Command line of a `harness = false` test binary.
#[derive(Parser, Debug)]
#[command(version, about = t!("cli-harness-about"))]
struct HarnessCli {
    #[command(flatten)]
    args: HarnessArgs,
}

/// `RUST_LOG` wins; otherwise `pagerun=info` with `--verbose`, `pagerun=warn` without.
pub fn init_tracing(verbose: bool) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "pagerun=info".to_string()
        } else {
            "pagerun=warn".to_string()
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn open_sandbox(args: &HarnessArgs) -> Result<SandboxBackend<CdpChannel>> {
    let channel = match &args.cdp_endpoint {
        Some(endpoint) => {
            info!("{}", t_args!("info-connecting", "endpoint" => endpoint));
            CdpChannel::connect(endpoint).await?
        }
        None => {
            let browser = args
                .browser
                .clone()
                .or_else(find_browser)
                .ok_or_else(|| anyhow!(t!("error-no-browser")))?;
            info!("{}", t_args!("info-launching", "browser" => browser.display()));
            CdpChannel::launch(&browser).await?
        }
    };
    let source_dir = match &args.source_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context(t!("error-current-dir"))?,
    };
    Ok(SandboxBackend::new(channel, source_dir))
}

fn print_index_error(registry: &TestRegistry, index: usize) {
    eprintln!(
        "{} {}",
        t!("cli-error-label").red().bold(),
        t_args!("error-invalid-index", "index" => index, "max" => registry.len())
    );
    eprintln!("{}", t!("available-tests"));
    eprint!("{}", render_list(registry));
}

/// List or run `registry` as `args` asks. Test failures become exit status 1; transport
/// and report errors are returned.
pub async fn run(
    registry: TestRegistry,
    args: &HarnessArgs,
    default_runtime: RuntimeKind,
) -> Result<ExitCode> {
    set_color_override(!args.no_color);

    if args.list {
        print!("{}", render_list(&registry));
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(index) = args.index {
        if index == 0 || index > registry.len() {
            print_index_error(&registry, index);
            return Ok(ExitCode::from(EXIT_USAGE));
        }
    }

    if registry.is_empty() && !args.silent {
        println!("{}", t!("no-tests-found").yellow());
    }

    let runtime = args.runtime.map(RuntimeKind::from).unwrap_or(default_runtime);
    let mut backend: Box<dyn Backend> = match runtime {
        RuntimeKind::Local => Box::new(LocalBackend::new()),
        RuntimeKind::Sandboxed => Box::new(
            open_sandbox(args)
                .await
                .context(t!("error-sandbox-unavailable"))?,
        ),
    };

    let mut reporter = ConsoleReporter::new(std::io::stdout(), args.silent);
    let results = run_registry(&registry, backend.as_mut(), args.index, &mut reporter)
        .await
        .context(t!("error-run-aborted-context"))?;

    if !args.silent {
        print_summary(&results);
    }

    if let Some(path) = &args.trx {
        write_trx(&results, &RunInfo::current(), path)?;
    }

    if results.any_failed() {
        Ok(ExitCode::from(EXIT_FAILED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Entry point for a `harness = false` test binary that registers native tests:
///
/// ```no_run
/// use pagerun::registry::RegistryBuilder;
/// use pagerun::types::TestCase;
///
/// fn main() -> std::process::ExitCode {
///     let mut builder = RegistryBuilder::new();
///     builder.test(TestCase::new("adds").with_native(|assert| async move {
///         assert.equals(4, 2 + 2, None)?;
///         Ok::<(), pagerun::assert::TestError>(())
///     }));
///     pagerun::harness::main(builder.build())
/// }
/// ```
pub fn main(registry: TestRegistry) -> ExitCode {
    let _ = dotenvy::dotenv();
    crate::i18n::init();
    let cli = HarnessCli::parse();
    init_tracing(cli.args.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{}", t_args!("error-runtime-start", "error" => e));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(registry, &cli.args, RuntimeKind::Local)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", t!("cli-error-label").red().bold());
            ExitCode::FAILURE
        }
    }
}
