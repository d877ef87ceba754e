//! Procvisor - run a command under supervision.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use procvisor::config::{ConfigLoader, SupervisorSettings};
use procvisor::display;
use procvisor::identity::Identity;
use procvisor::process::{StderrPolicy, StdioKind, SupervisorError};
use procvisor::retry::{RetryError, RetryExecutor};

#[derive(Parser)]
#[command(
    name = "procvisor",
    about = "Run commands under supervision with timeouts and retries",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command under supervision.
    Run {
        /// Run as this user.
        #[arg(short, long)]
        user: Option<String>,
        /// Kill the command after this many seconds.
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Working directory for the command.
        #[arg(short = 'C', long)]
        workdir: Option<PathBuf>,
        /// Retry failed runs up to this many attempts in total.
        #[arg(long)]
        retries: Option<u32>,
        /// Base backoff delay in seconds between retries.
        #[arg(long)]
        retry_delay: Option<u64>,
        /// Do not treat stderr output as a failure.
        #[arg(long)]
        allow_stderr: bool,
        /// Echo output as it is captured.
        #[arg(long)]
        debug: bool,
        /// Prompt for one line of input and pass it to the command.
        #[arg(long)]
        prompt: Option<String>,
        /// The command and its arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show the account this process runs as.
    Whoami,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli.config.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Commands::Whoami => match Identity::current() {
            Ok(identity) => {
                display::print_identity(&identity);
                ExitCode::SUCCESS
            }
            Err(e) => {
                display::print_error(&e.to_string());
                ExitCode::FAILURE
            }
        },
        Commands::Run {
            user,
            timeout,
            workdir,
            retries,
            retry_delay,
            allow_stderr,
            debug,
            prompt,
            command,
        } => {
            let mut settings = config.supervisor;
            settings.user = user.or(settings.user);
            settings.timeout_secs = timeout.or(settings.timeout_secs);
            settings.work_dir = workdir.or(settings.work_dir);
            settings.debug |= debug;
            if allow_stderr {
                settings.stderr_policy = StderrPolicy::Ignore;
            }

            let Some((program, args)) = command.split_first() else {
                display::print_error("no command given");
                return ExitCode::from(2);
            };

            let result = match retries {
                Some(attempts) => {
                    let mut policy = config.retry.policy();
                    policy.max_attempts = attempts;
                    if let Some(secs) = retry_delay {
                        policy.base_delay = std::time::Duration::from_secs(secs);
                    }
                    tracing::info!(?policy, "Running with retries");

                    let cancel = CancellationToken::new();
                    let on_interrupt = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            tracing::warn!("Interrupted, no further attempts will be made");
                            on_interrupt.cancel();
                        }
                    });

                    RetryExecutor::new(policy)
                        .run(&cancel, || run_once(&settings, program, args, prompt.as_deref()))
                        .await
                        .map_err(|e| match e {
                            RetryError::Exhausted { last, .. } => last,
                            RetryError::Cancelled | RetryError::NoAttempts => {
                                SupervisorError::Cancelled
                            }
                        })
                }
                None => run_once(&settings, program, args, prompt.as_deref()).await,
            };

            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    let code = e
                        .exit_code()
                        .and_then(|c| u8::try_from(c).ok())
                        .unwrap_or(1);
                    ExitCode::from(code)
                }
            }
        }
    }
}

async fn run_once(
    settings: &SupervisorSettings,
    program: &str,
    args: &[String],
    prompt: Option<&str>,
) -> Result<(), SupervisorError> {
    let supervisor = settings.builder()?.build();

    let pid = supervisor.start(program, args).await?;
    display::print_process_start(pid, &display::format_command(program, args));

    if let Some(prompt) = prompt {
        supervisor.provide_input(prompt).await?;
    }

    let result = supervisor.run().await;
    if !settings.debug {
        display::print_output(StdioKind::Stdout, &supervisor.stdout_snapshot());
        display::print_output(StdioKind::Stderr, &supervisor.get_stderr_output());
    }
    let message = result.as_ref().err().map(ToString::to_string);
    display::print_exit(supervisor.pid(), message.as_deref());
    supervisor.close();

    result.map(|_| ())
}
