//! openssl-exec CLI - Run openssl actions with expectation-based success checks

mod logging;
mod opts;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tabled::{Table, Tabled};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use openssl_exec_core::domain::EXPECTATIONS;
use openssl_exec_core::{InvokeError, InvokeRequest, Invoker};
use openssl_exec_infra_system::{RunnerConfig, SubprocessRunner};

#[derive(Parser)]
#[command(name = "openssl-exec")]
#[command(about = "Run openssl actions and classify their outcome", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log format: pretty or json
    #[arg(long, env = "OPENSSL_EXEC_LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an action (e.g. req.verify) through openssl
    Run {
        #[command(flatten)]
        action: ActionArgs,

        /// File whose bytes are written to openssl's stdin ("-" for this process's stdin)
        #[arg(short, long)]
        input: Option<String>,

        /// Write openssl's stdout here instead of to stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the argument list an action would run with
    Args {
        #[command(flatten)]
        action: ActionArgs,
    },

    /// List the expected stderr pattern per action
    Expectations,
}

#[derive(Args)]
struct ActionArgs {
    /// Dotted action, e.g. req.verify or pkcs12.export
    action: String,

    /// Option as KEY (flag), KEY=false (bare), or KEY=VALUE; repeatable
    #[arg(short = 'O', long = "opt")]
    opts: Vec<String>,

    /// Options as a JSON object, applied before --opt
    #[arg(long)]
    options_json: Option<String>,
}

impl ActionArgs {
    fn to_request(&self) -> Result<InvokeRequest> {
        let options = opts::build_options(self.options_json.as_deref(), &self.opts)?;
        Ok(InvokeRequest::parse(&self.action)?.with_options(options))
    }
}

#[derive(Tabled)]
struct ExpectationRow {
    action: String,
    pattern: String,
}

async fn read_input(path: &str) -> Result<Vec<u8>> {
    if path == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read stdin")?;
        return Ok(buf);
    }

    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read input file {}", path))
}

async fn run(request: InvokeRequest, output: Option<String>) -> Result<ExitCode> {
    let runner = SubprocessRunner::new(RunnerConfig::from_env());
    debug!(config = ?runner.config(), "Runner configured");
    let invoker = Invoker::new(Arc::new(runner));

    let (error, stdout) = invoker.run(request).await.into_parts();

    match output {
        Some(path) => tokio::fs::write(&path, &stdout)
            .await
            .with_context(|| format!("Failed to write output file {}", path))?,
        None => {
            let mut out = tokio::io::stdout();
            out.write_all(&stdout).await?;
            out.flush().await?;
        }
    }

    let Some(error) = error else {
        return Ok(ExitCode::SUCCESS);
    };

    match &error {
        InvokeError::Process { code, stderr } => {
            let code_label = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            eprintln!("{} (exit {})", "✗ openssl failed".red().bold(), code_label);
            if !stderr.is_empty() {
                eprint!("{}", stderr);
            }
        }
        other => eprintln!("{} {}", "✗".red().bold(), other),
    }

    let status = error
        .code()
        .filter(|c| *c != 0)
        .and_then(|c| u8::try_from(c).ok())
        .unwrap_or(1);
    Ok(ExitCode::from(status))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_format)?;

    match cli.command {
        Commands::Run {
            action,
            input,
            output,
        } => {
            let mut request = action.to_request()?;
            if let Some(path) = input {
                request = request.with_input(read_input(&path).await?);
            }
            run(request, output).await
        }

        Commands::Args { action } => {
            let request = action.to_request()?;
            println!("openssl {}", request.args().join(" "));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Expectations => {
            let rows: Vec<ExpectationRow> = EXPECTATIONS
                .iter()
                .map(|(action, regex)| ExpectationRow {
                    action: action.to_string(),
                    pattern: format!("/{}/i", regex.as_str()),
                })
                .collect();

            println!("{}", "Expected stderr per action".cyan().bold());
            println!();
            println!("{}", Table::new(rows));
            println!();
            println!(
                "  {} Actions not listed always report an error",
                "•".bold()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
