pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "neuronx",
    about = "NeuronX operator CLI",
    long_about = "Run decisions, inspect approval chains and role capabilities, validate policy \
                  documents, and check runtime readiness.",
    after_help = "Examples:\n  neuronx decide --input request.json\n  neuronx approval --action approve --risk HIGH --deal-value 150000\n  neuronx capabilities --role TEAM_LEAD\n  neuronx policy-check --path policy.toml\n  neuronx doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Write diagnostic logs to stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Evaluate a decision request read from a JSON file")]
    Decide {
        #[arg(long, help = "Path to a JSON decision request")]
        input: PathBuf,
        #[arg(long, default_value = "neuronx-cli", help = "Actor recorded on audit events")]
        actor: String,
    },
    #[command(about = "Resolve the approval requirement for an action")]
    Approval {
        #[arg(long, help = "approve | assist | escalate | revoke_token")]
        action: String,
        #[arg(long, help = "LOW | MEDIUM | HIGH | CRITICAL")]
        risk: String,
        #[arg(long)]
        deal_value: Option<String>,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        voice_mode: Option<String>,
    },
    #[command(about = "List the capabilities granted by an org role")]
    Capabilities {
        #[arg(long)]
        role: String,
    },
    #[command(about = "Validate a decision policy document (defaults to the configured policy)")]
    PolicyCheck {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, policy, approval chain and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    if cli.verbose {
        init_stderr_logging();
    }

    let result = match cli.command {
        Command::Decide { input, actor } => commands::decide::run(&input, &actor),
        Command::Approval { action, risk, deal_value, channel, voice_mode } => {
            commands::approval::run(&commands::approval::ApprovalArgs {
                action,
                risk,
                deal_value,
                channel,
                voice_mode,
            })
        }
        Command::Capabilities { role } => commands::capabilities::run(&role),
        Command::PolicyCheck { path } => commands::policy_check::run(path.as_deref()),
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .compact()
        .try_init();
}
