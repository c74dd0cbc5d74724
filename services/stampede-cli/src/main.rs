use clap::Parser;
use stampede_cli::cli::{Cli, Commands, RunArgs};
use stampede_cli::logging::init_logging;
use stampede_cli::metrics_server::MetricsServer;
use stampede_cli::progress::RunProgress;
use stampede_cli::scenarios::{BurstScenario, Pace, ScenarioKind, SignupScenario, WorkflowScenario};
use stampede_core::{format_duration, RunConfig};
use stampede_engine::{ReportFormat, RunSummary, Runner, Scenario};
use std::process::ExitCode;
use tracing::{info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("\n❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_command(command: Commands) -> anyhow::Result<u8> {
    match command {
        Commands::Scenarios => {
            list_scenarios();
            Ok(0)
        }
        Commands::Validate(args) => {
            let config = args.resolve_config()?;
            print_plan(args.scenario, &config)?;
            println!("\n✅ Configuration is valid");
            Ok(0)
        }
        Commands::Run(args) => {
            let config = args.resolve_config()?;
            init_logging(&config.logging);

            let run_id = Uuid::new_v4();
            info!(run_id = %run_id, scenario = %args.scenario, base_url = %config.http.base_url, "Starting stampede");

            let metrics = match args.metrics_addr {
                Some(addr) => Some(MetricsServer::start(addr).await?),
                None => None,
            };

            let summary = run_scenario(&args, &config).await;
            if let Some(metrics) = metrics {
                metrics.stop();
            }
            let summary = summary?;

            println!("{}", summary.render(ReportFormat::Text)?);
            if let Some((path, format)) = args.summary_target() {
                summary.write_report(&path, format)?;
                info!(path = %path.display(), "Summary written");
            }

            // Exit codes are 0, 99 and 108
            Ok(u8::try_from(summary.exit_code()).unwrap_or(1))
        }
    }
}

async fn run_scenario(args: &RunArgs, config: &RunConfig) -> anyhow::Result<RunSummary> {
    let pace = Pace::new(args.think_time_scale);
    let progress = !args.no_progress;

    match args.scenario {
        ScenarioKind::Signup => execute(SignupScenario::new(&config.http)?.with_pace(pace), config, progress).await,
        ScenarioKind::Burst => execute(BurstScenario::new(&config.http)?, config, progress).await,
        ScenarioKind::Workflow => {
            execute(WorkflowScenario::new(&config.http)?.with_pace(pace), config, progress).await
        }
    }
}

/// Run one scenario with Ctrl-C wired to a graceful ramp-down.
async fn execute<S: Scenario>(scenario: S, config: &RunConfig, show_progress: bool) -> anyhow::Result<RunSummary> {
    let runner = Runner::new(scenario, config)?;

    let cancel = runner.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; ramping down");
            cancel.cancel();
        }
    });

    let progress = show_progress.then(|| RunProgress::start(runner.collector(), runner.profile().total_duration()));

    let result = runner.run().await;

    interrupt.abort();
    if let Some(progress) = progress {
        progress.finish();
    }

    Ok(result?)
}

fn list_scenarios() {
    for kind in ScenarioKind::ALL {
        let defaults = kind.defaults();
        let stages: Vec<String> = defaults.stages.iter().map(ToString::to_string).collect();
        println!("{:<10} {}", kind.name(), kind.description());
        println!("{:<10} stages: {}", "", stages.join(", "));
        for (selector, expression) in &defaults.thresholds {
            println!("{:<10} threshold: {} {}", "", selector, expression);
        }
    }
}

fn print_plan(kind: ScenarioKind, config: &RunConfig) -> anyhow::Result<()> {
    let profile = config.profile()?;
    println!("Scenario:   {}", kind);
    println!("Profile:    {}", profile.description());
    println!("Duration:   {}", format_duration(profile.total_duration()));
    println!("Peak VUs:   {} (cap {})", profile.peak_target(), config.max_vus);
    println!("Target:     {}", config.http.base_url);
    println!("Seed data:  {}", config.http.seed_base_url());
    for spec in config.threshold_specs()? {
        println!(
            "Threshold:  {} {}{}",
            spec.selector,
            spec.predicate,
            if spec.abort_on_fail { " (abort on fail)" } else { "" }
        );
    }
    Ok(())
}
