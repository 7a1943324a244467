use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobscout_pipeline::{Pipeline, PipelineConfig};

#[derive(Debug, Parser)]
#[command(name = "jobscout")]
#[command(about = "Jobscout command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full pipeline once.
    Run,
    /// Summarize the most recent run reports.
    Report {
        #[arg(long, default_value_t = 1)]
        runs: usize,
    },
    /// Run on the configured cron schedule until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = jobscout_pipeline::run_pipeline_once_from_env().await?;
            println!(
                "run complete: run_id={} scraped={} new={} reposts={} scored={} reports={}",
                summary.run_id,
                summary.listings_scraped,
                summary.listings_new,
                summary.reposts_detected,
                summary.listings_scored,
                summary.reports_dir
            );
            for error in &summary.errors {
                eprintln!("source error: {error}");
            }
        }
        Commands::Report { runs } => {
            let markdown = jobscout_pipeline::report_daily_markdown(runs, None)?;
            println!("{markdown}");
        }
        Commands::Schedule => {
            let pipeline = Pipeline::new(PipelineConfig::from_env())?;
            match pipeline.maybe_build_scheduler().await? {
                Some(mut scheduler) => {
                    scheduler.start().await.context("starting scheduler")?;
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                }
                None => {
                    eprintln!("scheduler disabled; set JOBSCOUT_SCHEDULER_ENABLED=1");
                }
            }
        }
    }

    Ok(())
}
