//! labreport - command line entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use labreport::config::Config;
use labreport::corpus::IngestSummary;
use labreport::report::{self, ReportOutput, ReportPipeline, ReportRequest};
use labreport::retrieval::{SimilarityTitleMatcher, TitleMatcher};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "labreport",
    version,
    about = "Write physics lab reports from an instruction book and measured data"
)]
struct Cli {
    /// YAML configuration file (default: ./labreport.yaml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Segment a book into its title-keyed corpus
    Ingest {
        #[arg(long)]
        book: String,
        /// Book PDF to upload into the workspace first
        #[arg(long)]
        pdf: Option<PathBuf>,
    },
    /// Write the report for one experiment
    Report {
        #[arg(long)]
        book: String,
        /// Experiment name; also the report title
        #[arg(long)]
        title: String,
        /// Measurement CSV files
        #[arg(long = "data", required = true, num_args = 1..)]
        data: Vec<PathBuf>,
        /// What the uploaded files contain
        #[arg(long)]
        describe: Option<String>,
    },
    /// List the section titles of an ingested book
    Titles {
        #[arg(long)]
        book: String,
    },
    /// Resolve an experiment name and print its section
    Lookup {
        #[arg(long)]
        book: String,
        #[arg(long)]
        query: String,
        /// Match titles locally instead of asking the model
        #[arg(long)]
        local: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "labreport=debug" } else { "labreport=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn ingest(
    config: Option<&Path>,
    book: &str,
    pdf: Option<&Path>,
) -> anyhow::Result<IngestSummary> {
    let pipeline = ReportPipeline::from_config(Config::load(config)?)?;
    pipeline.ingest_book(book, pdf).await
}

async fn generate(config: Option<&Path>, request: &ReportRequest) -> anyhow::Result<ReportOutput> {
    let pipeline = ReportPipeline::from_config(Config::load(config)?)?;
    pipeline.generate_report(request).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Ingest { book, pdf } => {
            match ingest(config_path, &book, pdf.as_deref()).await {
                Ok(summary) => {
                    info!(
                        "{} pages, {} sections written",
                        summary.pages, summary.sections_written
                    );
                    println!("{}", report::INGEST_OK);
                    Ok(())
                }
                Err(e) => {
                    println!("{}", report::INGEST_FAILED);
                    Err(e)
                }
            }
        }
        Command::Report {
            book,
            title,
            data,
            describe,
        } => {
            let request = ReportRequest {
                book,
                title,
                data_files: data,
                description: describe,
            };
            match generate(config_path, &request).await {
                Ok(out) => {
                    info!(
                        "Run {} for '{}' wrote {}",
                        out.run_id,
                        out.resolved_title,
                        out.output.display()
                    );
                    println!("{}", report::REPORT_OK);
                    Ok(())
                }
                Err(e) => {
                    println!("{}", report::REPORT_FAILED);
                    Err(e)
                }
            }
        }
        Command::Titles { book } => {
            let pipeline = ReportPipeline::from_config(Config::read(config_path)?)?;
            for title in pipeline.titles(&book)? {
                println!("{}", title);
            }
            Ok(())
        }
        Command::Lookup { book, query, local } => {
            let config = if local {
                Config::read(config_path)?
            } else {
                Config::load(config_path)?
            };
            let pipeline = ReportPipeline::from_config(config)?;
            let matcher: Box<dyn TitleMatcher> = if local {
                Box::new(SimilarityTitleMatcher)
            } else {
                Box::new(pipeline.title_matcher())
            };
            let (resolved, text) = pipeline.lookup(&book, &query, matcher.as_ref()).await?;
            if text.is_empty() {
                println!("No section matches '{}' (resolved to '{}')", query, resolved);
            } else {
                println!("# {}\n\n{}", resolved, text);
            }
            Ok(())
        }
    }
}
