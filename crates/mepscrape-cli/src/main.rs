use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use mepscrape::db::MemberStore;
use mepscrape::pages::extract_member_pages;
use mepscrape::scraper::{FetchConfig, WebScraper};
use mepscrape::types::FailurePolicy;
use mepscrape::utils::{MemberFilter, check_output_path, ensure_input_dir};

#[derive(Parser)]
#[command(name = "mepscrape")]
#[command(
    about = "Scrape data from the members of the European Parliament (MEPs)",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the websites of the MEPs to a local directory
    Download {
        #[arg(short = 'o', long, default_value = "mep_sites", help = "Output directory")]
        output_dir: PathBuf,

        #[arg(short = 'f', long, help = "Overwrite the output directory")]
        force: bool,

        #[arg(
            short = 'c',
            long,
            default_value_t = 10,
            value_parser = clap::value_parser!(u16).range(1..),
            help = "Maximum number of concurrent connections. If the limit is too high, requests may be blocked"
        )]
        connection_limit: u16,

        #[arg(long, default_value_t = 30, help = "Per-request timeout in seconds")]
        timeout: u64,

        #[arg(long, default_value_t = 0, help = "Retries per page before giving up")]
        retries: u32,

        #[arg(long, help = "Keep downloading when a page fails and report failures at the end")]
        keep_going: bool,
    },
    /// Scrape the downloaded MEP websites and populate an SQLite database
    Initdb {
        #[arg(short = 'i', long, default_value = "mep_sites", help = "Input directory")]
        input_dir: PathBuf,

        #[arg(short = 'o', long, default_value = "meps.db", help = "SQLite database file")]
        output_db: PathBuf,

        #[arg(short = 'f', long, help = "Overwrite the output database")]
        force: bool,

        #[arg(long, help = "Skip pages that cannot be scraped instead of aborting")]
        skip_invalid: bool,
    },
    /// Scrape the downloaded MEP websites and print the records
    Scrape {
        #[arg(short = 'i', long, default_value = "mep_sites", help = "Input directory")]
        input_dir: PathBuf,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "json",
            help = "Output format"
        )]
        format: OutputFormat,

        #[arg(long, help = "Skip pages that cannot be scraped instead of aborting")]
        skip_invalid: bool,
    },
    /// Dump the schema of an SQLite database as JSON
    DumpSchema {
        #[arg(short = 'i', long, default_value = "meps.db", help = "Input database")]
        input_db: PathBuf,
    },
    /// Print a mailto link addressing the first email of every matching MEP
    Mailto {
        #[arg(short = 'i', long, default_value = "meps.db", help = "Input database")]
        input_db: PathBuf,

        #[arg(long, help = "Only members from this country")]
        country: Option<String>,

        #[arg(long, help = "Only members of this national party")]
        party: Option<String>,

        #[arg(long, help = "Only members of this EU fraction")]
        eu_fraction: Option<String>,
    },
}

fn failure_policy(keep_going: bool) -> FailurePolicy {
    if keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    }
}

fn fail<E: std::fmt::Display, T>(context: &str) -> impl FnOnce(E) -> T + '_ {
    move |e| {
        log::error!("{context}: {e}");
        process::exit(1);
    }
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    match cli.command {
        Commands::Download {
            output_dir,
            force,
            connection_limit,
            timeout,
            retries,
            keep_going,
        } => {
            let config = FetchConfig {
                concurrency: connection_limit.into(),
                timeout: Duration::from_secs(timeout),
                retries,
                policy: failure_policy(keep_going),
                ..Default::default()
            };

            let scraper = WebScraper::new(config).unwrap_or_else(fail("Error creating scraper"));

            let report = scraper
                .download_all(&output_dir, force)
                .await
                .unwrap_or_else(fail("Error downloading member pages"));

            print!("{}", report);
            if !report.failures.is_empty() {
                process::exit(1);
            }
        }

        Commands::Initdb {
            input_dir,
            output_db,
            force,
            skip_invalid,
        } => {
            ensure_input_dir(&input_dir).unwrap_or_else(fail("Invalid args"));
            check_output_path(&output_db, force).unwrap_or_else(fail("Invalid args"));

            let report = extract_member_pages(&input_dir, failure_policy(skip_invalid))
                .unwrap_or_else(fail("Error scraping member pages"));

            let stats = MemberStore::build(&output_db, &report.records)
                .unwrap_or_else(fail("Error building database"));

            print!("{}", stats);
            if !report.failures.is_empty() {
                println!("  Skipped pages:    {}", report.failures.len());
            }
        }

        Commands::Scrape {
            input_dir,
            format,
            skip_invalid,
        } => {
            ensure_input_dir(&input_dir).unwrap_or_else(fail("Invalid args"));

            let report = extract_member_pages(&input_dir, failure_policy(skip_invalid))
                .unwrap_or_else(fail("Error scraping member pages"));

            match format {
                OutputFormat::Json => serialize_json(&report.records),
                OutputFormat::Text => {
                    if report.records.is_empty() {
                        println!("No members to display.");
                    }
                    for record in &report.records {
                        println!("{}", record);
                    }
                }
            }
        }

        Commands::DumpSchema { input_db } => {
            let store = MemberStore::open(&input_db).unwrap_or_else(fail("Error opening database"));
            let schema = store
                .schema()
                .unwrap_or_else(fail("Error reading database schema"));

            serialize_json(&schema);
        }

        Commands::Mailto {
            input_db,
            country,
            party,
            eu_fraction,
        } => {
            let filter = MemberFilter {
                country,
                party,
                eu_fraction,
            }
            .validate()
            .unwrap_or_else(fail("Invalid args"));

            let store = MemberStore::open(&input_db).unwrap_or_else(fail("Error opening database"));

            match store
                .mailto_link(&filter)
                .unwrap_or_else(fail("Error querying database"))
            {
                Some(link) => println!("{}", link),
                None => println!("No members with an email address match."),
            }
        }
    }
}
