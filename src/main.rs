use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod attendance;
mod config;
mod conversion;
mod late_cancellations;
mod models;
mod normalize;
mod report;
mod sections;
mod sheets;
mod views;

use aggregate::GroupKey;
use config::{SheetNames, SheetsCredentials, SheetsSettings};
use late_cancellations::{LateCancellationReport, Timeframe};
use models::{ClientConversionRecord, RecurringSessionRecord, SalesRecord};
use sheets::{CsvDirectory, GridSource, SheetsClient};
use views::{ClientSortField, SortDirection, SortState};

#[derive(Parser)]
#[command(name = "studio-analytics")]
#[command(about = "Sales, conversion and attendance analytics over the studio's Google Sheets")]
#[command(long_about = None)]
struct Cli {
    /// Read `<DIR>/<sheet name>.csv` exports instead of calling the Sheets API
    #[arg(long, global = true)]
    offline_dir: Option<PathBuf>,
    /// Print JSON instead of markdown
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Top and bottom performers grouped by a sales dimension
    Sellers {
        #[arg(long, value_enum, default_value_t = GroupKey::Product)]
        by: GroupKey,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        location: Option<String>,
    },
    /// Discount totals, trends and the most recent discounted sales
    Discounts {
        #[arg(long)]
        location: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// New client conversion and retention
    Conversion {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum)]
        sort: Option<ClientSortField>,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Recurring class attendance
    Attendance {
        /// Location tab
        #[arg(long)]
        location: Option<String>,
        /// Quick filter; repeat to allow several locations
        #[arg(long)]
        locations: Vec<String>,
        #[arg(long)]
        trainer: Vec<String>,
        #[arg(long)]
        class: Vec<String>,
        #[arg(long)]
        day: Vec<String>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Late cancellation metrics and tables
    LateCancellations {
        #[arg(long)]
        location: Option<String>,
        #[arg(long, value_enum, default_value_t = Timeframe::All)]
        timeframe: Timeframe,
    },
    /// Write a combined markdown report
    Report {
        #[arg(long, default_value = "dashboard.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studio_analytics=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn grid_source(offline_dir: Option<PathBuf>) -> anyhow::Result<GridSource> {
    match offline_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "reading sheets from CSV exports");
            Ok(GridSource::Csv(CsvDirectory::new(dir)))
        }
        None => {
            let credentials = SheetsCredentials::from_lookup(config::env_lookup)?;
            let settings = SheetsSettings::from_lookup(config::env_lookup)?;
            Ok(GridSource::Sheets(SheetsClient::new(credentials, settings)))
        }
    }
}

async fn load_sales(source: &GridSource, names: &SheetNames) -> anyhow::Result<Vec<SalesRecord>> {
    Ok(normalize::parse_sales(&source.load(&names.sales).await?))
}

async fn load_clients(
    source: &GridSource,
    names: &SheetNames,
) -> anyhow::Result<Vec<ClientConversionRecord>> {
    Ok(normalize::parse_clients(&source.load(&names.clients).await?))
}

async fn load_sessions(
    source: &GridSource,
    names: &SheetNames,
) -> anyhow::Result<Vec<RecurringSessionRecord>> {
    let recurring = normalize::parse_sessions(&source.load(&names.sessions).await?);
    let teacher = normalize::parse_sessions(&source.load(&names.teacher_sessions).await?);
    Ok(attendance::combine_sessions(recurring, teacher))
}

async fn load_late_cancellations(
    source: &GridSource,
    names: &SheetNames,
) -> anyhow::Result<LateCancellationReport> {
    let grid = source.load(&names.late_cancellations).await?;
    Ok(late_cancellations::parse_late_cancellations(&grid))
}

fn emit<T: Serialize>(
    json: bool,
    value: &T,
    markdown: impl FnOnce() -> String,
) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("failed to serialize output")?
        );
    } else {
        print!("{}", markdown());
    }
    Ok(())
}

#[derive(Serialize)]
struct SellersOutput {
    by: GroupKey,
    top: Vec<aggregate::SalesGroupSummary>,
    bottom: Vec<aggregate::SalesGroupSummary>,
}

#[derive(Serialize)]
struct DiscountsOutput {
    analysis: aggregate::DiscountAnalysis,
    recent: Vec<SalesRecord>,
}

#[derive(Serialize)]
struct ConversionOutput {
    summary: conversion::ClientSummary,
    memberships: Vec<conversion::CohortStats>,
    trainers: Vec<conversion::CohortStats>,
    hosted_classes: Vec<conversion::HostedClassMonth>,
    sort: SortState,
    clients: Vec<ClientConversionRecord>,
}

#[derive(Serialize)]
struct AttendanceOutput {
    filter: attendance::SessionFilter,
    options: attendance::FilterOptions,
    summary: attendance::SessionSummary,
    classes: Vec<attendance::ClassPerformance>,
}

#[derive(Serialize)]
struct LateCancellationsOutput {
    locations: Vec<String>,
    metrics: late_cancellations::LateCancellationMetrics,
    trend: Vec<late_cancellations::MonthTotal>,
    top_classes: Vec<late_cancellations::ClassCancellations>,
    tables: LateCancellationReport,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let names = SheetNames::from_lookup(config::env_lookup);
    let source = grid_source(cli.offline_dir)?;

    match cli.command {
        Commands::Sellers {
            by,
            limit,
            location,
        } => {
            let sales = load_sales(&source, &names).await?;
            let sales = aggregate::filter_by_location(&sales, location.as_deref());
            let groups = aggregate::group_sales(&sales, by);
            let output = SellersOutput {
                by,
                top: aggregate::top_n(&groups, limit),
                bottom: aggregate::bottom_n(&groups, limit),
            };
            emit(cli.json, &output, || report::sellers_section(&sales, by, limit))?;
        }
        Commands::Discounts { location, limit } => {
            let sales = load_sales(&source, &names).await?;
            let sales = aggregate::filter_by_location(&sales, location.as_deref());
            let output = DiscountsOutput {
                analysis: aggregate::analyze_discounts(&sales),
                recent: aggregate::discount_view(&sales, limit.min(aggregate::DISCOUNT_VIEW_LIMIT)),
            };
            emit(cli.json, &output, || {
                report::discounts_section(&output.analysis, &output.recent)
            })?;
        }
        Commands::Conversion {
            search,
            sort,
            desc,
            limit,
        } => {
            let clients = load_clients(&source, &names).await?;
            let mut state = match sort {
                Some(field) => SortState::default().toggle(field),
                None => SortState::default(),
            };
            if desc {
                state.direction = SortDirection::Desc;
            }

            let matched = views::search_clients(&clients, search.as_deref().unwrap_or(""));
            let mut table = views::sort_clients(&matched, state);
            table.truncate(limit);

            let output = ConversionOutput {
                summary: conversion::summarize_clients(&clients),
                memberships: conversion::membership_stats(&clients),
                trainers: conversion::trainer_stats(&clients),
                hosted_classes: conversion::hosted_class_trend(&clients),
                sort: state,
                clients: table,
            };
            emit(cli.json, &output, || {
                report::conversion_section(&clients, &output.clients)
            })?;
        }
        Commands::Attendance {
            location,
            locations,
            trainer,
            class,
            day,
            limit,
        } => {
            let sessions = load_sessions(&source, &names).await?;
            let filter = attendance::SessionFilter {
                location,
                locations,
                trainers: trainer,
                classes: class,
                days: day,
            };
            let selected = filter.apply(&sessions);
            let output = AttendanceOutput {
                options: attendance::filter_options(&sessions),
                summary: attendance::summarize_sessions(&selected),
                classes: attendance::class_performance(&selected),
                filter,
            };
            emit(cli.json, &output, || {
                report::attendance_section(&selected, limit)
            })?;
        }
        Commands::LateCancellations {
            location,
            timeframe,
        } => {
            let full = load_late_cancellations(&source, &names).await?;
            let scoped = full
                .filter_location(location.as_deref())
                .apply_timeframe(timeframe);
            let output = LateCancellationsOutput {
                locations: full.locations(),
                metrics: scoped.metrics(),
                trend: scoped.monthly_trend(location.as_deref()),
                top_classes: scoped.top_classes(location.as_deref(), 10),
                tables: scoped.clone(),
            };
            emit(cli.json, &output, || {
                report::late_cancellations_section(&scoped, location.as_deref())
            })?;
        }
        Commands::Report { out } => {
            let (sales, clients, sessions, late) = tokio::try_join!(
                load_sales(&source, &names),
                load_clients(&source, &names),
                load_sessions(&source, &names),
                load_late_cancellations(&source, &names),
            )?;
            let inputs = report::DashboardInputs {
                sales: &sales,
                clients: &clients,
                sessions: &sessions,
                late_cancellations: &late,
            };
            let markdown = report::build_report(chrono::Local::now().date_naive(), &inputs);
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
