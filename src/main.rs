use std::io;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use groupscholar_performance_insights::config::AppConfig;
use groupscholar_performance_insights::db::{self, PgSources};
use groupscholar_performance_insights::models::{RankingFilters, RecordFilter};
use groupscholar_performance_insights::normalize::{subjects_in, RawRecord};
use groupscholar_performance_insights::pagination::render_window;
use groupscholar_performance_insights::ranking::{FetchOutcome, RankingController};
use groupscholar_performance_insights::report::{
    FileSink, Rasterizable, ReportContext, ReportPipeline, TrendChart,
};
use groupscholar_performance_insights::sources::RecordSource;
use groupscholar_performance_insights::trends::{
    build_comparison, build_trend, comparison_subjects, TrendWindow,
};

#[derive(Parser)]
#[command(name = "performance-insights")]
#[command(about = "Student performance trends, rankings and reports for Group Scholar", long_about = None)]
struct Cli {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import academic records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recompute leaderboard entries from stored records
    RebuildLeaderboard,
    /// Monthly subject averages for one student
    Trend {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "6months")]
        window: TrendWindow,
        #[arg(long, value_delimiter = ',')]
        subjects: Vec<String>,
    },
    /// Subject averages for one student next to peer groups
    Compare {
        #[arg(long)]
        email: String,
        #[arg(long, value_delimiter = ',')]
        subjects: Vec<String>,
        #[arg(long, value_delimiter = ',', default_value = "Class,School")]
        peers: Vec<String>,
    },
    /// Show one page of the leaderboard
    Ranking {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        city: Option<String>,
    },
    /// Export a performance report for one student
    Report {
        #[arg(long)]
        email: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value = "1year")]
        window: TrendWindow,
        #[arg(long, value_delimiter = ',', default_value = "Class,School")]
        peers: Vec<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = AppConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} records from {}.", csv.display());
        }
        Commands::RebuildLeaderboard => {
            let updated = db::rebuild_leaderboard(&pool).await?;
            println!("Leaderboard refreshed for {updated} students.");
        }
        Commands::Trend {
            email,
            window,
            subjects,
        } => {
            let (_, records) = load_student_records(&pool, &email).await?;
            let subjects = pick_subjects(&records, subjects);
            let rows = build_trend(&records, window, &subjects);

            println!("Monthly averages ({window}):");
            for row in rows {
                let values: Vec<String> = subjects
                    .iter()
                    .filter_map(|s| row.value(s).map(|v| format!("{s} {v}")))
                    .collect();
                if values.is_empty() {
                    println!("- {}: no scores", row.month);
                } else {
                    println!("- {}: {}", row.month, values.join(", "));
                }
            }
        }
        Commands::Compare {
            email,
            subjects,
            peers,
        } => {
            let (_, records) = load_student_records(&pool, &email).await?;
            let subjects = pick_subjects(&records, subjects);

            println!("Subject comparison:");
            for row in build_comparison(&records, &subjects, &peers) {
                let score = row
                    .student_score
                    .map_or_else(|| "N/A".to_string(), |v| v.to_string());
                println!("- {}: {score} (peer averages not available)", row.subject);
            }
        }
        Commands::Ranking {
            page,
            limit,
            subject,
            city,
        } => {
            let filters = RankingFilters {
                page,
                limit: limit.unwrap_or(config.page_size),
                subject,
                city,
            };
            let controller = RankingController::new(PgSources::new(pool.clone()), filters.clone());
            let outcome = controller.refresh_inline(filters).await;
            let state = controller.state();
            controller.teardown();

            match outcome {
                FetchOutcome::Applied { .. } => {
                    let scope = state.filters.subject.as_deref().unwrap_or("all subjects");
                    println!(
                        "Leaderboard for {scope} (page {} of {}, {} students):",
                        state.pagination.page, state.pagination.total_pages, state.pagination.total
                    );
                    for entity in &state.entities {
                        println!(
                            "{:>3}. {} score {:.1} grade {}",
                            entity.rank, entity.name, entity.score, entity.grade
                        );
                    }
                    println!(
                        "Pages: {}",
                        render_window(&controller.page_window(), state.pagination.page)
                    );
                }
                FetchOutcome::Failed { error, .. } => println!("{error}"),
                FetchOutcome::Discarded { .. } => println!("Ranking request was superseded."),
            }
        }
        Commands::Report {
            email,
            subject,
            window,
            peers,
            out_dir,
        } => {
            let (display_name, records) = load_student_records(&pool, &email).await?;
            let subjects = comparison_subjects(&records, subject.as_deref());
            let comparison = build_comparison(&records, &subjects, &peers);
            let chart_subjects = match subject.as_deref().map(str::trim) {
                Some(selected) if !selected.is_empty() => vec![selected.to_string()],
                _ => subjects.clone(),
            };
            let chart = TrendChart::new(
                build_trend(&records, window, &chart_subjects),
                chart_subjects,
            );

            let sink = FileSink::new(out_dir.unwrap_or_else(|| config.export_dir.clone()));
            let pipeline = ReportPipeline::new(sink).with_settle_delay(config.chart_settle);
            let context = ReportContext {
                title: "Student Performance Report".to_string(),
                display_name,
                selected_subject: subject,
                comparison,
                peer_groups: peers,
                chart: Some(&chart as &dyn Rasterizable),
                generated_on: Utc::now().date_naive(),
            };

            let outcome = pipeline.export_report(&context).await;
            for warning in &outcome.warnings {
                println!("Warning: {warning}");
            }
            match (outcome.location, outcome.error) {
                (Some(location), _) => println!("Report written to {location}."),
                (None, Some(error)) => anyhow::bail!("{error}"),
                (None, None) => anyhow::bail!("report export did not complete"),
            }
        }
    }

    Ok(())
}

async fn load_student_records(
    pool: &PgPool,
    email: &str,
) -> anyhow::Result<(String, Vec<RawRecord>)> {
    let student = db::find_student(pool, email).await?;
    let filter = RecordFilter {
        child_id: student.id,
        record_type: Some("academic".to_string()),
    };
    let records = PgSources::new(pool.clone())
        .records(&filter)
        .await
        .with_context(|| format!("failed to load records for {}", student.email))?;
    Ok((student.full_name, records))
}

fn pick_subjects(records: &[RawRecord], requested: Vec<String>) -> Vec<String> {
    if !requested.is_empty() {
        return requested;
    }
    let canonical: Vec<_> = records.iter().map(RawRecord::canonical).collect();
    subjects_in(&canonical)
}
