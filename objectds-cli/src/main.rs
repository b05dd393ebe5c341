use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use objectds_core::{FieldValues, QueryResponse, TimeRange};
use objectds_proxy::routes::QueryBody;
use objectds_proxy::{check_health, Instance, QueryProxy, ServerConfig, Settings};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "objectds")]
#[command(version)]
#[command(about = "objectds - batched query proxy and frame translator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the panel queries in a file through the upstream
    Query {
        /// JSON file shaped like the body of `POST /api/query`
        #[arg(short, long)]
        file: String,

        /// Range start (RFC 3339); overrides the file
        #[arg(long, requires = "to")]
        from: Option<DateTime<Utc>>,

        /// Range end (RFC 3339); overrides the file
        #[arg(long, requires = "from")]
        to: Option<DateTime<Utc>>,

        /// Query the last N minutes instead of an explicit range
        #[arg(long, conflicts_with_all = ["from", "to"])]
        last_minutes: Option<i64>,

        /// Call-level maximum number of points
        #[arg(long)]
        max_data_points: Option<i64>,

        /// Print the full response as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Check that the upstream answers
    Health,

    /// Start the proxy server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "OBJECTDS_PORT", default_value_t = 8000)]
        port: u16,

        /// Do not print the startup banner
        #[arg(long)]
        no_banner: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("objectds_proxy=warn,objectds_core=warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("failed to load instance settings")?;
    debug!(?settings, "Loaded settings");

    match cli.command {
        Commands::Query { file, from, to, last_minutes, max_data_points, json } => {
            let bytes = std::fs::read(&file).with_context(|| format!("failed to read {}", file))?;
            let mut body: QueryBody = serde_json::from_slice(&bytes)
                .with_context(|| format!("{} is not a valid query document", file))?;
            if max_data_points.is_some() {
                body.max_data_points = max_data_points;
            }

            let range = resolve_range(from, to, last_minutes)?;
            let request = body.into_request(range)?;

            println!("Upstream: {}", settings.query_url());
            println!(
                "Range:    {} .. {}\n",
                request.time_range.from.to_rfc3339(),
                request.time_range.to.to_rfc3339()
            );

            let proxy = QueryProxy::new(Instance::new(settings)?);
            let response = proxy.query(&request).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_summary(&response);
            }

            if response.error_count() > 0 {
                anyhow::bail!("{} of {} queries failed", response.error_count(), response.len());
            }
        }

        Commands::Health => {
            println!("Checking {} ...", settings.query_url());
            let result = check_health(&Instance::new(settings)?).await;
            if result.is_healthy() {
                println!("✓ {}", result.message);
            } else {
                println!("❌ {}", result.message);
                anyhow::bail!("upstream is unhealthy");
            }
        }

        Commands::Serve { port, no_banner } => {
            objectds_proxy::run_server(ServerConfig { port, settings, print_banner: !no_banner })
                .await?;
        }
    }

    Ok(())
}

/// Range given on the command line, if any
fn resolve_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    last_minutes: Option<i64>,
) -> anyhow::Result<Option<TimeRange>> {
    match (from, to, last_minutes) {
        (_, _, Some(minutes)) if minutes <= 0 => {
            anyhow::bail!("--last-minutes must be positive, got {}", minutes)
        }
        (_, _, Some(minutes)) => Duration::try_minutes(minutes)
            .and_then(TimeRange::last)
            .map(Some)
            .with_context(|| format!("--last-minutes {} is out of range", minutes)),
        (Some(from), Some(to), None) => Ok(Some(TimeRange::new(from, to))),
        _ => Ok(None),
    }
}

fn print_summary(response: &QueryResponse) {
    for (ref_id, result) in &response.results {
        match &result.error {
            Some(error) => println!("[{}] ❌ {}", ref_id, error),
            None if result.frames.is_empty() => println!("[{}] ✓ no data", ref_id),
            None => {
                println!("[{}] ✓ {} frame(s)", ref_id, result.frames.len());
                for frame in &result.frames {
                    println!("    {} ({} rows)", frame.name, frame.row_count());
                    for field in &frame.fields {
                        println!(
                            "      {:<16} {:<8}{}",
                            field.name,
                            field.values.type_name(),
                            preview(&field.values)
                        );
                    }
                }
            }
        }
    }
}

/// First value of a column, for display
fn preview(values: &FieldValues) -> String {
    let first = match values {
        FieldValues::Time(v) => v.first().map(|t| t.map(|t| t.to_rfc3339())),
        FieldValues::Float64(v) => v.first().map(|x| x.map(|x| x.to_string())),
        FieldValues::String(v) => v.first().cloned(),
    };
    match first {
        Some(Some(value)) => format!(" first={}", value),
        Some(None) => " first=null".to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_resolve_range() {
        let from = Utc.timestamp_opt(0, 0).unwrap();
        let to = Utc.timestamp_opt(60, 0).unwrap();
        assert_eq!(
            resolve_range(Some(from), Some(to), None).unwrap(),
            Some(TimeRange::new(from, to))
        );
        assert_eq!(resolve_range(None, None, None).unwrap(), None);

        let last = resolve_range(None, None, Some(5)).unwrap().unwrap();
        assert_eq!(last.duration(), Duration::minutes(5));

        assert!(resolve_range(None, None, Some(0)).is_err());
    }

    #[test]
    fn test_resolve_range_rejects_huge_spans() {
        let err = resolve_range(None, None, Some(1_000_000_000_000)).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(resolve_range(None, None, Some(i64::MAX)).is_err());
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview(&FieldValues::Float64(vec![Some(1.5)])), " first=1.5");
        assert_eq!(preview(&FieldValues::String(vec![None])), " first=null");
        assert_eq!(preview(&FieldValues::Time(vec![])), "");
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from(["objectds", "query", "-f", "q.json", "--last-minutes", "15"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Query { last_minutes: Some(15), .. }));

        assert!(Cli::try_parse_from([
            "objectds",
            "query",
            "-f",
            "q.json",
            "--from",
            "2024-01-01T00:00:00Z"
        ])
        .is_err());
    }
}
