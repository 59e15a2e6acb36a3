use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use polars::prelude::*;
use segment_insight::request::RawAnalysisRequest;
use segment_insight::segment::SegmentKey;
use segment_insight::{secondary, AnalysisRequest, EngineContext};

#[derive(Parser, Debug)]
#[command(version, about = "Explain metric shifts across multi-dimensional segments")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full analysis and print the MetricInsight document(s) as JSON.
    Analyze {
        #[arg(short, long, help = "Path to the input CSV file")]
        input_csv: PathBuf,
        #[arg(short, long, help = "Path to the analysis request JSON")]
        request: PathBuf,
        #[arg(long, default_value_t = 0, help = "Thread pool size, 0 = available parallelism")]
        threads: usize,
    },
    /// Print every segment sharing a given segment's dimension set.
    RelatedSegments {
        #[arg(short, long)]
        input_csv: PathBuf,
        #[arg(short, long)]
        request: PathBuf,
        #[arg(long, help = "Serialized segment key, e.g. \"country:US\"")]
        key: String,
    },
    /// Print a single segment's baseline/comparison value-by-date series.
    TimeSeries {
        #[arg(short, long)]
        input_csv: PathBuf,
        #[arg(short, long)]
        request: PathBuf,
        #[arg(long)]
        key: String,
    },
    /// Print a running absolute_contribution waterfall over an ordered list
    /// of segment keys.
    Waterfall {
        #[arg(short, long)]
        input_csv: PathBuf,
        #[arg(short, long)]
        request: PathBuf,
        #[arg(long, value_delimiter = ',', help = "Comma-separated serialized segment keys, in order")]
        keys: Vec<String>,
    },
}

fn load_request(path: &PathBuf) -> Result<AnalysisRequest> {
    let raw: RawAnalysisRequest = serde_json::from_str(
        &fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
    )
    .with_context(|| format!("parsing {}", path.display()))?;
    Ok(AnalysisRequest::parse(raw)?)
}

fn load_csv(path: &PathBuf) -> Result<DataFrame> {
    Ok(CsvReadOptions::default()
        .try_into_reader_with_file_path(Some(path.clone()))?
        .finish()?)
}

/// Parses a `"dim1:val1|dim2:val2"` serialized key back into a
/// [`SegmentKey`].
fn parse_key(raw: &str) -> Result<SegmentKey> {
    use segment_insight::segment::DimensionValuePair;
    let pairs = raw
        .split('|')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (dimension, value) = part
                .split_once(':')
                .with_context(|| format!("invalid segment key component {part:?}"))?;
            Ok(DimensionValuePair {
                dimension: dimension.to_string(),
                value: value.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SegmentKey::new(pairs))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Analyze {
            input_csv,
            request,
            threads,
        } => {
            let df = load_csv(&input_csv)?;
            let request = load_request(&request)?;
            let context = if threads == 0 {
                EngineContext::new()
            } else {
                EngineContext::with_threads(threads)
            };
            let insights = segment_insight::run_analysis(df, &request, &context)?;
            println!("{}", serde_json::to_string_pretty(&insights)?);
        }
        Command::RelatedSegments {
            input_csv,
            request,
            key,
        } => {
            let df = load_csv(&input_csv)?;
            let request = load_request(&request)?;
            let context = EngineContext::new();
            let prepared = segment_insight::frame::prepare(df, &request)?;
            let cube = segment_insight::cube::analyze(
                &prepared.baseline,
                &prepared.comparison,
                &request,
                &context,
            )?;
            let related = secondary::related_segments(&cube, &request.metric, &parse_key(&key)?)?;
            println!("{}", serde_json::to_string_pretty(&related)?);
        }
        Command::TimeSeries {
            input_csv,
            request,
            key,
        } => {
            let df = load_csv(&input_csv)?;
            let request = load_request(&request)?;
            let prepared = segment_insight::frame::prepare(df, &request)?;
            let (baseline, comparison) = secondary::segment_time_series(
                &prepared.baseline,
                &prepared.comparison,
                &request.metric,
                &parse_key(&key)?,
            )?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "baselineValueByDate": baseline,
                    "comparisonValueByDate": comparison,
                }))?
            );
        }
        Command::Waterfall {
            input_csv,
            request,
            keys,
        } => {
            let df = load_csv(&input_csv)?;
            let request = load_request(&request)?;
            let context = EngineContext::new();
            let insights = segment_insight::run_analysis(df, &request, &context)?;
            let parent = insights
                .get(&request.metric.id())
                .context("parent metric insight missing from result")?;
            let steps = secondary::waterfall(&parent.dimension_slice_info, &keys);
            for step in steps {
                println!(
                    "{}\tcontribution={:.6}\tcumulative={:.6}",
                    step.serialized_key, step.contribution, step.cumulative
                );
            }
        }
    }

    Ok(())
}
