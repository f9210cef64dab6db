use std::path::PathBuf;
use std::process::ExitCode;

use arrow::util::pretty::pretty_format_batches;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use goose_sql::query::prepare;
use goose_sql::{ColumnStats, EngineConfig, Result, Session};

/// Query a Parquet, CSV or JSON file with SQL
#[derive(Parser, Debug)]
#[command(name = "goose-sql", version, about)]
struct Args {
    /// File to load
    file: PathBuf,

    /// Query to run (defaults to the configured default query)
    #[arg(short = 'e', long = "execute", value_name = "SQL")]
    sql: Option<String>,

    /// Page of the result to print, starting at 1
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// Rows per page
    #[arg(long)]
    page_size: Option<usize>,

    /// Name the file is queried as
    #[arg(long, value_name = "NAME")]
    table: Option<String>,

    /// JSON settings file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print statistics for every column of the result
    #[arg(long)]
    describe: bool,

    /// Print value counts of a column in the result
    #[arg(long, value_name = "COL")]
    value_counts: Option<String>,

    /// Search a column of the file instead of running a query
    #[arg(long, value_name = "COL", requires = "needle")]
    search: Option<String>,

    /// Text to search for
    #[arg(long, value_name = "TEXT", requires = "search")]
    needle: Option<String>,

    #[arg(long)]
    case_sensitive: bool,

    /// Print the logical plan and exit
    #[arg(long)]
    explain: bool,

    /// Number of timed runs of the query
    #[arg(long, default_value_t = 1)]
    runs: usize,
}

fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::default(),
    };
    if let Some(table) = &args.table {
        config.table_name = table.clone();
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }

    let mut session = Session::open(&args.file, config)?;

    if let (Some(column), Some(needle)) = (&args.search, &args.needle) {
        session.search(column, needle, args.case_sensitive)?;
    } else {
        let sql = args
            .sql
            .clone()
            .unwrap_or_else(|| session.config().rendered_default_query());

        if args.explain {
            let plan = prepare(session.source(), &sql, session.config())?;
            println!("{}", plan);
            return Ok(());
        }

        let runs = args.runs.max(1);
        let mut times = Vec::with_capacity(runs);
        for _ in 0..runs {
            let view = session.execute(&sql)?;
            times.push(view.elapsed().as_secs_f64() * 1000.0);
        }
        if runs > 1 {
            print_timings(&times);
        }
    }

    print_page(&session, args.page)?;

    if args.describe {
        let stats = session.describe_all()?;
        println!("{}", pretty_format_batches(&[ColumnStats::to_batch(&stats)?])?);
    }

    if let Some(column) = &args.value_counts {
        let counts = session.value_counts(column)?;
        println!("{}", pretty_format_batches(&[counts.to_batch()?])?);
        if counts.truncated > 0 {
            println!("... {} more values", counts.truncated);
        }
    }

    Ok(())
}

fn print_page(session: &Session, page: usize) -> Result<()> {
    let view = session.view();
    let batch = view.page(page)?;
    println!("{}", pretty_format_batches(&[batch])?);

    let (first, last) = view.page_range(page)?.unwrap_or((0, 0));
    println!(
        "Rows: {}  Page: {}/{}  Range: {}~{}  Cols: {}  Time: {:.2} ms",
        view.total_rows(),
        page,
        view.total_pages(),
        first,
        last,
        view.schema().fields().len(),
        view.elapsed().as_secs_f64() * 1000.0
    );
    if let Some(sql) = session.last_query() {
        println!("Query: {}", sql);
    }
    Ok(())
}

fn print_timings(times: &[f64]) {
    let mean = times.iter().sum::<f64>() / times.len() as f64;
    let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / times.len() as f64;
    let stddev = variance.sqrt();
    let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    println!("Performance ({} runs):", times.len());
    println!("{:-<40}", "");
    println!("  Mean:   {:.2} ms", mean);
    println!("  Stddev: {:.2} ms", stddev);
    println!("  Min:    {:.2} ms", min);
    println!("  Max:    {:.2} ms", max);
    println!();
}
