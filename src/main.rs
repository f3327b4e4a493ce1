use std::path::PathBuf;

use boletim_sync::boletim::sync::config::SyncConfig;
use boletim_sync::boletim::sync::credentials::CredentialResolver;
use boletim_sync::boletim::sync::formula::{DEFAULT_FIRST_DATA_ROW, apply_templates_to_all_rows};
use boletim_sync::boletim::sync::io::SheetBackend;
use boletim_sync::boletim::sync::io::a1::column_index;
use boletim_sync::boletim::sync::io::workbook::LocalWorkbook;
use boletim_sync::boletim::sync::model::FormulaSpec;
use boletim_sync::boletim::sync::pipeline::{self, SyncOutcome, SyncRequest};
use boletim_sync::{Result, SyncError};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging().and_then(|()| run(cli)) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| SyncError::Logging(error.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SyncConfig::from_path(path)?,
        None => SyncConfig::default(),
    };
    match cli.command {
        Command::Sync(args) => execute_sync(&config, args),
        Command::Credentials => execute_credentials(&config),
        Command::FillFormulas(args) => execute_fill(&config, args),
    }
}

fn execute_sync(config: &SyncConfig, args: SyncArgs) -> Result<()> {
    let (mut request, spreadsheet_id) = match &args.job {
        Some(name) => {
            let job = config
                .job(name)
                .ok_or_else(|| SyncError::Config(format!("unknown job '{name}'")))?;
            (SyncRequest::from_job(job), Some(job.resource_id.clone()))
        }
        None => {
            let source = args
                .csv
                .clone()
                .ok_or_else(|| SyncError::Config("--csv is required without --job".into()))?;
            let tab = args
                .tab
                .clone()
                .ok_or_else(|| SyncError::Config("--tab is required without --job".into()))?;
            (SyncRequest::new(source, tab), None)
        }
    };
    if let Some(source) = &args.csv {
        request.source = source.clone();
    }
    if let Some(tab) = &args.tab {
        request.tab = tab.clone();
    }
    if !args.formulas.is_empty() {
        request.formulas = args.formulas.clone();
    }
    if let Some(directory) = &args.data_dir {
        request = request.with_search_dir(directory);
    }

    let destination = Destination::pick(args.workbook, args.spreadsheet_id.or(spreadsheet_id))?;
    let result = match destination {
        Destination::Workbook(path) => {
            let mut workbook = LocalWorkbook::open_or_create(&path, &request.tab)?;
            pipeline::sync_csv(&mut workbook, config, &request)
        }
        Destination::Google(resource_id) => pipeline::sync_google(config, &resource_id, &request),
    };

    match result {
        Ok(report) => {
            let outcome = SyncOutcome::from(Ok(report));
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            Ok(())
        }
        Err(error) if args.json => {
            let outcome = SyncOutcome::from(Err(error));
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            std::process::exit(1);
        }
        Err(error) => Err(error),
    }
}

fn print_outcome(outcome: &SyncOutcome) {
    let Some(report) = &outcome.report else {
        return;
    };
    println!("source: {}", report.source.display());
    println!(
        "encoding: {}, delimiter: '{}'",
        report.encoding, report.delimiter
    );
    println!("{}", outcome.message);
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
}

fn execute_credentials(config: &SyncConfig) -> Result<()> {
    let bundle = CredentialResolver::from_config(&config.credentials).resolve()?;
    println!("credentials: {}", bundle.path.display());
    for (field, present) in &bundle.checklist {
        println!("  {field}: {}", if *present { "ok" } else { "missing" });
    }
    if let Some(email) = &bundle.client_email {
        println!("share the spreadsheet with: {email}");
    }
    Ok(())
}

fn execute_fill(config: &SyncConfig, args: FillArgs) -> Result<()> {
    if args.formulas.is_empty() {
        return Err(SyncError::Config("at least one --formula is required".into()));
    }
    let warnings = match Destination::pick(args.workbook, args.spreadsheet_id)? {
        Destination::Workbook(path) => {
            let mut workbook = LocalWorkbook::open(&path)?;
            let warnings =
                apply_templates_to_all_rows(&mut workbook, &args.tab, &args.formulas, args.first_row)?;
            workbook.flush()?;
            warnings
        }
        Destination::Google(resource_id) => {
            let mut sheets = pipeline::connect_google(config, &resource_id)?;
            apply_templates_to_all_rows(&mut sheets, &args.tab, &args.formulas, args.first_row)?
        }
    };
    for warning in &warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

enum Destination {
    Google(String),
    Workbook(PathBuf),
}

impl Destination {
    fn pick(workbook: Option<PathBuf>, spreadsheet_id: Option<String>) -> Result<Self> {
        match (workbook, spreadsheet_id) {
            (Some(path), _) => Ok(Destination::Workbook(path)),
            (None, Some(id)) => Ok(Destination::Google(id)),
            (None, None) => Err(SyncError::Config(
                "either --spreadsheet-id or --workbook is required".into(),
            )),
        }
    }
}

fn parse_formula(value: &str) -> std::result::Result<FormulaSpec, String> {
    let (column, template) = value
        .split_once('=')
        .ok_or_else(|| format!("expected COLUMN=TEMPLATE, got '{value}'"))?;
    column_index(column).map_err(|error| error.to_string())?;
    // `P=TEXT(..)` and `P==TEXT(..)` both mean the formula `=TEXT(..)`
    let template = if template.starts_with('=') {
        template.to_string()
    } else {
        format!("={template}")
    };
    Ok(FormulaSpec::new(column.trim().to_uppercase(), template))
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Append CSV exports to reporting spreadsheets."
)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append a CSV file to a spreadsheet tab.
    Sync(SyncArgs),
    /// Locate and validate the service-account credentials.
    Credentials,
    /// Write formula templates over every populated row of a tab.
    FillFormulas(FillArgs),
}

#[derive(clap::Args)]
struct SyncArgs {
    /// CSV path, or a base name searched in the data folder.
    #[arg(long)]
    csv: Option<String>,

    /// Destination tab.
    #[arg(long)]
    tab: Option<String>,

    /// Google spreadsheet id.
    #[arg(long, conflicts_with = "workbook")]
    spreadsheet_id: Option<String>,

    /// Local .xlsx used instead of a remote spreadsheet.
    #[arg(long)]
    workbook: Option<PathBuf>,

    /// Formula column as COLUMN=TEMPLATE, `{row}` marking the row number.
    #[arg(long = "formula", value_parser = parse_formula)]
    formulas: Vec<FormulaSpec>,

    /// Configured job to run.
    #[arg(long)]
    job: Option<String>,

    /// Folder searched for the CSV.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Print the outcome as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
struct FillArgs {
    #[arg(long)]
    tab: String,

    #[arg(long, conflicts_with = "workbook")]
    spreadsheet_id: Option<String>,

    #[arg(long)]
    workbook: Option<PathBuf>,

    #[arg(long = "formula", value_parser = parse_formula)]
    formulas: Vec<FormulaSpec>,

    /// First data row.
    #[arg(long, default_value_t = DEFAULT_FIRST_DATA_ROW)]
    first_row: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_flag_adds_the_leading_equals() {
        let spec = parse_formula("p=TEXT(C{row},\"DD/MM\")").expect("parsed");
        assert_eq!(spec, FormulaSpec::new("P", "=TEXT(C{row},\"DD/MM\")"));
        let spec = parse_formula("P==TEXT(C{row},\"DD/MM\")").expect("parsed");
        assert_eq!(spec, FormulaSpec::new("P", "=TEXT(C{row},\"DD/MM\")"));
        assert!(parse_formula("TEXT(C2)").is_err());
        assert!(parse_formula("1=C2").is_err());
    }
}
