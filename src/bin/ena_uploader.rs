use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ena_assembly_uploader::domain::{LibraryType, StudyAccession};
use ena_assembly_uploader::ena::EnaClient;
use ena_assembly_uploader::error::UploaderError;
use ena_assembly_uploader::manifest::{ManifestGenerator, ManifestOptions};
use ena_assembly_uploader::output::JsonOutput;
use ena_assembly_uploader::study_xml::{RegisterOptions, StudyXmlGenerator};

#[derive(Parser)]
#[command(name = "ena-uploader")]
#[command(about = "Generate ENA submission artifacts for primary metagenome assemblies")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Generate one manifest file per assembly listed in the metadata CSV")]
    Manifest(ManifestArgs),
    #[command(about = "Generate study registration and submission XMLs")]
    Register(RegisterArgs),
}

#[derive(Args)]
struct ManifestArgs {
    /// Raw reads study accession, used to name the upload directory
    #[arg(long)]
    study: String,

    /// Metadata CSV: Runs, Coverage, Assembler, Version, Filepath[, Sample]
    #[arg(long)]
    data: PathBuf,

    /// Pre-existing assembly study accession to submit to
    #[arg(long)]
    assembly_study: Option<String>,

    /// Output directory, defaults to the current directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Overwrite existing manifests
    #[arg(long)]
    force: bool,

    /// Resolve accessions through the private Webin report API
    #[arg(long)]
    private: bool,

    /// Mark the assemblies as third-party (TPA)
    #[arg(long)]
    tpa: bool,

    /// Append a timestamp hash to aliases (for the ENA test endpoint)
    #[arg(long)]
    test: bool,
}

#[derive(Args)]
struct RegisterArgs {
    /// Raw reads study accession
    #[arg(long)]
    study: String,

    /// Submission center name, e.g. EMG
    #[arg(long)]
    center: String,

    /// Library type of the assemblies
    #[arg(long, value_enum)]
    library: LibraryType,

    /// Hold date in dd-mm-yyyy format; inherits the raw study release
    /// date when omitted
    #[arg(long)]
    hold: Option<String>,

    /// PubMed ID of a connected publication
    #[arg(long)]
    publication: Option<u32>,

    /// Output directory, defaults to the current directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Mark the study as third-party (TPA)
    #[arg(long)]
    tpa: bool,

    /// Resolve the study through the private Webin report API
    #[arg(long)]
    private: bool,

    /// Append a timestamp hash to the project alias (for the ENA test
    /// endpoint)
    #[arg(long)]
    test: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<UploaderError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &UploaderError) -> u8 {
    match error {
        UploaderError::AccessionNotFound(_) | UploaderError::MissingCredentials => 2,
        UploaderError::EnaHttp(_) | UploaderError::EnaStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Manifest(args) => run_manifest(args),
        Commands::Register(args) => run_register(args),
    }
}

fn run_manifest(args: ManifestArgs) -> miette::Result<()> {
    let study = args.study.parse::<StudyAccession>().into_diagnostic()?;
    let client = EnaClient::new(args.private).into_diagnostic()?;

    let generator = ManifestGenerator::new(
        ManifestOptions {
            study: study.to_string(),
            assembly_study: args.assembly_study,
            assemblies_csv: args.data,
            output_dir: args.output_dir,
            force: args.force,
            tpa: args.tpa,
            test_mode: args.test,
        },
        client,
    )
    .into_diagnostic()?;

    let summary = generator.write_manifests().into_diagnostic()?;
    JsonOutput::print_manifest_summary(&summary).into_diagnostic()?;
    Ok(())
}

fn run_register(args: RegisterArgs) -> miette::Result<()> {
    let study = args.study.parse::<StudyAccession>().into_diagnostic()?;
    let hold_date = args
        .hold
        .as_deref()
        .map(parse_hold_date)
        .transpose()
        .into_diagnostic()?;
    let client = EnaClient::new(args.private).into_diagnostic()?;

    let generator = StudyXmlGenerator::new(
        RegisterOptions {
            study,
            center_name: args.center,
            library: args.library,
            hold_date,
            tpa: args.tpa,
            output_dir: args.output_dir,
            publication: args.publication,
            test_mode: args.test,
        },
        &client,
    )
    .into_diagnostic()?;

    let result = generator.write().into_diagnostic()?;
    JsonOutput::print_register(&result).into_diagnostic()?;
    Ok(())
}

fn parse_hold_date(value: &str) -> Result<NaiveDate, UploaderError> {
    NaiveDate::parse_from_str(value, "%d-%m-%Y")
        .map_err(|_| UploaderError::InvalidHoldDate(value.to_string()))
}
