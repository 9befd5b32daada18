use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::RunAccession;
use crate::ena::MetadataResolver;
use crate::error::UploaderError;
use crate::hashing::{md5_file, timestamp_suffix};

const ACCEPTED_EXTENSIONS: [&str; 3] = [".fa.gz", ".fna.gz", ".fasta.gz"];

/// One row of the assemblies metadata CSV.
#[derive(Debug, Deserialize)]
struct AssemblyRow {
    #[serde(rename = "Runs")]
    runs: String,
    #[serde(rename = "Coverage")]
    coverage: String,
    #[serde(rename = "Assembler")]
    assembler: String,
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "Filepath")]
    filepath: String,
    /// Explicit sample override, only consulted when the runs of a
    /// co-assembly disagree on their sample accession.
    #[serde(rename = "Sample", default)]
    sample: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub study: String,
    pub assembly_study: Option<String>,
    pub assemblies_csv: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub force: bool,
    pub tpa: bool,
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestSummary {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub runs: String,
    pub reason: String,
}

pub struct ManifestGenerator<R: MetadataResolver> {
    assembly_study: Option<String>,
    assemblies_csv: PathBuf,
    upload_dir: PathBuf,
    force: bool,
    tpa: bool,
    test_mode: bool,
    resolver: R,
}

impl<R: MetadataResolver> ManifestGenerator<R> {
    pub fn new(options: ManifestOptions, resolver: R) -> Result<Self, UploaderError> {
        let upload_dir = options
            .output_dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join(format!("{}_upload", options.study));
        fs::create_dir_all(&upload_dir).map_err(|err| {
            UploaderError::Filesystem(format!("create {}: {err}", upload_dir.display()))
        })?;

        Ok(Self {
            assembly_study: options.assembly_study,
            assemblies_csv: options.assemblies_csv,
            upload_dir,
            force: options.force,
            tpa: options.tpa,
            test_mode: options.test_mode,
            resolver,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Process every CSV row, one manifest per assembly. Rows with
    /// unresolvable metadata are skipped and reported in the summary;
    /// a failed ENA lookup aborts the whole batch.
    pub fn write_manifests(&self) -> Result<ManifestSummary, UploaderError> {
        let mut reader = csv::Reader::from_path(&self.assemblies_csv).map_err(|err| {
            UploaderError::CsvRead {
                path: self.assemblies_csv.clone(),
                message: err.to_string(),
            }
        })?;

        let mut summary = ManifestSummary {
            written: Vec::new(),
            skipped: Vec::new(),
        };

        for record in reader.deserialize::<AssemblyRow>() {
            let row = record.map_err(|err| UploaderError::CsvRead {
                path: self.assemblies_csv.clone(),
                message: err.to_string(),
            })?;

            let runs = match parse_run_list(&row.runs) {
                Ok(runs) => runs,
                Err(err) => {
                    warn!("skipping row '{}': {err}", row.runs);
                    summary.skipped.push(SkippedRow {
                        runs: row.runs.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let mut sample_accessions = BTreeSet::new();
            let mut instruments = BTreeSet::new();
            for run in &runs {
                let metadata = self.resolver.resolve_run(run)?;
                sample_accessions.insert(metadata.sample_accession);
                instruments.insert(metadata.instrument_model);
            }

            let explicit_sample = row
                .sample
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty());
            let sample = if sample_accessions.len() == 1 {
                sample_accessions
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_default()
            } else if let Some(sample) = explicit_sample {
                sample.to_string()
            } else {
                warn!(
                    "multiple samples {} found for runs {} and no explicit sample given. Skipping",
                    join(&sample_accessions),
                    row.runs
                );
                summary.skipped.push(SkippedRow {
                    runs: row.runs.clone(),
                    reason: format!("ambiguous sample accessions: {}", join(&sample_accessions)),
                });
                continue;
            };

            // Distinct instrument models, sorted join so output is
            // reproducible for a given set of runs.
            let platform = join(&instruments);

            match self.generate_manifest(
                &runs,
                &sample,
                &platform,
                &row.coverage,
                &row.assembler,
                &row.version,
                Path::new(&row.filepath),
            )? {
                Some(path) => summary.written.push(path),
                None => summary.skipped.push(SkippedRow {
                    runs: row.runs.clone(),
                    reason: format!("assembly file {} missing or not gzipped fasta", row.filepath),
                }),
            }
        }

        Ok(summary)
    }

    /// Write a single manifest. Returns `None` when the assembly file is
    /// unusable (missing or wrong extension); an already existing manifest
    /// counts as written unless `force` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_manifest(
        &self,
        runs: &[RunAccession],
        sample: &str,
        sequencer: &str,
        coverage: &str,
        assembler: &str,
        assembler_version: &str,
        assembly_path: &Path,
    ) -> Result<Option<PathBuf>, UploaderError> {
        let run_refs = runs
            .iter()
            .map(RunAccession::as_str)
            .collect::<Vec<_>>()
            .join(",");
        info!("writing manifest for {run_refs}");

        if !assembly_path.exists() {
            error!(
                "assembly path {} does not exist. Skipping manifest for runs {run_refs}",
                assembly_path.display()
            );
            return Ok(None);
        }
        if !has_fasta_extension(assembly_path) {
            error!(
                "assembly file {} is either not fasta format or not compressed for runs {run_refs}",
                assembly_path.display()
            );
            return Ok(None);
        }

        let digest = md5_file(assembly_path)?;
        let mut assembly_name = assembly_alias(runs, &digest);
        if self.test_mode {
            assembly_name.push('_');
            assembly_name.push_str(&timestamp_suffix());
        }

        let manifest_path = self.upload_dir.join(format!("{digest}.manifest"));
        if manifest_path.exists() && !self.force {
            warn!(
                "manifest for {run_refs} already exists at {}. Skipping",
                manifest_path.display()
            );
            return Ok(Some(manifest_path));
        }

        let program = format!("{assembler} v{assembler_version}");
        let fasta = assembly_path.display().to_string();
        let values = [
            ("STUDY", self.assembly_study.as_deref().unwrap_or_default()),
            ("SAMPLE", sample),
            ("RUN_REF", run_refs.as_str()),
            ("ASSEMBLYNAME", assembly_name.as_str()),
            ("ASSEMBLY_TYPE", "primary metagenome"),
            ("COVERAGE", coverage),
            ("PROGRAM", program.as_str()),
            ("PLATFORM", sequencer),
            ("FASTA", fasta.as_str()),
            ("TPA", if self.tpa { "true" } else { "false" }),
        ];

        let mut file = File::create(&manifest_path).map_err(|err| {
            UploaderError::Filesystem(format!("create {}: {err}", manifest_path.display()))
        })?;
        for (key, value) in values {
            writeln!(file, "{key}\t{value}")
                .map_err(|err| UploaderError::Filesystem(err.to_string()))?;
        }

        Ok(Some(manifest_path))
    }
}

fn parse_run_list(field: &str) -> Result<Vec<RunAccession>, UploaderError> {
    field
        .split(',')
        .map(|value| value.parse::<RunAccession>())
        .collect()
}

/// `{first_run}[_others]_{digest}`; the `_others` marker stands in for the
/// remaining runs of a co-assembly so names stay short.
fn assembly_alias(runs: &[RunAccession], digest: &str) -> String {
    let first = runs.first().map(RunAccession::as_str).unwrap_or_default();
    if runs.len() > 1 {
        format!("{first}_others_{digest}")
    } else {
        format!("{first}_{digest}")
    }
}

fn has_fasta_extension(path: &Path) -> bool {
    let name = path.to_string_lossy();
    ACCEPTED_EXTENSIONS
        .iter()
        .any(|extension| name.ends_with(extension))
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(",")
}
