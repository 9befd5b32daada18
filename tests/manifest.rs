use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ena_assembly_uploader::domain::{RunAccession, StudyAccession};
use ena_assembly_uploader::ena::{MetadataResolver, RunMetadata, StudyMetadata};
use ena_assembly_uploader::error::UploaderError;
use ena_assembly_uploader::manifest::{ManifestGenerator, ManifestOptions};

#[derive(Default)]
struct MockResolver {
    runs: HashMap<String, RunMetadata>,
}

impl MockResolver {
    fn with_run(mut self, run: &str, sample: &str, instrument: &str) -> Self {
        self.runs.insert(
            run.to_string(),
            RunMetadata {
                run_accession: run.to_string(),
                sample_accession: sample.to_string(),
                instrument_model: instrument.to_string(),
            },
        );
        self
    }
}

impl MetadataResolver for MockResolver {
    fn resolve_run(&self, accession: &RunAccession) -> Result<RunMetadata, UploaderError> {
        self.runs
            .get(accession.as_str())
            .cloned()
            .ok_or_else(|| UploaderError::AccessionNotFound(accession.as_str().to_string()))
    }

    fn resolve_study(&self, accession: &StudyAccession) -> Result<StudyMetadata, UploaderError> {
        Err(UploaderError::AccessionNotFound(
            accession.as_str().to_string(),
        ))
    }
}

fn write_csv(dir: &Path, rows: &[&str]) -> PathBuf {
    let path = dir.join("assemblies.csv");
    let mut content = String::from("Runs,Coverage,Assembler,Version,Filepath,Sample\n");
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    fs::write(&path, content).unwrap();
    path
}

fn write_fasta(dir: &Path, name: &str, bytes: &[u8]) -> (PathBuf, String) {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    (path, format!("{:x}", md5::compute(bytes)))
}

fn options(csv: PathBuf, out: &Path) -> ManifestOptions {
    ManifestOptions {
        study: "ERP125469".to_string(),
        assembly_study: Some("PRJ1".to_string()),
        assemblies_csv: csv,
        output_dir: Some(out.to_path_buf()),
        force: false,
        tpa: true,
        test_mode: false,
    }
}

#[test]
fn single_run_manifest_is_content_addressed() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, digest) = write_fasta(temp.path(), "assembly.fasta.gz", b">contig1\nACGT\n");
    let csv = write_csv(
        temp.path(),
        &[&format!("ERR4918394,20,metaspades,3.15.5,{},", fasta.display())],
    );

    let resolver = MockResolver::default().with_run("ERR4918394", "SAMEA7687881", "DNBSEQ-G400");
    let generator = ManifestGenerator::new(options(csv, temp.path()), resolver).unwrap();
    let summary = generator.write_manifests().unwrap();

    assert_eq!(summary.written.len(), 1);
    assert!(summary.skipped.is_empty());

    let manifest = temp
        .path()
        .join("ERP125469_upload")
        .join(format!("{digest}.manifest"));
    assert_eq!(summary.written[0], manifest);
    assert!(manifest.is_file());

    let content = fs::read_to_string(&manifest).unwrap();
    let expected = format!(
        "STUDY\tPRJ1\n\
         SAMPLE\tSAMEA7687881\n\
         RUN_REF\tERR4918394\n\
         ASSEMBLYNAME\tERR4918394_{digest}\n\
         ASSEMBLY_TYPE\tprimary metagenome\n\
         COVERAGE\t20\n\
         PROGRAM\tmetaspades v3.15.5\n\
         PLATFORM\tDNBSEQ-G400\n\
         FASTA\t{fasta}\n\
         TPA\ttrue\n",
        fasta = fasta.display()
    );
    assert_eq!(content, expected);
}

#[test]
fn rerun_without_force_keeps_existing_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, digest) = write_fasta(temp.path(), "assembly.fa.gz", b"ACGT");
    let csv = write_csv(
        temp.path(),
        &[&format!("ERR4918394,20,megahit,1.2.9,{},", fasta.display())],
    );

    let resolver = MockResolver::default().with_run("ERR4918394", "SAMEA7687881", "DNBSEQ-G400");
    let generator = ManifestGenerator::new(options(csv, temp.path()), resolver).unwrap();
    generator.write_manifests().unwrap();

    let manifest = temp
        .path()
        .join("ERP125469_upload")
        .join(format!("{digest}.manifest"));
    // scribble over the file, a second pass must not touch it
    fs::write(&manifest, "scribble").unwrap();
    let summary = generator.write_manifests().unwrap();
    assert_eq!(summary.written, vec![manifest.clone()]);
    assert_eq!(fs::read_to_string(&manifest).unwrap(), "scribble");
}

#[test]
fn rerun_with_force_rewrites_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, digest) = write_fasta(temp.path(), "assembly.fa.gz", b"ACGT");
    let csv = write_csv(
        temp.path(),
        &[&format!("ERR4918394,20,megahit,1.2.9,{},", fasta.display())],
    );

    let resolver = MockResolver::default().with_run("ERR4918394", "SAMEA7687881", "DNBSEQ-G400");
    let mut opts = options(csv, temp.path());
    opts.force = true;
    let generator = ManifestGenerator::new(opts, resolver).unwrap();
    generator.write_manifests().unwrap();

    let manifest = temp
        .path()
        .join("ERP125469_upload")
        .join(format!("{digest}.manifest"));
    let original = fs::read_to_string(&manifest).unwrap();

    fs::write(&manifest, "scribble").unwrap();
    generator.write_manifests().unwrap();
    assert_eq!(fs::read_to_string(&manifest).unwrap(), original);
}

#[test]
fn co_assembly_alias_and_sorted_platform() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, digest) = write_fasta(temp.path(), "coasm.fna.gz", b"ACGTACGT");
    let csv = write_csv(
        temp.path(),
        &[&format!(
            "\"ERR4918395,ERR4918394\",30,metaspades,3.15.5,{},",
            fasta.display()
        )],
    );

    let resolver = MockResolver::default()
        .with_run("ERR4918395", "SAMEA1", "Illumina NovaSeq 6000")
        .with_run("ERR4918394", "SAMEA1", "DNBSEQ-G400");
    let generator = ManifestGenerator::new(options(csv, temp.path()), resolver).unwrap();
    let summary = generator.write_manifests().unwrap();
    assert_eq!(summary.written.len(), 1);

    let content = fs::read_to_string(&summary.written[0]).unwrap();
    // first run id in CSV order prefixes the alias
    assert!(content.contains(&format!("ASSEMBLYNAME\tERR4918395_others_{digest}\n")));
    assert!(content.contains("RUN_REF\tERR4918395,ERR4918394\n"));
    // distinct instrument models, sorted join
    assert!(content.contains("PLATFORM\tDNBSEQ-G400,Illumina NovaSeq 6000\n"));
}

#[test]
fn ambiguous_samples_skip_row() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, _) = write_fasta(temp.path(), "coasm.fa.gz", b"ACGT");
    let csv = write_csv(
        temp.path(),
        &[&format!("\"ERR4918394,ERR4918395\",30,megahit,1.2.9,{},", fasta.display())],
    );

    let resolver = MockResolver::default()
        .with_run("ERR4918394", "SAMEA1", "DNBSEQ-G400")
        .with_run("ERR4918395", "SAMEA2", "DNBSEQ-G400");
    let generator = ManifestGenerator::new(options(csv, temp.path()), resolver).unwrap();
    let summary = generator.write_manifests().unwrap();

    assert!(summary.written.is_empty());
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.skipped[0].reason.contains("ambiguous"));

    let upload_dir = temp.path().join("ERP125469_upload");
    let manifests: Vec<_> = fs::read_dir(&upload_dir).unwrap().collect();
    assert!(manifests.is_empty());
}

#[test]
fn explicit_sample_override_resolves_ambiguity() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, _) = write_fasta(temp.path(), "coasm.fa.gz", b"ACGT");
    let csv = write_csv(
        temp.path(),
        &[&format!(
            "\"ERR4918394,ERR4918395\",30,megahit,1.2.9,{},SAMEA_OVERRIDE",
            fasta.display()
        )],
    );

    let resolver = MockResolver::default()
        .with_run("ERR4918394", "SAMEA1", "DNBSEQ-G400")
        .with_run("ERR4918395", "SAMEA2", "DNBSEQ-G400");
    let generator = ManifestGenerator::new(options(csv, temp.path()), resolver).unwrap();
    let summary = generator.write_manifests().unwrap();

    assert_eq!(summary.written.len(), 1);
    let content = fs::read_to_string(&summary.written[0]).unwrap();
    assert!(content.contains("SAMPLE\tSAMEA_OVERRIDE\n"));
}

#[test]
fn disallowed_extension_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, _) = write_fasta(temp.path(), "assembly.txt", b"ACGT");
    let csv = write_csv(
        temp.path(),
        &[&format!("ERR4918394,20,megahit,1.2.9,{},", fasta.display())],
    );

    let resolver = MockResolver::default().with_run("ERR4918394", "SAMEA1", "DNBSEQ-G400");
    let generator = ManifestGenerator::new(options(csv, temp.path()), resolver).unwrap();
    let summary = generator.write_manifests().unwrap();

    assert!(summary.written.is_empty());
    assert_eq!(summary.skipped.len(), 1);
}

#[test]
fn missing_assembly_file_is_skipped_not_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, _) = write_fasta(temp.path(), "present.fa.gz", b"ACGT");
    let csv = write_csv(
        temp.path(),
        &[
            &format!("ERR4918394,10,megahit,1.2.9,{}/nope.fa.gz,", temp.path().display()),
            &format!("ERR4918395,10,megahit,1.2.9,{},", fasta.display()),
        ],
    );

    let resolver = MockResolver::default()
        .with_run("ERR4918394", "SAMEA1", "DNBSEQ-G400")
        .with_run("ERR4918395", "SAMEA2", "DNBSEQ-G400");
    let generator = ManifestGenerator::new(options(csv, temp.path()), resolver).unwrap();
    let summary = generator.write_manifests().unwrap();

    assert_eq!(summary.written.len(), 1);
    assert_eq!(summary.skipped.len(), 1);
}

#[test]
fn unresolvable_run_aborts_batch() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, _) = write_fasta(temp.path(), "assembly.fa.gz", b"ACGT");
    let csv = write_csv(
        temp.path(),
        &[&format!("ERR4918394,20,megahit,1.2.9,{},", fasta.display())],
    );

    let generator =
        ManifestGenerator::new(options(csv, temp.path()), MockResolver::default()).unwrap();
    let err = generator.write_manifests().unwrap_err();
    assert!(matches!(err, UploaderError::AccessionNotFound(_)));
}

#[test]
fn test_mode_appends_alias_suffix() {
    let temp = tempfile::tempdir().unwrap();
    let (fasta, digest) = write_fasta(temp.path(), "assembly.fa.gz", b"ACGT");
    let csv = write_csv(
        temp.path(),
        &[&format!("ERR4918394,20,megahit,1.2.9,{},", fasta.display())],
    );

    let resolver = MockResolver::default().with_run("ERR4918394", "SAMEA1", "DNBSEQ-G400");
    let mut opts = options(csv, temp.path());
    opts.test_mode = true;
    let generator = ManifestGenerator::new(opts, resolver).unwrap();
    let summary = generator.write_manifests().unwrap();

    let content = fs::read_to_string(&summary.written[0]).unwrap();
    let name_line = content
        .lines()
        .find(|line| line.starts_with("ASSEMBLYNAME\t"))
        .unwrap();
    assert!(name_line.contains(&format!("ERR4918394_{digest}_")));
    assert_ne!(name_line, format!("ASSEMBLYNAME\tERR4918394_{digest}"));
}
