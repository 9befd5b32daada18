use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;
use tracing::info;

use crate::domain::{LibraryType, StudyAccession};
use crate::ena::{MetadataResolver, StudyMetadata};
use crate::error::UploaderError;
use crate::hashing::timestamp_suffix;

#[derive(Debug, Clone)]
pub struct RegisterOptions {
    pub study: StudyAccession,
    pub center_name: String,
    pub library: LibraryType,
    pub hold_date: Option<NaiveDate>,
    pub tpa: bool,
    pub output_dir: Option<PathBuf>,
    pub publication: Option<u32>,
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResult {
    pub study_xml: PathBuf,
    pub submission_xml: PathBuf,
}

/// Builds the pair of XML documents registering an assembly study: the
/// project registration and the submission envelope. The study record is
/// resolved eagerly on construction, registration is pointless without it.
pub struct StudyXmlGenerator {
    center: String,
    library: LibraryType,
    hold_date: Option<NaiveDate>,
    tpa: bool,
    publication: Option<u32>,
    test_mode: bool,
    study_xml_path: PathBuf,
    submission_xml_path: PathBuf,
    record: StudyMetadata,
}

impl StudyXmlGenerator {
    pub fn new<R: MetadataResolver>(
        options: RegisterOptions,
        resolver: &R,
    ) -> Result<Self, UploaderError> {
        let upload_dir = options
            .output_dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join(format!("{}_upload", options.study));
        fs::create_dir_all(&upload_dir).map_err(|err| {
            UploaderError::Filesystem(format!("create {}: {err}", upload_dir.display()))
        })?;

        let record = resolver.resolve_study(&options.study)?;

        Ok(Self {
            center: options.center_name,
            library: options.library,
            hold_date: options.hold_date,
            tpa: options.tpa,
            publication: options.publication,
            test_mode: options.test_mode,
            study_xml_path: upload_dir.join(format!("{}_reg.xml", options.study)),
            submission_xml_path: upload_dir.join(format!("{}_submission.xml", options.study)),
            record,
        })
    }

    pub fn study_xml_path(&self) -> &Path {
        &self.study_xml_path
    }

    pub fn submission_xml_path(&self) -> &Path {
        &self.submission_xml_path
    }

    pub fn project_title(&self) -> String {
        format!(
            "{} assembly of {} data set ({})",
            self.library.title_case(),
            self.record.study_accession,
            self.record.study_title
        )
    }

    pub fn project_description(&self) -> String {
        let tpa = if self.tpa {
            "Third Party Annotation (TPA) "
        } else {
            ""
        };
        format!(
            "The {tpa}assembly was derived from the primary data set {}",
            self.record.study_accession
        )
    }

    pub fn write_study_xml(&self) -> Result<PathBuf, UploaderError> {
        let mut alias = format!("{}_assembly", self.record.study_accession);
        if self.test_mode {
            alias.push('_');
            alias.push_str(&timestamp_suffix());
        }
        let title = self.project_title();
        let description = self.project_description();

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;

        start(&mut writer, "PROJECT_SET", &[])?;
        start(
            &mut writer,
            "PROJECT",
            &[("alias", alias.as_str()), ("center_name", &self.center)],
        )?;

        text_element(&mut writer, "TITLE", &title)?;
        text_element(&mut writer, "DESCRIPTION", &description)?;

        // Placeholder nodes required by the ENA project schema.
        start(&mut writer, "SUBMISSION_PROJECT", &[])?;
        empty_element(&mut writer, "SEQUENCING_PROJECT", &[])?;
        end(&mut writer, "SUBMISSION_PROJECT")?;

        if let Some(publication) = self.publication {
            start(&mut writer, "PROJECT_LINKS", &[])?;
            start(&mut writer, "PROJECT_LINK", &[])?;
            start(&mut writer, "XREF_LINK", &[])?;
            text_element(&mut writer, "DB", "PUBMED")?;
            text_element(&mut writer, "ID", &publication.to_string())?;
            end(&mut writer, "XREF_LINK")?;
            end(&mut writer, "PROJECT_LINK")?;
            end(&mut writer, "PROJECT_LINKS")?;
        }

        start(&mut writer, "PROJECT_ATTRIBUTES", &[])?;
        if self.tpa {
            start(&mut writer, "PROJECT_ATTRIBUTE", &[])?;
            text_element(&mut writer, "TAG", "study keyword")?;
            text_element(&mut writer, "VALUE", "TPA:assembly")?;
            end(&mut writer, "PROJECT_ATTRIBUTE")?;
        }
        start(&mut writer, "PROJECT_ATTRIBUTE", &[])?;
        text_element(&mut writer, "TAG", "new_study_type")?;
        text_element(&mut writer, "VALUE", &format!("{} assembly", self.library))?;
        end(&mut writer, "PROJECT_ATTRIBUTE")?;
        end(&mut writer, "PROJECT_ATTRIBUTES")?;

        end(&mut writer, "PROJECT")?;
        end(&mut writer, "PROJECT_SET")?;

        write_document(&self.study_xml_path, writer.into_inner())?;
        info!("wrote study XML to {}", self.study_xml_path.display());
        Ok(self.study_xml_path.clone())
    }

    pub fn write_submission_xml(&self) -> Result<PathBuf, UploaderError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;

        start(&mut writer, "SUBMISSION", &[("center_name", self.center.as_str())])?;
        start(&mut writer, "ACTIONS", &[])?;

        start(&mut writer, "ACTION", &[])?;
        empty_element(&mut writer, "ADD", &[])?;
        end(&mut writer, "ACTION")?;

        // Explicit hold date wins; otherwise inherit the raw study's
        // release date when it is still in the future. ISO date strings
        // compare lexicographically in chronological order.
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        if let Some(hold) = self.hold_date {
            let hold = hold.format("%d-%m-%Y").to_string();
            start(&mut writer, "ACTION", &[])?;
            empty_element(&mut writer, "HOLD", &[("HoldUntilDate", hold.as_str())])?;
            end(&mut writer, "ACTION")?;
        } else if self.record.first_public > today {
            start(&mut writer, "ACTION", &[])?;
            empty_element(
                &mut writer,
                "HOLD",
                &[("HoldUntilDate", self.record.first_public.as_str())],
            )?;
            end(&mut writer, "ACTION")?;
        }

        end(&mut writer, "ACTIONS")?;
        end(&mut writer, "SUBMISSION")?;

        write_document(&self.submission_xml_path, writer.into_inner())?;
        info!(
            "wrote submission XML to {}",
            self.submission_xml_path.display()
        );
        Ok(self.submission_xml_path.clone())
    }

    /// Both documents, study registration first.
    pub fn write(&self) -> Result<RegisterResult, UploaderError> {
        let study_xml = self.write_study_xml()?;
        let submission_xml = self.write_submission_xml()?;
        Ok(RegisterResult {
            study_xml,
            submission_xml,
        })
    }
}

fn start<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    attributes: &[(&str, &str)],
) -> Result<(), UploaderError> {
    let mut element = BytesStart::new(name);
    for attribute in attributes {
        element.push_attribute(*attribute);
    }
    writer.write_event(Event::Start(element)).map_err(xml_err)
}

fn end<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<(), UploaderError> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)
}

fn empty_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    attributes: &[(&str, &str)],
) -> Result<(), UploaderError> {
    let mut element = BytesStart::new(name);
    for attribute in attributes {
        element.push_attribute(*attribute);
    }
    writer.write_event(Event::Empty(element)).map_err(xml_err)
}

fn text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), UploaderError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)
}

fn write_document(path: &Path, mut bytes: Vec<u8>) -> Result<(), UploaderError> {
    bytes.push(b'\n');
    fs::write(path, bytes)
        .map_err(|err| UploaderError::Filesystem(format!("write {}: {err}", path.display())))
}

fn xml_err<E: std::fmt::Display>(err: E) -> UploaderError {
    UploaderError::Xml(err.to_string())
}
