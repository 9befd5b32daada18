use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::UploaderError;

/// A raw-reads or assembly study accession, either a primary project
/// accession (`PRJEB...`) or a secondary study accession (`ERP...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudyAccession(String);

impl StudyAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ENA portal field name this accession is queried by.
    pub fn query_field(&self) -> &'static str {
        if self.0.starts_with("PRJ") {
            "study_accession"
        } else {
            "secondary_study_accession"
        }
    }
}

impl fmt::Display for StudyAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StudyAccession {
    type Err = UploaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.starts_with("PRJ") || normalized.contains("RP") {
            Ok(Self(normalized))
        } else {
            Err(UploaderError::InvalidAccession(value.to_string()))
        }
    }
}

/// A sequencing run accession (`ERR...`, `SRR...`, `DRR...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunAccession(String);

impl RunAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunAccession {
    type Err = UploaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.contains("RR") {
            Ok(Self(normalized))
        } else {
            Err(UploaderError::InvalidAccession(value.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    Metagenome,
    Metatranscriptome,
}

impl LibraryType {
    /// Title-cased form used in the project TITLE element.
    pub fn title_case(&self) -> &'static str {
        match self {
            LibraryType::Metagenome => "Metagenome",
            LibraryType::Metatranscriptome => "Metatranscriptome",
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryType::Metagenome => write!(f, "metagenome"),
            LibraryType::Metatranscriptome => write!(f, "metatranscriptome"),
        }
    }
}

impl FromStr for LibraryType {
    type Err = UploaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "metagenome" => Ok(LibraryType::Metagenome),
            "metatranscriptome" => Ok(LibraryType::Metatranscriptome),
            _ => Err(UploaderError::InvalidLibraryType(value.to_string())),
        }
    }
}
