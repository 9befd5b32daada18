use std::io::{self, Write};

use serde::Serialize;

use crate::manifest::ManifestSummary;
use crate::study_xml::RegisterResult;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_manifest_summary(result: &ManifestSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_register(result: &RegisterResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
