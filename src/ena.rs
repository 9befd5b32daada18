use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::{RunAccession, StudyAccession};
use crate::error::UploaderError;

const PORTAL_SEARCH_URL: &str = "https://www.ebi.ac.uk/ena/portal/api/search";
const REPORT_BASE_URL: &str = "https://www.ebi.ac.uk/ena/submit/report";

/// Authoritative per-run metadata fetched from ENA.
#[derive(Debug, Clone, Deserialize)]
pub struct RunMetadata {
    pub run_accession: String,
    pub sample_accession: String,
    pub instrument_model: String,
}

/// Authoritative study metadata fetched from ENA. `first_public` is an
/// ISO `YYYY-MM-DD` date string.
#[derive(Debug, Clone, Deserialize)]
pub struct StudyMetadata {
    pub study_accession: String,
    pub study_title: String,
    pub first_public: String,
}

/// Seam for the remote metadata lookup, substitutable with fixture
/// responses in tests.
pub trait MetadataResolver: Send + Sync {
    fn resolve_run(&self, accession: &RunAccession) -> Result<RunMetadata, UploaderError>;
    fn resolve_study(&self, accession: &StudyAccession) -> Result<StudyMetadata, UploaderError>;
}

/// Envelope used by the private report API.
#[derive(Debug, Deserialize)]
struct ReportEnvelope<T> {
    report: T,
}

#[derive(Debug, Deserialize)]
struct RunReport {
    #[serde(rename = "sampleId")]
    sample_id: String,
    #[serde(rename = "instrumentModel")]
    instrument_model: String,
}

#[derive(Debug, Deserialize)]
struct StudyReport {
    #[serde(rename = "firstPublic")]
    first_public: String,
}

#[derive(Clone)]
pub struct EnaClient {
    client: Client,
    private: bool,
    auth: Option<(String, String)>,
}

impl EnaClient {
    pub fn new(private: bool) -> Result<Self, UploaderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ena-uploader/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| UploaderError::EnaHttp(err.to_string()))?,
        );

        let auth = match (std::env::var("ENA_WEBIN"), std::env::var("ENA_WEBIN_PASSWORD")) {
            (Ok(username), Ok(password)) => Some((username, password)),
            _ => None,
        };
        if private && auth.is_none() {
            return Err(UploaderError::MissingCredentials);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| UploaderError::EnaHttp(err.to_string()))?;

        Ok(Self {
            client,
            private,
            auth,
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, UploaderError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(UploaderError::EnaHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, UploaderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ENA request failed".to_string());
        Err(UploaderError::EnaStatus { status, message })
    }

    fn portal_search(&self, form: &[(&str, &str)]) -> Result<reqwest::blocking::Response, UploaderError> {
        let response =
            self.send_with_retries(|| self.client.post(PORTAL_SEARCH_URL).form(form))?;
        Self::handle_status(response)
    }

    fn report_get(&self, url: &str) -> Result<reqwest::blocking::Response, UploaderError> {
        let (username, password) = self
            .auth
            .as_ref()
            .ok_or(UploaderError::MissingCredentials)?;
        let response = self.send_with_retries(|| {
            self.client
                .get(url)
                .basic_auth(username, Some(password))
        })?;
        Self::handle_status(response)
    }

    fn public_run(&self, accession: &RunAccession) -> Result<RunMetadata, UploaderError> {
        // The portal can lag behind submissions, a 204 is retried briefly.
        const NO_CONTENT_RETRIES: usize = 2;
        let query = format!("run_accession=\"{}\"", accession.as_str());
        let form = [
            ("result", "read_run"),
            ("query", query.as_str()),
            ("fields", "run_accession,sample_accession,instrument_model"),
            ("format", "json"),
        ];
        let mut attempt = 0usize;
        let response = loop {
            let response = self.portal_search(&form)?;
            if response.status().as_u16() == 204 && attempt < NO_CONTENT_RETRIES {
                attempt += 1;
                thread::sleep(Duration::from_secs(1));
                continue;
            }
            break response;
        };
        if response.status().as_u16() == 204 {
            return Err(UploaderError::AccessionNotFound(
                accession.as_str().to_string(),
            ));
        }
        let runs: Vec<RunMetadata> = response
            .json()
            .map_err(|err| UploaderError::EnaHttp(err.to_string()))?;
        runs.into_iter()
            .next()
            .ok_or_else(|| UploaderError::AccessionNotFound(accession.as_str().to_string()))
    }

    fn private_run(&self, accession: &RunAccession) -> Result<RunMetadata, UploaderError> {
        let url = format!("{REPORT_BASE_URL}/runs/{}", accession.as_str());
        let response = self.report_get(&url)?;
        let reports: Vec<ReportEnvelope<RunReport>> = response
            .json()
            .map_err(|err| UploaderError::EnaHttp(err.to_string()))?;
        let run = reports
            .into_iter()
            .next()
            .ok_or_else(|| UploaderError::AccessionNotFound(accession.as_str().to_string()))?
            .report;
        Ok(RunMetadata {
            run_accession: accession.as_str().to_string(),
            sample_accession: run.sample_id,
            instrument_model: run.instrument_model,
        })
    }

    fn public_study(&self, accession: &StudyAccession) -> Result<StudyMetadata, UploaderError> {
        let query = format!("{}=\"{}\"", accession.query_field(), accession.as_str());
        let form = [
            ("result", "study"),
            ("query", query.as_str()),
            ("fields", "study_accession,study_title,first_public"),
            ("format", "json"),
            ("dataPortal", "ena"),
        ];
        let response = self.portal_search(&form)?;
        if response.status().as_u16() == 204 {
            return Err(UploaderError::AccessionNotFound(
                accession.as_str().to_string(),
            ));
        }
        let studies: Vec<StudyMetadata> = response
            .json()
            .map_err(|err| UploaderError::EnaHttp(err.to_string()))?;
        studies
            .into_iter()
            .next()
            .ok_or_else(|| UploaderError::AccessionNotFound(accession.as_str().to_string()))
    }

    /// Private studies need two report lookups, the registration XML for
    /// the title and the study report for the release date.
    fn private_study(&self, accession: &StudyAccession) -> Result<StudyMetadata, UploaderError> {
        let xml_url = format!("{REPORT_BASE_URL}/studies/xml/{}", accession.as_str());
        let xml = self
            .report_get(&xml_url)?
            .text()
            .map_err(|err| UploaderError::EnaHttp(err.to_string()))?;
        let study_title = xml_element_text(&xml, "STUDY_TITLE")
            .ok_or_else(|| UploaderError::AccessionNotFound(accession.as_str().to_string()))?;

        let report_url = format!("{REPORT_BASE_URL}/studies/{}", accession.as_str());
        let reports: Vec<ReportEnvelope<StudyReport>> = self
            .report_get(&report_url)?
            .json()
            .map_err(|err| UploaderError::EnaHttp(err.to_string()))?;
        let report = reports
            .into_iter()
            .next()
            .ok_or_else(|| UploaderError::AccessionNotFound(accession.as_str().to_string()))?
            .report;
        // firstPublic carries a timestamp, only the date part is wanted.
        let first_public = report
            .first_public
            .split('T')
            .next()
            .unwrap_or(&report.first_public)
            .to_string();

        Ok(StudyMetadata {
            study_accession: accession.as_str().to_string(),
            study_title,
            first_public,
        })
    }
}

impl MetadataResolver for EnaClient {
    fn resolve_run(&self, accession: &RunAccession) -> Result<RunMetadata, UploaderError> {
        if self.private {
            self.private_run(accession)
        } else {
            self.public_run(accession)
        }
    }

    fn resolve_study(&self, accession: &StudyAccession) -> Result<StudyMetadata, UploaderError> {
        if self.private {
            self.private_study(accession)
        } else {
            self.public_study(accession)
        }
    }
}

/// Text content of the first `tag` element in `xml`, unescaped.
fn xml_element_text(xml: &str, tag: &str) -> Option<String> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) if start.name().as_ref() == tag.as_bytes() => {
                inside = true;
            }
            Ok(Event::Text(text)) if inside => {
                return text.unescape().ok().map(|value| value.into_owned());
            }
            Ok(Event::End(end)) if end.name().as_ref() == tag.as_bytes() => {
                inside = false;
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_study_title_from_report_xml() {
        let xml = r#"<?xml version="1.0"?>
<STUDY_SET>
  <STUDY accession="ERP125469">
    <DESCRIPTOR>
      <STUDY_TITLE>HoloFood Salmon Trial A+B Gut Metagenome</STUDY_TITLE>
      <STUDY_DESCRIPTION>Gut samples</STUDY_DESCRIPTION>
    </DESCRIPTOR>
  </STUDY>
</STUDY_SET>"#;
        assert_eq!(
            xml_element_text(xml, "STUDY_TITLE").as_deref(),
            Some("HoloFood Salmon Trial A+B Gut Metagenome")
        );
        assert_eq!(xml_element_text(xml, "MISSING"), None);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(204));
    }
}
