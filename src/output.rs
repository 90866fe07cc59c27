//! Export results.
//!
//! A download produces a [`DownloadFile`]; a save produces a [`SaveStatus`],
//! which travels back to the client either as the flat `key=value` payload
//! chart clients already parse, or as JSON.

use crate::request::ExportFormat;
use serde::{Serialize, Serializer};

/// Outcome of [`crate::Exporter::export`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExportResult {
    Download(DownloadFile),
    Saved(SaveStatus),
}

/// A converted file to stream back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadFile {
    pub bytes: Vec<u8>,
    pub format: ExportFormat,
    /// Attachment name, e.g. `chart.png`.
    pub file_name: String,
}

impl DownloadFile {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    /// `Content-Disposition` header value.
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name)
    }
}

/// Status record for a save.
///
/// Field names on the wire are the lower-case keys chart clients expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveStatus {
    #[serde(rename = "statuscode", serialize_with = "bool_as_int")]
    pub status: bool,
    #[serde(rename = "statusmessage")]
    pub status_message: String,
    /// Final file name in the save directory (empty on failure).
    #[serde(rename = "filename")]
    pub file_name: String,
    /// Static URL the file can be fetched from (empty on failure).
    pub url: String,
    #[serde(rename = "domid")]
    pub dom_id: String,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

fn bool_as_int<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(u8::from(*v))
}

impl SaveStatus {
    /// A failed save: `statuscode=0`, message carries the error text.
    pub fn failed(message: impl Into<String>, dom_id: &str, width: u32, height: u32) -> Self {
        Self {
            status: false,
            status_message: message.into(),
            file_name: String::new(),
            url: String::new(),
            dom_id: dom_id.to_string(),
            width,
            height,
            notice: None,
        }
    }

    /// Encode as `statuscode=1&statusmessage=successful&filename=...`.
    ///
    /// Keys appear in a fixed order; values are percent-encoded; `notice` is
    /// omitted when absent.
    pub fn to_query_string(&self) -> String {
        let code = u8::from(self.status).to_string();
        let width = self.width.to_string();
        let height = self.height.to_string();

        let mut pairs: Vec<(&str, &str)> = vec![
            ("statuscode", code.as_str()),
            ("statusmessage", self.status_message.as_str()),
            ("filename", self.file_name.as_str()),
            ("url", self.url.as_str()),
            ("domid", self.dom_id.as_str()),
            ("width", width.as_str()),
            ("height", height.as_str()),
        ];
        if let Some(ref notice) = self.notice {
            pairs.push(("notice", notice.as_str()));
        }

        pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
