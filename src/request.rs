//! Request normalisation: form body → [`ExportRequest`].
//!
//! Chart clients POST a flat form with the SVG in `stream`, a handful of
//! `meta_*` fields, and a `parameters` field that is itself a query string
//! whose pairs are joined with `|` instead of `&` (an `&` would not survive
//! some clients' escaping). [`normalize`] validates all of it up front so the
//! pipeline only ever sees well-formed requests, and no converter is started
//! for a request that was going to fail anyway.

use crate::error::ExportError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Largest accepted width or height, in pixels.
pub const MAX_DIMENSION: u32 = 20_000;

/// File stem used when the client sends none.
pub const DEFAULT_FILE_STEM: &str = "export";

/// The raw form body as posted by the client.
///
/// Every field is optional at this stage so that a missing field becomes a
/// precise [`ExportError`] instead of a generic deserialisation rejection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExportForm {
    pub stream: Option<String>,
    pub stream_type: Option<String>,
    #[serde(rename = "meta_bgColor")]
    pub meta_bg_color: Option<String>,
    #[serde(rename = "meta_bgAlpha", default, deserialize_with = "string_or_number")]
    pub meta_bg_alpha: Option<String>,
    #[serde(rename = "meta_DOMId")]
    pub meta_dom_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub meta_width: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub meta_height: Option<String>,
    pub parameters: Option<String>,
}

/// Numeric fields arrive as text in a form body and as numbers in JSON.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
    }))
}

/// A validated export request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub svg: String,
    pub source_type: String,
    pub background_color: Option<String>,
    /// Opacity in `0.0..=1.0`.
    pub background_alpha: Option<f64>,
    pub dom_id: String,
    pub width: u32,
    pub height: u32,
    pub parameters: ExportParameters,
}

impl ExportRequest {
    /// Attachment / on-disk name before collision handling, e.g. `chart.png`.
    pub fn file_name(&self) -> String {
        format!(
            "{}.{}",
            self.parameters.file_stem,
            self.parameters.format.extension()
        )
    }
}

/// The decoded `parameters` field.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportParameters {
    pub format: ExportFormat,
    /// Sanitised file stem (no extension, no path separators).
    pub file_stem: String,
    pub action: ExportAction,
    /// Any further keys the client sent, lower-cased.
    pub extra: BTreeMap<String, String>,
}

// ── Format / action ──────────────────────────────────────────────────────

/// Output formats the exporter can produce.
///
/// `Jpeg` and `Jpg` produce identical bytes; they differ only in the file
/// extension echoed back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpeg,
    Jpg,
    Pdf,
    Svg,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 5] = [
        ExportFormat::Png,
        ExportFormat::Jpeg,
        ExportFormat::Jpg,
        ExportFormat::Pdf,
        ExportFormat::Svg,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpeg",
            ExportFormat::Jpg => "jpg",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Svg => "svg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg | ExportFormat::Jpg => "image/jpeg",
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Svg => "image/svg+xml",
        }
    }

    /// Whether this format needs the PNG → JPEG transcoding stage.
    pub fn is_jpeg(self) -> bool {
        matches!(self, ExportFormat::Jpeg | ExportFormat::Jpg)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ExportFormat::Png),
            "jpeg" => Ok(ExportFormat::Jpeg),
            "jpg" => Ok(ExportFormat::Jpg),
            "pdf" => Ok(ExportFormat::Pdf),
            "svg" => Ok(ExportFormat::Svg),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// What to do with the converted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportAction {
    /// Send the file back in the response. (default)
    #[default]
    Download,
    /// Write the file to the save directory and return a status record.
    Save,
}

impl FromStr for ExportAction {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "download" => Ok(ExportAction::Download),
            "save" => Ok(ExportAction::Save),
            other => Err(ExportError::MalformedRequest(format!(
                "unknown exportaction '{other}' (expected download or save)"
            ))),
        }
    }
}

// ── Normalisation ────────────────────────────────────────────────────────

/// Validate a raw form body and turn it into an [`ExportRequest`].
///
/// # Errors
/// - [`ExportError::MalformedRequest`] — `parameters` missing or undecodable,
///   no `exportformat`, unknown `exportaction`, or empty `stream`
/// - [`ExportError::UnsupportedFormat`] — `exportformat` not supported
/// - [`ExportError::InvalidDimensions`] — width/height not a positive number
pub fn normalize(form: ExportForm) -> Result<ExportRequest, ExportError> {
    let raw_params = form
        .parameters
        .as_deref()
        .ok_or_else(|| ExportError::MalformedRequest("missing 'parameters' field".into()))?;
    let parameters = parse_parameters(&decode_parameters(raw_params)?)?;

    let width = parse_dimension("meta_width", form.meta_width.as_deref())?;
    let height = parse_dimension("meta_height", form.meta_height.as_deref())?;

    let svg = form.stream.unwrap_or_default();
    if svg.trim().is_empty() {
        return Err(ExportError::MalformedRequest("empty 'stream' field".into()));
    }

    Ok(ExportRequest {
        svg,
        source_type: form.stream_type.unwrap_or_else(|| "svg".to_string()),
        background_color: form.meta_bg_color.as_deref().and_then(normalize_color),
        background_alpha: form.meta_bg_alpha.as_deref().and_then(parse_alpha),
        dom_id: form.meta_dom_id.unwrap_or_default(),
        width,
        height,
        parameters,
    })
}

/// Decode the `|`-delimited parameter string into a key → value map.
///
/// `|` is rewritten to `&` and the result decoded like a query string: `+`
/// is a space, `%XX` escapes are resolved, keys are lower-cased and the last
/// occurrence of a key wins.
pub fn decode_parameters(raw: &str) -> Result<BTreeMap<String, String>, ExportError> {
    let query = raw.replace('|', "&");
    let mut map = BTreeMap::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key)?.to_ascii_lowercase();
        if key.is_empty() {
            continue;
        }
        map.insert(key, decode_component(value)?);
    }

    Ok(map)
}

fn decode_component(s: &str) -> Result<String, ExportError> {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .map_err(|e| ExportError::MalformedRequest(format!("bad encoding in '{s}': {e}")))
}

/// Interpret the decoded parameter map.
fn parse_parameters(map: &BTreeMap<String, String>) -> Result<ExportParameters, ExportError> {
    let mut extra = map.clone();

    let format = extra
        .remove("exportformat")
        .ok_or_else(|| ExportError::MalformedRequest("missing 'exportformat' parameter".into()))?
        .parse::<ExportFormat>()?;

    let action = match extra.remove("exportaction") {
        Some(a) if !a.trim().is_empty() => a.parse::<ExportAction>()?,
        _ => ExportAction::default(),
    };

    let file_stem = sanitize_file_stem(extra.remove("exportfilename").as_deref().unwrap_or(""));

    Ok(ExportParameters {
        format,
        file_stem,
        action,
        extra,
    })
}

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// Reduce a client-supplied file name to a stem that is safe to join onto
/// the save directory.
pub fn sanitize_file_stem(name: &str) -> String {
    let replaced = UNSAFE_FILE_CHARS.replace_all(name.trim(), "_");
    let stem: String = replaced
        .trim_start_matches('.')
        .trim_end_matches('.')
        .chars()
        .take(128)
        .collect();

    if stem.is_empty() {
        DEFAULT_FILE_STEM.to_string()
    } else {
        stem
    }
}

/// Coerce a dimension field to whole pixels.
fn parse_dimension(field: &'static str, raw: Option<&str>) -> Result<u32, ExportError> {
    let invalid = || ExportError::InvalidDimensions {
        field,
        value: raw.unwrap_or("").to_string(),
    };

    let value: f64 = raw.map(str::trim).unwrap_or("").parse().map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(invalid());
    }

    let px = value.round();
    if px < 1.0 || px > MAX_DIMENSION as f64 {
        return Err(invalid());
    }
    Ok(px as u32)
}

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#?([0-9A-Fa-f]{3}|[0-9A-Fa-f]{6}|[0-9A-Fa-f]{8})$").unwrap());
static NAMED_COLOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{3,32}$").unwrap());

/// Accept `#rgb`, `#rrggbb`, `#rrggbbaa` (with or without `#`) or a CSS
/// colour name. Anything else is dropped so it never reaches a converter's
/// argument list.
fn normalize_color(raw: &str) -> Option<String> {
    let c = raw.trim();
    if c.is_empty() {
        return None;
    }
    if HEX_COLOR.is_match(c) {
        return Some(format!("#{}", c.trim_start_matches('#').to_ascii_lowercase()));
    }
    if NAMED_COLOR.is_match(c) {
        return Some(c.to_ascii_lowercase());
    }
    warn!("Ignoring unrecognised background colour {:?}", c);
    None
}

/// Background opacity. Values above 1 are read as a percentage (chart
/// libraries send `bgAlpha=100`).
fn parse_alpha(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => {
            let v = if v > 1.0 { v / 100.0 } else { v };
            Some(v.clamp(0.0, 1.0))
        }
        _ => {
            warn!("Ignoring non-numeric background alpha {:?}", raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(params: &str) -> ExportForm {
        ExportForm {
            stream: Some("<svg xmlns=\"http://www.w3.org/2000/svg\"/>".into()),
            stream_type: Some("svg".into()),
            meta_bg_color: Some("#ffffff".into()),
            meta_bg_alpha: Some("1".into()),
            meta_dom_id: Some("chart-1".into()),
            meta_width: Some("400".into()),
            meta_height: Some("300".into()),
            parameters: Some(params.into()),
        }
    }

    #[test]
    fn pipe_separated_parameters_decode() {
        let map = decode_parameters("exportformat=png|exportfilename=foo|exportaction=download")
            .unwrap();
        let expected: BTreeMap<String, String> = [
            ("exportformat", "png"),
            ("exportfilename", "foo"),
            ("exportaction", "download"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(map, expected);
    }

    #[test]
    fn last_duplicate_wins_and_keys_fold_case() {
        let map = decode_parameters("exportFormat=png|exportformat=pdf").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["exportformat"], "pdf");
    }

    #[test]
    fn values_are_percent_and_plus_decoded() {
        let map = decode_parameters("exportfilename=Q1+sales%20%7C%20EU").unwrap();
        assert_eq!(map["exportfilename"], "Q1 sales | EU");
    }

    #[test]
    fn invalid_utf8_escape_is_malformed() {
        let err = decode_parameters("exportfilename=%FF").unwrap_err();
        assert!(matches!(err, ExportError::MalformedRequest(_)), "got {err:?}");
    }

    #[test]
    fn normalize_valid_request() {
        let req = normalize(form("exportformat=PNG|exportfilename=chart|exportaction=save")).unwrap();
        assert_eq!(req.parameters.format, ExportFormat::Png);
        assert_eq!(req.parameters.action, ExportAction::Save);
        assert_eq!(req.file_name(), "chart.png");
        assert_eq!((req.width, req.height), (400, 300));
        assert_eq!(req.dom_id, "chart-1");
        assert_eq!(req.background_color.as_deref(), Some("#ffffff"));
        assert_eq!(req.background_alpha, Some(1.0));
    }

    #[test]
    fn unknown_keys_are_kept_as_extra() {
        let req = normalize(form("exportformat=svg|exporttargetwindow=_self")).unwrap();
        assert_eq!(req.parameters.extra["exporttargetwindow"], "_self");
        assert_eq!(req.parameters.action, ExportAction::Download);
        assert_eq!(req.parameters.file_stem, DEFAULT_FILE_STEM);
    }

    #[test]
    fn unsupported_format_is_reported() {
        let err = normalize(form("exportformat=zzz|exportfilename=chart")).unwrap_err();
        assert!(matches!(err, ExportError::UnsupportedFormat(ref f) if f == "zzz"), "got {err:?}");
    }

    #[test]
    fn missing_parameters_is_malformed() {
        let mut f = form("");
        f.parameters = None;
        assert!(matches!(normalize(f), Err(ExportError::MalformedRequest(_))));

        let err = normalize(form("exportfilename=chart")).unwrap_err();
        assert!(matches!(err, ExportError::MalformedRequest(_)));
    }

    #[test]
    fn unknown_action_is_malformed() {
        let err = normalize(form("exportformat=png|exportaction=email")).unwrap_err();
        assert!(matches!(err, ExportError::MalformedRequest(_)));
    }

    #[test]
    fn non_numeric_width_is_invalid_dimensions() {
        let mut f = form("exportformat=png");
        f.meta_width = Some("abc".into());
        let err = normalize(f).unwrap_err();
        assert!(
            matches!(err, ExportError::InvalidDimensions { field: "meta_width", .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn bad_heights_are_invalid_dimensions() {
        for bad in [None, Some(""), Some("NaN"), Some("inf"), Some("-5"), Some("0"), Some("99999")] {
            let mut f = form("exportformat=png");
            f.meta_height = bad.map(String::from);
            assert!(
                matches!(normalize(f), Err(ExportError::InvalidDimensions { field: "meta_height", .. })),
                "height {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn fractional_dimensions_round() {
        let mut f = form("exportformat=png");
        f.meta_width = Some(" 399.6 ".into());
        assert_eq!(normalize(f).unwrap().width, 400);
    }

    #[test]
    fn empty_stream_is_malformed() {
        let mut f = form("exportformat=png");
        f.stream = Some("   ".into());
        assert!(matches!(normalize(f), Err(ExportError::MalformedRequest(_))));
    }

    #[test]
    fn file_stem_cannot_escape_save_dir() {
        assert_eq!(sanitize_file_stem("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_stem("..."), DEFAULT_FILE_STEM);
        assert_eq!(sanitize_file_stem("  "), DEFAULT_FILE_STEM);
        assert_eq!(sanitize_file_stem("Q1 sales"), "Q1_sales");
        assert_eq!(sanitize_file_stem("chart-2024_v1"), "chart-2024_v1");
        assert!(!sanitize_file_stem("a/b\\c").contains(|c| c == '/' || c == '\\'));
    }

    #[test]
    fn colours_normalise() {
        assert_eq!(normalize_color("FFF").as_deref(), Some("#fff"));
        assert_eq!(normalize_color("#AbCdEf").as_deref(), Some("#abcdef"));
        assert_eq!(normalize_color("White").as_deref(), Some("white"));
        assert_eq!(normalize_color("-flatten"), None);
        assert_eq!(normalize_color(""), None);
    }

    #[test]
    fn alpha_accepts_fraction_or_percent() {
        assert_eq!(parse_alpha("0.5"), Some(0.5));
        assert_eq!(parse_alpha("100"), Some(1.0));
        assert_eq!(parse_alpha("30"), Some(0.3));
        assert_eq!(parse_alpha("-1"), Some(0.0));
        assert_eq!(parse_alpha("opaque"), None);
    }

    #[test]
    fn content_types_match_formats() {
        assert_eq!(ExportFormat::Png.content_type(), "image/png");
        assert_eq!(ExportFormat::Jpg.content_type(), "image/jpeg");
        assert_eq!(ExportFormat::Jpeg.extension(), "jpeg");
        assert_eq!(ExportFormat::Pdf.content_type(), "application/pdf");
        assert_eq!(ExportFormat::Svg.content_type(), "image/svg+xml");
        assert!(ExportFormat::Jpg.is_jpeg() && !ExportFormat::Png.is_jpeg());
    }

    #[test]
    fn json_body_accepts_numbers_or_strings() {
        let form: ExportForm = serde_json::from_str(
            r#"{"stream":"<svg/>","meta_width":400,"meta_height":"300","meta_bgAlpha":0.5,
                "meta_DOMId":"c1","parameters":"exportformat=png"}"#,
        )
        .unwrap();
        assert_eq!(form.meta_width.as_deref(), Some("400"));
        assert_eq!(form.meta_height.as_deref(), Some("300"));
        assert_eq!(form.meta_bg_alpha.as_deref(), Some("0.5"));

        let req = normalize(form).unwrap();
        assert_eq!((req.width, req.height), (400, 300));
        assert_eq!(req.background_alpha, Some(0.5));
    }

    #[test]
    fn json_null_and_missing_numbers_are_none() {
        let form: ExportForm = serde_json::from_str(r#"{"meta_width":null}"#).unwrap();
        assert_eq!(form.meta_width, None);
        assert_eq!(form.meta_height, None);
        assert!(matches!(
            normalize(ExportForm { parameters: Some("exportformat=png".into()), ..form }),
            Err(ExportError::InvalidDimensions { field: "meta_width", .. })
        ));
    }
}
