//! Description scrubbing, section extraction and field parsing.
//!
//! Portal descriptions are authored in a rich-text editor and arrive as loosely
//! formatted HTML. Nothing here is an HTML parser: a denylist of literal
//! fragments is removed, a handful of structural tags are converted, and the
//! remaining text is cut into fields by label markers such as `Data Number:`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use svcmeta_core::{FieldName, ParsedFields};
use thiserror::Error;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

pub const CRATE_NAME: &str = "svcmeta-extract";

/// Start marker that authors sometimes leave out; text before the end marker
/// is then taken as the description.
pub const DESCRIPTION_MARKER: &str = "Description:";

/// Width of the run of spaces the portal editor leaves as indentation.
const INDENT_ARTIFACT_WIDTH: usize = 28;

/// Markup fragments known to appear in authored descriptions.
const DEFAULT_FRAGMENTS: &[&str] = &[
    "<span style='font-weight:bold;'>",
    "<SPAN STYLE=\"font-weight:bold;\">",
    "<span style='font-family:inherit;'>",
    "<span style='font-family:inherit; font-weight:bold;'>",
    "<span style='font-size:16px;'>",
    "<span style='font-family:inherit; font-size:16px;'>",
    "<span style='font-size:14.6667px;'>",
    "<span style='font-size:14px;'>",
    "<span style='background-color:rgb(232, 235, 250); color:rgb(36, 36, 36);'>",
    "<span style='font-size:11.0pt; font-family:&quot;Calibri&quot;,sans-serif;'>",
    "<span style='font-size:11.0pt; font-family:Calibri,sans-serif;'>",
    "<span style='font-weight:bold; font-family:Avenir Next, Avenir, Helvetica Neue, Helvetica, Arial, sans-serif; font-size:15px;'> <span style='font-weight:bold; font-family:Avenir Next, Avenir, Helvetica Neue, Helvetica, Arial, sans-serif; font-size:15px;'>",
    "<span style='font-weight:bold; font-family:Avenir Next, Avenir, Helvetica Neue, Helvetica, Arial, sans-serif; font-size:15px;'>",
    "<span style='font-size:11pt; font-family:Calibri, sans-serif;'>",
    "<span style='font-family:Calibri, sans-serif; font-size:14.6667px;'>",
    "<span style='font-family:Calibri, sans-serif; font-size:11pt;'>",
    "<font face='inherit'>",
    "<font size='3'>",
    "<font face='Arial, sans-serif'>",
    "<font color='#242424' face='-apple-system, BlinkMacSystemFont, Segoe UI, system-ui, Apple Color Emoji, Segoe UI Emoji, Segoe UI Web, sans-serif'>",
    "<font face='-apple-system, BlinkMacSystemFont, Segoe UI, system-ui, Apple Color Emoji, Segoe UI Emoji, Segoe UI Web, sans-serif'><span style='font-size:14px;'>",
    "<font style='font-family:inherit; font-size:16px;'>",
    "<font face='-apple-system, BlinkMacSystemFont, Segoe UI, system-ui, Apple Color Emoji, Segoe UI Emoji, Segoe UI Web, sans-serif'>",
    "<span style='font-family:inherit; font-weight:bold; font-size:16px;'>",
    "<span style='font-family:&quot;Avenir Next W01&quot;, &quot;Avenir Next W00&quot;, &quot;Avenir Next&quot;, Avenir, &quot;Helvetica Neue&quot;, sans-serif; font-size:16px;'>",
    "<span style='color:rgb(36, 36, 36); font-family:-apple-system, BlinkMacSystemFont, &quot;Segoe UI&quot;, system-ui, &quot;Apple Color Emoji&quot;, &quot;Segoe UI Emoji&quot;, &quot;Segoe UI Web&quot;, sans-serif; font-size:14px; background-color:rgb(232, 235, 250);'>",
    "<span style='background-color:rgb(232, 235, 250); color:rgb(36, 36, 36); font-family:-apple-system, BlinkMacSystemFont, &quot;Segoe UI&quot;, system-ui, &quot;Apple Color Emoji&quot;, &quot;Segoe UI Emoji&quot;, &quot;Segoe UI Web&quot;, sans-serif; font-size:14px;'>",
    "<span style='font-family:-apple-system, BlinkMacSystemFont, &quot;Segoe UI&quot;, system-ui, &quot;Apple Color Emoji&quot;, &quot;Segoe UI Emoji&quot;, &quot;Segoe UI Web&quot;, sans-serif; color:rgb(36, 36, 36); font-size:14px; background-color:rgb(232, 235, 250);'>",
    "<span style='color:rgba(0, 0, 0, 0.9); font-family:&quot;Segoe UI VSS (Regular)&quot;, &quot;Segoe UI&quot;, -apple-system, BlinkMacSystemFont, Roboto, &quot;Helvetica Neue&quot;, Helvetica, Ubuntu, Arial, sans-serif, &quot;Apple Color Emoji&quot;, &quot;Segoe UI Emoji&quot;, &quot;Segoe UI Symbol&quot;; font-size:14px;'>",
    "<span style='color:rgb(36, 36, 36); font-family:-apple-system, BlinkMacSystemFont, &quot;Segoe UI&quot;, system-ui, &quot;Apple Color Emoji&quot;, &quot;Segoe UI Emoji&quot;, &quot;Segoe UI Web&quot;, sans-serif; font-size:14px;'>",
    "<span style='font-family:-apple-system, BlinkMacSystemFont, Segoe UI, system-ui, Apple Color Emoji, Segoe UI Emoji, Segoe UI Web, sans-serif; font-size:14px;'>",
    "<span style='font-size:medium; font-family:inherit;'>",
    "<p style='margin-top:0px; margin-bottom:1.5rem;'>",
    "<p style='margin-top:0px; margin-bottom:1.5rem; font-family:&quot;Avenir Next W01&quot;, &quot;Avenir Next W00&quot;, &quot;Avenir Next&quot;, Avenir, &quot;Helvetica Neue&quot;, sans-serif; font-size:16px;'>",
    "<p style='margin:0 0 0 0;'>",
    "<p style='font-family:inherit; font-size:16px; margin-top:0px; margin-bottom:1.5rem;'>",
    "<p style='margin-top:0px; margin-bottom:0px;'>",
    "<p style='margin-top:0px; margin-bottom:0px;'><font face='-apple-system, BlinkMacSystemFont, Segoe UI, system-ui, Apple Color Emoji, Segoe UI Emoji, Segoe UI Web, sans-serif'><span style='font-size:14px;'>",
    "<p style='font-family:Avenir Next, Avenir, Helvetica Neue, Helvetica, Arial, sans-serif; font-size:15px;'>",
    "<font face='Avenir Next W01, Avenir Next W00, Avenir Next, Avenir, Helvetica Neue, sans-serif'>",
    "<font face='Avenir Next W01, Avenir Next W00, Avenir Next, Avenir, Helvetica Neue, sans-serif'><span style='font-size:16px;'>",
    "<font style='font-family:inherit;'>",
    "<font face='Avenir Next W01, Avenir Next W00, Avenir Next, Avenir, Helvetica Neue, sans-serif' style='font-family:&quot;Avenir Next W01&quot;, &quot;Avenir Next W00&quot;, &quot;Avenir Next&quot;, Avenir, &quot;Helvetica Neue&quot;, sans-serif; font-size:16px;'>",
    "<font color='rgba(0, 0, 0, 0.9)' face='Segoe UI VSS (Regular), Segoe UI, -apple-system, BlinkMacSystemFont, Roboto, Helvetica Neue, Helvetica, Ubuntu, Arial, sans-serif, Apple Color Emoji, Segoe UI Emoji, Segoe UI Symbol'><span style='font-size:14px;'>",
    "<div style='max-width:100%; display:inherit;'>",
    "<div style='font-family:inherit;'>",
    "<div style='margin-bottom:3rem;'>",
    "<div style='text-align:Left;'>",
    "<div style='font-family:&quot;Avenir Next W01&quot;, &quot;Avenir Next W00&quot;, &quot;Avenir Next&quot;, Avenir, &quot;Helvetica Neue&quot;, sans-serif; font-size:16px;'>",
    "<div style='font-family:&quot;Avenir Next W01&quot;, &quot;Avenir Next W00&quot;, &quot;Avenir Next&quot;, Avenir, &quot;Helvetica Neue&quot;, sans-serif; font-size:16px; max-width:100%; display:inherit;'>",
    "<div style='box-sizing:border-box; font-family:-apple-system, BlinkMacSystemFont, &quot;Segoe UI&quot;, system-ui, &quot;Apple Color Emoji&quot;, &quot;Segoe UI Emoji&quot;, &quot;Segoe UI Web&quot;, sans-serif; font-size:14px;'>",
    "<div style='font-family:inherit; font-size:16px;'>",
    "<div style='font-family:Avenir Next, Avenir, Helvetica Neue, Helvetica, Arial, sans-serif; font-size:15px;'>",
    "<div style='font-family:Avenir Next W01, Avenir Next W00, Avenir Next, Avenir, Helvetica Neue, sans-serif;'><div style='font-size:16px; font-family:inherit;'>",
    "<div style='font-size:16px; font-family:inherit;'>",
    "<div style='font-family:Avenir Next W01, Avenir Next W00, Avenir Next, Avenir, Helvetica Neue, sans-serif;'>",
    "</li><li><span style='font-size:medium; font-family:Segoe UI, Arial, sans-serif;'>",
    "</li><li><span style='font-family:Segoe UI, Arial, sans-serif;'>",
    "</span>",
    "<span>",
    "<span />",
    "<span >",
    "<font>",
    "</font>",
    "amp;",
    "<a href=",
    "rel='nofollow ugc' style='font-family:inherit;' target='_blank'>",
    "rel='nofollow ugc' style='font-family:Avenir Next, Avenir, Helvetica Neue, Helvetica, Arial, sans-serif; font-size:15px;' target='_blank'>",
    "rel='nofollow ugc' target='_blank'>",
    "<a>",
    "</a>",
    "<p>",
    "</p>",
    "<ul>",
    "</ul>",
    "</li>",
    "&lt;/h4&gt;",
    "<a target='_blank'>",
    "&quot;",
    "&lt;o:p&gt;&lt;/o:p&gt;",
    "&lt;",
    "&gt;",
];

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("invalid rules yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown field `{0}` in marker rules")]
    UnknownField(String),
    #[error("empty start marker for field `{0}`")]
    EmptyStartMarker(String),
}

/// One literal rewrite applied during scrubbing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubRule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

impl ScrubRule {
    pub fn remove(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RulesMode {
    #[default]
    Append,
    Replace,
}

#[derive(Debug, Clone, Deserialize)]
struct ScrubRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    mode: RulesMode,
    #[serde(default)]
    rules: Vec<ScrubRule>,
}

/// Ordered denylist of markup fragments.
///
/// Each rule matches its pattern as written and in upper case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scrubber {
    rules: Vec<ScrubRule>,
}

impl Default for Scrubber {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENTS.iter().map(|f| ScrubRule::remove(*f)).collect())
    }
}

impl Scrubber {
    pub fn new(rules: Vec<ScrubRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ScrubRule] {
        &self.rules
    }

    /// Build from a rules document. `mode: append` extends the built-in
    /// denylist, `mode: replace` discards it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RulesError> {
        let file: ScrubRulesFile = serde_yaml::from_str(yaml)?;
        let mut scrubber = match file.mode {
            RulesMode::Append => Self::default(),
            RulesMode::Replace => Self::new(Vec::new()),
        };
        scrubber.rules.extend(file.rules);
        Ok(scrubber)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let scrubber =
            Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        debug!(rules = scrubber.rules.len(), path = %path.display(), "loaded scrub rules");
        Ok(scrubber)
    }

    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in &self.rules {
            if rule.pattern.is_empty() {
                continue;
            }
            if out.contains(rule.pattern.as_str()) {
                out = out.replace(rule.pattern.as_str(), &rule.replacement);
            }
            let upper = rule.pattern.to_uppercase();
            if upper != rule.pattern && out.contains(upper.as_str()) {
                out = out.replace(upper.as_str(), &rule.replacement);
            }
        }
        out
    }

    pub fn scrub_opt(&self, text: Option<&str>) -> Option<String> {
        text.map(|t| self.scrub(t))
    }
}

fn trimmed_non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

/// Turn bold-close and self-closed breaks into newlines; drop bold-open and
/// plain breaks.
pub fn convert_breaks(text: Option<&str>) -> Option<String> {
    trimmed_non_empty(text).map(|t| {
        t.replace("</b>", "\n")
            .replace("<br />", "\n")
            .replace("<b>", "")
            .replace("<br>", "")
    })
}

pub fn convert_divs(text: Option<&str>) -> Option<String> {
    trimmed_non_empty(text).map(|t| t.replace("<div>", "").replace("</div>", ""))
}

pub fn convert_paragraphs(text: Option<&str>) -> Option<String> {
    trimmed_non_empty(text).map(|t| t.replace("<p>", "").replace("</p>", ""))
}

/// Break, div and paragraph conversion in that order.
pub fn normalize_description(raw: Option<&str>) -> Option<String> {
    let text = convert_breaks(raw);
    let text = convert_divs(text.as_deref());
    convert_paragraphs(text.as_deref())
}

/// Normalize one extracted segment to NFKC.
///
/// The editor emits non-breaking spaces and typographic ligatures, and those
/// must fold to plain text (compatibility decomposition). Recomposition keeps
/// accented letters as single code points, so values compare equal run to
/// run whichever form the author pasted. NFC would keep the non-breaking
/// spaces and NFKD would leave accents split.
fn clean_segment(segment: &str) -> String {
    let indent = " ".repeat(INDENT_ARTIFACT_WIDTH);
    segment
        .replace(&indent, "")
        .nfkc()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Find the text between `start` and `end` in a description.
///
/// Returns `None` when the field does not apply (start marker missing and an
/// end marker given) and `Some("")` when the marker is present but the
/// section is empty or unterminated.
pub fn extract_section(
    scrubber: &Scrubber,
    text: Option<&str>,
    start: &str,
    end: Option<&str>,
) -> Option<String> {
    let text = scrubber.scrub(text?);
    if start.is_empty() {
        return Some(String::new());
    }

    let segment = match end {
        None => match text.split_once(start) {
            Some((_, after)) => after.split_once(start).map_or(after, |(seg, _)| seg),
            None => "",
        },
        Some(end) => match text.split_once(start) {
            Some((_, after)) => after.split_once(end).map_or("", |(seg, _)| seg),
            None if start == DESCRIPTION_MARKER => {
                text.split_once(end).map_or(text.as_str(), |(seg, _)| seg)
            }
            None => return None,
        },
    };

    Some(clean_segment(segment))
}

/// Start and optional end label delimiting one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerPair {
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
}

impl MarkerPair {
    fn new(start: &str, end: Option<&str>) -> Self {
        Self {
            start: start.to_string(),
            end: end.map(str::to_string),
        }
    }
}

const DEFAULT_MARKERS: [(FieldName, &str, Option<&str>); 13] = [
    (FieldName::LayerFileLocation, "Layer File Location:", Some("CRS:")),
    (FieldName::ProjectFileLocation, "APRX Location:", Some("Layer File Location:")),
    (FieldName::DataSource, "Source:", Some("Data Class:")),
    (FieldName::DataLastEdited, "Data Last Edited:", Some("Data Number:")),
    (FieldName::Description, DESCRIPTION_MARKER, Some("Source:")),
    (FieldName::DataNumber, "Data Number:", Some("APRX Location:")),
    (FieldName::Contacts, "Contact:", Some("Portal Owner:")),
    (FieldName::ResponsibleWorkPackage, "Responsible Work Package:", Some("Contact:")),
    (FieldName::DataClass, "Data Class:", Some("Revision:")),
    (
        FieldName::ApprovalNote,
        "Data approved by Work Package Manager:",
        Some("Terms of Use:"),
    ),
    (FieldName::TermsOfUse, "Terms of Use:", None),
    (FieldName::Revision, "Revision:", Some("Data Last Edited:")),
    (FieldName::SelfReportedCrs, "CRS:", Some("Responsible Work Package:")),
];

#[derive(Debug, Clone, Deserialize)]
struct MarkerRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    markers: BTreeMap<String, MarkerPair>,
}

/// Field name to marker pair lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerTable {
    entries: BTreeMap<FieldName, MarkerPair>,
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_MARKERS
                .iter()
                .map(|(field, start, end)| (*field, MarkerPair::new(start, *end)))
                .collect(),
        }
    }
}

impl MarkerTable {
    pub fn get(&self, field: FieldName) -> Option<&MarkerPair> {
        self.entries.get(&field)
    }

    pub fn set(&mut self, field: FieldName, pair: MarkerPair) {
        self.entries.insert(field, pair);
    }

    /// Defaults with the fields named in the document overridden.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RulesError> {
        let file: MarkerRulesFile = serde_yaml::from_str(yaml)?;
        let mut table = Self::default();
        for (name, pair) in file.markers {
            let field = FieldName::ALL
                .into_iter()
                .find(|f| f.as_str() == name)
                .ok_or_else(|| RulesError::UnknownField(name.clone()))?;
            if pair.start.is_empty() {
                return Err(RulesError::EmptyStartMarker(name));
            }
            table.set(field, pair);
        }
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Recovers every named field from one description.
#[derive(Debug, Clone, Default)]
pub struct FieldParser {
    scrubber: Scrubber,
    markers: MarkerTable,
}

impl FieldParser {
    pub fn new(scrubber: Scrubber, markers: MarkerTable) -> Self {
        Self { scrubber, markers }
    }

    pub fn scrubber(&self) -> &Scrubber {
        &self.scrubber
    }

    pub fn extract(&self, text: Option<&str>, start: &str, end: Option<&str>) -> Option<String> {
        extract_section(&self.scrubber, text, start, end)
    }

    /// `description` is expected to have been through [`normalize_description`].
    pub fn parse(&self, description: Option<&str>) -> ParsedFields {
        let mut parsed = ParsedFields::default();
        for field in FieldName::ALL {
            let value = self
                .markers
                .get(field)
                .and_then(|pair| self.extract(description, &pair.start, pair.end.as_deref()));
            parsed.set(field, value);
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_DESCRIPTION: &str = r"Description: Cable route centrelines.
Source: Survey 2023
Data Class: 2
Revision: B
Data Last Edited: 2024-01-15
Data Number: MM-0042
APRX Location: \\share\project.aprx
Layer File Location: \\share\cables.lyrx
CRS: EPSG:27700
Responsible Work Package: WP3
Contact: Jane Doe
Portal Owner: jdoe
Data approved by Work Package Manager: Yes
Terms of Use: Internal only.";

    fn extract(text: Option<&str>, start: &str, end: Option<&str>) -> Option<String> {
        extract_section(&Scrubber::default(), text, start, end)
    }

    #[test]
    fn scrub_removes_fragments_in_either_case() {
        let scrubber = Scrubber::default();
        let text = "<span style='font-size:14px;'>Data</span> <SPAN>Number</SPAN>&quot;";
        assert_eq!(scrubber.scrub(text), "Data Number");
    }

    #[test]
    fn scrub_leaves_structural_and_unknown_markup() {
        let scrubber = Scrubber::default();
        let text = "<b>Title</b><br /><div>x</div><em>kept</em>";
        assert_eq!(scrubber.scrub(text), text);
    }

    #[test]
    fn scrub_is_idempotent_over_denylist() {
        let scrubber = Scrubber::default();
        for rule in scrubber.rules() {
            let text = format!("a{}b {} c", rule.pattern, rule.pattern.to_uppercase());
            let once = scrubber.scrub(&text);
            assert_eq!(scrubber.scrub(&once), once, "pattern {}", rule.pattern);
        }
        let nested = "<p style='margin:0 0 0 0;'><span>Revision:</span> &amp;lt;B&amp;gt;</p>";
        let once = scrubber.scrub(nested);
        assert_eq!(once, "Revision: B");
        assert_eq!(scrubber.scrub(&once), once);
    }

    #[test]
    fn scrub_of_absent_text_is_absent() {
        assert_eq!(Scrubber::default().scrub_opt(None), None);
        assert_eq!(Scrubber::default().scrub_opt(Some("")), Some(String::new()));
    }

    #[test]
    fn scrub_rules_yaml_appends_or_replaces() {
        let appended = Scrubber::from_yaml_str(
            "version: 1\nrules:\n  - pattern: \"<em>\"\n  - pattern: \"</em>\"\n    replacement: \" \"\n",
        )
        .unwrap();
        assert_eq!(appended.rules().len(), Scrubber::default().rules().len() + 2);
        assert_eq!(appended.scrub("<em>a</em>b<span>"), "a b");

        let replaced = Scrubber::from_yaml_str(
            "version: 1\nmode: replace\nrules:\n  - pattern: \"<em>\"\n",
        )
        .unwrap();
        assert_eq!(replaced.rules().len(), 1);
        assert_eq!(replaced.scrub("<EM>a<span>"), "a<span>");
    }

    #[test]
    fn scrub_rules_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrub.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "version: 1\nrules:\n  - pattern: \"<mark>\"").unwrap();
        let scrubber = Scrubber::from_path(&path).unwrap();
        assert_eq!(scrubber.scrub("<mark>hit"), "hit");
        assert!(Scrubber::from_path(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn converters_are_null_safe() {
        assert_eq!(convert_breaks(None), None);
        assert_eq!(convert_breaks(Some("   ")), None);
        assert_eq!(convert_divs(Some("")), None);
        assert_eq!(convert_paragraphs(None), None);
    }

    #[test]
    fn converters_rewrite_structural_tags() {
        assert_eq!(
            convert_breaks(Some("  <b>Revision:</b> B<br />next<br>end ")).as_deref(),
            Some("Revision:\n B\nnextend")
        );
        assert_eq!(convert_divs(Some("<div>a</div>")).as_deref(), Some("a"));
        assert_eq!(convert_paragraphs(Some("<p>a</p><p>b</p>")).as_deref(), Some("ab"));
        assert_eq!(
            normalize_description(Some("<div><p><b>Data Number:</b> 7</p></div>")).as_deref(),
            Some("Data Number:\n 7")
        );
    }

    #[test]
    fn extract_absent_text_is_none() {
        assert_eq!(extract(None, "A:", Some("B:")), None);
        assert_eq!(extract(None, "A:", None), None);
    }

    #[test]
    fn extract_without_end_marker() {
        assert_eq!(extract(Some("text without marker"), "X:", None).as_deref(), Some(""));
        assert_eq!(extract(Some(""), "X:", None).as_deref(), Some(""));
        assert_eq!(
            extract(Some("Terms of Use: internal\nonly"), "Terms of Use:", None).as_deref(),
            Some("internal only")
        );
    }

    #[test]
    fn extract_between_markers() {
        assert_eq!(extract(Some("A: foo B: bar"), "A:", Some("B:")).as_deref(), Some("foo"));
        assert_eq!(extract(Some("no markers here"), "A:", Some("B:")), None);
        assert_eq!(extract(Some("A: B: bar"), "A:", Some("B:")).as_deref(), Some(""));
    }

    #[test]
    fn extract_unterminated_section_is_empty() {
        assert_eq!(extract(Some("A: foo and more"), "A:", Some("B:")).as_deref(), Some(""));
    }

    #[test]
    fn extract_end_marker_must_follow_start() {
        assert_eq!(extract(Some("B: x A: foo B: bar"), "A:", Some("B:")).as_deref(), Some("foo"));
    }

    #[test]
    fn extract_description_without_label() {
        assert_eq!(
            extract(Some("free text before B: tail"), DESCRIPTION_MARKER, Some("B:")).as_deref(),
            Some("free text before")
        );
        assert_eq!(
            extract(Some("only free text"), DESCRIPTION_MARKER, Some("B:")).as_deref(),
            Some("only free text")
        );
    }

    #[test]
    fn extract_cleans_segment() {
        let indent = " ".repeat(INDENT_ARTIFACT_WIDTH);
        let text = format!("A:{indent}first\r\nsecond\u{a0}third B:");
        assert_eq!(
            extract(Some(&text), "A:", Some("B:")).as_deref(),
            Some("first  second third")
        );
        assert_eq!(
            extract(Some("A: \u{fb01}le B:"), "A:", Some("B:")).as_deref(),
            Some("file")
        );
        assert_eq!(
            extract(Some("A: Cafe\u{301} B:"), "A:", Some("B:")).as_deref(),
            Some("Caf\u{e9}")
        );
    }

    #[test]
    fn extract_scrubs_before_splitting() {
        let text = "<span style='font-weight:bold;'>Data Number:</span> 42 <span>APRX Location:</span>";
        assert_eq!(
            extract(Some(text), "Data Number:", Some("APRX Location:")).as_deref(),
            Some("42")
        );
    }

    #[test]
    fn parser_recovers_all_fields() {
        let parsed = FieldParser::default().parse(Some(FULL_DESCRIPTION));
        assert_eq!(parsed.description.as_deref(), Some("Cable route centrelines."));
        assert_eq!(parsed.data_source.as_deref(), Some("Survey 2023"));
        assert_eq!(parsed.data_class.as_deref(), Some("2"));
        assert_eq!(parsed.revision.as_deref(), Some("B"));
        assert_eq!(parsed.data_last_edited.as_deref(), Some("2024-01-15"));
        assert_eq!(parsed.data_number.as_deref(), Some("MM-0042"));
        assert_eq!(parsed.project_file_location.as_deref(), Some(r"\\share\project.aprx"));
        assert_eq!(parsed.layer_file_location.as_deref(), Some(r"\\share\cables.lyrx"));
        assert_eq!(parsed.self_reported_crs.as_deref(), Some("EPSG:27700"));
        assert_eq!(parsed.responsible_work_package.as_deref(), Some("WP3"));
        assert_eq!(parsed.contacts.as_deref(), Some("Jane Doe"));
        assert_eq!(parsed.approval_note.as_deref(), Some("Yes"));
        assert_eq!(parsed.terms_of_use.as_deref(), Some("Internal only."));
    }

    #[test]
    fn parser_handles_html_description() {
        let raw = "<p><b>Data Number:</b> MM-0042<br /><b>APRX Location:</b> x</p>";
        let normalized = normalize_description(Some(raw));
        let parsed = FieldParser::default().parse(normalized.as_deref());
        assert_eq!(parsed.data_number.as_deref(), Some("MM-0042"));
        assert_eq!(parsed.contacts, None);
        assert_eq!(parsed.terms_of_use.as_deref(), Some(""));
    }

    #[test]
    fn parser_with_no_description_leaves_every_field_absent() {
        let parsed = FieldParser::default().parse(None);
        assert_eq!(parsed, ParsedFields::default());
    }

    #[test]
    fn marker_overrides_from_yaml() {
        let table = MarkerTable::from_yaml_str(
            "version: 1\nmarkers:\n  data_number:\n    start: \"Doc No:\"\n    end: \"APRX Location:\"\n",
        )
        .unwrap();
        let parser = FieldParser::new(Scrubber::default(), table);
        let parsed = parser.parse(Some("Doc No: 9 APRX Location: y"));
        assert_eq!(parsed.data_number.as_deref(), Some("9"));
        assert_eq!(parsed.project_file_location.as_deref(), Some(""));

        let err = MarkerTable::from_yaml_str("version: 1\nmarkers:\n  bogus:\n    start: \"X:\"\n")
            .unwrap_err();
        assert!(matches!(err, RulesError::UnknownField(name) if name == "bogus"));
    }
}
