//! Core domain model for the portal service metadata report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "svcmeta-core";

/// One portal catalog entry as handed over by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub owner: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license_info: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub spatial_reference: Option<String>,
    #[serde(default)]
    pub content_status: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Named metadata fields recovered from a description blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    LayerFileLocation,
    ProjectFileLocation,
    DataSource,
    DataLastEdited,
    Description,
    DataNumber,
    Contacts,
    ResponsibleWorkPackage,
    DataClass,
    ApprovalNote,
    TermsOfUse,
    Revision,
    SelfReportedCrs,
}

impl FieldName {
    pub const ALL: [FieldName; 13] = [
        FieldName::LayerFileLocation,
        FieldName::ProjectFileLocation,
        FieldName::DataSource,
        FieldName::DataLastEdited,
        FieldName::Description,
        FieldName::DataNumber,
        FieldName::Contacts,
        FieldName::ResponsibleWorkPackage,
        FieldName::DataClass,
        FieldName::ApprovalNote,
        FieldName::TermsOfUse,
        FieldName::Revision,
        FieldName::SelfReportedCrs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::LayerFileLocation => "layer_file_location",
            FieldName::ProjectFileLocation => "project_file_location",
            FieldName::DataSource => "data_source",
            FieldName::DataLastEdited => "data_last_edited",
            FieldName::Description => "description",
            FieldName::DataNumber => "data_number",
            FieldName::Contacts => "contacts",
            FieldName::ResponsibleWorkPackage => "responsible_work_package",
            FieldName::DataClass => "data_class",
            FieldName::ApprovalNote => "approval_note",
            FieldName::TermsOfUse => "terms_of_use",
            FieldName::Revision => "revision",
            FieldName::SelfReportedCrs => "self_reported_crs",
        }
    }
}

/// Result of parsing one description.
///
/// `None` means the field's start marker was not found; `Some("")` means the
/// marker was found but nothing sat between it and the end marker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedFields {
    pub layer_file_location: Option<String>,
    pub project_file_location: Option<String>,
    pub data_source: Option<String>,
    pub data_last_edited: Option<String>,
    pub description: Option<String>,
    pub data_number: Option<String>,
    pub contacts: Option<String>,
    pub responsible_work_package: Option<String>,
    pub data_class: Option<String>,
    pub approval_note: Option<String>,
    pub terms_of_use: Option<String>,
    pub revision: Option<String>,
    pub self_reported_crs: Option<String>,
}

impl ParsedFields {
    pub fn get(&self, field: FieldName) -> Option<&str> {
        self.slot(field).as_deref()
    }

    pub fn set(&mut self, field: FieldName, value: Option<String>) {
        *self.slot_mut(field) = value;
    }

    fn slot(&self, field: FieldName) -> &Option<String> {
        match field {
            FieldName::LayerFileLocation => &self.layer_file_location,
            FieldName::ProjectFileLocation => &self.project_file_location,
            FieldName::DataSource => &self.data_source,
            FieldName::DataLastEdited => &self.data_last_edited,
            FieldName::Description => &self.description,
            FieldName::DataNumber => &self.data_number,
            FieldName::Contacts => &self.contacts,
            FieldName::ResponsibleWorkPackage => &self.responsible_work_package,
            FieldName::DataClass => &self.data_class,
            FieldName::ApprovalNote => &self.approval_note,
            FieldName::TermsOfUse => &self.terms_of_use,
            FieldName::Revision => &self.revision,
            FieldName::SelfReportedCrs => &self.self_reported_crs,
        }
    }

    fn slot_mut(&mut self, field: FieldName) -> &mut Option<String> {
        match field {
            FieldName::LayerFileLocation => &mut self.layer_file_location,
            FieldName::ProjectFileLocation => &mut self.project_file_location,
            FieldName::DataSource => &mut self.data_source,
            FieldName::DataLastEdited => &mut self.data_last_edited,
            FieldName::Description => &mut self.description,
            FieldName::DataNumber => &mut self.data_number,
            FieldName::Contacts => &mut self.contacts,
            FieldName::ResponsibleWorkPackage => &mut self.responsible_work_package,
            FieldName::DataClass => &mut self.data_class,
            FieldName::ApprovalNote => &mut self.approval_note,
            FieldName::TermsOfUse => &mut self.terms_of_use,
            FieldName::Revision => &mut self.revision,
            FieldName::SelfReportedCrs => &mut self.self_reported_crs,
        }
    }
}

/// Report column headers, in output order.
pub const OUTPUT_COLUMNS: [&str; 29] = [
    "Service ID",
    "Title",
    "Type",
    "Group",
    "Downloadable",
    "Date Created",
    "Date Last Modified",
    "Date Data Was Lasted Edited",
    "Revision",
    "Data Number",
    "Class (1-4)",
    "Source",
    "Contact(s)",
    "Responsible WP",
    "Portal Owner",
    "Data approved by WPM",
    "Summary",
    "Description",
    "APRX Uploaded From",
    "APRX Location",
    "Layer File Location",
    "CRS Service",
    "CRS Self Reported",
    "Terms of Use",
    "Tags",
    "Categories",
    "Status",
    "URL",
    "Raw Description",
];

pub const COL_SERVICE_ID: &str = "Service ID";
pub const COL_TITLE: &str = "Title";
pub const COL_LAST_EDITED: &str = "Date Data Was Lasted Edited";
pub const COL_DATA_NUMBER: &str = "Data Number";
pub const COL_URL: &str = "URL";

/// Columns kept in the snapshot projection used for run-to-run comparison.
pub const SNAPSHOT_COLUMNS: [&str; 5] = [
    COL_SERVICE_ID,
    COL_TITLE,
    COL_LAST_EDITED,
    COL_DATA_NUMBER,
    COL_URL,
];

/// One row of the metadata report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub service_id: String,
    pub title: String,
    pub item_type: String,
    pub group: String,
    pub downloadable: bool,
    pub date_created: String,
    pub date_last_modified: String,
    pub data_last_edited: Option<String>,
    pub revision: Option<String>,
    pub data_number: Option<String>,
    pub data_class: Option<String>,
    pub source: Option<String>,
    pub contacts: Option<String>,
    pub responsible_wp: Option<String>,
    pub portal_owner: String,
    pub approval: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub document_title: Option<String>,
    pub aprx_location: Option<String>,
    pub layer_file_location: Option<String>,
    pub crs_service: Option<String>,
    pub crs_self_reported: Option<String>,
    pub terms_of_use: Option<String>,
    pub tags: String,
    pub categories: String,
    pub status: Option<String>,
    pub url: String,
    pub raw_description: Option<String>,
}

impl OutputRecord {
    /// Copy every parsed description field into its report column.
    pub fn fill_parsed(&mut self, parsed: &ParsedFields) {
        self.data_last_edited = parsed.data_last_edited.clone();
        self.revision = parsed.revision.clone();
        self.data_number = parsed.data_number.clone();
        self.data_class = parsed.data_class.clone();
        self.source = parsed.data_source.clone();
        self.contacts = parsed.contacts.clone();
        self.responsible_wp = parsed.responsible_work_package.clone();
        self.approval = parsed.approval_note.clone();
        self.description = parsed.description.clone();
        self.aprx_location = parsed.project_file_location.clone();
        self.layer_file_location = parsed.layer_file_location.clone();
        self.crs_self_reported = parsed.self_reported_crs.clone();
        self.terms_of_use = parsed.terms_of_use.clone();
    }

    /// Whether every column fed by the description parser is blank.
    pub fn parsed_columns_blank(&self) -> bool {
        [
            &self.data_last_edited,
            &self.revision,
            &self.data_number,
            &self.data_class,
            &self.source,
            &self.contacts,
            &self.responsible_wp,
            &self.approval,
            &self.description,
            &self.aprx_location,
            &self.layer_file_location,
            &self.crs_self_reported,
            &self.terms_of_use,
        ]
        .iter()
        .all(|v| v.is_none())
    }

    /// Cell values in [`OUTPUT_COLUMNS`] order.
    pub fn cells(&self) -> Vec<Option<String>> {
        let yes_no = if self.downloadable { "Yes" } else { "No" };
        vec![
            Some(self.service_id.clone()),
            Some(self.title.clone()),
            Some(self.item_type.clone()),
            Some(self.group.clone()),
            Some(yes_no.to_string()),
            Some(self.date_created.clone()),
            Some(self.date_last_modified.clone()),
            self.data_last_edited.clone(),
            self.revision.clone(),
            self.data_number.clone(),
            self.data_class.clone(),
            self.source.clone(),
            self.contacts.clone(),
            self.responsible_wp.clone(),
            Some(self.portal_owner.clone()),
            self.approval.clone(),
            self.summary.clone(),
            self.description.clone(),
            self.document_title.clone(),
            self.aprx_location.clone(),
            self.layer_file_location.clone(),
            self.crs_service.clone(),
            self.crs_self_reported.clone(),
            self.terms_of_use.clone(),
            Some(self.tags.clone()),
            Some(self.categories.clone()),
            self.status.clone(),
            Some(self.url.clone()),
            self.raw_description.clone(),
        ]
    }
}

/// Blank cells read back from a spreadsheet are indistinguishable from empty
/// strings, so both collapse to `None`. Only applies to spreadsheet input.
pub fn normalize_cell(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// The five-column projection of a report row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub service_id: String,
    pub title: Option<String>,
    pub last_edited: Option<String>,
    pub data_number: Option<String>,
    pub url: Option<String>,
}

impl SnapshotRow {
    pub fn from_record(record: &OutputRecord) -> Self {
        Self {
            service_id: record.service_id.clone(),
            title: Some(record.title.clone()),
            last_edited: record.data_last_edited.clone(),
            data_number: record.data_number.clone(),
            url: Some(record.url.clone()),
        }
    }

    /// Cell values in [`SNAPSHOT_COLUMNS`] order.
    pub fn cells(&self) -> Vec<Option<String>> {
        vec![
            Some(self.service_id.clone()),
            self.title.clone(),
            self.last_edited.clone(),
            self.data_number.clone(),
            self.url.clone(),
        ]
    }
}

/// One persisted run, reduced to the comparison projection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub rows: Vec<SnapshotRow>,
}

impl Snapshot {
    pub fn from_records(name: impl Into<String>, records: &[OutputRecord]) -> Self {
        Self {
            name: name.into(),
            rows: records.iter().map(SnapshotRow::from_record).collect(),
        }
    }
}

/// Outcome of comparing two snapshots keyed by service id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffResult {
    pub new: Vec<SnapshotRow>,
    pub removed: Vec<SnapshotRow>,
    /// Current-side rows whose title, last-edited date or data number moved.
    pub changed: Vec<SnapshotRow>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// A named table of optional string cells.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Sheet {
    pub fn from_records(name: impl Into<String>, records: &[OutputRecord]) -> Self {
        Self {
            name: name.into(),
            columns: OUTPUT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: records.iter().map(OutputRecord::cells).collect(),
        }
    }

    pub fn from_snapshot_rows(name: impl Into<String>, rows: &[SnapshotRow]) -> Self {
        Self {
            name: name.into(),
            columns: SNAPSHOT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: rows.iter().map(SnapshotRow::cells).collect(),
        }
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.trim() == column)
    }
}

/// An ordered collection of sheets persisted as one file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Add a sheet, replacing any existing sheet with the same name in place.
    pub fn push_sheet(&mut self, sheet: Sheet) {
        match self.sheets.iter_mut().find(|s| s.name == sheet.name) {
            Some(existing) => *existing = sheet,
            None => self.sheets.push(sheet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> OutputRecord {
        OutputRecord {
            service_id: "abc123".into(),
            title: "Cable Routes".into(),
            item_type: "Feature Service".into(),
            group: "Morgan and Mona".into(),
            downloadable: false,
            date_created: "2024-01-01".into(),
            date_last_modified: "2024-02-01".into(),
            data_last_edited: Some("2024-01-15".into()),
            revision: None,
            data_number: Some(String::new()),
            data_class: None,
            source: None,
            contacts: None,
            responsible_wp: None,
            portal_owner: "jdoe - Jane Doe".into(),
            approval: None,
            summary: None,
            description: None,
            document_title: Some("None".into()),
            aprx_location: None,
            layer_file_location: None,
            crs_service: None,
            crs_self_reported: None,
            terms_of_use: None,
            tags: "cables,routes".into(),
            categories: String::new(),
            status: None,
            url: "https://portal.example/home/item.html?id=abc123".into(),
            raw_description: None,
        }
    }

    #[test]
    fn cells_follow_column_order() {
        let record = sample_record();
        let cells = record.cells();
        assert_eq!(cells.len(), OUTPUT_COLUMNS.len());
        assert_eq!(cells[0].as_deref(), Some("abc123"));
        assert_eq!(cells[4].as_deref(), Some("No"));
        assert_eq!(cells[14].as_deref(), Some("jdoe - Jane Doe"));
        assert_eq!(cells[18].as_deref(), Some("None"));
        assert_eq!(cells[27].as_deref(), Some(record.url.as_str()));
    }

    #[test]
    fn snapshot_projection_keeps_empty_distinct_from_absent() {
        let mut record = sample_record();
        let row = SnapshotRow::from_record(&record);
        assert_eq!(row.title.as_deref(), Some("Cable Routes"));
        assert_eq!(row.last_edited.as_deref(), Some("2024-01-15"));
        assert_eq!(row.data_number.as_deref(), Some(""));

        record.data_number = None;
        assert_eq!(SnapshotRow::from_record(&record).data_number, None);
    }

    #[test]
    fn normalize_cell_drops_blank_spreadsheet_cells() {
        assert_eq!(normalize_cell(Some(String::new())), None);
        assert_eq!(normalize_cell(Some("x".into())).as_deref(), Some("x"));
        assert_eq!(normalize_cell(None), None);
    }

    #[test]
    fn parsed_fields_get_and_set_by_name() {
        let mut parsed = ParsedFields::default();
        for field in FieldName::ALL {
            assert_eq!(parsed.get(field), None);
        }
        parsed.set(FieldName::DataNumber, Some("5".into()));
        assert_eq!(parsed.data_number.as_deref(), Some("5"));
        assert_eq!(parsed.get(FieldName::DataNumber), Some("5"));
    }

    #[test]
    fn fill_parsed_maps_fields_to_columns() {
        let mut record = sample_record();
        record.data_last_edited = None;
        record.data_number = None;
        assert!(record.parsed_columns_blank());

        let mut parsed = ParsedFields::default();
        parsed.set(FieldName::ProjectFileLocation, Some(r"\\share\map.aprx".into()));
        parsed.set(FieldName::DataSource, Some("Survey".into()));
        record.fill_parsed(&parsed);
        assert_eq!(record.aprx_location.as_deref(), Some(r"\\share\map.aprx"));
        assert_eq!(record.source.as_deref(), Some("Survey"));
        assert!(!record.parsed_columns_blank());
    }

    #[test]
    fn raw_item_reads_portal_json() {
        let json = r#"{
            "id": "abc123",
            "title": "Cable Routes",
            "type": "Feature Service",
            "owner": "jdoe",
            "created": 1704067200000,
            "modified": 1706745600000,
            "tags": ["cables"],
            "categories": ["/Categories/Assets/Cables"],
            "spatialReference": "27700",
            "contentStatus": "authoritative"
        }"#;
        let item: RawItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.item_type, "Feature Service");
        assert_eq!(item.created.format("%Y-%m-%d").to_string(), "2024-01-01");
        assert_eq!(item.description, None);
        assert_eq!(item.spatial_reference.as_deref(), Some("27700"));
    }

    #[test]
    fn workbook_push_replaces_same_name() {
        let mut wb = Workbook::default();
        wb.push_sheet(Sheet::from_records("Services", &[sample_record()]));
        wb.push_sheet(Sheet::from_records("Services", &[]));
        assert_eq!(wb.sheet_names(), vec!["Services"]);
        assert!(wb.sheet("Services").unwrap().rows.is_empty());
    }
}
