//! Report classification, snapshot comparison and the weekly run pipeline.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use svcmeta_core::{
    DiffResult, OutputRecord, ParsedFields, RawItem, Sheet, Snapshot, SnapshotRow, Workbook,
};
use svcmeta_extract::{normalize_description, FieldParser, MarkerTable, Scrubber};
use svcmeta_portal::{
    load_catalog_export, CatalogExport, CatalogSource, FeatureLayerResolver, LookupError,
    OwnerDirectory,
};
use svcmeta_storage::{
    file_week_stamp, load_snapshot, project_snapshot, sha256_hex, write_workbook, ReportArchive,
};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "svcmeta-report";

/// Written to `APRX Uploaded From` when the feature layer cannot be resolved.
pub const RESOLUTION_SENTINEL: &str = "None";

const DEFAULT_ITEM_URL_BASE: &str = "https://portal.example/portal/home/item.html?id=";

const DEFAULT_MAP_APP_TOOL_TYPES: &[&str] = &[
    "Web Map",
    "WMS",
    "Web Mapping Application",
    "Form",
    "Table Layer",
    "Data Store",
    "Dashboard",
    "Site Application",
    "Geoprocessing Service",
    "Code Attachment",
    "AppBuilder Extension",
    "Scene Package",
    "Image Service",
    "Scene Service",
    "Image",
    "Feature Collection",
    "Web Scene",
    "File Geodatabase",
    "Vector Tile Package",
    "StoryMap",
    "Network Analysis Service",
    "WMTS",
];

const DEFAULT_EXCLUDED_OWNERS: &[&str] = &[
    "CentralAdmin",
    "CentralAdmin - Central Admin",
    "esri_livingatlas",
    "esri_livingatlas - Esri",
];

const DEFAULT_EXCLUDED_ITEMS: &[(&str, &str)] = &[
    ("Ops_Dash_Master_Layers_Forecast", "wamvg6"),
    ("Ops_Dash_Master_Layers_Temperature", "wamvg6"),
    ("Ops_Dash_Master_Layers_Wave", "wamvg6"),
    ("Ops_Dash_Master_Layers_Wind", "wamvg6"),
];

pub const SHAPEFILE_TYPE: &str = "Shapefile";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedItem {
    pub title: String,
    pub owner: String,
}

/// Static decisions the classifier makes per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRules {
    pub item_url_base: Option<String>,
    pub map_app_tool_types: Vec<String>,
    pub excluded_owners: Vec<String>,
    pub excluded_items: Vec<ExcludedItem>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            item_url_base: None,
            map_app_tool_types: DEFAULT_MAP_APP_TOOL_TYPES.iter().map(|s| s.to_string()).collect(),
            excluded_owners: DEFAULT_EXCLUDED_OWNERS.iter().map(|s| s.to_string()).collect(),
            excluded_items: DEFAULT_EXCLUDED_ITEMS
                .iter()
                .map(|(title, owner)| ExcludedItem {
                    title: title.to_string(),
                    owner: owner.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ClassifyRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    item_url_base: Option<String>,
    #[serde(default)]
    map_app_tool_types: Option<Vec<String>>,
    #[serde(default)]
    excluded_owners: Option<Vec<String>>,
    #[serde(default)]
    excluded_items: Option<Vec<ExcludedItem>>,
}

impl ClassifierRules {
    /// Defaults with every list present in the document replaced.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ClassifyRulesFile = serde_yaml::from_str(yaml).context("parsing classify rules")?;
        let mut rules = Self::default();
        if file.item_url_base.is_some() {
            rules.item_url_base = file.item_url_base;
        }
        if let Some(types) = file.map_app_tool_types {
            rules.map_app_tool_types = types;
        }
        if let Some(owners) = file.excluded_owners {
            rules.excluded_owners = owners;
        }
        if let Some(items) = file.excluded_items {
            rules.excluded_items = items;
        }
        Ok(rules)
    }

    /// Fill the item URL base from the portal address unless configured.
    pub fn with_portal_url(mut self, portal_url: &str) -> Self {
        if self.item_url_base.is_none() && !portal_url.trim().is_empty() {
            self.item_url_base = Some(format!(
                "{}/home/item.html?id=",
                portal_url.trim().trim_end_matches('/')
            ));
        }
        self
    }

    pub fn item_url(&self, item_id: &str) -> String {
        let base = self.item_url_base.as_deref().unwrap_or(DEFAULT_ITEM_URL_BASE);
        format!("{base}{item_id}")
    }

    pub fn is_map_app_tool(&self, item_type: &str) -> bool {
        self.map_app_tool_types.iter().any(|t| t == item_type)
    }

    fn exclusion(&self, item: &RawItem, owner_display: &str) -> Option<ExclusionReason> {
        if let Some(owner) = self
            .excluded_owners
            .iter()
            .find(|o| **o == item.owner || **o == owner_display)
        {
            return Some(ExclusionReason::ServiceAccount(owner.clone()));
        }
        self.excluded_items
            .iter()
            .find(|e| e.title == item.title && (e.owner == item.owner || e.owner == owner_display))
            .map(|e| ExclusionReason::Manual {
                title: e.title.clone(),
                owner: e.owner.clone(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExclusionReason {
    ServiceAccount(String),
    Manual { title: String, owner: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Record(OutputRecord),
    Excluded(ExclusionReason),
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("owner lookup failed for item {item_id}: {source}")]
    OwnerLookup {
        item_id: String,
        #[source]
        source: LookupError,
    },
}

pub fn is_downloadable(title: &str, item_type: &str) -> bool {
    title.to_uppercase().contains("DOWNLOADABLE") || item_type == SHAPEFILE_TYPE
}

/// Keep only the last segment of nested category paths and join with commas.
pub fn clean_categories(categories: &[String]) -> String {
    categories
        .iter()
        .map(|cat| {
            if cat.matches('/').count() > 1 {
                cat.rsplit('/').next().unwrap_or(cat.as_str())
            } else {
                cat.as_str()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn compose_owner(owner_id: &str, full_name: &str) -> String {
    format!("{owner_id} - {full_name}")
}

pub fn format_portal_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Merges portal attributes and parsed description fields into report rows.
pub struct Classifier<'a> {
    rules: &'a ClassifierRules,
    owners: &'a dyn OwnerDirectory,
    layers: &'a dyn FeatureLayerResolver,
}

impl<'a> Classifier<'a> {
    pub fn new(
        rules: &'a ClassifierRules,
        owners: &'a dyn OwnerDirectory,
        layers: &'a dyn FeatureLayerResolver,
    ) -> Self {
        Self {
            rules,
            owners,
            layers,
        }
    }

    pub fn classify(
        &self,
        item: &RawItem,
        group: &str,
        parsed: &ParsedFields,
    ) -> Result<Classification, ClassifyError> {
        let profile = match self.owners.lookup_owner(&item.owner) {
            Ok(profile) => profile,
            Err(source) => {
                // Excluded owners are dropped even when their profile is unreadable.
                if !self.rules.is_map_app_tool(&item.item_type) {
                    if let Some(reason) = self.rules.exclusion(item, &item.owner) {
                        debug!(
                            id = %item.id,
                            owner = %item.owner,
                            error = %source,
                            "owner unreadable, item excluded"
                        );
                        return Ok(Classification::Excluded(reason));
                    }
                }
                return Err(ClassifyError::OwnerLookup {
                    item_id: item.id.clone(),
                    source,
                });
            }
        };
        let owner_display = compose_owner(&item.owner, &profile.full_name);
        let mut record = self.base_record(item, group, owner_display);

        debug!(
            id = %item.id,
            item_type = %item.item_type,
            owner = %record.portal_owner,
            url = %record.url,
            "classifying item"
        );

        if self.rules.is_map_app_tool(&item.item_type) {
            return Ok(Classification::Record(record));
        }

        if let Some(reason) = self.rules.exclusion(item, &record.portal_owner) {
            return Ok(Classification::Excluded(reason));
        }

        record.fill_parsed(parsed);
        if item.item_type == SHAPEFILE_TYPE {
            return Ok(Classification::Record(record));
        }

        record.document_title = Some(self.resolve_document_title(item));
        Ok(Classification::Record(record))
    }

    fn resolve_document_title(&self, item: &RawItem) -> String {
        match self.layers.resolve_feature_layer(item) {
            Ok(meta) => match meta.document_title {
                Some(title) => title,
                None => {
                    warn!(id = %item.id, "feature layer has no document title");
                    RESOLUTION_SENTINEL.to_string()
                }
            },
            Err(err) => {
                warn!(id = %item.id, error = %err, "feature layer resolution failed");
                RESOLUTION_SENTINEL.to_string()
            }
        }
    }

    fn base_record(&self, item: &RawItem, group: &str, owner_display: String) -> OutputRecord {
        OutputRecord {
            service_id: item.id.clone(),
            title: item.title.clone(),
            item_type: item.item_type.clone(),
            group: group.to_string(),
            downloadable: is_downloadable(&item.title, &item.item_type),
            date_created: format_portal_date(item.created),
            date_last_modified: format_portal_date(item.modified),
            data_last_edited: None,
            revision: None,
            data_number: None,
            data_class: None,
            source: None,
            contacts: None,
            responsible_wp: None,
            portal_owner: owner_display,
            approval: None,
            summary: item.snippet.clone(),
            description: None,
            document_title: None,
            aprx_location: None,
            layer_file_location: None,
            crs_service: item.spatial_reference.clone(),
            crs_self_reported: None,
            terms_of_use: None,
            tags: item.tags.join(","),
            categories: clean_categories(&item.categories),
            status: item.content_status.clone(),
            url: self.rules.item_url(&item.id),
            raw_description: normalize_description(item.description.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcludedRecord {
    pub service_id: String,
    pub title: String,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub service_id: String,
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub items_seen: usize,
    pub records: Vec<OutputRecord>,
    pub excluded: Vec<ExcludedRecord>,
    pub failed: Vec<FailedItem>,
}

/// Runs parse + classify over catalog items.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    parser: FieldParser,
    rules: ClassifierRules,
}

impl ReportBuilder {
    pub fn new(parser: FieldParser, rules: ClassifierRules) -> Self {
        Self { parser, rules }
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    pub fn process_item(
        &self,
        item: &RawItem,
        group: &str,
        owners: &dyn OwnerDirectory,
        layers: &dyn FeatureLayerResolver,
    ) -> Result<Classification, ClassifyError> {
        let description = normalize_description(item.description.as_deref());
        let parsed = self.parser.parse(description.as_deref());
        Classifier::new(&self.rules, owners, layers).classify(item, group, &parsed)
    }

    pub fn build_group(
        &self,
        group: &str,
        items: &[RawItem],
        owners: &dyn OwnerDirectory,
        layers: &dyn FeatureLayerResolver,
        outcome: &mut BuildOutcome,
    ) {
        let results = items
            .iter()
            .map(|item| (item, self.process_item(item, group, owners, layers)));

        for (item, result) in results {
            outcome.items_seen += 1;
            match result {
                Ok(Classification::Record(record)) => outcome.records.push(record),
                Ok(Classification::Excluded(reason)) => {
                    info!(id = %item.id, title = %item.title, ?reason, "item excluded");
                    outcome.excluded.push(ExcludedRecord {
                        service_id: item.id.clone(),
                        title: item.title.clone(),
                        reason,
                    });
                }
                Err(err) => {
                    warn!(id = %item.id, error = %err, "item skipped");
                    outcome.failed.push(FailedItem {
                        service_id: item.id.clone(),
                        title: item.title.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    pub fn build_report(
        &self,
        catalog: &dyn CatalogSource,
        groups: &[String],
        owners: &dyn OwnerDirectory,
        layers: &dyn FeatureLayerResolver,
    ) -> Result<BuildOutcome> {
        let mut outcome = BuildOutcome::default();
        for group in groups {
            let items = catalog
                .fetch_group(group)
                .with_context(|| format!("fetching catalog group {group}"))?;
            info!(group = %group, items = items.len(), "processing group");
            self.build_group(group, &items, owners, layers, &mut outcome);
        }
        Ok(outcome)
    }
}

/// Output sheets of the metadata report, selected by item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSheet {
    Services,
    Downloadable,
    Maps,
    AppsAndTools,
}

impl ReportSheet {
    pub const ALL: [ReportSheet; 4] = [
        ReportSheet::Services,
        ReportSheet::Downloadable,
        ReportSheet::Maps,
        ReportSheet::AppsAndTools,
    ];

    /// Sheets diffed between runs.
    pub const COMPARED: [ReportSheet; 2] = [ReportSheet::Services, ReportSheet::Downloadable];

    pub fn name(self) -> &'static str {
        match self {
            ReportSheet::Services => "Services",
            ReportSheet::Downloadable => "Downloadable",
            ReportSheet::Maps => "Maps",
            ReportSheet::AppsAndTools => "Apps and Tools",
        }
    }

    pub fn item_types(self) -> &'static [&'static str] {
        match self {
            ReportSheet::Services => &["Map Service", "Feature Service", "WMS", "WMTS"],
            ReportSheet::Downloadable => &[SHAPEFILE_TYPE],
            ReportSheet::Maps => &["Web Map"],
            ReportSheet::AppsAndTools => &[
                "Site Application",
                "Web Mapping Application",
                "Code Attachment",
                "Geoprocessing Service",
                "Dashboard",
                "Form",
                "Data Store",
            ],
        }
    }

    pub fn includes(self, item_type: &str) -> bool {
        self.item_types().contains(&item_type)
    }
}

pub fn split_sheets(records: &[OutputRecord]) -> Workbook {
    let mut workbook = Workbook::default();
    for sheet in ReportSheet::ALL {
        let rows = records
            .iter()
            .filter(|r| sheet.includes(&r.item_type))
            .cloned()
            .collect::<Vec<_>>();
        workbook.push_sheet(Sheet::from_records(sheet.name(), &rows));
    }
    workbook
}

/// Two cells are equal when both are absent or both hold the same text.
fn null_aware_eq(current: &Option<String>, previous: &Option<String>) -> bool {
    match (current, previous) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Names of the compared columns that differ between two rows.
pub fn changed_fields(current: &SnapshotRow, previous: &SnapshotRow) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if !null_aware_eq(&current.data_number, &previous.data_number) {
        fields.push(svcmeta_core::COL_DATA_NUMBER);
    }
    if !null_aware_eq(&current.title, &previous.title) {
        fields.push(svcmeta_core::COL_TITLE);
    }
    if !null_aware_eq(&current.last_edited, &previous.last_edited) {
        fields.push(svcmeta_core::COL_LAST_EDITED);
    }
    fields
}

fn index_rows<'a>(snapshot: &'a Snapshot, side: &str) -> HashMap<&'a str, &'a SnapshotRow> {
    let mut index = HashMap::with_capacity(snapshot.rows.len());
    for row in &snapshot.rows {
        if index.insert(row.service_id.as_str(), row).is_some() {
            warn!(id = %row.service_id, side, snapshot = %snapshot.name, "duplicate service id");
        }
    }
    index
}

/// Outer-join two snapshots on service id.
///
/// Rows come out in current order, then previous-only rows in previous order.
pub fn diff_snapshots(current: &Snapshot, previous: &Snapshot) -> DiffResult {
    let previous_index = index_rows(previous, "previous");
    let current_keys: HashSet<&str> = current.rows.iter().map(|r| r.service_id.as_str()).collect();

    let mut result = DiffResult::default();
    let mut seen = HashSet::new();
    for row in &current.rows {
        if !seen.insert(row.service_id.as_str()) {
            continue;
        }
        match previous_index.get(row.service_id.as_str()) {
            None => result.new.push(row.clone()),
            Some(prev) => {
                let fields = changed_fields(row, prev);
                if !fields.is_empty() {
                    debug!(id = %row.service_id, ?fields, "row changed");
                    result.changed.push(row.clone());
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for row in &previous.rows {
        if !current_keys.contains(row.service_id.as_str()) && seen.insert(row.service_id.as_str()) {
            result.removed.push(row.clone());
        }
    }
    result
}

pub fn updated_sheet_name(sheet: &str) -> String {
    format!("Updated {sheet}")
}

pub fn new_sheet_name(sheet: &str) -> String {
    format!("New {sheet}")
}

pub fn removed_sheet_name(sheet: &str) -> String {
    format!("Removed {sheet}")
}

pub fn comparison_sheets(sheet: &str, diff: &DiffResult) -> [Sheet; 3] {
    [
        Sheet::from_snapshot_rows(updated_sheet_name(sheet), &diff.changed),
        Sheet::from_snapshot_rows(new_sheet_name(sheet), &diff.new),
        Sheet::from_snapshot_rows(removed_sheet_name(sheet), &diff.removed),
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetComparison {
    pub sheet: String,
    pub new: usize,
    pub removed: usize,
    pub changed: usize,
}

/// Diff the named sheets of two report files into one comparison workbook.
pub async fn compare_reports(
    current: &Path,
    previous: &Path,
    sheets: &[&str],
) -> Result<(Workbook, Vec<SheetComparison>)> {
    let mut workbook = Workbook::default();
    let mut summaries = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let cur = load_snapshot(current, sheet)
            .await
            .with_context(|| format!("loading current sheet {sheet}"))?;
        let prev = load_snapshot(previous, sheet)
            .await
            .with_context(|| format!("loading previous sheet {sheet}"))?;
        let diff = diff_snapshots(&cur, &prev);
        info!(
            sheet = %sheet,
            new = diff.new.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "compared sheet"
        );
        summaries.push(SheetComparison {
            sheet: sheet.to_string(),
            new: diff.new.len(),
            removed: diff.removed.len(),
            changed: diff.changed.len(),
        });
        for out in comparison_sheets(sheet, &diff) {
            workbook.push_sheet(out);
        }
    }
    Ok((workbook, summaries))
}

pub async fn compare_files(
    current: &Path,
    previous: &Path,
    sheets: &[&str],
    output: &Path,
) -> Result<Vec<SheetComparison>> {
    let (workbook, summaries) = compare_reports(current, previous, sheets).await?;
    write_workbook(output, &workbook).await?;
    info!(path = %output.display(), "wrote comparison workbook");
    Ok(summaries)
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_snapshot_parquet(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("service_id", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, true),
        ArrowField::new("last_edited", DataType::Utf8, true),
        ArrowField::new("data_number", DataType::Utf8, true),
        ArrowField::new("url", DataType::Utf8, true),
    ]));

    let rows = &snapshot.rows;
    let service_ids = StringArray::from(
        rows.iter()
            .map(|r| Some(r.service_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let titles = StringArray::from(rows.iter().map(|r| r.title.as_deref()).collect::<Vec<_>>());
    let edited = StringArray::from(
        rows.iter()
            .map(|r| r.last_edited.as_deref())
            .collect::<Vec<_>>(),
    );
    let numbers = StringArray::from(
        rows.iter()
            .map(|r| r.data_number.as_deref())
            .collect::<Vec<_>>(),
    );
    let urls = StringArray::from(rows.iter().map(|r| r.url.as_deref()).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(service_ids),
            Arc::new(titles),
            Arc::new(edited),
            Arc::new(numbers),
            Arc::new(urls),
        ],
    )
    .with_context(|| format!("building {} record batch", snapshot.name))?;
    write_parquet(path, batch)
}

fn sheet_file_stem(sheet: &str) -> String {
    sheet
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn manifest_entry(name: &str, base: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path.strip_prefix(base).unwrap_or(path).display().to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

/// Write each sheet's comparison projection as parquet plus a manifest.
pub async fn export_parquet_snapshots(dir: &Path, workbook: &Workbook) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let mut files = Vec::with_capacity(workbook.sheets.len());
    for sheet in &workbook.sheets {
        let snapshot = project_snapshot(sheet)?;
        let path = dir.join(format!("{}.parquet", sheet_file_stem(&sheet.name)));
        write_snapshot_parquet(&path, &snapshot)?;
        files.push(manifest_entry(&sheet.name, dir, &path)?);
    }

    let manifest = ParquetManifest {
        schema_version: 1,
        files,
    };
    let manifest_path = dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub catalog_path: PathBuf,
    pub report_path: PathBuf,
    pub archive_dir: PathBuf,
    pub comparison_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub groups: Vec<String>,
    pub parquet_export: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("./catalog/export.json"),
            report_path: PathBuf::from("./reports/MetaDataReport.json"),
            archive_dir: PathBuf::from("./reports/weekly"),
            comparison_dir: PathBuf::from("./reports/comparison"),
            rules_dir: PathBuf::from("./rules"),
            groups: vec!["Morgan and Mona".to_string()],
            parquet_export: true,
        }
    }
}

fn parse_groups(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

impl ReportConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let path_var = |name: &str, default: PathBuf| {
            std::env::var(name).map(PathBuf::from).unwrap_or(default)
        };
        Self {
            catalog_path: path_var("SVCMETA_CATALOG", defaults.catalog_path),
            report_path: path_var("SVCMETA_REPORT_PATH", defaults.report_path),
            archive_dir: path_var("SVCMETA_ARCHIVE_DIR", defaults.archive_dir),
            comparison_dir: path_var("SVCMETA_COMPARISON_DIR", defaults.comparison_dir),
            rules_dir: path_var("SVCMETA_RULES_DIR", defaults.rules_dir),
            groups: std::env::var("SVCMETA_GROUPS")
                .map(|v| parse_groups(&v))
                .ok()
                .filter(|g| !g.is_empty())
                .unwrap_or(defaults.groups),
            parquet_export: std::env::var("SVCMETA_PARQUET_EXPORT")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.parquet_export),
        }
    }
}

/// Scrub, marker and classify rules, each optionally overridden from YAML.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub scrubber: Scrubber,
    pub markers: MarkerTable,
    pub classifier: ClassifierRules,
}

impl RuleSet {
    pub fn from_rules_dir(dir: &Path) -> Result<Self> {
        let mut rules = Self::default();

        let scrub = dir.join("scrub.yaml");
        if scrub.exists() {
            rules.scrubber = Scrubber::from_path(&scrub)?;
        }
        let markers = dir.join("markers.yaml");
        if markers.exists() {
            rules.markers = MarkerTable::from_path(&markers)?;
        }
        let classify = dir.join("classify.yaml");
        if classify.exists() {
            let text = std::fs::read_to_string(&classify)
                .with_context(|| format!("reading {}", classify.display()))?;
            rules.classifier = ClassifierRules::from_yaml_str(&text)
                .with_context(|| format!("parsing {}", classify.display()))?;
        }

        debug!(
            dir = %dir.display(),
            scrub_rules = rules.scrubber.rules().len(),
            "loaded rule set"
        );
        Ok(rules)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items_seen: usize,
    pub records_written: usize,
    pub excluded_items: usize,
    pub failed_items: usize,
    pub sheet_counts: BTreeMap<String, usize>,
    pub report_path: String,
    pub archived_report: Option<String>,
    pub comparison_path: Option<String>,
    pub comparisons: Vec<SheetComparison>,
    pub parquet_manifest: Option<String>,
}

pub struct ReportPipeline {
    config: ReportConfig,
    scrubber: Scrubber,
    markers: MarkerTable,
    rules: ClassifierRules,
}

impl ReportPipeline {
    pub fn new(config: ReportConfig) -> Result<Self> {
        let rules = RuleSet::from_rules_dir(&config.rules_dir)?;
        Ok(Self::with_rules(config, rules))
    }

    pub fn with_rules(config: ReportConfig, rules: RuleSet) -> Self {
        Self {
            config,
            scrubber: rules.scrubber,
            markers: rules.markers,
            rules: rules.classifier,
        }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    fn builder_for(&self, export: &CatalogExport) -> ReportBuilder {
        ReportBuilder::new(
            FieldParser::new(self.scrubber.clone(), self.markers.clone()),
            self.rules.clone().with_portal_url(&export.portal_url),
        )
    }

    /// Classify the catalog and split the records into report sheets.
    pub fn extract(&self, export: &CatalogExport) -> Result<(BuildOutcome, Workbook)> {
        let outcome =
            self.builder_for(export)
                .build_report(export, &self.config.groups, export, export)?;
        let workbook = split_sheets(&outcome.records);
        Ok((outcome, workbook))
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let export = load_catalog_export(&self.config.catalog_path)?;
        self.run_with_catalog(&export).await
    }

    /// Archive the previous report, write the new one and compare the two.
    pub async fn run_with_catalog(&self, export: &CatalogExport) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        self.run_inner(export, run_id)
            .instrument(info_span!("report_run", %run_id))
            .await
    }

    async fn run_inner(&self, export: &CatalogExport, run_id: Uuid) -> Result<RunSummary> {
        let started_at = Utc::now();

        let report_path = &self.config.report_path;
        let archived = ReportArchive::new(&self.config.archive_dir)
            .archive_report(report_path)
            .await?;

        let (outcome, workbook) = self.extract(export)?;
        write_workbook(report_path, &workbook).await?;
        info!(
            path = %report_path.display(),
            records = outcome.records.len(),
            excluded = outcome.excluded.len(),
            failed = outcome.failed.len(),
            "wrote metadata report"
        );

        let mut comparison_path = None;
        let mut comparisons = Vec::new();
        match &archived {
            Some(previous) => {
                let current_stamp = file_week_stamp(report_path).await?;
                let path = self
                    .config
                    .comparison_dir
                    .join(format!("{}_Comparison_{}.json", current_stamp, previous.stamp));
                let sheets = ReportSheet::COMPARED.map(ReportSheet::name);
                comparisons = compare_files(report_path, &previous.path, &sheets, &path).await?;
                comparison_path = Some(path.display().to_string());
            }
            None => info!("no previous report; comparison skipped"),
        }

        let parquet_manifest = if self.config.parquet_export {
            let dir = report_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("snapshots");
            Some(export_parquet_snapshots(&dir, &workbook).await?.display().to_string())
        } else {
            None
        };

        let sheet_counts = workbook
            .sheets
            .iter()
            .map(|s| (s.name.clone(), s.rows.len()))
            .collect();

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            items_seen: outcome.items_seen,
            records_written: outcome.records.len(),
            excluded_items: outcome.excluded.len(),
            failed_items: outcome.failed.len(),
            sheet_counts,
            report_path: report_path.display().to_string(),
            archived_report: archived.map(|a| a.path.display().to_string()),
            comparison_path,
            comparisons,
            parquet_manifest,
        })
    }
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    ReportPipeline::new(ReportConfig::from_env())?.run_once().await
}
