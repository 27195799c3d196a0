use std::path::{Path, PathBuf};

use svcmeta_portal::{load_catalog_export, CatalogExport};
use svcmeta_report::{ReportConfig, ReportPipeline, RuleSet};
use svcmeta_storage::{load_snapshot, read_workbook};

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/catalog/sample.json")
}

fn config(root: &Path) -> ReportConfig {
    ReportConfig {
        catalog_path: fixture_path(),
        report_path: root.join("reports/MetaDataReport.json"),
        archive_dir: root.join("reports/weekly"),
        comparison_dir: root.join("reports/comparison"),
        rules_dir: root.join("rules"),
        groups: vec!["Morgan and Mona".to_string()],
        parquet_export: true,
    }
}

fn next_week_export(mut export: CatalogExport) -> CatalogExport {
    let items = &mut export.groups[0].items;
    items.retain(|item| item.id != "svc002");
    let cables = items.iter_mut().find(|item| item.id == "svc001").unwrap();
    cables.description = cables
        .description
        .as_ref()
        .map(|d| d.replace("MM-0042", "MM-0043"));

    let mut added = cables.clone();
    added.id = "svc003".into();
    added.title = "Substation Sites".into();
    added.item_type = "Map Service".into();
    added.description = None;
    items.push(added);
    export
}

#[tokio::test]
async fn sample_catalog_runs_and_compares_week_over_week() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = ReportPipeline::new(config(dir.path())).unwrap();

    let first = pipeline.run_once().await.unwrap();
    assert_eq!(first.items_seen, 9);
    assert_eq!(first.records_written, 5);
    assert_eq!(first.excluded_items, 3);
    assert_eq!(first.failed_items, 1);
    assert_eq!(first.sheet_counts.get("Services"), Some(&2));
    assert_eq!(first.sheet_counts.get("Downloadable"), Some(&1));
    assert_eq!(first.sheet_counts.get("Maps"), Some(&1));
    assert_eq!(first.sheet_counts.get("Apps and Tools"), Some(&1));
    assert!(first.archived_report.is_none());
    assert!(first.comparison_path.is_none());
    assert!(first.parquet_manifest.is_some());

    let export = load_catalog_export(fixture_path()).unwrap();
    let (outcome, _) = pipeline.extract(&export).unwrap();
    let excluded = outcome
        .excluded
        .iter()
        .map(|e| e.service_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(excluded, vec!["ops001", "esri001", "admin001"]);
    let failed = outcome
        .failed
        .iter()
        .map(|f| f.service_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(failed, vec!["orphan001"]);

    let report = PathBuf::from(&first.report_path);
    let services = load_snapshot(&report, "Services").await.unwrap();
    let cables = services.rows.iter().find(|r| r.service_id == "svc001").unwrap();
    assert_eq!(cables.data_number.as_deref(), Some("MM-0042"));
    assert_eq!(cables.last_edited.as_deref(), Some("2024-01-15"));
    assert_eq!(
        cables.url.as_deref(),
        Some("https://portal.example/portal/home/item.html?id=svc001")
    );

    let workbook = read_workbook(&report).await.unwrap();
    let sheet = workbook.sheet("Services").unwrap();
    let doc_idx = sheet.column_index("APRX Uploaded From").unwrap();
    let desc_idx = sheet.column_index("Description").unwrap();
    let by_id = |id: &str| {
        sheet
            .rows
            .iter()
            .find(|row| row[0].as_deref() == Some(id))
            .unwrap()
    };
    assert_eq!(by_id("svc001")[doc_idx].as_deref(), Some("cables.aprx"));
    assert_eq!(by_id("svc002")[doc_idx].as_deref(), Some("None"));
    assert_eq!(
        by_id("svc002")[desc_idx].as_deref(),
        Some("Proposed turbine positions.")
    );

    let export = next_week_export(load_catalog_export(fixture_path()).unwrap());
    let second = pipeline.run_with_catalog(&export).await.unwrap();
    assert!(second.archived_report.is_some());
    let comparison = PathBuf::from(second.comparison_path.as_ref().unwrap());
    let name = comparison.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.contains("_Comparison_"));

    let diff = read_workbook(&comparison).await.unwrap();
    assert_eq!(
        diff.sheet_names(),
        vec![
            "Updated Services",
            "New Services",
            "Removed Services",
            "Updated Downloadable",
            "New Downloadable",
            "Removed Downloadable",
        ]
    );
    let ids = |sheet: &str| {
        diff.sheet(sheet)
            .unwrap()
            .rows
            .iter()
            .map(|row| row[0].clone().unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids("Updated Services"), vec!["svc001"]);
    assert_eq!(ids("New Services"), vec!["svc003"]);
    assert_eq!(ids("Removed Services"), vec!["svc002"]);
    assert!(ids("Updated Downloadable").is_empty());
    assert!(ids("New Downloadable").is_empty());
    assert!(ids("Removed Downloadable").is_empty());

    let services = second
        .comparisons
        .iter()
        .find(|c| c.sheet == "Services")
        .unwrap();
    assert_eq!((services.new, services.removed, services.changed), (1, 1, 1));
}

#[tokio::test]
async fn rules_directory_overrides_classification() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    std::fs::create_dir_all(&cfg.rules_dir).unwrap();
    std::fs::write(
        cfg.rules_dir.join("classify.yaml"),
        "version: 1\nexcluded_owners: [asmith]\n",
    )
    .unwrap();

    let rules = RuleSet::from_rules_dir(&cfg.rules_dir).unwrap();
    let pipeline = ReportPipeline::with_rules(cfg, rules);
    let export = load_catalog_export(fixture_path()).unwrap();
    let (outcome, workbook) = pipeline.extract(&export).unwrap();

    assert!(outcome.records.iter().all(|r| r.service_id != "shp001"));
    assert!(outcome.records.iter().any(|r| r.service_id == "esri001"));
    assert_eq!(workbook.sheet("Downloadable").unwrap().rows.len(), 0);
    // No longer allowlisted, so the unreadable admin owner is a failure.
    assert!(outcome.failed.iter().any(|f| f.service_id == "admin001"));
}
