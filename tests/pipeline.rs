use chrono::{TimeZone, Utc};
use daily_report::charts::{RenderError, SectionBody, Tone};
use daily_report::data::{DataCleaner, DataLoader, LoaderError};
use daily_report::stats::{AggregationKey, Aggregator};
use daily_report::{build_report, run, OutputFormat, PipelineConfig, PipelineError, ReportArtifact};
use std::io::Read;
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn config(name: &str, out_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::from_json_file(&fixture(name)).unwrap();
    config.output = out_dir.join("report.html");
    config
}

fn fixed_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap()
}

fn section<'a>(report: &'a ReportArtifact, title: &str) -> &'a SectionBody {
    &report
        .sections
        .iter()
        .find(|s| s.title == title)
        .unwrap_or_else(|| panic!("no section '{title}'"))
        .body
}

#[test]
fn five_rows_one_missing_amount() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("five_rows.json", dir.path());

    let raw = DataLoader::default().load(&config.input, &config.schema).unwrap();
    assert_eq!(raw.len(), 5);
    let outcome = DataCleaner::new(&config.schema, &config.identity_key)
        .clean(raw)
        .unwrap();
    assert_eq!(outcome.table.len(), 4);
    assert_eq!(outcome.rejected_count(), 1);
    assert_eq!(outcome.rejects[0].row, 3);

    let by_region = Aggregator::aggregate(&outcome.table, &config.aggregations[0]).unwrap();
    assert_eq!(by_region.rows.len(), 2);
    assert_eq!(by_region.rows[0].key, AggregationKey(vec!["north".into()]));
    assert_eq!(by_region.rows[0].metric("rows"), 2.0);
    assert_eq!(by_region.rows[0].metric("amount"), 17.0);
    assert_eq!(by_region.rows[1].metric("amount"), 8.0);
}

#[test]
fn empty_section_is_omitted_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("five_rows.json", dir.path());

    let report = build_report(&config, fixed_time()).unwrap();
    let titles: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["Amount by region", "Regions"]);
    assert_eq!(report.metadata.omitted_sections, vec!["Promotions"]);
    assert_eq!(report.metadata.rows_clean, 4);
    assert_eq!(report.metadata.rows_rejected, 1);
}

#[test]
fn strict_sections_abort_on_empty_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("five_rows.json", dir.path());
    config.strict_sections = true;

    match build_report(&config, fixed_time()) {
        Err(PipelineError::Render(RenderError::EmptyData { section })) => {
            assert_eq!(section, "Promotions")
        }
        other => panic!("expected empty data error, got {other:?}"),
    }
}

#[test]
fn missing_input_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("five_rows.json", dir.path());
    config.input = dir.path().join("nope.csv");

    let err = build_report(&config, fixed_time()).unwrap_err();
    assert_eq!(err.stage(), "load");
    assert!(matches!(err, PipelineError::Load(LoaderError::Io { .. })));
    assert!(err.to_string().contains("nope.csv"));
}

#[test]
fn full_report_accounts_for_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("daily_sales.json", dir.path());
    let report = build_report(&config, fixed_time()).unwrap();

    let meta = &report.metadata;
    assert_eq!(meta.rows_processed, 10);
    assert_eq!(meta.rows_clean, 6);
    assert_eq!(meta.rows_rejected, 3);
    assert_eq!(meta.duplicates, 1);
    assert_eq!(meta.rows_rejected + meta.duplicates + meta.rows_clean, meta.rows_processed);
    assert_eq!(meta.rejected_by_reason.get("excluded"), Some(&1));
    assert_eq!(meta.rejected_by_reason.get("invalid"), Some(&1));
    assert_eq!(meta.rejected_by_reason.get("missing"), Some(&1));
    assert_eq!(meta.source.sha256.len(), 64);

    let titles: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Daily totals",
            "Deposits by team",
            "Registrations",
            "Team comparison",
            "Agents: Alice - Bob",
            "Agents: Carol - Dan"
        ]
    );
}

#[test]
fn period_table_totals() {
    let dir = tempfile::tempdir().unwrap();
    let report = build_report(&config("daily_sales.json", dir.path()), fixed_time()).unwrap();

    let SectionBody::Table(table) = section(&report, "Daily totals") else {
        panic!("expected a table");
    };
    assert_eq!(table.columns, vec!["date", "Reg", "FTD", "Deposit", "Total volume"]);
    let labels: Vec<&str> = table.rows.iter().map(|r| r.cells[0].text.as_str()).collect();
    assert_eq!(
        labels,
        vec!["2024-03-03", "2024-03-02", "2024-03-01", "03/01~03/03", "2024/03", "TOTAL"]
    );
    let total: Vec<&str> = table.rows[5].cells.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(total, vec!["TOTAL", "48", "8", "5,150.50", "13,800.00"]);
}

#[test]
fn comparison_orders_by_current_deposit() {
    let dir = tempfile::tempdir().unwrap();
    let report = build_report(&config("daily_sales.json", dir.path()), fixed_time()).unwrap();

    let SectionBody::Table(table) = section(&report, "Team comparison") else {
        panic!("expected a table");
    };
    let carol = &table.rows[0].cells;
    assert_eq!(carol[0].text, "Carol - Dan");
    assert_eq!(carol[1].text, "2024-03-02");
    assert_eq!(carol[2].text, "9 (+28.6%)");
    assert_eq!(carol[3].text, "800.00 (+100%)");
    assert_eq!(carol[3].tone, Tone::Increase);

    let alice = &table.rows[1].cells;
    assert_eq!(alice[3].text, "450.00 (-78.6%)");
    assert_eq!(alice[3].tone, Tone::Decrease);
}

#[test]
fn identical_input_gives_identical_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("daily_sales.json", dir.path());

    let first = build_report(&config, fixed_time()).unwrap();
    let second = build_report(&config, fixed_time()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_html(), second.to_html());
}

#[test]
fn run_writes_html() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("daily_sales.json", dir.path());
    config.output = dir.path().join("reports/today/report.html");

    let summary = run(&config).unwrap();
    assert_eq!(summary.output, config.output);
    assert_eq!(summary.format, OutputFormat::Html);

    let html = std::fs::read_to_string(&summary.output).unwrap();
    assert!(html.contains("<h1>Daily Sales</h1>"));
    assert!(html.contains("Rows processed: 10; clean: 6; rejected: 3; duplicates: 1"));
    assert_eq!(html.matches("<svg").count(), 2);
}

#[test]
fn zip_output_is_a_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("daily_sales.json", dir.path());
    config.output = dir.path().join("report.zip");

    let summary = run(&config).unwrap();
    assert_eq!(summary.format, OutputFormat::Bundle);

    let file = std::fs::File::open(&summary.output).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "charts/02-deposits-by-team.svg",
            "charts/03-registrations.svg",
            "manifest.json",
            "report.html"
        ]
    );

    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .unwrap()
        .read_to_string(&mut manifest)
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(json["title"], "Daily Sales");
    assert_eq!(json["metadata"]["duplicates"], 1);
    assert_eq!(json["sections"].as_array().unwrap().len(), 6);
}

#[test]
fn write_failure_returns_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "a file, not a directory").unwrap();

    let mut config = config("five_rows.json", dir.path());
    config.output = blocker.join("report.html");

    let err = run(&config).unwrap_err();
    assert_eq!(err.stage(), "write");
    let artifact = err.into_artifact().unwrap();

    let fallback = dir.path().join("fallback/report.html");
    let written = artifact.write(&fallback, OutputFormat::Html).unwrap();
    assert_eq!(written, fallback);
    assert!(std::fs::read_to_string(&fallback)
        .unwrap()
        .contains("Amount by region"));
}

#[test]
fn invalid_config_fails_before_loading() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("five_rows.json", dir.path());
    config.input = dir.path().join("never-read.csv");
    config.aggregations[0].group_by.clear();

    let err = build_report(&config, fixed_time()).unwrap_err();
    assert_eq!(err.stage(), "config");
    assert!(matches!(err, PipelineError::Config(_)));
}
