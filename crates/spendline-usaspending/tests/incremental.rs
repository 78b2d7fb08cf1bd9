//! Incremental search driver against a mock search endpoint.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::file::reader::{FileReader, SerializedFileReader};
use serde_json::{Value, json};
use spendline_core::{ApiSettings, CancelToken, ProgressContext, RateLimiter};
use spendline_usaspending::{
    AgencyFilter, AgencyRole, AwardGroup, DateRange, IncrementalConfig, IncrementalOutcome,
    OutputFormat, UsaClient, run_incremental,
};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEARCH_PATH: &str = "/api/v2/search/spending_by_award/";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

fn client(server: &MockServer) -> UsaClient {
    UsaClient::new(
        &server.uri(),
        ApiSettings::default(),
        Arc::new(RateLimiter::new(1000.0)),
        CancelToken::new(),
    )
    .unwrap()
}

fn award(id: &str, amount: f64) -> Value {
    json!({
        "Award ID": id,
        "Recipient Name": format!("Recipient {id}"),
        "Start Date": "2024-09-02",
        "End Date": "2025-09-01",
        "Award Amount": amount,
        "Awarding Agency": "Department of Defense",
        "Last Modified Date": "2024-09-03",
    })
}

fn page(results: Vec<Value>, has_next: bool) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "results": results,
        "page_metadata": {"page": 1, "hasNext": has_next},
    }))
}

fn week_config(out: &Path) -> IncrementalConfig {
    let mut config = IncrementalConfig::new(DateRange::parse("2024-09-01", "2024-09-07").unwrap());
    config.output_dir = out.to_path_buf();
    config
}

fn run(config: &IncrementalConfig, api: &UsaClient) -> IncrementalOutcome {
    let mut outcome = IncrementalOutcome::default();
    run_incremental(
        config,
        api,
        &CancelToken::new(),
        &Arc::new(ProgressContext::hidden()),
        &mut outcome,
    )
    .unwrap();
    outcome
}

fn parquet_rows(path: &PathBuf) -> i64 {
    let reader = SerializedFileReader::new(File::open(path).unwrap()).unwrap();
    reader.metadata().file_metadata().num_rows()
}

#[test]
fn drains_pages_until_empty_and_dedups() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .and(body_partial_json(json!({"page": 1, "limit": 500, "sort": "Award Amount", "order": "desc"})))
            .respond_with(page(vec![award("A1", 900.0), award("A2", 800.0)], true))
            .expect(1)
            .mount(&server),
    );
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .and(body_partial_json(json!({"page": 2})))
            // A2 repeats across the page boundary
            .respond_with(page(vec![award("A2", 800.0), award("A3", 10.0)], true))
            .expect(1)
            .mount(&server),
    );
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .and(body_partial_json(json!({"page": 3})))
            .respond_with(page(vec![], true))
            .expect(1)
            .mount(&server),
    );

    let out = TempDir::new().unwrap();
    let config = week_config(out.path());
    let outcome = run(&config, &client(&server));

    assert!(outcome.is_success());
    assert_eq!(outcome.total_shards, 1);
    let result = &outcome.results[0];
    assert_eq!(result.pages, 3);
    assert_eq!(result.rows, 3);
    assert_eq!(result.duplicates_removed, 1);

    let output = result.output.as_ref().unwrap();
    assert!(output.starts_with(
        out.path()
            .join("incremental")
            .join("contracts")
            .join("2024-09-01_to_2024-09-07")
    ));
    let name = output.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("awards_all_"));
    assert!(name.ends_with(".parquet"));
    assert_eq!(parquet_rows(output), 3);
}

#[test]
fn stops_when_server_reports_no_next_page() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(page(vec![award("B1", 5.0)], false))
            .expect(1)
            .mount(&server),
    );

    let out = TempDir::new().unwrap();
    let mut config = week_config(out.path());
    config.format = OutputFormat::Csv;
    let outcome = run(&config, &client(&server));

    let result = &outcome.results[0];
    assert_eq!(result.pages, 1);
    let output = result.output.as_ref().unwrap();
    assert_eq!(output.extension().unwrap(), "csv");
    let text = std::fs::read_to_string(output).unwrap();
    let mut lines = text.lines();
    assert!(lines.next().unwrap().starts_with("Award ID,Recipient Name"));
    assert!(lines.next().unwrap().starts_with("B1,Recipient B1"));
    assert!(lines.next().is_none());
}

#[test]
fn empty_shards_are_skipped_without_output() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(page(vec![], false))
            .expect(2)
            .mount(&server),
    );

    let out = TempDir::new().unwrap();
    let mut config = IncrementalConfig::new(DateRange::parse("2024-09-01", "2024-09-10").unwrap());
    config.output_dir = out.path().to_path_buf();
    let outcome = run(&config, &client(&server));

    assert_eq!(outcome.total_shards, 2);
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.iter().all(|r| r.output.is_none()));
    assert_eq!(outcome.outputs().count(), 0);
    assert!(!out.path().join("incremental").exists());
}

#[test]
fn agency_shards_filter_and_name_outputs() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(page(vec![award("D1", 1.0)], false))
            .expect(2)
            .mount(&server),
    );

    let out = TempDir::new().unwrap();
    let mut config = week_config(out.path());
    config.agencies = vec![
        AgencyFilter::toptier(AgencyRole::Awarding, "Department of Defense"),
        AgencyFilter::toptier(AgencyRole::Awarding, "Department of Energy"),
    ];
    let outcome = run(&config, &client(&server));

    let names: Vec<String> = outcome
        .outputs()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names[0].starts_with("awards_Department_of_Defense_"));
    assert!(names[1].starts_with("awards_Department_of_Energy_"));

    let bodies: Vec<Value> = rt
        .block_on(server.received_requests())
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(
        bodies[0]["filters"]["agencies"],
        json!([{"type": "awarding", "tier": "toptier", "name": "Department of Defense"}])
    );
    assert_eq!(bodies[1]["filters"]["agencies"][0]["name"], "Department of Energy");
}

#[test]
fn failing_shard_is_recorded_and_run_continues() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .and(body_partial_json(json!({"filters": {"award_type_codes": ["A", "B", "C", "D"]}})))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server),
    );
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(page(vec![award("G1", 3.0)], false))
            .mount(&server),
    );

    let out = TempDir::new().unwrap();
    let mut config = week_config(out.path());
    config.groups = vec![AwardGroup::Contracts, AwardGroup::Grants];
    let outcome = run(&config, &client(&server));

    assert!(!outcome.is_success());
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].shard.group, AwardGroup::Contracts);
    assert!(outcome.failed[0].error.contains("500"));
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].shard.group, AwardGroup::Grants);
}
