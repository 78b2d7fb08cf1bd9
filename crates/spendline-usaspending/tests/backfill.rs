//! End-to-end backfill against a mock USAspending backend.
//!
//! The backend fails the full-month export and succeeds on both halves, so
//! the run must split once and land two extracted outputs.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use spendline_core::{
    ApiSettings, CancelToken, DownloadSettings, Downloader, ProgressContext, RateLimiter,
    is_valid_parquet,
};
use spendline_usaspending::{
    AwardGroup, BackfillConfig, BackfillOutcome, BulkJobRequest, BulkJobRunner, DateRange,
    JobSettings, Pipeline, PipelineSettings, UsaClient, run_backfill,
};
use tempfile::TempDir;
use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

const CSV_BODY: &str = "Award ID,Start Date,End Date,Last Modified Date,Award Amount\n\
                        C1,2024-09-02,2025-09-01,2024-09-03,1000\n\
                        C1,2024-09-02,2025-09-01,2024-09-03,1000\n\
                        C2,2024-09-20,2025-09-19,2024-09-21,250\n";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

fn zip_bytes() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("Contract_PrimeTransactions_1.csv", opts).unwrap();
    zip.write_all(CSV_BODY.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

fn fast_download_settings() -> DownloadSettings {
    DownloadSettings {
        read_timeout: Duration::from_secs(5),
        probe_budget: Duration::from_secs(10),
        probe_initial: Duration::from_millis(10),
        probe_cap: Duration::from_millis(20),
        fetch_initial: Duration::from_millis(10),
        fetch_cap: Duration::from_millis(20),
        ..Default::default()
    }
}

fn fast_job_settings() -> JobSettings {
    JobSettings {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

fn submit_body(start: &str, end: &str) -> Value {
    json!({"filters": {"date_range": {"start_date": start, "end_date": end}}})
}

/// Mount the submit/status/file mocks for one job
fn mount_job(
    rt: &tokio::runtime::Runtime,
    server: &MockServer,
    start: &str,
    end: &str,
    file_name: &str,
    status: Value,
) {
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/api/v2/bulk_download/awards/"))
            .and(body_partial_json(submit_body(start, end)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "file_name": file_name,
                "status_url": format!("{}/api/v2/download/status?file_name={file_name}", server.uri()),
            })))
            .mount(server),
    );
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/api/v2/download/status"))
            .and(query_param("file_name", file_name))
            .respond_with(ResponseTemplate::new(200).set_body_json(status))
            .mount(server),
    );
}

fn mount_split_backend(rt: &tokio::runtime::Runtime, server: &MockServer) {
    mount_job(
        rt,
        server,
        "2024-09-01",
        "2024-09-30",
        "full_month.zip",
        json!({"status": "failed", "message": "Query exceeded row limit"}),
    );
    for (start, end, name) in [
        ("2024-09-01", "2024-09-15", "first_half.zip"),
        ("2024-09-16", "2024-09-30", "second_half.zip"),
    ] {
        mount_job(
            rt,
            server,
            start,
            end,
            name,
            json!({
                "status": "finished",
                "file_url": format!("{}/files/{name}", server.uri()),
            }),
        );
    }
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/files/first_half.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes()))
            .mount(server),
    );
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/files/second_half.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes()))
            .mount(server),
    );
}

fn config(out: &TempDir) -> BackfillConfig {
    let mut config = BackfillConfig::new(DateRange::parse("2024-09-01", "2024-09-30").unwrap());
    config.output_dir = out.path().to_path_buf();
    config.groups = vec![AwardGroup::Contracts];
    config.job = fast_job_settings();
    config
}

#[test]
fn failed_month_splits_into_two_extracted_halves() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    mount_split_backend(&rt, &server);

    let out = TempDir::new().unwrap();
    let config = config(&out);
    let cancel = CancelToken::new();
    let limiter = Arc::new(RateLimiter::new(1000.0));
    let api = UsaClient::new(
        &server.uri(),
        ApiSettings::default(),
        Arc::clone(&limiter),
        cancel.clone(),
    )
    .unwrap();
    let downloader = Downloader::new(fast_download_settings(), limiter, cancel.clone()).unwrap();
    let runner = BulkJobRunner::new(
        &api,
        &downloader,
        config.job.clone(),
        cancel.clone(),
        Arc::new(ProgressContext::hidden()),
    );

    let mut outcome = BackfillOutcome::default();
    run_backfill(&config, &runner, &cancel, &mut outcome).unwrap();

    assert!(outcome.is_success());
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.splits, 1);
    assert_eq!(outcome.completed.len(), 2);

    for (job, slug) in outcome
        .completed
        .iter()
        .zip(["2024-09-01_to_2024-09-15", "2024-09-16_to_2024-09-30"])
    {
        let dir = out.path().join(format!("bulk_contracts_{slug}"));
        assert_eq!(job.outcome.extract_dir, dir);
        assert!(dir.join("Contract_PrimeTransactions_1.csv").exists());
        let parquet = dir.join("Contract_PrimeTransactions_1.parquet");
        assert!(is_valid_parquet(&parquet));
        assert_eq!(job.outcome.conversion.rows(), 2);
        assert_eq!(job.outcome.conversion.duplicates_removed(), 1);
    }
    assert!(out.path().join("first_half.zip").exists());
    assert!(out.path().join("second_half.zip").exists());
    assert!(!out.path().join("full_month.zip").exists());

    let submissions = rt
        .block_on(server.received_requests())
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .count();
    assert_eq!(submissions, 3);
}

#[test]
fn pipeline_writes_successful_run_log() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    mount_split_backend(&rt, &server);

    let out = TempDir::new().unwrap();
    let config = config(&out);
    let settings = PipelineSettings {
        api_root: server.uri(),
        max_rps: 1000.0,
        download: fast_download_settings(),
        ..Default::default()
    };
    let pipeline = Pipeline::new(
        settings,
        CancelToken::new(),
        Arc::new(ProgressContext::hidden()),
    )
    .unwrap();
    pipeline.backfill(&config).unwrap();

    let logs: Vec<_> = std::fs::read_dir(out.path().join("results"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    assert_eq!(logs.len(), 1);
    let log: Value = serde_json::from_str(&std::fs::read_to_string(&logs[0]).unwrap()).unwrap();
    assert_eq!(log["command"], "backfill");
    assert_eq!(log["status"], "SUCCESS");
    assert_eq!(log["jobs"].as_array().unwrap().len(), 2);
    assert!(log["errors"].as_array().unwrap().is_empty());
    // two archives + two parquet files
    assert_eq!(log["output_files"].as_array().unwrap().len(), 4);
}

#[test]
fn stuck_minimal_window_is_recorded_as_partial() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    mount_job(
        &rt,
        &server,
        "2024-09-01",
        "2024-09-07",
        "week.zip",
        json!({"status": "running", "message": "java.lang.RuntimeException: worker died"}),
    );

    let out = TempDir::new().unwrap();
    let mut config = BackfillConfig::new(DateRange::parse("2024-09-01", "2024-09-07").unwrap());
    config.output_dir = out.path().to_path_buf();
    config.job = fast_job_settings();
    let settings = PipelineSettings {
        api_root: server.uri(),
        max_rps: 1000.0,
        download: fast_download_settings(),
        ..Default::default()
    };
    let pipeline = Pipeline::new(
        settings,
        CancelToken::new(),
        Arc::new(ProgressContext::hidden()),
    )
    .unwrap();
    pipeline.backfill(&config).unwrap();

    let status_polls = rt
        .block_on(server.received_requests())
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/api/v2/download/status")
        .count();
    assert_eq!(status_polls, 3);

    let log_dir = out.path().join("results");
    let entry = std::fs::read_dir(&log_dir).unwrap().next().unwrap().unwrap();
    let log: Value = serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
    assert_eq!(log["status"], "PARTIAL");
    assert_eq!(log["jobs"][0]["status"], "FAILED");
    assert!(
        log["jobs"][0]["error"]
            .as_str()
            .unwrap()
            .contains("RuntimeException")
    );
}

#[test]
fn missing_job_id_aborts_without_splitting() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/api/v2/bulk_download/awards/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .expect(1)
            .mount(&server),
    );

    let out = TempDir::new().unwrap();
    let config = config(&out);
    let settings = PipelineSettings {
        api_root: server.uri(),
        max_rps: 1000.0,
        download: fast_download_settings(),
        ..Default::default()
    };
    let pipeline = Pipeline::new(
        settings,
        CancelToken::new(),
        Arc::new(ProgressContext::hidden()),
    )
    .unwrap();
    let err = pipeline.backfill(&config).unwrap_err();
    assert!(format!("{err:#}").contains("no file_name"));

    let entry = std::fs::read_dir(out.path().join("results"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let log: Value = serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
    assert_eq!(log["status"], "FAILED");
}

#[test]
fn submit_sends_the_full_bulk_request_body() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .and(path("/api/v2/bulk_download/awards/"))
            .and(body_json(json!({
                "filters": {
                    "prime_award_types": ["02", "03", "04", "05"],
                    "date_type": "action_date",
                    "date_range": {"start_date": "2024-09-01", "end_date": "2024-09-15"}
                },
                "file_format": "csv",
                "columns": ["award_id_fain"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"file_name": "g.zip"})))
            .expect(1)
            .mount(&server),
    );

    let api = UsaClient::new(
        &server.uri(),
        ApiSettings::default(),
        Arc::new(RateLimiter::new(1000.0)),
        CancelToken::new(),
    )
    .unwrap();
    let mut request = BulkJobRequest::new(
        AwardGroup::Grants,
        DateRange::parse("2024-09-01", "2024-09-15").unwrap(),
    );
    request.columns = vec!["award_id_fain".into()];
    let resp = api.start_bulk_awards(&request.payload()).unwrap();
    assert_eq!(resp["file_name"], "g.zip");
}
