//! Export tests: the 38-column research CSV round-trip and the survey
//! export progress flow.

use std::io::Read;

use chrono::{TimeZone, Utc};
use devpulse_sim::export::{research_commit_csv, ExportStatus, RESEARCH_EXPORT_COLUMNS};
use devpulse_sim::{
    minimal_seed, run_generation, AnalyticsApi, CancelFlag, SimConfig, SimulatorService,
    TimeRange,
};

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap()
}

fn config(days: u32) -> SimConfig {
    SimConfig {
        days,
        rng_seed: Some(42),
        ..Default::default()
    }
}

#[test]
fn research_csv_round_trips() {
    let snapshot =
        run_generation(&minimal_seed(), &config(14), fixed_now(), None, &CancelFlag::new())
            .unwrap();
    let range = TimeRange {
        from: snapshot.window_start,
        to: snapshot.window_end,
    };
    let csv_body = research_commit_csv(&snapshot, range).unwrap();

    let mut reader = csv::Reader::from_reader(csv_body.as_bytes());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.len(), 38);
    for (got, want) in headers.iter().zip(RESEARCH_EXPORT_COLUMNS) {
        assert_eq!(got, want);
    }

    let records: Vec<csv::StringRecord> =
        reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), snapshot.commits().len());

    for (record, commit) in records.iter().zip(snapshot.commits()) {
        assert_eq!(record.len(), 38);
        assert_eq!(&record[0], commit.hash.as_str());
        assert_eq!(&record[1], commit.repo.as_str());
        assert_eq!(&record[5], commit.author_email.as_str());
        assert_eq!(record[17].parse::<u64>().unwrap(), commit.added.total());
        assert_eq!(record[18].parse::<u64>().unwrap(), commit.deleted.total());
        let tab: u64 = record[19].parse().unwrap();
        let composer: u64 = record[21].parse().unwrap();
        let non_ai: u64 = record[23].parse().unwrap();
        assert_eq!(tab + composer + non_ai, commit.added.total());
    }
}

#[test]
fn research_csv_quotes_are_rfc4180() {
    let snapshot =
        run_generation(&minimal_seed(), &config(7), fixed_now(), None, &CancelFlag::new())
            .unwrap();
    let range = TimeRange {
        from: snapshot.window_start,
        to: snapshot.window_end,
    };
    let csv_body = research_commit_csv(&snapshot, range).unwrap();
    // A strict reader with default quoting must consume every row.
    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .from_reader(csv_body.as_bytes());
    let count = reader.records().map(|r| r.unwrap()).count();
    assert_eq!(count, snapshot.commits().len());
}

#[tokio::test]
async fn survey_export_flow_completes() {
    let service = SimulatorService::bootstrap(minimal_seed(), config(7))
        .await
        .unwrap();

    let started = service.start_survey_export().await.unwrap();
    assert_eq!(started.status, ExportStatus::InProgress);
    assert_eq!(started.percent_complete, 0);
    assert!(!started.progress_id.is_empty());
    assert!(started.file_id.is_none());

    let mut last_percent = 0u8;
    let mut file_id = None;
    for _ in 0..6 {
        let progress = service
            .poll_survey_export(&started.progress_id)
            .await
            .unwrap();
        assert!(progress.percent_complete >= last_percent);
        assert!(progress.percent_complete <= 100);
        last_percent = progress.percent_complete;
        if progress.status == ExportStatus::Complete {
            file_id = progress.file_id.clone();
            assert_eq!(progress.percent_complete, 100);
        }
    }
    let file_id = file_id.expect("flow completed within the polls");

    let bundle = service.fetch_survey_bundle(&file_id).await.unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bundle)).unwrap();
    assert_eq!(archive.len(), 1);
    let mut entry = archive.by_index(0).unwrap();
    assert_eq!(entry.name(), "survey_responses.csv");
    let mut body = String::new();
    entry.read_to_string(&mut body).unwrap();
    let header = body.lines().next().unwrap();
    for field in ["ResponseID", "RespondentEmail", "OverallAISatisfaction"] {
        assert!(header.contains(field), "header missing {}", field);
    }
}

#[tokio::test]
async fn survey_export_serialization_uses_camel_status() {
    let service = SimulatorService::bootstrap(minimal_seed(), config(7))
        .await
        .unwrap();
    let started = service.start_survey_export().await.unwrap();
    let json = serde_json::to_value(&started).unwrap();
    assert_eq!(json["status"], serde_json::json!("inProgress"));
}

#[tokio::test]
async fn disabled_survey_source_is_not_found() {
    let mut seed = minimal_seed();
    seed.third_party.survey = false;
    let service = SimulatorService::bootstrap(seed, config(7)).await.unwrap();
    let err = service.start_survey_export().await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn unknown_progress_and_file_ids_fail_cleanly() {
    let service = SimulatorService::bootstrap(minimal_seed(), config(7))
        .await
        .unwrap();
    let missing = uuid::Uuid::new_v4().to_string();
    assert_eq!(
        service.poll_survey_export(&missing).await.unwrap_err().kind(),
        "not_found"
    );
    assert_eq!(
        service.fetch_survey_bundle(&missing).await.unwrap_err().kind(),
        "not_found"
    );
    assert_eq!(
        service.poll_survey_export("not-a-uuid").await.unwrap_err().kind(),
        "invalid_parameter"
    );
}

#[tokio::test]
async fn bundle_is_unfetchable_until_complete() {
    let service = SimulatorService::bootstrap(minimal_seed(), config(7))
        .await
        .unwrap();
    let started = service.start_survey_export().await.unwrap();
    // One poll: 25 percent, still in progress; the file id is not served.
    let progress = service
        .poll_survey_export(&started.progress_id)
        .await
        .unwrap();
    assert_eq!(progress.status, ExportStatus::InProgress);
    assert!(progress.file_id.is_none());
}
