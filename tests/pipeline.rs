//! End-to-end pipeline scenarios against the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use seismofuse::config::Config;
use seismofuse::errors::FetchError;
use seismofuse::models::RunStatus;
use seismofuse::pipeline::Pipeline;
use seismofuse::sources::SourceTag;
use seismofuse::store::MemoryStore;
use seismofuse::transport::FeedFetcher;

/// Canned feeds keyed by source.
struct StubFetcher {
    payloads: HashMap<SourceTag, Result<Vec<u8>, FetchError>>,
}

impl FeedFetcher for StubFetcher {
    async fn fetch(&self, tag: SourceTag, _query: Option<&str>) -> Result<Vec<u8>, FetchError> {
        match self.payloads.get(&tag) {
            Some(payload) => payload.clone(),
            None => Err(FetchError::Http4xx {
                agency: tag,
                status: 404,
            }),
        }
    }
}

/// Reference origin time: recent enough to land inside the batch window.
fn t0() -> DateTime<Utc> {
    Utc::now() - Duration::hours(1)
}

fn usgs_feature(
    id: &str,
    time: DateTime<Utc>,
    lat: f64,
    lon: f64,
    depth: f64,
    mag: f64,
    status: &str,
) -> String {
    let ms = time.timestamp_millis();
    format!(
        r#"{{"type": "Feature", "id": "{id}",
            "geometry": {{"type": "Point", "coordinates": [{lon}, {lat}, {depth}]}},
            "properties": {{"mag": {mag}, "magType": "mw", "time": {ms},
                            "updated": {ms}, "status": "{status}",
                            "place": "test region"}}}}"#
    )
}

fn usgs_payload(features: &[String]) -> Vec<u8> {
    format!(
        r#"{{"type": "FeatureCollection", "features": [{}]}}"#,
        features.join(",")
    )
    .into_bytes()
}

fn emsc_payload(
    id: &str,
    time: DateTime<Utc>,
    lat: f64,
    lon: f64,
    depth: f64,
    mag: f64,
) -> Vec<u8> {
    let iso = time.to_rfc3339_opts(SecondsFormat::Millis, true);
    format!(
        r#"{{"type": "FeatureCollection", "features": [
            {{"type": "Feature", "id": "{id}",
              "geometry": {{"type": "Point", "coordinates": [{lon}, {lat}, -{depth}]}},
              "properties": {{"unid": "{id}", "time": "{iso}",
                              "lastupdate": "{iso}", "lat": {lat}, "lon": {lon},
                              "depth": {depth}, "mag": {mag}, "magtype": "mw",
                              "auth": "EMSC", "flynn_region": "CRETE, GREECE"}}}}
        ]}}"#
    )
    .into_bytes()
}

fn pipeline_with(
    enabled: Vec<SourceTag>,
    payloads: HashMap<SourceTag, Result<Vec<u8>, FetchError>>,
) -> Pipeline<MemoryStore, StubFetcher> {
    let mut config = Config::default();
    config.sources.enabled = enabled;
    Pipeline::new(
        Arc::new(StubFetcher { payloads }),
        Arc::new(MemoryStore::new()),
        config,
    )
}

#[tokio::test]
async fn two_agencies_one_quake() {
    let origin = t0();
    let mut payloads = HashMap::new();
    payloads.insert(
        SourceTag::Usgs,
        Ok(usgs_payload(&[usgs_feature(
            "us1", origin, 35.0, 25.0, 10.0, 5.2, "reviewed",
        )])),
    );
    payloads.insert(
        SourceTag::Emsc,
        Ok(emsc_payload(
            "em1",
            origin + Duration::seconds(10),
            35.05,
            25.03,
            12.0,
            5.1,
        )),
    );

    let pipeline = pipeline_with(vec![SourceTag::Usgs, SourceTag::Emsc], payloads);
    let run = pipeline.run_batch().await.unwrap();

    assert_eq!(run.status, RunStatus::Ok);
    assert_eq!(run.raw_events_count, 2);
    assert_eq!(run.sources_fetched, vec![SourceTag::Usgs, SourceTag::Emsc]);
    assert_eq!(run.unified_events_count, 1);

    let unified = pipeline.store().unified_events().await;
    assert_eq!(unified.len(), 1);
    let event = &unified[0];
    assert_eq!(event.num_sources, 2);
    // Europe region prefers EMSC, but the reviewed USGS report wins
    assert_eq!(event.preferred_source, SourceTag::Usgs);
    assert_eq!(event.preferred_event_uid, "usgs:us1");
    assert!((event.magnitude_std - 0.05).abs() < 1e-9);
    assert!(event.location_spread_km > 5.0 && event.location_spread_km < 7.0);
    assert!((event.source_agreement_score - 1.0).abs() < f64::EPSILON);
    assert!(event.source_event_uids.contains(&event.preferred_event_uid));

    let crosswalk = pipeline.store().crosswalk_rows().await;
    assert_eq!(crosswalk.len(), 2);
    let preferred: Vec<_> = crosswalk.iter().filter(|r| r.is_preferred).collect();
    assert_eq!(preferred.len(), 1);
    assert_eq!(preferred[0].event_uid, "usgs:us1");
    assert!((preferred[0].match_score - 1.0).abs() < 1e-12);
}

#[tokio::test]
async fn aftershock_splits_into_two_events() {
    let origin = t0();
    let mut payloads = HashMap::new();
    payloads.insert(
        SourceTag::Usgs,
        Ok(usgs_payload(&[
            usgs_feature("main", origin, 35.0, 25.0, 10.0, 5.0, "reviewed"),
            usgs_feature(
                "after",
                origin + Duration::seconds(45),
                35.0,
                25.0,
                10.0,
                4.2,
                "automatic",
            ),
        ])),
    );

    let pipeline = pipeline_with(vec![SourceTag::Usgs], payloads);
    let run = pipeline.run_batch().await.unwrap();

    assert_eq!(run.status, RunStatus::Ok);
    assert_eq!(run.unified_events_count, 2);

    let mut unified = pipeline.store().unified_events().await;
    unified.sort_by(|a, b| a.origin_time_utc.cmp(&b.origin_time_utc));
    assert_eq!(unified[0].preferred_event_uid, "usgs:main");
    assert_eq!(unified[1].preferred_event_uid, "usgs:after");
    assert!(unified.iter().all(|u| u.num_sources == 1));
}

#[tokio::test]
async fn null_magnitude_feature_is_dead_lettered() {
    let ms = t0().timestamp_millis();
    let bad_feature = format!(
        r#"{{"type": "Feature", "id": "usbad",
        "geometry": {{"type": "Point", "coordinates": [25.0, 35.0, 10.0]}},
        "properties": {{"mag": null, "magType": "ml", "time": {ms}}}}}"#
    );
    let mut payloads = HashMap::new();
    payloads.insert(SourceTag::Usgs, Ok(usgs_payload(&[bad_feature])));

    let pipeline = pipeline_with(vec![SourceTag::Usgs], payloads);
    let run = pipeline.run_batch().await.unwrap();

    assert_eq!(run.status, RunStatus::Ok);
    assert_eq!(run.raw_events_count, 0);
    assert_eq!(run.dead_letter_count, 1);
    assert_eq!(run.unified_events_count, 0);

    let letters = pipeline.store().dead_letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].source_event_id.as_deref(), Some("usbad"));
    assert!(letters[0].error_messages[0].contains("missing magnitude"));
    assert!(pipeline.store().unified_events().await.is_empty());
}

#[tokio::test]
async fn quakeml_without_preferred_magnitude_uses_type_order() {
    let iso = t0().to_rfc3339_opts(SecondsFormat::Millis, true);
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<quakeml xmlns="http://quakeml.org/xmlns/quakeml/1.2">
  <eventParameters publicID="smi:ISC/bulletin">
    <event publicID="smi:ISC/evid=600123456">
      <origin publicID="smi:ISC/origid=1">
        <time><value>{iso}</value></time>
        <latitude><value>35.0</value></latitude>
        <longitude><value>25.0</value></longitude>
        <depth><value>10000</value></depth>
      </origin>
      <magnitude publicID="smi:ISC/magid=1">
        <mag><value>5.5</value></mag><type>mb</type><stationCount>30</stationCount>
      </magnitude>
      <magnitude publicID="smi:ISC/magid=2">
        <mag><value>5.3</value></mag><type>mw</type><stationCount>20</stationCount>
      </magnitude>
    </event>
  </eventParameters>
</quakeml>"#
    );

    let mut payloads = HashMap::new();
    payloads.insert(SourceTag::Isc, Ok(xml.into_bytes()));

    let pipeline = pipeline_with(vec![SourceTag::Isc], payloads);
    let run = pipeline.run_batch().await.unwrap();

    assert_eq!(run.status, RunStatus::Ok);
    let unified = pipeline.store().unified_events().await;
    assert_eq!(unified.len(), 1);
    assert_eq!(unified[0].magnitude_type, "mw");
    assert!((unified[0].magnitude_value - 5.3).abs() < f64::EPSILON);
}

#[tokio::test]
async fn exhausted_source_fails_the_run() {
    let mut payloads = HashMap::new();
    payloads.insert(
        SourceTag::Usgs,
        Err(FetchError::Http5xx {
            agency: SourceTag::Usgs,
            status: 503,
        }),
    );

    let pipeline = pipeline_with(vec![SourceTag::Usgs], payloads);
    let run = pipeline.run_batch().await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.raw_events_count, 0);
    assert!(run.sources_fetched.is_empty());
    assert!(run.error_message.as_deref().unwrap().contains("503"));
    assert_eq!(pipeline.store().raw_count().await, 0);

    let runs = pipeline.store().runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn failing_source_does_not_block_others() {
    let mut payloads = HashMap::new();
    payloads.insert(
        SourceTag::Usgs,
        Ok(usgs_payload(&[usgs_feature(
            "us1",
            t0(),
            35.0,
            25.0,
            10.0,
            5.2,
            "reviewed",
        )])),
    );
    payloads.insert(
        SourceTag::Emsc,
        Err(FetchError::Http5xx {
            agency: SourceTag::Emsc,
            status: 502,
        }),
    );

    let pipeline = pipeline_with(vec![SourceTag::Usgs, SourceTag::Emsc], payloads);
    let run = pipeline.run_batch().await.unwrap();

    assert_eq!(run.status, RunStatus::Ok);
    assert_eq!(run.sources_fetched, vec![SourceTag::Usgs]);
    assert_eq!(run.raw_events_count, 1);
    assert!(run.error_message.as_deref().unwrap().contains("502"));
}

#[tokio::test]
async fn rerunning_clustering_produces_zero_diffs() {
    let origin = t0();
    let mut payloads = HashMap::new();
    payloads.insert(
        SourceTag::Usgs,
        Ok(usgs_payload(&[usgs_feature(
            "us1", origin, 35.0, 25.0, 10.0, 5.2, "reviewed",
        )])),
    );
    payloads.insert(
        SourceTag::Emsc,
        Ok(emsc_payload(
            "em1",
            origin + Duration::seconds(10),
            35.05,
            25.03,
            12.0,
            5.1,
        )),
    );

    let pipeline = pipeline_with(vec![SourceTag::Usgs, SourceTag::Emsc], payloads);
    pipeline.run_batch().await.unwrap();

    let unified_first = pipeline.store().unified_events().await;
    let crosswalk_first = pipeline.store().crosswalk_rows().await;
    assert_eq!(unified_first.len(), 1);

    // Same raw input, later wall clock: identity and rows must not churn
    pipeline
        .clustering_pass(Utc::now() + Duration::hours(6))
        .await
        .unwrap();

    assert_eq!(pipeline.store().unified_events().await, unified_first);
    assert_eq!(pipeline.store().crosswalk_rows().await, crosswalk_first);
}

#[tokio::test]
async fn failed_window_read_leaves_unified_state_intact() {
    let mut payloads = HashMap::new();
    payloads.insert(
        SourceTag::Usgs,
        Ok(usgs_payload(&[usgs_feature(
            "us1",
            t0(),
            35.0,
            25.0,
            10.0,
            5.2,
            "reviewed",
        )])),
    );

    let pipeline = pipeline_with(vec![SourceTag::Usgs], payloads);
    pipeline.run_batch().await.unwrap();
    let unified_before = pipeline.store().unified_events().await;
    assert_eq!(unified_before.len(), 1);

    pipeline.store().set_fail_reads(true);
    let run = pipeline.run_batch().await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);

    // Raw log keeps appending; unified output is untouched
    pipeline.store().set_fail_reads(false);
    assert_eq!(pipeline.store().unified_events().await, unified_before);
}

#[tokio::test(start_paused = true)]
async fn worker_stops_promptly_on_shutdown() {
    let mut payloads = HashMap::new();
    payloads.insert(
        SourceTag::Usgs,
        Ok(usgs_payload(&[usgs_feature(
            "us1",
            t0(),
            35.0,
            25.0,
            10.0,
            5.2,
            "reviewed",
        )])),
    );

    let pipeline = pipeline_with(vec![SourceTag::Usgs], payloads);
    let (shutdown, _) = tokio::sync::broadcast::channel(1);

    let worker = {
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pipeline.run_worker(&shutdown).await })
    };

    // Let the poll loop make progress, then stop it
    tokio::time::sleep(std::time::Duration::from_secs(90)).await;
    shutdown.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop after shutdown")
        .unwrap();

    assert!(pipeline.store().raw_count().await >= 1);
}
