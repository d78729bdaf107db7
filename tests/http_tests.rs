//! End-to-end tests: a real server on an ephemeral port, driven over HTTP.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use neuroboard::feeder::Feeder;
use neuroboard::web::{AppState, Server};
use neuroboard::{GroupCount, Participant, ParticipantFilter, Store};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::oneshot;

const EXAMPLE_DOC: &str = r#"[{"external_id":"A1","diagnosis":"ADHD","age":8,"gender":"Male","state":"NY","joined_at":"2023-01-01T00:00:00"}]"#;

const MIXED_DOC: &str = r#"[
    {"external_id":"M1","diagnosis":"ADHD","age":8,"gender":"Male","state":"NY","joined_at":"2023-01-01T00:00:00"},
    {"external_id":"M2","diagnosis":"Autism","age":12,"gender":"Female","state":"NY","joined_at":"2023-01-02T00:00:00"},
    {"external_id":"M3","diagnosis":"ADHD","age":5,"gender":"Female","state":"CA","joined_at":"2023-01-03T00:00:00"},
    {"external_id":"M4","diagnosis":"Anxiety","age":15,"gender":"Other","state":"TX","joined_at":"2023-01-04T00:00:00"},
    {"external_id":"M5","diagnosis":"Dyslexia","age":8,"gender":"Male","state":"CA","joined_at":"2023-01-05T00:00:00"},
    {"external_id":"M6","diagnosis":"ADHD","age":17,"gender":"Male","state":"FL","joined_at":"2023-01-06T00:00:00"}
]"#;

struct TestServer {
    base: String,
    store: Store,
    client: reqwest::Client,
    _seed_file: NamedTempFile,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(seed_doc: &str) -> Self {
        let mut seed_file = NamedTempFile::new().unwrap();
        seed_file.write_all(seed_doc.as_bytes()).unwrap();

        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(store.clone(), seed_file.path());
        let server = Server::bind("127.0.0.1:0", state).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        Self {
            base: format!("http://{addr}"),
            store,
            client: reqwest::Client::new(),
            _seed_file: seed_file,
            shutdown: Some(tx),
        }
    }

    async fn seeded(seed_doc: &str) -> Self {
        let server = Self::start(seed_doc).await;
        let resp = server.post("/seed").await;
        assert_eq!(resp.status(), 200);
        server
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }

    async fn count(&self, query: &str) -> u64 {
        let body: Value = self.get(&format!("/participants/count{query}")).await.json().await.unwrap();
        body["count"].as_u64().unwrap()
    }

    async fn chart(&self, dim: &str, query: &str) -> Vec<GroupCount> {
        let resp = self.get(&format!("/chart-data/{dim}{query}")).await;
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn as_map(groups: Vec<GroupCount>) -> HashMap<String, u64> {
    groups.into_iter().map(|g| (g.label, g.value)).collect()
}

// -- seed ------------------------------------------------------------------

#[tokio::test]
async fn test_seed_example_then_count_and_gender_chart() {
    let server = TestServer::start(EXAMPLE_DOC).await;

    let resp = server.post("/seed").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "message": "1 participants added" }));

    let count: Value = server.get("/participants/count").await.json().await.unwrap();
    assert_eq!(count, serde_json::json!({ "count": 1 }));

    let chart: Value = server.get("/chart-data/gender").await.json().await.unwrap();
    assert_eq!(chart, serde_json::json!([{ "label": "Male", "value": 1 }]));
}

#[tokio::test]
async fn test_seed_twice_is_conflict_and_keeps_rows() {
    let server = TestServer::seeded(MIXED_DOC).await;

    let resp = server.post("/seed").await;
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("M1"));

    assert_eq!(server.count("").await, 6);
}

#[tokio::test]
async fn test_seed_with_get_is_405() {
    let server = TestServer::start(EXAMPLE_DOC).await;
    let resp = server.get("/seed").await;
    assert_eq!(resp.status(), 405);
    assert_eq!(server.count("").await, 0);
}

// -- list ------------------------------------------------------------------

#[tokio::test]
async fn test_list_returns_all_fields_in_insert_order() {
    let server = TestServer::seeded(MIXED_DOC).await;
    let rows: Vec<Participant> = server.get("/participants").await.json().await.unwrap();
    assert_eq!(rows.len(), 6);
    let ids: Vec<_> = rows.iter().map(|p| p.external_id.as_str()).collect();
    assert_eq!(ids, vec!["M1", "M2", "M3", "M4", "M5", "M6"]);

    let raw: Value = server.get("/participants?limit=1").await.json().await.unwrap();
    let first = raw[0].as_object().unwrap();
    for key in ["id", "external_id", "diagnosis", "age", "gender", "state", "joined_at"] {
        assert!(first.contains_key(key), "missing {key}");
    }
    assert_eq!(first["joined_at"], "2023-01-01T00:00:00");
}

#[tokio::test]
async fn test_list_filters_and_paginates() {
    let server = TestServer::seeded(MIXED_DOC).await;

    let rows: Vec<Participant> = server
        .get("/participants?gender=Male&age_min=8&age_max=16")
        .await
        .json()
        .await
        .unwrap();
    let ids: Vec<_> = rows.iter().map(|p| p.external_id.as_str()).collect();
    assert_eq!(ids, vec!["M1", "M5"]);

    let page: Vec<Participant> = server
        .get("/participants?limit=2&offset=2")
        .await
        .json()
        .await
        .unwrap();
    let ids: Vec<_> = page.iter().map(|p| p.external_id.as_str()).collect();
    assert_eq!(ids, vec!["M3", "M4"]);
}

#[tokio::test]
async fn test_list_limit_bounds() {
    let server = TestServer::seeded(MIXED_DOC).await;
    for (query, status) in [
        ("limit=0", 400),
        ("limit=501", 400),
        ("offset=-1", 400),
        ("limit=1", 200),
        ("limit=500", 200),
        ("limit=x", 400),
    ] {
        let resp = server.get(&format!("/participants?{query}")).await;
        assert_eq!(resp.status().as_u16(), status, "query {query}");
    }
}

#[tokio::test]
async fn test_unmatched_filter_is_empty() {
    let server = TestServer::seeded(MIXED_DOC).await;
    let rows: Vec<Participant> = server.get("/participants?state=ZZ").await.json().await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(server.count("?state=ZZ").await, 0);
    assert!(server.chart("diagnosis", "?state=ZZ").await.is_empty());
}

#[tokio::test]
async fn test_percent_encoded_filter_values() {
    let server = TestServer::seeded(
        r#"[{"external_id":"S1","diagnosis":"Sensory Processing","age":7,"gender":"Male","state":"NY","joined_at":"2023-01-01T00:00:00"}]"#,
    )
    .await;
    assert_eq!(server.count("?diagnosis=Sensory+Processing").await, 1);
    assert_eq!(server.count("?diagnosis=Sensory%20Processing").await, 1);
}

// -- count & charts --------------------------------------------------------

#[tokio::test]
async fn test_count_matches_list_for_filters() {
    let server = TestServer::seeded(MIXED_DOC).await;
    for query in ["", "?state=NY", "?diagnosis=ADHD&age_max=10", "?gender=Female&state=CA", "?age_min=9"] {
        let sep = if query.is_empty() { "?" } else { "&" };
        let rows: Vec<Participant> = server
            .get(&format!("/participants{query}{sep}limit=500"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(server.count(query).await, rows.len() as u64, "query {query}");
    }
}

#[tokio::test]
async fn test_chart_sums_match_count_without_grouping_dimension() {
    let server = TestServer::seeded(MIXED_DOC).await;

    let gender = server.chart("gender", "?state=NY&gender=Male").await;
    assert_eq!(gender.iter().map(|g| g.value).sum::<u64>(), server.count("?state=NY").await);

    let state = server.chart("state", "?diagnosis=ADHD&state=NY").await;
    assert_eq!(state.iter().map(|g| g.value).sum::<u64>(), server.count("?diagnosis=ADHD").await);

    let age = server.chart("age", "?gender=Male&age_min=100").await;
    assert_eq!(age.iter().map(|g| g.value).sum::<u64>(), server.count("?gender=Male").await);

    let diagnosis = server.chart("diagnosis", "?age_min=6&diagnosis=Nope").await;
    assert_eq!(diagnosis.iter().map(|g| g.value).sum::<u64>(), server.count("?age_min=6").await);
}

#[tokio::test]
async fn test_age_chart_sorted_ascending() {
    let server = TestServer::seeded(MIXED_DOC).await;
    let age = server.chart("age", "").await;
    let labels: Vec<i64> = age.iter().map(|g| g.label.parse().unwrap()).collect();
    assert_eq!(labels, vec![5, 8, 12, 15, 17]);
    assert_eq!(age[1].value, 2);
}

#[tokio::test]
async fn test_state_chart_values() {
    let server = TestServer::seeded(MIXED_DOC).await;
    let states = as_map(server.chart("state", "?gender=Male").await);
    assert_eq!(states.get("NY"), Some(&1));
    assert_eq!(states.get("CA"), Some(&1));
    assert_eq!(states.get("FL"), Some(&1));
    assert_eq!(states.len(), 3);
}

#[tokio::test]
async fn test_unknown_routes() {
    let server = TestServer::start(EXAMPLE_DOC).await;
    assert_eq!(server.get("/").await.status(), 404);
    assert_eq!(server.get("/chart-data/height").await.status(), 404);
}

// -- feeder alongside the server -------------------------------------------

#[tokio::test]
async fn test_feeder_rows_visible_through_http() {
    let server = TestServer::seeded(MIXED_DOC).await;
    let handle = Feeder::new(server.store.clone())
        .interval(Duration::from_millis(50))
        .spawn();

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await;

    let total = server.count("").await;
    assert!(total > 6, "feeder should have added rows, total {total}");
    assert_eq!(
        total,
        server.store.count(ParticipantFilter::all()).await.unwrap()
    );

    let gender = server.chart("gender", "").await;
    assert_eq!(gender.iter().map(|g| g.value).sum::<u64>(), total);
}
