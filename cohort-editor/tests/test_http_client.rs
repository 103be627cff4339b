use std::time::Duration;

use httpmock::Method::{GET, PATCH, POST};
use httpmock::MockServer;
use serde_json::json;

use cohort_editor::client::{ClientError, CohortClient, HttpCohortClient};
use cohort_editor::cohort_models::{Cohort, CsvUpload};
use cohort_editor::format::{CohortFormat, CriteriaFilters};

fn cohort_response(id: i64, is_calculating: bool) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Dashboard power users",
        "description": "",
        "is_static": false,
        "groups": [],
        "filters": {
            "properties": {
                "id": "39777",
                "type": "OR",
                "values": [{
                    "id": "70427",
                    "type": "OR",
                    "values": [{
                        "type": "behavioral",
                        "value": "performed_event",
                        "event_type": "events",
                        "time_value": 30,
                        "time_interval": "day",
                        "key": "dashboard date range changed"
                    }]
                }]
            }
        },
        "is_calculating": is_calculating,
        "count": null,
        "errors_calculating": 0,
        "deleted": false
    })
}

fn client_for(server: &MockServer) -> HttpCohortClient {
    HttpCohortClient::new(&server.base_url(), 1, "phx_key", Duration::from_secs(5)).unwrap()
}

fn cohort_from(value: serde_json::Value) -> Cohort {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_fetch_cohort() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/projects/1/cohorts/5/")
                .header("authorization", "Bearer phx_key");
            then.status(200).json_body(cohort_response(5, true));
        })
        .await;

    let cohort = client_for(&server).fetch_cohort(5).await.unwrap();

    mock.assert_async().await;
    assert_eq!(cohort.id, Some(5));
    assert!(cohort.is_calculating);
    assert_eq!(cohort.filters.properties.id, "39777");
}

#[tokio::test]
async fn test_create_cohort_posts_json() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/projects/1/cohorts/")
                .json_body_partial(r#"{"name": "Dashboard power users", "is_static": false, "groups": []}"#);
            then.status(201).json_body(cohort_response(12, true));
        })
        .await;
    let payload = CriteriaFilters.payload(&Cohort {
        id: None,
        ..cohort_from(cohort_response(0, false))
    });

    let created = client_for(&server).create_cohort(&payload).await.unwrap();

    mock.assert_async().await;
    assert_eq!(created.id, Some(12));
}

#[tokio::test]
async fn test_update_cohort_patches_by_id() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/api/projects/1/cohorts/5/")
                .json_body_partial(r#"{"filters": {"properties": {"id": "39777", "type": "OR"}}}"#);
            then.status(200).json_body(cohort_response(5, false));
        })
        .await;
    let payload = CriteriaFilters.payload(&cohort_from(cohort_response(5, false)));

    let updated = client_for(&server).update_cohort(5, &payload).await.unwrap();

    mock.assert_async().await;
    assert!(!updated.is_calculating);
}

#[tokio::test]
async fn test_static_cohort_with_csv_is_sent_as_multipart() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/projects/1/cohorts/")
                .body_contains("filename=\"users.csv\"")
                .body_contains("distinct_id");
            then.status(201).json_body(json!({
                "id": 8,
                "name": "Uploaded",
                "is_static": true,
                "filters": null,
                "groups": [],
                "is_calculating": true
            }));
        })
        .await;
    let cohort = Cohort {
        id: None,
        name: "Uploaded".to_string(),
        is_static: true,
        csv: Some(CsvUpload {
            file_name: "users.csv".to_string(),
            contents: b"distinct_id\nuser-1\nuser-2\n".to_vec(),
        }),
        ..cohort_from(cohort_response(0, false))
    };

    let created = client_for(&server)
        .create_cohort(&CriteriaFilters.payload(&cohort))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(created.id, Some(8));
    assert!(created.is_static);
    assert_eq!(created.csv, None);
}

#[tokio::test]
async fn test_delete_cohort_soft_deletes() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/api/projects/1/cohorts/5/")
                .json_body(json!({"deleted": true}));
            then.status(200).json_body(cohort_response(5, false));
        })
        .await;

    client_for(&server).delete_cohort(5).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_not_found_carries_detail() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/projects/1/cohorts/404/");
            then.status(404).json_body(json!({
                "type": "invalid_request",
                "code": "not_found",
                "detail": "Not found.",
                "attr": null
            }));
        })
        .await;

    let result = client_for(&server).fetch_cohort(404).await;

    let Err(error) = result else {
        panic!("expected an error");
    };
    assert!(matches!(error, ClientError::NotFound(_)));
    assert_eq!(error.detail(), Some("Not found."));
}

#[tokio::test]
async fn test_validation_error_carries_detail() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(PATCH).path("/api/projects/1/cohorts/5/");
            then.status(400).json_body(json!({
                "type": "validation_error",
                "code": "invalid_input",
                "detail": "Cohort name must be unique.",
                "attr": "name"
            }));
        })
        .await;
    let payload = CriteriaFilters.payload(&cohort_from(cohort_response(5, false)));

    let error = client_for(&server)
        .update_cohort(5, &payload)
        .await
        .unwrap_err();

    assert!(matches!(error, ClientError::Validation(_)));
    assert_eq!(error.detail(), Some("Cohort name must be unique."));
}

#[tokio::test]
async fn test_server_error_without_json_body() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/projects/1/cohorts/5/");
            then.status(502).body("bad gateway");
        })
        .await;

    let error = client_for(&server).fetch_cohort(5).await.unwrap_err();

    match error {
        ClientError::Server { status, detail } => {
            assert_eq!(status, 502);
            assert_eq!(detail, "bad gateway");
        }
        other => panic!("unexpected error: {other}"),
    }
}
