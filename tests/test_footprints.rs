//! Corporate carbon footprints through the HTTP API.

mod common;

use common::*;
use reqwest::StatusCode;
use serde_json::{json, Value};

fn footprint(year: i32) -> Value {
    json!({
        "year": year,
        "period": "annual",
        "starts_on": format!("{}-01-01", year),
        "ends_on": format!("{}-12-31", year),
        "emissions": {
            "scope1": { "stationary_combustion": 20.0 },
            "scope2": { "electricity": 20.0 },
            "scope3": { "business_travel": 10.0 }
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn footprint_workflow() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (company, _) = app.company("textil", 'C').await;
    let (other, _) = app.company("alfa", 'A').await;
    let (mill, _) = app.mill("valle").await;

    let (status, _) = app.post("/footprints", &mill, footprint(2024)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.post("/footprints", &company, footprint(2024)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["status"], "draft");
    assert_eq!(body["data"]["totals"]["total"], 50.0);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.post("/footprints", &company, footprint(2024)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.get(&format!("/footprints/{}", id), &other).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(&format!("/footprints/{}", id), &company, json!({ "compensation_pct": 50.0 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["compensation"]["tokens_needed"], 25.0);

    let (status, _) = app.post(&format!("/footprints/{}/verify", id), &admin, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post(&format!("/footprints/{}/submit", id), &company, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.post(&format!("/footprints/{}/verify", id), &company, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.post(&format!("/footprints/{}/verify", id), &admin, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.post(&format!("/footprints/{}/publish", id), &company, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "published");

    let (status, _) = app
        .put(&format!("/footprints/{}", id), &company, json!({ "compensation_pct": 80.0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get("/footprints?status=published", &company).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn comparison_against_the_previous_year() {
    let app = spawn_app().await;
    let (company, _) = app.company("textil", 'C').await;

    let (_, body) = app.post("/footprints", &company, footprint(2024)).await;
    let current = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.get(&format!("/footprints/{}/comparison", current), &company).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.post("/footprints", &company, footprint(2023)).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app.get(&format!("/footprints/{}/comparison", current), &company).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_emissions_are_rejected() {
    let app = spawn_app().await;
    let (company, _) = app.company("textil", 'C').await;
    let mut body = footprint(2024);
    body["emissions"]["scope1"]["stationary_combustion"] = json!(-5.0);
    let (status, _) = app.post("/footprints", &company, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
