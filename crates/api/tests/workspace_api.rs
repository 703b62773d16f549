//! `/api/v1/workspaces` endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, delete, get, post_empty, post_json};
use serde_json::json;

#[tokio::test]
async fn create_workspace_returns_201() {
    let app = build_test_app().await;
    let response = post_json(&app.router, "/api/v1/workspaces", json!({ "name": "  Intro  " })).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["name"], "Intro");
    assert!(json["data"]["id"].is_number());
}

#[tokio::test]
async fn duplicate_name_returns_409() {
    let app = build_test_app().await;
    app.create_workspace("intro").await;

    let response = post_json(&app.router, "/api/v1/workspaces", json!({ "name": "intro" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn blank_name_returns_400() {
    let app = build_test_app().await;
    let response = post_json(&app.router, "/api/v1/workspaces", json!({ "name": "   " })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn list_workspaces_in_creation_order() {
    let app = build_test_app().await;
    app.create_workspace("first").await;
    app.create_workspace("second").await;

    let json = body_json(get(&app.router, "/api/v1/workspaces").await).await;
    let names: Vec<_> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["first", "second"]);
}

#[tokio::test]
async fn get_missing_workspace_returns_404() {
    let app = build_test_app().await;
    let response = get(&app.router, "/api/v1/workspaces/999").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn workspace_detail_shows_context_and_segments() {
    let app = build_test_app().await;
    let id = app.create_workspace("story").await;

    let fresh = body_json(get(&app.router, &format!("/api/v1/workspaces/{id}")).await).await;
    assert_eq!(fresh["data"]["increments"], 0);
    assert_eq!(fresh["data"]["context"], "");
    assert!(fresh["data"]["scene"].is_null());

    for prompt in ["circle", "square"] {
        post_json(
            &app.router,
            &format!("/api/v1/workspaces/{id}/jobs"),
            json!({ "prompt": prompt }),
        )
        .await;
    }
    app.wait_idle().await;

    let detail = body_json(get(&app.router, &format!("/api/v1/workspaces/{id}")).await).await;
    assert_eq!(detail["data"]["increments"], 2);
    assert_eq!(detail["data"]["busy"], false);
    let scene = detail["data"]["scene"].as_str().unwrap();
    assert!(scene.contains("class Demo(Scene):"));
    assert!(scene.contains("self.next_section()"));

    let segments = body_json(get(&app.router, &format!("/api/v1/workspaces/{id}/segments")).await).await;
    let segments = segments["data"].as_array().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0]["duration_ms"], 2000);
}

#[tokio::test]
async fn reset_clears_context() {
    let app = build_test_app().await;
    let id = app.create_workspace("resettable").await;
    post_json(
        &app.router,
        &format!("/api/v1/workspaces/{id}/jobs"),
        json!({ "prompt": "circle" }),
    )
    .await;
    app.wait_idle().await;

    let response = post_empty(&app.router, &format!("/api/v1/workspaces/{id}/reset")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["removed"], 1);

    let detail = body_json(get(&app.router, &format!("/api/v1/workspaces/{id}")).await).await;
    assert_eq!(detail["data"]["increments"], 0);

    // History survives a reset.
    let jobs = body_json(get(&app.router, &format!("/api/v1/workspaces/{id}/jobs")).await).await;
    assert_eq!(jobs["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn reset_while_running_returns_409() {
    let app = build_test_app().await;
    let id = app.create_workspace("busy").await;
    let job = body_json(
        post_json(
            &app.router,
            &format!("/api/v1/workspaces/{id}/jobs"),
            json!({ "prompt": "forever" }),
        )
        .await,
    )
    .await;

    let response = post_empty(&app.router, &format!("/api/v1/workspaces/{id}/reset")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let job_id = job["data"]["id"].as_i64().unwrap();
    post_empty(&app.router, &format!("/api/v1/jobs/{job_id}/cancel")).await;
    app.wait_idle().await;
}

#[tokio::test]
async fn delete_workspace_returns_204_and_removes_jobs() {
    let app = build_test_app().await;
    let id = app.create_workspace("doomed").await;
    let job = body_json(
        post_json(
            &app.router,
            &format!("/api/v1/workspaces/{id}/jobs"),
            json!({ "prompt": "circle" }),
        )
        .await,
    )
    .await;
    app.wait_idle().await;

    let response = delete(&app.router, &format!("/api/v1/workspaces/{id}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get(&app.router, &format!("/api/v1/workspaces/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let job_id = job["data"]["id"].as_i64().unwrap();
    let response = get(&app.router, &format!("/api/v1/jobs/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
