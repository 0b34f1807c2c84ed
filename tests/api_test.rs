mod common;

use reqwest::StatusCode;
use serde_json::Value;
use zombie_ns::ClusterApi;

async fn json(resp: reqwest::Response) -> Value {
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = common::start().await;

    let resp = reqwest::get(server.url("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["message"], "Ok");
}

#[tokio::test]
async fn test_workspace_lifecycle() {
    let server = common::start().await;
    let client = reqwest::Client::new();

    // Create
    let resp = client
        .post(server.url("/v1/ns"))
        .header("Authorization", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = json(resp).await;
    let name = created["namespace"].as_str().unwrap().to_string();
    assert!(name.starts_with("zombie-"));
    assert_eq!(name.len(), 39);
    assert!(!created["token"].as_str().unwrap().is_empty());
    assert_eq!(
        created["message"],
        format!("Successfully created namespace {}", name)
    );

    // List
    let resp = client
        .get(server.url("/v1/ns"))
        .header("Authorization", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["namespaces"], serde_json::json!([name]));

    // Get
    let resp = client
        .get(server.url(&format!("/v1/ns/{}", name)))
        .header("Authorization", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let status = json(resp).await;
    assert_eq!(status["namespace"], name.as_str());
    assert_eq!(status["status"], "Active");
    assert!(status["uid"].is_string());
    assert!(status["resourceVersion"].is_string());
    let created_at = status["creationTime"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());

    // Delete
    let resp = client
        .delete(server.url(&format!("/v1/ns/{}", name)))
        .header("Authorization", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        json(resp).await["message"],
        format!("Namespace {} deleted", name)
    );

    // Gone
    let resp = client
        .get(server.url(&format!("/v1/ns/{}", name)))
        .header("Authorization", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json(resp).await["message"], "Not found");
}

#[tokio::test]
async fn test_unauthorized_requests() {
    let server = common::start().await;
    let client = reqwest::Client::new();

    let resp = client.get(server.url("/v1/ns")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(resp).await["message"], "Not Authorized");

    let resp = client
        .post(server.url("/v1/ns"))
        .header("Authorization", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Role other than "user" is not eligible.
    let resp = client
        .post(server.url("/v1/ns"))
        .header("Authorization", "T3")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // The header value is compared as-is.
    let resp = client
        .get(server.url("/v1/ns"))
        .header("Authorization", "Bearer T1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .delete(server.url("/v1/ns/zombie-anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(server.cluster.list_namespaces().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_other_owners_workspace_is_not_found() {
    let server = common::start().await;
    let client = reqwest::Client::new();

    let created = json(
        client
            .post(server.url("/v1/ns"))
            .header("Authorization", "T1")
            .send()
            .await
            .unwrap(),
    )
    .await;
    let name = created["namespace"].as_str().unwrap().to_string();

    for request in [
        client.get(server.url(&format!("/v1/ns/{}", name))),
        client.delete(server.url(&format!("/v1/ns/{}", name))),
    ] {
        let resp = request.header("Authorization", "T2").send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(resp).await["message"], "Not found");
    }

    let resp = client
        .get(server.url("/v1/ns"))
        .header("Authorization", "T2")
        .send()
        .await
        .unwrap();
    assert_eq!(json(resp).await["namespaces"], serde_json::json!([]));

    // Still alive for its owner.
    let resp = client
        .get(server.url(&format!("/v1/ns/{}", name)))
        .header("Authorization", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_names_outside_convention_are_not_found() {
    let server = common::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(server.url("/v1/ns/kube-system"))
        .header("Authorization", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
