//! End-to-end tests for the bucket and object API.

mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use bucket_explorer::services::memory_backend::Operation;
use common::{connected_app, spawn_app};
use http_body_util::BodyExt;
use serde_json::json;

#[tokio::test]
async fn test_healthz() {
    let app = spawn_app().await;
    let (status, body) = app.get("/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_readyz_reports_missing_connection_without_failing() {
    let app = spawn_app().await;
    let (status, body) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["connection"]["ok"], false);
}

#[tokio::test]
async fn test_readyz_reports_active_endpoint() {
    let app = connected_app().await;
    let (status, body) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["connection"]["ok"], true);
    assert_eq!(body["checks"]["connection"]["endpoint"], "http://localhost:9000");
}

#[tokio::test]
async fn test_requests_without_active_connection_are_refused() {
    let app = spawn_app().await;
    let (status, body) = app.get("/api/buckets").await;

    assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
    assert_eq!(body["code"], "NO_ACTIVE_CONNECTION");
    assert!(app.backend.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_input_never_reaches_backend() {
    let app = connected_app().await;

    let (status, _) = app
        .json(Method::POST, "/api/buckets", Some(json!({ "name": "Bad_Name" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/objects/demo/metadata?key=../etc/passwd").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/objects/ab/stream?key=a.txt").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.backend.calls().is_empty());
}

#[tokio::test]
async fn test_create_and_list_buckets() {
    let app = connected_app().await;

    let (status, body) = app
        .json(Method::POST, "/api/buckets", Some(json!({ "name": "photos" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = app.get("/api/buckets").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["demo", "photos"]);
}

#[tokio::test]
async fn test_listing_shows_folders_and_files() {
    let app = connected_app().await;
    app.backend.seed("demo", &["docs/", "docs/readme.txt"]);

    let (status, body) = app.get("/api/objects/demo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prefixes"], json!(["docs/"]));
    assert_eq!(body["objects"].as_array().unwrap().len(), 1);
    assert_eq!(body["objects"][0]["key"], "docs/");
    assert_eq!(body["objects"][0]["isFolder"], true);
    assert_eq!(body["objects"][0]["size"], 0);

    // the marker equal to the prefix is not listed as a file
    let (status, body) = app.get("/api/objects/demo?prefix=docs/").await;
    assert_eq!(status, StatusCode::OK);
    let objects = body["objects"].as_array().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0]["key"], "docs/readme.txt");
    assert_eq!(objects[0]["isFolder"], false);
    assert_eq!(body["prefix"], "docs/");
}

#[tokio::test]
async fn test_create_folder_normalizes_path() {
    let app = connected_app().await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/objects/demo/folder",
            Some(json!({ "path": "/reports/2024" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.backend.keys("demo"), vec!["reports/2024/"]);
}

#[tokio::test]
async fn test_upload_form_with_resolved_names() {
    let app = connected_app().await;

    let (status, body) = app
        .upload(
            "/api/objects/demo/upload",
            &[
                ("prefix", None, "inbox/".as_bytes()),
                ("names[]", None, "".as_bytes()),
                ("names[]", None, "holiday (2).jpg".as_bytes()),
                ("files[]", Some("report.pdf"), "pdf bytes".as_bytes()),
                ("files[]", Some("my photo.jpg"), "jpeg bytes".as_bytes()),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["uploaded"][0]["key"], "inbox/report.pdf");
    assert_eq!(body["uploaded"][1]["key"], "inbox/holiday (2).jpg");
    assert_eq!(
        app.backend.object_bytes("demo", "inbox/report.pdf").unwrap(),
        b"pdf bytes".to_vec()
    );
}

#[tokio::test]
async fn test_upload_auto_rename_avoids_overwrite() {
    let app = connected_app().await;
    app.backend.seed("demo", &["inbox/report.pdf"]);

    let (status, body) = app
        .upload(
            "/api/objects/demo/upload",
            &[
                ("prefix", None, "inbox/".as_bytes()),
                ("autoRename", None, "true".as_bytes()),
                ("files", Some("report.pdf"), "second copy".as_bytes()),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded"][0]["key"], "inbox/report (1).pdf");
    assert_eq!(
        app.backend.object_bytes("demo", "inbox/report.pdf").unwrap(),
        b"inbox/report.pdf".to_vec()
    );
}

#[tokio::test]
async fn test_large_upload_goes_multipart() {
    let app = connected_app().await;
    let payload: Vec<u8> = (0..100u8).collect();

    let (status, body) = app
        .upload(
            "/api/objects/demo/upload",
            &[("files", Some("blob.bin"), payload.as_slice())],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded"][0]["size"], 100);
    assert_eq!(app.backend.count_calls(Operation::PutObject), 0);
    assert_eq!(app.backend.count_calls(Operation::CompleteMultipartUpload), 1);
    assert_eq!(app.backend.completed_part_lists(), vec![vec![1, 2, 3, 4, 5, 6, 7]]);
    assert_eq!(app.backend.object_bytes("demo", "blob.bin").unwrap(), payload);
}

#[tokio::test]
async fn test_failed_part_aborts_upload() {
    let app = connected_app().await;
    app.backend.fail_part(3);
    let payload = vec![7u8; 100];

    let (status, _) = app
        .upload(
            "/api/objects/demo/upload",
            &[("files", Some("blob.bin"), payload.as_slice())],
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.backend.count_calls(Operation::AbortMultipartUpload), 1);
    assert_eq!(app.backend.count_calls(Operation::CompleteMultipartUpload), 0);
    assert_eq!(app.backend.open_multipart_uploads(), 0);
    assert!(app.backend.object_bytes("demo", "blob.bin").is_none());
}

#[tokio::test]
async fn test_large_upload_to_missing_bucket_keeps_backend_status() {
    let app = connected_app().await;
    let payload = vec![1u8; 100];

    let (status, body) = app
        .upload(
            "/api/objects/nobucket/upload",
            &[("files", Some("blob.bin"), payload.as_slice())],
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["s3Code"], "NoSuchBucket");
    assert_eq!(app.backend.count_calls(Operation::UploadPart), 0);
}

#[tokio::test]
async fn test_failed_upload_lists_files_already_stored() {
    let app = connected_app().await;
    app.backend.fail_operation(Operation::PutObject, "inbox/b.txt");

    let (status, body) = app
        .upload(
            "/api/objects/demo/upload",
            &[
                ("prefix", None, "inbox/".as_bytes()),
                ("files", Some("a.txt"), "first".as_bytes()),
                ("files", Some("b.txt"), "second".as_bytes()),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["s3Code"], "InternalError");
    assert_eq!(body["details"]["uploaded"], json!(["inbox/a.txt"]));
    assert_eq!(
        app.backend.object_bytes("demo", "inbox/a.txt").unwrap(),
        b"first".to_vec()
    );
}

#[tokio::test]
async fn test_upload_without_files_is_rejected() {
    let app = connected_app().await;
    let (status, _) = app
        .upload("/api/objects/demo/upload", &[("prefix", None, "inbox/".as_bytes())])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_url_and_metadata() {
    let app = connected_app().await;
    app.backend.seed("demo", &["a.txt"]);

    let (status, body) = app
        .get("/api/objects/demo/download?key=a.txt&expiresIn=60")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "memory://demo/a.txt?X-Amz-Expires=60");

    let (_, body) = app.get("/api/objects/demo/download?key=a.txt").await;
    assert_eq!(body["url"], "memory://demo/a.txt?X-Amz-Expires=3600");

    let (status, body) = app.get("/api/objects/demo/metadata?key=a.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "a.txt");
    assert_eq!(body["size"], 5);
    assert_eq!(body["isFolder"], false);
}

#[tokio::test]
async fn test_missing_object_maps_backend_status() {
    let app = connected_app().await;
    let (status, body) = app.get("/api/objects/demo/metadata?key=nope.txt").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["s3Code"], "NoSuchKey");
}

#[tokio::test]
async fn test_stream_object_bytes() {
    let app = connected_app().await;
    app.backend.seed("demo", &["notes/a.txt"]);

    let response = app
        .send(
            Request::builder()
                .uri("/api/objects/demo/stream?key=notes/a.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "11");
    assert!(response.headers().contains_key(header::ETAG));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"notes/a.txt");
}

#[tokio::test]
async fn test_rename_folder_moves_every_key() {
    let app = connected_app().await;
    app.backend
        .seed("demo", &["old/", "old/a.txt", "old/sub/b.txt", "other.txt"]);

    let (status, body) = app
        .json(
            Method::PUT,
            "/api/objects/demo/rename",
            Some(json!({ "oldKey": "old/", "newKey": "new" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(
        app.backend.keys("demo"),
        vec!["new/", "new/a.txt", "new/sub/b.txt", "other.txt"]
    );
}

#[tokio::test]
async fn test_rename_partial_failure_reports_details() {
    let app = connected_app().await;
    app.backend.seed("demo", &["old/a.txt", "old/b.txt"]);
    app.backend.fail_operation(Operation::CopyObject, "old/b.txt");

    let (status, body) = app
        .json(
            Method::PUT,
            "/api/objects/demo/rename",
            Some(json!({ "oldKey": "old/", "newKey": "new/" })),
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["details"]["succeeded"], json!(["old/a.txt"]));
    assert_eq!(body["details"]["failed"][0]["key"], "old/b.txt");
    assert_eq!(app.backend.keys("demo"), vec!["new/a.txt", "old/b.txt"]);
}

#[tokio::test]
async fn test_rename_missing_file_is_not_found() {
    let app = connected_app().await;
    let (status, body) = app
        .json(
            Method::PUT,
            "/api/objects/demo/rename",
            Some(json!({ "oldKey": "ghost.txt", "newKey": "still-ghost.txt" })),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["s3Code"], "NoSuchKey");
    assert_eq!(app.backend.count_calls(Operation::DeleteObject), 0);
}

#[tokio::test]
async fn test_copy_across_buckets() {
    let app = connected_app().await;
    app.backend.seed("demo", &["a.txt"]);
    app.backend.seed("archive", &[]);

    let (status, _) = app
        .json(
            Method::POST,
            "/api/objects/demo/copy",
            Some(json!({ "sourceKey": "a.txt", "destBucket": "archive", "destKey": "2024/a.txt" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.backend.keys("demo"), vec!["a.txt"]);
    assert_eq!(
        app.backend.object_bytes("archive", "2024/a.txt").unwrap(),
        b"a.txt".to_vec()
    );
}

#[tokio::test]
async fn test_delete_single_file() {
    let app = connected_app().await;
    app.backend.seed("demo", &["a.txt", "b.txt"]);

    let (status, _) = app.json(Method::DELETE, "/api/objects/demo?key=a.txt", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.backend.keys("demo"), vec!["b.txt"]);
}

#[tokio::test]
async fn test_delete_folder_with_refused_key() {
    let app = connected_app().await;
    app.backend.seed("demo", &["f/", "f/1", "f/2"]);
    app.backend.fail_operation(Operation::DeleteObject, "f/2");

    let (status, body) = app
        .json(Method::DELETE, "/api/objects/demo?key=f/&isFolder=true", None)
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["details"]["succeeded"], json!(["f/", "f/1"]));
    assert_eq!(body["details"]["failed"][0]["key"], "f/2");
    assert_eq!(app.backend.keys("demo"), vec!["f/2"]);
}

#[tokio::test]
async fn test_batch_delete_isolates_failures() {
    let app = connected_app().await;
    app.backend
        .seed("demo", &["a.txt", "dir/", "dir/x", "locked.txt"]);
    app.backend.fail_operation(Operation::DeleteObject, "locked.txt");

    let (status, body) = app
        .json(
            Method::POST,
            "/api/objects/demo/batch-delete",
            Some(json!({
                "objects": [
                    { "key": "a.txt" },
                    { "key": "dir/", "isFolder": true },
                    { "key": "locked.txt" },
                    { "key": "../escape" }
                ]
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], json!(["a.txt", "dir/"]));
    let failed: Vec<&str> = body["failed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["key"].as_str().unwrap())
        .collect();
    assert_eq!(failed, vec!["locked.txt", "../escape"]);
    assert_eq!(app.backend.keys("demo"), vec!["locked.txt"]);
}

#[tokio::test]
async fn test_batch_delete_requires_targets() {
    let app = connected_app().await;
    let (status, _) = app
        .json(
            Method::POST,
            "/api/objects/demo/batch-delete",
            Some(json!({ "objects": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_bucket_empties_it_first() {
    let app = connected_app().await;
    let keys: Vec<String> = (0..2500).map(|i| format!("k/{:04}", i)).collect();
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    app.backend.seed("demo", &refs);

    let (status, body) = app.json(Method::DELETE, "/api/buckets/demo", None).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(!app.backend.has_bucket("demo"));
    assert_eq!(app.backend.count_calls(Operation::DeleteObjects), 3);

    // the bucket delete follows the final listing that came back empty
    let calls = app.backend.calls();
    let pos = calls
        .iter()
        .position(|c| c.operation == Operation::DeleteBucket)
        .unwrap();
    assert_eq!(calls[pos - 1].operation, Operation::ListObjects);
}

#[tokio::test]
async fn test_delete_bucket_stops_when_objects_remain() {
    let app = connected_app().await;
    app.backend.seed("demo", &["a.txt", "pinned.txt"]);
    app.backend.fail_operation(Operation::DeleteObjects, "pinned.txt");

    let (status, body) = app.json(Method::DELETE, "/api/buckets/demo", None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["details"]["failed"][0]["key"], "pinned.txt");
    assert_eq!(app.backend.count_calls(Operation::DeleteBucket), 0);
    assert_eq!(app.backend.keys("demo"), vec!["pinned.txt"]);
}
