//! Multipart upload orchestration against the in-memory server

mod common;

use bucketwire::s3::multipart::MIN_PART_SIZE;
use bucketwire::s3::{ErrorKind, UploadOptions};
use common::{client, payload, MockS3};
use hyper::{Method, StatusCode};
use std::io::Cursor;

const MIB: usize = 1024 * 1024;

fn uploaded_parts(mock: &MockS3) -> Vec<u32> {
    mock.requests()
        .iter()
        .filter(|r| r.is_upload_part())
        .filter_map(|r| r.part_number())
        .collect()
}

fn created_sessions(mock: &MockS3) -> usize {
    mock.requests()
        .iter()
        .filter(|r| r.method == Method::POST && r.query.contains_key("uploads"))
        .count()
}

#[tokio::test]
async fn test_small_object_is_a_single_put() {
    let mock = MockS3::new().with_bucket("photos");
    let s3 = client(mock.clone());
    let data = payload(1024);

    let result = s3
        .put_object("photos", "cat.jpg", Cursor::new(data.clone()), 1024, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(result.part_count, 1);
    assert!(result.upload_id.is_none());
    assert_eq!(created_sessions(&mock), 0);
    assert_eq!(mock.object("photos", "cat.jpg").unwrap().data, data);
}

#[tokio::test]
async fn test_object_at_threshold_is_a_single_put() {
    let mock = MockS3::new().with_bucket("photos");
    let s3 = client(mock.clone());
    let size = MIN_PART_SIZE as usize;

    let result = s3
        .put_object("photos", "edge.bin", Cursor::new(payload(size)), size as u64, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(result.part_count, 1);
    assert_eq!(created_sessions(&mock), 0);
}

#[tokio::test]
async fn test_large_object_uploads_in_parts() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let data = payload(12 * MIB);

    let result = s3
        .put_object(
            "videos",
            "clip.mp4",
            Cursor::new(data.clone()),
            data.len() as u64,
            &UploadOptions::default().with_content_type("video/mp4"),
        )
        .await
        .unwrap();

    assert_eq!(result.part_count, 3);
    assert!(result.upload_id.is_some());
    assert!(result.etag.ends_with("-3"));
    assert_eq!(uploaded_parts(&mock), vec![1, 2, 3]);
    assert!(mock.uploads().is_empty());
    assert_eq!(mock.object("videos", "clip.mp4").unwrap().data, data);
}

#[tokio::test]
async fn test_interrupted_upload_resumes_with_missing_parts_only() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let data = payload(12 * MIB);
    let size = data.len() as u64;

    // First attempt dies on part 3; the session stays on the server
    mock.fail_part(Some(3));
    let err = s3
        .put_object("videos", "clip.mp4", Cursor::new(data.clone()), size, &UploadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalServerError);
    let sessions = mock.uploads();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].parts.len(), 2);

    mock.fail_part(None);
    mock.clear_log();

    let result = s3
        .put_object("videos", "clip.mp4", Cursor::new(data.clone()), size, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(result.part_count, 3);
    assert_eq!(uploaded_parts(&mock), vec![3]);
    assert_eq!(created_sessions(&mock), 0);
    assert!(mock.uploads().is_empty());
    assert_eq!(mock.object("videos", "clip.mp4").unwrap().data, data);
}

#[tokio::test]
async fn test_resume_reuploads_from_first_changed_part() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let original = payload(12 * MIB);

    let upload_id = mock.start_upload("videos", "clip.mp4");
    mock.put_part(&upload_id, 1, &original[..5 * MIB]);
    mock.put_part(&upload_id, 2, &original[5 * MIB..10 * MIB]);

    // Same length, different bytes inside part 2
    let mut changed = original.clone();
    changed[6 * MIB] ^= 0xff;

    let result = s3
        .put_object(
            "videos",
            "clip.mp4",
            Cursor::new(changed.clone()),
            changed.len() as u64,
            &UploadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.upload_id.as_deref(), Some(upload_id.as_str()));
    assert_eq!(uploaded_parts(&mock), vec![2, 3]);
    assert_eq!(mock.object("videos", "clip.mp4").unwrap().data, changed);
}

#[tokio::test]
async fn test_resume_ignores_parts_that_do_not_fit_the_plan() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let data = payload(12 * MIB);

    let upload_id = mock.start_upload("videos", "clip.mp4");
    mock.put_part(&upload_id, 1, &data[..MIB]);

    s3.put_object("videos", "clip.mp4", Cursor::new(data.clone()), data.len() as u64, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(uploaded_parts(&mock), vec![1, 2, 3]);
    assert_eq!(mock.object("videos", "clip.mp4").unwrap().data, data);
}

#[tokio::test]
async fn test_resume_picks_most_recent_session() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let data = payload(12 * MIB);

    let older = mock.start_upload("videos", "clip.mp4");
    let newer = mock.start_upload("videos", "clip.mp4");
    mock.put_part(&newer, 1, &data[..5 * MIB]);

    let result = s3
        .put_object("videos", "clip.mp4", Cursor::new(data.clone()), data.len() as u64, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(result.upload_id.as_deref(), Some(newer.as_str()));
    assert_eq!(uploaded_parts(&mock), vec![2, 3]);

    assert_eq!(mock.upload_ids(), vec![older]);
}

#[tokio::test]
async fn test_short_source_aborts_without_completing() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let data = payload(11 * MIB);

    let err = s3
        .put_object(
            "videos",
            "clip.mp4",
            Cursor::new(data),
            (12 * MIB) as u64,
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    assert!(mock.uploads().is_empty(), "session must be aborted");
    assert!(mock.object("videos", "clip.mp4").is_none());
    assert!(!mock
        .requests()
        .iter()
        .any(|r| r.method == Method::POST && r.query.contains_key("uploadId")));
}

#[tokio::test]
async fn test_short_small_source_is_rejected_before_sending() {
    let mock = MockS3::new().with_bucket("photos");
    let s3 = client(mock.clone());

    let err = s3
        .put_object("photos", "cat.jpg", Cursor::new(payload(10)), 20, &UploadOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_concurrent_parts_produce_the_same_object() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let data = payload(23 * MIB);

    let result = s3
        .put_object(
            "videos",
            "big.bin",
            Cursor::new(data.clone()),
            data.len() as u64,
            &UploadOptions::default().with_concurrency(4),
        )
        .await
        .unwrap();

    assert_eq!(result.part_count, 5);
    let mut parts = uploaded_parts(&mock);
    parts.sort_unstable();
    assert_eq!(parts, vec![1, 2, 3, 4, 5]);
    assert_eq!(mock.object("videos", "big.bin").unwrap().data, data);
}

#[tokio::test]
async fn test_rejected_completion_is_object_already_exists() {
    let mock = MockS3::new().with_bucket("locked");
    let s3 = client(mock.clone());
    let data = payload(12 * MIB);
    mock.fail_complete(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed");

    let err = s3
        .put_object("locked", "report.bin", Cursor::new(data.clone()), data.len() as u64, &UploadOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ObjectAlreadyExists);
    assert_eq!(err.response().unwrap().code, "MethodNotAllowed");
    // Completion is not retried as a fresh upload
    assert_eq!(created_sessions(&mock), 1);
}

#[tokio::test]
async fn test_failed_completion_resumes_without_uploading_parts() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let data = payload(12 * MIB);
    let size = data.len() as u64;
    mock.fail_complete(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");

    let err = s3
        .put_object("videos", "clip.mp4", Cursor::new(data.clone()), size, &UploadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalServerError);
    let sessions = mock.uploads();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].parts.len(), 3);
    let upload_id = mock.upload_ids()[0].clone();

    mock.clear_log();
    let result = s3
        .put_object("videos", "clip.mp4", Cursor::new(data.clone()), size, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(result.part_count, 3);
    assert_eq!(result.upload_id.as_deref(), Some(upload_id.as_str()));
    assert!(uploaded_parts(&mock).is_empty());
    assert_eq!(created_sessions(&mock), 0);
    assert!(mock.uploads().is_empty());
    assert_eq!(mock.object("videos", "clip.mp4").unwrap().data, data);
}

#[tokio::test]
async fn test_resume_matches_key_with_trailing_space() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let data = payload(12 * MIB);
    let size = data.len() as u64;

    // A session on the trimmed key must not be picked up
    mock.start_upload("videos", "clip");

    mock.fail_part(Some(2));
    s3.put_object("videos", "clip ", Cursor::new(data.clone()), size, &UploadOptions::default())
        .await
        .unwrap_err();
    mock.fail_part(None);
    mock.clear_log();

    let result = s3
        .put_object("videos", "clip ", Cursor::new(data.clone()), size, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(result.part_count, 3);
    assert_eq!(uploaded_parts(&mock), vec![2, 3]);
    assert_eq!(created_sessions(&mock), 0);
    assert_eq!(mock.object("videos", "clip ").unwrap().data, data);
    assert!(mock.object("videos", "clip").is_none());
    let left = mock.uploads();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].key, "clip");
}

#[tokio::test]
async fn test_remove_incomplete_uploads_under_prefix() {
    let mock = MockS3::new().with_bucket("logs");
    let s3 = client(mock.clone());
    mock.start_upload("logs", "2026/01/a.log");
    mock.start_upload("logs", "2026/01/b.log");
    mock.start_upload("logs", "2025/12/c.log");

    let removed = s3.remove_incomplete_uploads("logs", Some("2026/")).await.unwrap();

    assert_eq!(removed, 2);
    let left = mock.uploads();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].key, "2025/12/c.log");
}

#[tokio::test]
async fn test_upload_part_rejects_out_of_range_numbers() {
    let mock = MockS3::new().with_bucket("videos");
    let s3 = client(mock.clone());
    let upload_id = mock.start_upload("videos", "clip.mp4");

    for n in [0, 10_001] {
        let err = s3
            .upload_part("videos", "clip.mp4", &upload_id, n, bytes::Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert!(mock.requests().is_empty());
}
