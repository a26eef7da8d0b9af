mod common;

use axum::http::{Method, StatusCode};
use blog_cms::{
    AppConfig, LocalStorage, MemoryStorage,
    models::Role,
    storage::{StorageService, sanitize_key},
};
use common::{TestApp, as_user, get, json_request, multipart_upload};
use serde_json::json;
use uuid::Uuid;

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

#[cfg(test)]
mod local_tests {
    use super::*;

    fn temp_storage() -> LocalStorage {
        let dir = std::env::temp_dir().join(format!("blog-cms-test-{}", Uuid::new_v4()));
        LocalStorage::new(dir, "http://localhost:3000/uploads")
    }

    #[tokio::test]
    async fn test_local_put_list_delete() {
        let storage = temp_storage();
        storage.ensure_bucket_exists().await;

        storage
            .put_object("1-photo.png", PNG_BYTES.to_vec(), "image/png")
            .await
            .unwrap();
        storage
            .put_object("nested/2-clip.mp4", vec![0u8; 16], "video/mp4")
            .await
            .unwrap();

        let mut keys: Vec<String> = storage
            .list_objects()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["1-photo.png", "nested/2-clip.mp4"]);

        assert!(storage.delete_object("1-photo.png").await.unwrap());
        assert!(!storage.delete_object("1-photo.png").await.unwrap());

        tokio::fs::remove_dir_all(storage.root()).await.ok();
    }

    #[tokio::test]
    async fn test_local_keys_cannot_escape_root() {
        let storage = temp_storage();
        storage.ensure_bucket_exists().await;

        storage
            .put_object("../../escape.png", PNG_BYTES.to_vec(), "image/png")
            .await
            .unwrap();
        assert!(storage.root().join("escape.png").exists());

        assert!(storage.put_object("..", vec![1], "image/png").await.is_err());

        tokio::fs::remove_dir_all(storage.root()).await.ok();
    }

    #[tokio::test]
    async fn test_local_missing_root_lists_nothing() {
        let storage = temp_storage();
        assert!(storage.list_objects().await.unwrap().is_empty());
        assert_eq!(
            storage.public_url("a.png"),
            "http://localhost:3000/uploads/a.png"
        );
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_failure() {
        let storage = MemoryStorage::new_failing();
        assert!(storage.put_object("a.png", vec![1], "image/png").await.is_err());
        assert!(storage.list_objects().await.is_err());
    }

    #[test]
    fn test_sanitization() {
        assert!(!sanitize_key("../../etc/passwd").contains(".."));
    }
}

#[cfg(test)]
mod upload_tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_requires_login() {
        let app = TestApp::new();
        let res = app
            .send(multipart_upload(&[("a.png", "image/png", PNG_BYTES)]))
            .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_reports_partial_success() {
        let app = TestApp::new();
        let user = app.seed_user("uploader", Role::User).await;

        let res = app
            .send(as_user(
                multipart_upload(&[
                    ("Summer Trip.PNG", "image/png", PNG_BYTES),
                    ("notes.pdf", "application/pdf", b"%PDF"),
                ]),
                &user,
            ))
            .await;

        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        let data = &res.body["data"];
        assert_eq!(data["totalUploaded"], 1);
        assert_eq!(data["totalErrors"], 1);
        assert_eq!(data["errors"][0], "notes.pdf: file type is not allowed");
        assert_eq!(res.body["message"], "1 file(s) uploaded");

        let file = &data["uploadedFiles"][0];
        let key = file["fileName"].as_str().unwrap();
        assert!(key.ends_with("-summer-trip.png"), "{}", key);
        assert_eq!(file["url"], format!("/uploads/{}", key));
        assert_eq!(file["type"], "image/png");
        assert_eq!(app.storage.bytes(key).unwrap(), PNG_BYTES);
        assert_eq!(app.storage.content_type(key).unwrap(), "image/png");
    }

    #[tokio::test]
    async fn test_upload_rejects_when_nothing_accepted() {
        let app = TestApp::new();
        let user = app.seed_user("rejected", Role::User).await;

        let res = app
            .send(as_user(
                multipart_upload(&[("script.sh", "text/x-shellscript", b"rm -rf /")]),
                &user,
            ))
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert!(res.body["error"].as_str().unwrap().contains("not allowed"));
    }

    #[tokio::test]
    async fn test_upload_skips_large_disallowed_part() {
        let app = TestApp::new();
        let user = app.seed_user("mixed", Role::User).await;
        let archive = vec![0u8; 3 * 1024 * 1024];

        let res = app
            .send(as_user(
                multipart_upload(&[
                    ("backup.zip", "application/zip", archive.as_slice()),
                    ("pic.png", "image/png", PNG_BYTES),
                ]),
                &user,
            ))
            .await;

        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        assert_eq!(res.body["data"]["errors"][0], "backup.zip: file type is not allowed");
        assert_eq!(res.body["data"]["totalUploaded"], 1);
        assert_eq!(app.storage.list_objects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_rejects_too_many_files() {
        let app = TestApp::new();
        let user = app.seed_user("bulk", Role::User).await;

        let files: Vec<(&str, &str, &[u8])> =
            (0..11).map(|_| ("a.png", "image/png", PNG_BYTES)).collect();
        let res = app.send(as_user(multipart_upload(&files), &user)).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "At most 10 files can be uploaded at once");
    }

    #[tokio::test]
    async fn test_upload_storage_failure() {
        let app = TestApp::with_storage(AppConfig::default(), MemoryStorage::new_failing());
        let user = app.seed_user("unlucky", Role::User).await;

        let res = app
            .send(as_user(
                multipart_upload(&[("a.png", "image/png", PNG_BYTES)]),
                &user,
            ))
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "a.png: could not be stored");
    }

    #[tokio::test]
    async fn test_admin_media_library() {
        let app = TestApp::new();
        let admin = app.seed_user("librarian", Role::Admin).await;
        app.storage
            .put_object("1700000000000-cover.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        app.storage
            .put_object("1700000000001-intro.mp4", vec![0; 10], "video/mp4")
            .await
            .unwrap();

        let list = app.send(as_user(get("/api/admin/media"), &admin)).await;
        assert_eq!(list.status, StatusCode::OK);
        let items = list.body["data"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        let cover = items
            .iter()
            .find(|i| i["id"] == "1700000000000-cover.jpg")
            .unwrap();
        assert_eq!(cover["originalName"], "cover.jpg");
        assert_eq!(cover["mediaType"], "image");
        assert_eq!(cover["size"], 3);

        let none = app
            .send(as_user(
                json_request(Method::DELETE, "/api/admin/media", json!({})),
                &admin,
            ))
            .await;
        assert_eq!(none.status, StatusCode::BAD_REQUEST);

        let delete = app
            .send(as_user(
                json_request(
                    Method::DELETE,
                    "/api/admin/media?files=1700000000000-cover.jpg,missing.png",
                    json!({}),
                ),
                &admin,
            ))
            .await;
        assert_eq!(delete.status, StatusCode::OK);
        assert_eq!(delete.body["data"]["deleted"][0], "1700000000000-cover.jpg");
        assert_eq!(delete.body["data"]["errors"][0], "missing.png: not found");
        assert!(app.storage.bytes("1700000000000-cover.jpg").is_none());
    }
}
