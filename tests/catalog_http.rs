use std::path::{Path, PathBuf};
use std::time::Duration;

use mediasync::catalog::{HttpCatalog, MediaCatalog};
use mediasync::config::CatalogConfig;
use mediasync::model::{MediaKind, NewMediaFile};
use mediasync::Error;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// base64("user:pass")
const AUTH: &str = "Basic dXNlcjpwYXNz";

fn catalog(server: &MockServer) -> HttpCatalog {
    HttpCatalog::new(&CatalogConfig {
        base_url: format!("{}/api/", server.uri()),
        username: "user".to_string(),
        password: "pass".to_string(),
        verify_tls: false,
        server_name: "media-box".to_string(),
        request_cooldown: Duration::ZERO,
    })
    .unwrap()
}

#[tokio::test]
async fn listings_follow_next_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tvpath/"))
        .and(query_param("page", "2"))
        .and(header("authorization", AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"pk": 2, "localpath": "/tv/ShowB", "finished": true}],
            "next": null,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tvpath/"))
        .and(header("authorization", AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"pk": 1, "localpath": "/tv/ShowA", "skip": false}],
            "next": format!("{}/api/tvpath/?page=2", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let paths = catalog(&server).list_paths(MediaKind::Tv).await.unwrap();

    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0].pk, 1);
    assert_eq!(paths[0].localpath, "/tv/ShowA");
    assert!(!paths[0].finished);
    assert_eq!(paths[1].pk, 2);
    assert!(paths[1].finished);
}

#[tokio::test]
async fn files_are_listed_per_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/movie/"))
        .and(query_param("pathid", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"filename": "Film.mkv.mv-encoded.mp4", "size": 10}],
            "next": null,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let files = catalog(&server)
        .list_files(MediaKind::Movie, 42)
        .await
        .unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].filename, "Film.mkv.mv-encoded.mp4");
}

#[tokio::test]
async fn creating_a_path_posts_the_local_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tvpath/"))
        .and(body_json(json!({
            "localpath": "/tv/ShowA",
            "remotepath": "/tv/ShowA",
            "skip": false,
            "server": "media-box",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "pk": 9,
            "localpath": "/tv/ShowA",
            "skip": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = catalog(&server)
        .create_path(MediaKind::Tv, Path::new("/tv/ShowA"))
        .await
        .unwrap();

    assert_eq!(record.pk, 9);
    assert!(record.skip);
}

#[tokio::test]
async fn refused_path_create_falls_back_to_the_existing_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tvpath/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "localpath": ["tv path with this localpath already exists."],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tvpath/"))
        .and(query_param("localpath", "/tv/ShowA"))
        .and(query_param("remotepath", "/tv/ShowA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"pk": 7, "localpath": "/tv/ShowA", "skip": false}],
            "next": null,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = catalog(&server)
        .create_path(MediaKind::Tv, Path::new("/tv/ShowA"))
        .await
        .unwrap();

    assert_eq!(record.pk, 7);
    assert_eq!(record.localpath, "/tv/ShowA");
}

#[tokio::test]
async fn refused_path_create_without_a_match_is_a_catalog_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/moviepath/"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/moviepath/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [],
            "next": null,
        })))
        .mount(&server)
        .await;

    let err = catalog(&server)
        .create_path(MediaKind::Movie, Path::new("/movies/Film"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Catalog(_)), "{err:?}");
}

#[tokio::test]
async fn creating_a_file_posts_the_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/movie/"))
        .and(body_json(json!({
            "path": 9,
            "filename": "Film.mkv.mv-encoded.mp4",
            "size": 1234,
            "streamable": true,
            "skip": false,
            "finished": true,
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let file = NewMediaFile::streamable(
        MediaKind::Movie,
        9,
        "Film.mkv.mv-encoded.mp4".to_string(),
        1234,
    );
    catalog(&server)
        .create_file(MediaKind::Movie, &file)
        .await
        .unwrap();
}

#[tokio::test]
async fn lookup_returns_none_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/inferscrapers/"))
        .and(query_param("title", "ShowA.S01E02.mkv"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "localpath": "/tv/ShowA",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/inferscrapers/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let catalog = catalog(&server);
    assert_eq!(
        catalog.lookup_localpath("ShowA.S01E02.mkv").await.unwrap(),
        Some(PathBuf::from("/tv/ShowA"))
    );
    assert_eq!(catalog.lookup_localpath("Mystery.mkv").await.unwrap(), None);
}

#[tokio::test]
async fn infer_scrapers_posts_an_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/inferscrapers/"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    catalog(&server).infer_scrapers().await.unwrap();
}

#[tokio::test]
async fn server_errors_propagate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/moviepath/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = catalog(&server)
        .list_paths(MediaKind::Movie)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Http(_)));
}

#[tokio::test]
async fn cooldown_spaces_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/inferscrapers/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let catalog = HttpCatalog::new(&CatalogConfig {
        base_url: format!("{}/api/", server.uri()),
        request_cooldown: Duration::from_millis(100),
        ..Default::default()
    })
    .unwrap();

    let started = std::time::Instant::now();
    catalog.infer_scrapers().await.unwrap();
    catalog.infer_scrapers().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
}
