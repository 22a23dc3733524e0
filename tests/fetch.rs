mod common;

use axum::routing::get;
use axum::Router;
use std::time::Duration;

use reelstitch::config::FetchConfig;
use reelstitch::fetch::{FetcherTrait, HttpFetcher};
use reelstitch::StitchError;

fn payload() -> Vec<u8> {
    (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect()
}

fn fetcher(timeout_secs: u64) -> HttpFetcher {
    HttpFetcher::new(&FetchConfig {
        timeout_secs,
        chunk_size_bytes: 64 * 1024,
        ..FetchConfig::default()
    })
    .unwrap()
}

async fn server() -> std::net::SocketAddr {
    let app = Router::new()
        .route("/clip.mp4", get(|| async { payload() }))
        .route(
            "/slow.mp4",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
    common::spawn_server(app).await
}

#[tokio::test]
async fn streams_body_to_disk() {
    let addr = server().await;
    let dir = assert_fs::TempDir::new().unwrap();
    let destination = dir.path().join("clip_000.src");

    let written = fetcher(10)
        .fetch(&format!("http://{}/clip.mp4", addr), &destination)
        .await
        .unwrap();

    let expected = payload();
    assert_eq!(written, expected.len() as u64);
    assert_eq!(std::fs::read(&destination).unwrap(), expected);
}

#[tokio::test]
async fn non_success_status_is_a_download_failure() {
    let addr = server().await;
    let dir = assert_fs::TempDir::new().unwrap();
    let destination = dir.path().join("missing.src");
    let url = format!("http://{}/missing.mp4", addr);

    let error = fetcher(10).fetch(&url, &destination).await.unwrap_err();

    match error {
        StitchError::Download { url: failed, cause } => {
            assert_eq!(failed, url);
            assert!(cause.contains("404"), "{}", cause);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!destination.exists());
}

#[tokio::test]
async fn unreachable_host_is_a_download_failure() {
    // grab a free port, then close it again
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = assert_fs::TempDir::new().unwrap();
    let result = fetcher(5)
        .fetch(&format!("http://{}/clip.mp4", addr), &dir.path().join("clip.src"))
        .await;

    assert!(matches!(result, Err(StitchError::Download { .. })));
}

#[tokio::test]
async fn stalled_response_times_out() {
    let addr = server().await;
    let dir = assert_fs::TempDir::new().unwrap();

    let result = fetcher(1)
        .fetch(&format!("http://{}/slow.mp4", addr), &dir.path().join("slow.src"))
        .await;

    match result {
        Err(StitchError::Download { cause, .. }) => assert!(cause.contains("timed out"), "{}", cause),
        other => panic!("unexpected result: {:?}", other),
    }
}
