use std::thread;

use pagesaver::feed::{ClientConfig, FeedError, FeedResponse, GithubFeed, ReleaseFeed};
use tiny_http::{Header, Response, Server};

const RELEASE: &str = r#"{
  "tag_name": "v1.4.0",
  "name": "Pagesaver 1.4",
  "body": "Adds WEBP output.",
  "html_url": "https://example.test/releases/v1.4.0"
}"#;

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap()
}

#[test]
fn etag_round_trip_and_error_status() {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();

    let handle = thread::spawn(move || {
        let mut seen_etags = Vec::new();
        for (idx, request) in server.incoming_requests().take(3).enumerate() {
            let etag = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("If-None-Match"))
                .map(|h| h.value.as_str().to_string());
            let agent = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("User-Agent"))
                .map(|h| h.value.as_str().to_string());
            seen_etags.push((etag, agent));
            let _ = match idx {
                0 => request.respond(
                    Response::from_string(RELEASE).with_header(header("ETag", "\"r14\"")),
                ),
                1 => request.respond(Response::empty(304)),
                _ => request.respond(Response::from_string("rate limited").with_status_code(500)),
            };
        }
        seen_etags
    });

    let feed = GithubFeed::new(ClientConfig {
        url: format!("http://127.0.0.1:{port}/releases/latest"),
        user_agent: "pagesaver-test".into(),
        ..ClientConfig::default()
    })
    .unwrap();

    let first = feed.fetch_latest(None).unwrap();
    let FeedResponse::Release(info) = first else {
        panic!("expected a release, got {first:?}");
    };
    assert_eq!(info.usable_tag(), Some("v1.4.0"));
    assert_eq!(info.etag.as_deref(), Some("\"r14\""));
    assert_eq!(info.url.as_deref(), Some("https://example.test/releases/v1.4.0"));

    assert_eq!(
        feed.fetch_latest(info.etag.as_deref()).unwrap(),
        FeedResponse::NotModified
    );

    match feed.fetch_latest(None) {
        Err(FeedError::Status { status, body, .. }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "rate limited");
        }
        other => panic!("expected status error, got {other:?}"),
    }

    let seen = handle.join().unwrap();
    assert_eq!(seen[0].0, None);
    assert_eq!(seen[1].0.as_deref(), Some("\"r14\""));
    assert_eq!(seen[0].1.as_deref(), Some("pagesaver-test"));
}

#[test]
fn error_body_is_cut_to_two_hundred_chars() {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let handle = thread::spawn(move || {
        if let Some(request) = server.incoming_requests().next() {
            let _ = request.respond(Response::from_string("エ".repeat(300)).with_status_code(403));
        }
    });

    let feed = GithubFeed::new(ClientConfig {
        url: format!("http://127.0.0.1:{port}/releases/latest"),
        ..ClientConfig::default()
    })
    .unwrap();

    match feed.fetch_latest(None) {
        Err(FeedError::Status {
            status,
            reason,
            body,
        }) => {
            assert_eq!(status, 403);
            assert_eq!(reason, "Forbidden");
            assert_eq!(body.chars().count(), 200);
            assert_eq!(body, "エ".repeat(200));
        }
        other => panic!("expected status error, got {other:?}"),
    }
    handle.join().unwrap();
}
