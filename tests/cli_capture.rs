use std::fs;
use std::path::Path;
use std::thread;

use assert_cmd::Command;
use image::{Rgba, RgbaImage};
use predicates::prelude::*;
use tiny_http::{Response, Server};

/// Serves `body` for every request until the test process exits.
fn serve_release(body: &'static str) -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let _ = request.respond(Response::from_string(body));
        }
    });
    format!("http://127.0.0.1:{port}/releases/latest")
}

fn write_comic_fuz_snapshot(dir: &Path) -> std::path::PathBuf {
    for (idx, shade) in [40u8, 90].into_iter().enumerate() {
        RgbaImage::from_pixel(6, 9, Rgba([shade, 0, 0, 255]))
            .save(dir.join(format!("p{idx}.png")))
            .unwrap();
    }
    let raw = serde_json::json!({
        "host": "comic-fuz.com",
        "path": "/manga/viewer/1",
        "viewport": {"width": 1000.0, "height": 800.0},
        "texts": {"h2.title_detail_viewer__detail__info__viewerTitle__GrN4D": "Episode 3"},
        "elements": [
            {
                "matches": ["img.G54Y0W_page"],
                "rect": {"left": 100.0, "top": 0.0, "width": 400.0, "height": 600.0},
                "image": {"src": "https://cdn.test/p0.jpg", "natural": "p0.png"}
            },
            {
                "matches": ["img.G54Y0W_page"],
                "rect": {"left": 500.0, "top": 0.0, "width": 400.0, "height": 600.0},
                "image": {"src": "https://cdn.test/p1.jpg", "natural": "p1.png"}
            }
        ]
    });
    let path = dir.join("page.json");
    fs::write(&path, raw.to_string()).unwrap();
    path
}

fn pagesaver(dir: &Path, feed_url: &str) -> Command {
    let mut cmd = Command::cargo_bin("pagesaver").unwrap();
    cmd.env("PAGESAVER_FEED__URL", feed_url)
        .env("PAGESAVER_STORAGE__PATH", dir.join("state.db"))
        .env("PAGESAVER_CAPTURE__DOWNLOAD_DIR", dir.join("out"))
        .env("PAGESAVER_GATE__FAIL_OPEN_DELAY", "0s")
        .args(["--config", dir.join("missing.yaml").to_str().unwrap()]);
    cmd
}

#[test]
fn capture_saves_pages_when_up_to_date() {
    let dir = tempfile::tempdir().unwrap();
    let feed = serve_release(r#"{"tag_name": "v0.0.1"}"#);
    let snapshot = write_comic_fuz_snapshot(dir.path());

    pagesaver(dir.path(), &feed)
        .args(["--capture", snapshot.to_str().unwrap(), "--format", "jpg"])
        .assert()
        .success()
        .stdout(predicate::str::contains("01.jpg"))
        .stderr(predicate::str::contains("Downloading images... (2 pages)"));

    assert!(dir.path().join("out/01.jpg").exists());
    assert!(dir.path().join("out/02.jpg").exists());

    // The chapter counter survives between runs.
    pagesaver(dir.path(), &feed)
        .args(["--capture", snapshot.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("03.png"));
}

#[test]
fn newer_release_holds_capture_back() {
    let dir = tempfile::tempdir().unwrap();
    let feed = serve_release(
        r#"{"tag_name": "v99.0.0", "name": "Big one", "html_url": "https://example.test/r/99"}"#,
    );
    let snapshot = write_comic_fuz_snapshot(dir.path());

    pagesaver(dir.path(), &feed)
        .args(["--capture", snapshot.to_str().unwrap()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Update available: Big one (v99.0.0)"));

    assert!(!dir.path().join("out").exists());
}

#[test]
fn check_updates_reports_up_to_date() {
    let dir = tempfile::tempdir().unwrap();
    let feed = serve_release(r#"{"tag_name": "v0.0.1"}"#);

    pagesaver(dir.path(), &feed)
        .arg("--check-updates")
        .assert()
        .success()
        .stdout(predicate::str::contains("is up to date"));
}
