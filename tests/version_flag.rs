use std::process::Command;

#[test]
fn prints_version() {
    let exe = env!("CARGO_BIN_EXE_pagesaver");
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .expect("run pagesaver --version");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "stdout was: {}",
        stdout.trim()
    );
}

#[test]
fn prints_help() {
    let exe = env!("CARGO_BIN_EXE_pagesaver");
    let output = Command::new(exe)
        .arg("--help")
        .output()
        .expect("run pagesaver --help");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(stdout.contains("Pagesaver"));
    assert!(stdout.contains("--capture"));
    assert!(stdout.contains("--version"));
}

#[test]
fn rejects_unknown_format() {
    let exe = env!("CARGO_BIN_EXE_pagesaver");
    let output = Command::new(exe)
        .args(["--capture", "page.json", "--format", "gif"])
        .output()
        .expect("run pagesaver --format gif");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("unsupported format"));
}
