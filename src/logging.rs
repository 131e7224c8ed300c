use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use once_cell::sync::OnceCell;

pub const DEBUG_ENV: &str = "PAGESAVER_DEBUG";
pub const DEBUG_LOG_ENV: &str = "PAGESAVER_DEBUG_LOG";

fn debug_enabled() -> bool {
    static FLAG: OnceCell<bool> = OnceCell::new();
    *FLAG.get_or_init(|| {
        std::env::var(DEBUG_ENV)
            .map(|val| is_truthy(&val))
            .unwrap_or(false)
    })
}

fn is_truthy(raw: &str) -> bool {
    let trimmed = raw.trim();
    !(trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("0")
        || trimmed.eq_ignore_ascii_case("false")
        || trimmed.eq_ignore_ascii_case("no")
        || trimmed.eq_ignore_ascii_case("off"))
}

fn debug_writer() -> Option<&'static Mutex<File>> {
    static WRITER: OnceCell<Option<Mutex<File>>> = OnceCell::new();
    WRITER
        .get_or_init(|| {
            std::env::var(DEBUG_LOG_ENV).ok().and_then(|path| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map(Mutex::new)
                    .ok()
            })
        })
        .as_ref()
}

fn emit(line: &str) {
    if let Some(writer) = debug_writer() {
        if let Ok(mut file) = writer.lock() {
            let _ = writeln!(file, "{line}");
            return;
        }
    }
    eprintln!("{line}");
}

/// Writes `[pagesaver][scope] message` when `PAGESAVER_DEBUG` is set.
pub fn debug_log(scope: &str, message: impl AsRef<str>) {
    if !debug_enabled() {
        return;
    }
    emit(&format!("[pagesaver][{scope}] {}", message.as_ref()));
}

/// Always emitted, regardless of the debug flag.
pub fn error_log(scope: &str, message: impl AsRef<str>) {
    emit(&format!("[pagesaver][{scope}][ERROR] {}", message.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy(" off "));
        assert!(!is_truthy("FALSE"));
        assert!(!is_truthy(""));
    }
}
