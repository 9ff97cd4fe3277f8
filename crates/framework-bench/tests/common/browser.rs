//! Browser helpers for tests that need a real Chromium

#![allow(dead_code)]

use framework_bench::session::ChromiumSession;
use framework_bench::RunOptions;
use std::time::Duration;

/// Check if browser tests should be skipped (when Chrome isn't available)
pub fn should_skip() -> bool {
    std::env::var("SKIP_BROWSER_TESTS").is_ok()
}

/// Macro to skip test if Chrome isn't available
#[macro_export]
macro_rules! skip_if_no_chrome {
    () => {
        if browser::should_skip() {
            eprintln!("Skipping test: SKIP_BROWSER_TESTS is set");
            return;
        }
    };
}

/// Find Chrome for Testing installed by Puppeteer
pub fn find_chrome_for_testing() -> Option<std::path::PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let puppeteer_cache = std::path::Path::new(&home).join(".cache/puppeteer/chrome");

    let mut versions: Vec<_> = std::fs::read_dir(&puppeteer_cache)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    versions.sort_by_key(|v| std::cmp::Reverse(v.path()));

    versions.into_iter().find_map(|version_dir| {
        [
            "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
            "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
            "chrome-linux64/chrome",
        ]
        .iter()
        .map(|relative| version_dir.path().join(relative))
        .find(|candidate| candidate.exists())
    })
}

/// Headless run options with fast polling for browser tests
pub fn test_options() -> RunOptions {
    RunOptions {
        headless: true,
        chrome_binary: find_chrome_for_testing(),
        timeout: Duration::from_secs(10),
        short_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
        write_results: false,
        ..RunOptions::default()
    }
}

/// Try to launch a session, skip test if Chrome can't be started
pub async fn require_session(options: &RunOptions) -> Option<ChromiumSession> {
    if let Some(path) = &options.chrome_binary {
        eprintln!("Using Chrome for Testing: {}", path.display());
    }
    match ChromiumSession::launch(options).await {
        Ok(session) => Some(session),
        Err(e) => {
            eprintln!("Skipping: Chrome could not be launched ({})", e);
            None
        }
    }
}

/// A `data:` URL serving a minimal table app with `#run` and `#clear`
pub fn table_app_url() -> String {
    let html = r#"<!DOCTYPE html><html><body>
<button id="run">Create</button><button id="clear">Clear</button>
<table><tbody id="tbody"></tbody></table>
<script>
let n = 0;
const tbody = document.getElementById('tbody');
document.getElementById('run').addEventListener('click', () => {
  n += 1;
  const tr = document.createElement('tr');
  tr.innerHTML = '<td>' + n + '</td><td><a>label ' + n + '</a></td>';
  tbody.appendChild(tr);
});
document.getElementById('clear').addEventListener('click', () => { tbody.textContent = ''; });
</script></body></html>"#;
    format!("data:text/html,{}", percent_encode(html))
}

fn percent_encode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
