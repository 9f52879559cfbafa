//! Detection of local dev-server URLs in process output.

use once_cell::sync::Lazy;
use regex::Regex;

// URLs like http://localhost:3000 or http://127.0.0.1:8080.
static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0):(\d+)").expect("valid url pattern")
});

// Port mentions like "listening on port 3000" or "ready on port 8080".
static PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:listening|ready|running|started|server|local)\s+(?:on|at)?\s*(?:port\s+)?:?(\d{4,5})")
        .expect("valid port pattern")
});

/// Scans a log line for a dev-server address, returning `(url, port)`.
///
/// A full URL wins; otherwise a textual port announcement is reported as
/// `http://localhost:<port>`.
pub fn detect_url(line: &str) -> Option<(String, u16)> {
    if let Some(caps) = URL_REGEX.captures(line) {
        if let (Some(url), Some(port)) = (caps.get(0), caps.get(1)) {
            if let Ok(port) = port.as_str().parse::<u16>() {
                return Some((url.as_str().to_string(), port));
            }
        }
    }
    if let Some(caps) = PORT_REGEX.captures(line) {
        if let Some(port) = caps.get(1) {
            if let Ok(port) = port.as_str().parse::<u16>() {
                return Some((format!("http://localhost:{}", port), port));
            }
        }
    }
    None
}
