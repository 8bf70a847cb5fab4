//! Client fingerprint extraction from request headers.

use axum::http::HeaderMap;
use axum::http::header::{ACCEPT_LANGUAGE, USER_AGENT};
use campus_common::Fingerprint;
use campus_common::constants::headers::{X_CLIENT_PLATFORM, X_CLIENT_TIMEZONE, X_SCREEN_RESOLUTION};
use sha2::{Digest, Sha256};

/// Build a fingerprint from the headers the front end sends
pub fn from_headers(headers: &HeaderMap) -> Fingerprint {
    Fingerprint {
        user_agent: header_str(headers, USER_AGENT.as_str()),
        timezone: header_str(headers, X_CLIENT_TIMEZONE),
        language: primary_language(&header_str(headers, ACCEPT_LANGUAGE.as_str())),
        platform: header_str(headers, X_CLIENT_PLATFORM),
        screen_resolution: header_str(headers, X_SCREEN_RESOLUTION),
    }
}

/// Short stable digest of the compared signals, safe to put in logs
pub fn digest(fingerprint: &Fingerprint) -> String {
    let mut hasher = Sha256::new();
    for part in [
        &fingerprint.user_agent,
        &fingerprint.timezone,
        &fingerprint.language,
        &fingerprint.platform,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// "de-DE,de;q=0.9,en;q=0.8" -> "de-DE"
fn primary_language(accept_language: &str) -> String {
    accept_language
        .split(',')
        .next()
        .and_then(|tag| tag.split(';').next())
        .map(|tag| tag.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (X11)"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("de-DE,de;q=0.9,en;q=0.8"));
        headers.insert(X_CLIENT_TIMEZONE, HeaderValue::from_static("Europe/Berlin"));
        headers.insert(X_CLIENT_PLATFORM, HeaderValue::from_static("Linux x86_64"));
        headers.insert(X_SCREEN_RESOLUTION, HeaderValue::from_static("1920x1080"));

        let fp = from_headers(&headers);
        assert_eq!(fp.user_agent, "Mozilla/5.0 (X11)");
        assert_eq!(fp.language, "de-DE");
        assert_eq!(fp.timezone, "Europe/Berlin");
        assert_eq!(fp.platform, "Linux x86_64");
        assert_eq!(fp.screen_resolution, "1920x1080");
    }

    #[test]
    fn test_missing_headers_are_empty() {
        let fp = from_headers(&HeaderMap::new());
        assert_eq!(fp, Fingerprint::default());
    }

    #[test]
    fn test_digest_ignores_resolution() {
        let a = Fingerprint {
            user_agent: "ua".into(),
            screen_resolution: "800x600".into(),
            ..Default::default()
        };
        let b = Fingerprint {
            screen_resolution: "1024x768".into(),
            ..a.clone()
        };
        assert_eq!(digest(&a), digest(&b));
        assert_eq!(digest(&a).len(), 16);
    }
}
