#![allow(dead_code)]

use agent_module::google_auth::{GoogleAuth, GoogleAuthConfig};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub fn start_mockito_server(test_name: &str) -> Option<mockito::ServerGuard> {
    let server = std::panic::catch_unwind(|| mockito::Server::new());
    match server {
        Ok(server) => Some(server),
        Err(_) => {
            eprintln!(
                "Skipping {test_name}; unable to start mockito server in this environment."
            );
            None
        }
    }
}

/// Auth holding an access token that stays valid for the whole test.
pub fn static_auth(token: &str) -> GoogleAuth {
    GoogleAuth::new(GoogleAuthConfig {
        access_token: Some(token.to_string()),
        expiry: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        ..GoogleAuthConfig::default()
    })
    .expect("static auth")
}

pub fn b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Regex for a Gmail REST path, tolerant of a trailing query string.
pub fn gmail_path(suffix: &str) -> mockito::Matcher {
    mockito::Matcher::Regex(format!(
        r"^/gmail/v1/users/me/messages{}(\?.*)?$",
        regex::escape(suffix)
    ))
}
