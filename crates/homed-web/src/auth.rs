//! Cookie-based auth gate.
//!
//! The gate runs once per request, before any routing: it either passes
//! the request through, mints a session on a successful login POST, or
//! demands the login page. Assets the login page itself needs are
//! allow-listed so the browser can render it.

use crate::http::Request;
use crate::store::Store;
use homed_core::token::{generate_token, AUTH_COOKIE};
use tracing::info;

/// `Set-Cookie` value that wipes the session cookie on logout.
pub const CLEAR_COOKIE: &str = "homed-auth-token=deleted; path=/; max-age=0";

/// Outcome of the gate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Serve the request. `authenticated` marks a valid session cookie,
    /// which is what earns the index page its logout control.
    Granted { authenticated: bool },
    /// Respond with the login page.
    LoginPage,
    /// Credentials checked out: redirect with the fresh session cookie.
    /// The token is already persisted when this is returned.
    LoginRedirect { cookie: String },
}

pub struct AuthGate {
    credentials: Option<(String, String)>,
    cookie_max_age: u64,
    store: Store,
}

impl AuthGate {
    /// Auth is required only when both a username and password are
    /// configured.
    pub fn new(
        username: Option<String>,
        password: Option<String>,
        cookie_max_age: u64,
        store: Store,
    ) -> Self {
        Self {
            credentials: username.zip(password),
            cookie_max_age,
            store,
        }
    }

    pub fn auth_required(&self) -> bool {
        self.credentials.is_some()
    }

    pub async fn authorize(&self, request: &Request) -> AuthDecision {
        let Some((username, password)) = &self.credentials else {
            return AuthDecision::Granted {
                authenticated: false,
            };
        };

        if allow_listed(request.path()) {
            return AuthDecision::Granted {
                authenticated: false,
            };
        }

        if self.store.contains_token(request.cookie(AUTH_COOKIE)).await {
            return AuthDecision::Granted {
                authenticated: true,
            };
        }

        if request.method == "POST"
            && request.param("username") == username
            && request.param("password") == password
        {
            let token = generate_token();
            self.store.insert_token(token.clone()).await;
            // Durable before the redirect carrying the cookie goes out.
            self.store.store().await;
            info!("login succeeded, session token issued");
            return AuthDecision::LoginRedirect {
                cookie: format!(
                    "{AUTH_COOKIE}={token}; path=/; max-age={}",
                    self.cookie_max_age
                ),
            };
        }

        AuthDecision::LoginPage
    }
}

/// Paths the login page needs before any session exists.
fn allow_listed(path: &str) -> bool {
    path == "/manifest.json"
        || path.starts_with("/css/")
        || path.starts_with("/font/")
        || path.starts_with("/img/")
}
