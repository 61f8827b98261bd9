//! One-shot loopback listener for the authorization-code redirect.
//!
//! The system browser is sent to the authorize endpoint with a
//! `redirect_uri` pointing at this listener. The first request carrying a
//! `code` or an `error` ends the exchange; anything else (favicon requests and
//! the like) is answered with 404 and ignored. Connections are served
//! concurrently, so a preconnected socket that never sends a request does not
//! hold up the redirect.

use crate::common::IdentityProviderError;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use reqwest::Url;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Signed in</title></head>\
<body><h2>Authentication complete.</h2><p>You can close this window and return to Document Translation.</p></body></html>";

const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><title>Sign-in failed</title></head>\
<body><h2>Authentication failed.</h2><p>Return to Document Translation for details.</p></body></html>";

/// Query parameters delivered to the redirect URI.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl RedirectParams {
    fn is_terminal(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }

    /// Checks `state` and extracts the authorization code.
    pub fn into_code(self, expected_state: &str) -> Result<String, IdentityProviderError> {
        if let Some(error) = self.error {
            return Err(IdentityProviderError::Protocol {
                code: error,
                description: self
                    .error_description
                    .unwrap_or_else(|| "Authorization request was rejected".to_string()),
            });
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(IdentityProviderError::StateMismatch);
        }
        self.code.ok_or_else(|| {
            IdentityProviderError::InvalidResponse("Redirect carried no authorization code".into())
        })
    }
}

/// Hands the first terminal redirect to the waiting sign-in.
#[derive(Clone)]
struct RedirectSink {
    sender: Arc<Mutex<Option<oneshot::Sender<RedirectParams>>>>,
}

impl RedirectSink {
    fn deliver(&self, params: RedirectParams) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(params);
            }
            None => log::debug!("Ignoring repeated browser redirect"),
        }
    }
}

pub struct LoopbackListener {
    listener: TcpListener,
    redirect_uri: String,
    path: String,
}

impl LoopbackListener {
    /// Binds the listener described by `redirect_uri`.
    ///
    /// A redirect URI without an explicit port binds an ephemeral port, and
    /// the effective redirect URI (with that port) is reported by
    /// [`LoopbackListener::redirect_uri`].
    pub async fn bind(redirect_uri: &str) -> Result<Self, IdentityProviderError> {
        let parsed = parse_loopback_redirect(redirect_uri)?;
        let bind_host = match parsed.host_str() {
            Some("[::1]") => "[::1]",
            _ => "127.0.0.1",
        };
        let port = parsed.port().unwrap_or(0);
        let path = parsed.path().to_string();

        let listener = TcpListener::bind(format!("{bind_host}:{port}"))
            .await
            .map_err(|e| IdentityProviderError::Loopback(format!("bind failed: {e}")))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| IdentityProviderError::Loopback(e.to_string()))?
            .port();

        let mut effective = parsed;
        effective.set_port(Some(local_port)).map_err(|_| {
            IdentityProviderError::InvalidRedirectUri {
                uri: redirect_uri.to_string(),
                reason: "cannot carry a port".to_string(),
            }
        })?;
        let mut effective = effective.to_string();
        if !redirect_uri.ends_with('/') && effective.ends_with('/') {
            effective.pop();
        }

        log::debug!("Loopback redirect listener bound at {effective}");
        Ok(Self {
            listener,
            redirect_uri: effective,
            path,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Serves the redirect path until the request that completes the
    /// authorization arrives.
    ///
    /// The server shuts down gracefully once this returns or is dropped, so
    /// the browser still receives its page.
    pub async fn accept_redirect(self) -> Result<RedirectParams, IdentityProviderError> {
        let (sender, receiver) = oneshot::channel();
        let router = Router::new()
            .route(&self.path, get(handle_redirect))
            .with_state(RedirectSink {
                sender: Arc::new(Mutex::new(Some(sender))),
            });

        let shutdown = CancellationToken::new();
        let _stop_server = shutdown.clone().drop_guard();
        let server = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned());
        tokio::spawn(async move {
            if let Err(e) = server.await {
                log::warn!("Loopback redirect server failed: {e}");
            }
        });

        receiver.await.map_err(|_| {
            IdentityProviderError::Loopback("server stopped before the redirect arrived".into())
        })
    }
}

async fn handle_redirect(
    State(sink): State<RedirectSink>,
    Query(params): Query<RedirectParams>,
) -> Response {
    if !params.is_terminal() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let page = if params.error.is_some() {
        FAILURE_PAGE
    } else {
        SUCCESS_PAGE
    };
    sink.deliver(params);
    Html(page).into_response()
}

fn parse_loopback_redirect(redirect_uri: &str) -> Result<Url, IdentityProviderError> {
    let invalid = |reason: &str| IdentityProviderError::InvalidRedirectUri {
        uri: redirect_uri.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(redirect_uri).map_err(|e| invalid(&e.to_string()))?;
    if parsed.scheme() != "http" {
        return Err(invalid("interactive sign-in requires an http loopback redirect URI"));
    }
    match parsed.host_str() {
        Some("localhost") | Some("127.0.0.1") | Some("[::1]") => Ok(parsed),
        _ => Err(invalid("redirect host must be a loopback address")),
    }
}
