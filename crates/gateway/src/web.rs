//! Browser-facing routes.
//!
//! | Route                         | Backend commands                        |
//! |-------------------------------|-----------------------------------------|
//! | `GET /`                       | none, redirects to `/drive/`            |
//! | `GET /drive/`                 | `info`                                  |
//! | `GET /drive/{drive}/{path..}` | `stat`, then `listdir` or `readfiles`   |
//! | `GET /login`                  | none                                    |
//! | `POST /login`                 | `login`                                 |
//! | `GET /logout`                 | `logout` when a session is present      |
//!
//! Browsing without session cookies redirects to the login page before any
//! backend call. Backend status codes are mapped by [`crate::interpret`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};
use axum_extra::extract::cookie::CookieJar;
use protocol::{
    Auth, InfoData, ListDirData, LoginData, Request, Response as BackendResponse, StatData,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::backend::{BackendClient, ExchangeError};
use crate::bridge::{ChannelSink, HeaderOutcome};
use crate::config::GatewayConfig;
use crate::error::{found, GatewayError};
use crate::interpret::{
    classify, interpret, interpret_login, login_notice, login_redirect, Outcome, Verdict,
};
use crate::render;
use crate::session::{self, Session};
use crate::view::{DirectoryView, DriveListView, LoginView};

/// Root of the browsing tree; also where logins land by default.
pub const DRIVE_ROOT: &str = "/drive/";

/// Chunks buffered between the backend relay and the HTTP body.
pub const BODY_CHANNEL_CAPACITY: usize = 16;

const LOGGED_OUT_NOTICE: &str = "Logged out successfully.";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    client: Arc<BackendClient>,
    config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(client: Arc<BackendClient>, config: Arc<GatewayConfig>) -> Self {
        Self { client, config }
    }

    fn step_timeout(&self) -> Duration {
        self.config.backend.step_timeout()
    }

    fn request(&self, auth: Auth, command: &str) -> Request {
        Request::new(auth, command, self.config.backend.request_timeout())
    }

    fn secure_cookies(&self) -> bool {
        self.config.server.tls_pair().is_some()
    }

    async fn send(&self, request: Request) -> Result<BackendResponse, GatewayError> {
        Ok(self.client.send(request, self.step_timeout()).await?)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/drive", get(drive_root))
        .route("/drive/", get(drive_root))
        .route("/drive/{*rest}", get(drive_path))
        .route("/login", get(login_form).post(login))
        .route("/logout", get(logout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Drive and path named by a browsing URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveTarget {
    pub drive: String,
    /// Slash-joined path inside the drive; empty for the drive root.
    pub path: String,
}

impl DriveTarget {
    /// Split what follows `/drive/`. `None` means no drive was named.
    pub fn parse(rest: &str) -> Option<Self> {
        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let drive = segments.next()?.to_string();
        let path = segments.collect::<Vec<_>>().join("/");
        Some(Self { drive, path })
    }
}

/// Accept only same-site absolute paths as post-login targets.
pub fn safe_redirect(target: Option<&str>) -> String {
    match target {
        Some(t) if t.starts_with('/') && !t.starts_with("//") && !t.contains('\\') => t.to_string(),
        _ => DRIVE_ROOT.to_string(),
    }
}

async fn home() -> Response {
    found(DRIVE_ROOT)
}

async fn drive_root(
    State(state): State<AppState>,
    jar: CookieJar,
    uri: Uri,
) -> Result<Response, GatewayError> {
    browse(&state, &jar, uri.path(), "").await
}

async fn drive_path(
    State(state): State<AppState>,
    jar: CookieJar,
    uri: Uri,
    Path(rest): Path<String>,
) -> Result<Response, GatewayError> {
    browse(&state, &jar, uri.path(), &rest).await
}

async fn browse(
    state: &AppState,
    jar: &CookieJar,
    current: &str,
    rest: &str,
) -> Result<Response, GatewayError> {
    let session = Session::extract(jar).map_err(|reason| {
        tracing::debug!(%reason, path = current, "No session, redirecting to login");
        GatewayError::AuthMissing {
            location: login_redirect(current, None),
        }
    })?;

    let Some(target) = DriveTarget::parse(rest) else {
        return drive_list(state, &session, current).await;
    };

    let response = state
        .send(
            state
                .request(session.auth(), "stat")
                .with_param("paths", vec![target.path.clone()])
                .with_param("drive", target.drive.clone()),
        )
        .await?;
    proceed(&response, current)?;

    let data: StatData = decode(&response)?;
    let stat = data.stat.get(&target.path).ok_or_else(|| {
        GatewayError::Exchange(ExchangeError::Malformed(format!(
            "stat reply has no entry for {:?}",
            target.path
        )))
    })?;

    if !stat.exists {
        return Err(GatewayError::NotFound);
    }
    if stat.isfile {
        stream_file(state, &session, target, current).await
    } else {
        list_directory(state, &session, &target, current).await
    }
}

async fn drive_list(
    state: &AppState,
    session: &Session,
    current: &str,
) -> Result<Response, GatewayError> {
    let response = state.send(state.request(session.auth(), "info")).await?;
    proceed(&response, current)?;

    let info: InfoData = decode(&response)?;
    let view = DriveListView::build(&info, &state.config.server.address(), DRIVE_ROOT);
    Ok(Html(render::drive_list_page(&view)).into_response())
}

async fn list_directory(
    state: &AppState,
    session: &Session,
    target: &DriveTarget,
    current: &str,
) -> Result<Response, GatewayError> {
    let response = state
        .send(
            state
                .request(session.auth(), "listdir")
                .with_param("drive", target.drive.clone())
                .with_param("path", target.path.clone()),
        )
        .await?;
    proceed(&response, current)?;

    let data: ListDirData = decode(&response)?;
    let view = DirectoryView::build(&data.list, current);
    Ok(Html(render::directory_page(&view)).into_response())
}

/// Stream a file's chunks into the response body.
///
/// Rejections that arrive before the header still produce a redirect or
/// error page. Once the header is in, the status is committed; a later
/// failure aborts the body so the browser sees a truncated transfer rather
/// than a complete-looking file.
async fn stream_file(
    state: &AppState,
    session: &Session,
    target: DriveTarget,
    current: &str,
) -> Result<Response, GatewayError> {
    let request = state
        .request(session.auth(), "readfiles")
        .with_param("paths", vec![target.path.clone()])
        .with_param("drive", target.drive.clone());

    let mut bridge = state
        .client
        .open_transfer(request, state.step_timeout())
        .await?;
    if let HeaderOutcome::Rejected(response) = bridge.await_header().await? {
        return Err(interpret(&response, current).into());
    }

    let (mut sink, body) = body_channel();
    tokio::spawn(async move {
        match bridge.relay(&mut sink).await {
            Ok(summary) => tracing::info!(
                drive = %target.drive,
                path = %target.path,
                chunks = summary.chunks,
                bytes = summary.bytes,
                "File streamed"
            ),
            Err(failure) => {
                tracing::warn!(
                    drive = %target.drive,
                    path = %target.path,
                    stage = %failure.stage,
                    bytes = failure.bytes_relayed,
                    error = %failure.error,
                    "File stream aborted"
                );
                sink.abort(io::Error::other(failure.to_string())).await;
            }
        }
    });

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response())
}

fn body_channel() -> (ChannelSink, Body) {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
    let chunks = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (ChannelSink::new(tx), Body::from_stream(chunks))
}

fn proceed(response: &BackendResponse, current: &str) -> Result<(), GatewayError> {
    match interpret(response, current) {
        Verdict::Proceed => Ok(()),
        verdict => Err(verdict.into()),
    }
}

fn decode<T: DeserializeOwned>(response: &BackendResponse) -> Result<T, GatewayError> {
    response
        .decode_data()
        .map_err(|e| GatewayError::Exchange(ExchangeError::Malformed(e.to_string())))
}

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    error: Option<String>,
    redirect: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login_form(Query(query): Query<LoginQuery>) -> Html<String> {
    Html(render::login_page(&LoginView {
        error: query.error,
        redirect: query.redirect,
    }))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
    Form(form): Form<LoginForm>,
) -> Result<(CookieJar, Response), GatewayError> {
    let target = safe_redirect(query.redirect.as_deref());
    let response = state
        .send(state.request(
            session::from_credentials(&form.username, &form.password),
            "login",
        ))
        .await?;

    if let verdict @ (Verdict::Reauthenticate { .. } | Verdict::Fail { .. }) =
        interpret_login(&response, &target)
    {
        tracing::info!(username = %form.username, code = response.code, "Login rejected");
        return Err(verdict.into());
    }

    let data: LoginData = decode(&response)?;
    let session = Session::from_login(form.username, &data.id).ok_or_else(|| {
        GatewayError::Exchange(ExchangeError::Malformed(format!(
            "login returned a {}-byte session id",
            data.id.len()
        )))
    })?;

    tracing::info!(username = %session.username, "Login succeeded");
    Ok((session.store(jar, state.secure_cookies()), found(&target)))
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Response) {
    let outcome = match Session::extract(&jar) {
        Ok(session) => end_session(&state, &session).await,
        Err(_) => Ok(()),
    };

    let jar = session::clear(jar);
    match outcome {
        Ok(()) => (jar, found(&login_notice(LOGGED_OUT_NOTICE))),
        Err(e) => (jar, e.into_response()),
    }
}

async fn end_session(state: &AppState, session: &Session) -> Result<(), GatewayError> {
    let response = state.send(state.request(session.auth(), "logout")).await?;
    match classify(&response) {
        // An already expired session is as good as logged out.
        Outcome::Proceed | Outcome::Reauthenticate => {
            tracing::info!(username = %session.username, "Logged out");
            Ok(())
        }
        Outcome::Fail => Err(GatewayError::BackendFailure {
            code: response.code,
            message: response.message,
        }),
    }
}
