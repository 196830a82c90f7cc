use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{
	routing::{get, post},
	Json, Router,
};
use rand::Rng;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::client::{HttpProcessClient, ProcessEndpoint, FILE_FIELD};
use crate::config::Config;
use crate::template::UploaderPage;
use crate::uploader::Uploader;
use crate::view::SelectedFile;

pub const SESSION_COOKIE: &str = "speaksync_session";
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// id of a browser session, sent back and forth in [`SESSION_COOKIE`]
pub type SessionId = u128;

struct Session<E> {
	uploader: Arc<Uploader<E>>,
	last_seen: Instant,
}

/// Every browser session gets its own uploader, so two tabs sharing a
/// cookie share a view while two browsers don't.
pub struct SessionManager<E> {
	sessions: RwLock<HashMap<SessionId, Session<E>>>,
	endpoint: Arc<E>,
	ttl: Duration,
}

impl<E: ProcessEndpoint> SessionManager<E> {
	pub fn new(endpoint: Arc<E>, ttl: Duration) -> Self {
		Self { sessions: RwLock::new(HashMap::new()), endpoint, ttl }
	}

	fn gen_id() -> SessionId {
		rand::thread_rng().gen()
	}

	/// Returns the uploader of session `id`, creating a session if `id` is
	/// unknown. The second element is `Some` when a new id was issued.
	async fn get_or_create(
		&self,
		id: Option<SessionId>,
	) -> (Arc<Uploader<E>>, Option<SessionId>) {
		let mut sessions = self.sessions.write().await;

		if let Some(session) = id.and_then(|id| sessions.get_mut(&id)) {
			session.last_seen = Instant::now();
			return (session.uploader.clone(), None);
		}

		let id = Self::gen_id();
		let uploader = Arc::new(Uploader::new(self.endpoint.clone()));
		sessions.insert(id, Session { uploader: uploader.clone(), last_seen: Instant::now() });
		tracing::debug!("new session {id:032x}, {} open", sessions.len());
		(uploader, Some(id))
	}

	/// Drops sessions idle for longer than the ttl. Uploads still running
	/// for them finish, but nobody can look at the result anymore.
	pub async fn prune(&self) -> usize {
		let mut sessions = self.sessions.write().await;
		let before = sessions.len();
		sessions.retain(|_, session| session.last_seen.elapsed() < self.ttl);
		before - sessions.len()
	}

	pub async fn len(&self) -> usize {
		self.sessions.read().await.len()
	}
}

pub struct AppState<E> {
	sessions: Arc<SessionManager<E>>,
	accept: Arc<str>,
}

impl<E> Clone for AppState<E> {
	fn clone(&self) -> Self {
		Self { sessions: self.sessions.clone(), accept: self.accept.clone() }
	}
}

impl<E: ProcessEndpoint> AppState<E> {
	pub fn new(sessions: Arc<SessionManager<E>>, accept: &str) -> Self {
		Self { sessions, accept: accept.into() }
	}

	async fn session(&self, headers: &HeaderMap) -> (Arc<Uploader<E>>, Option<SessionId>) {
		self.sessions.get_or_create(session_id(headers)).await
	}
}

fn session_id(headers: &HeaderMap) -> Option<SessionId> {
	headers
		.get_all(COOKIE)
		.iter()
		.filter_map(|x| x.to_str().ok())
		.flat_map(|x| x.split(';'))
		.filter_map(|x| x.trim().split_once('='))
		.find(|(name, _)| *name == SESSION_COOKIE)
		.and_then(|(_, value)| SessionId::from_str_radix(value, 16).ok())
}

/// Attaches the session cookie if a new session was created for `res`.
fn with_session(mut res: Response, new_id: Option<SessionId>) -> Response {
	if let Some(id) = new_id {
		let cookie = format!("{SESSION_COOKIE}={id:032x}; Path=/; HttpOnly; SameSite=Lax");
		match HeaderValue::from_str(&cookie) {
			Ok(value) => {
				res.headers_mut().append(SET_COOKIE, value);
			}
			Err(err) => tracing::error!("bad session cookie: {err}"),
		}
	}
	res
}

pub fn router<E: ProcessEndpoint>(state: AppState<E>, max_file_size: u64) -> Router {
	Router::new()
		.route("/", get(index::<E>))
		.route("/select", post(select::<E>))
		.route("/upload", post(upload::<E>))
		.route("/health", get(health))
		.with_state(state)
		.layer(DefaultBodyLimit::max(usize::try_from(max_file_size).unwrap_or(usize::MAX)))
		.layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
	let origins = allowed_origins
		.iter()
		.filter_map(|x| match x.parse::<HeaderValue>() {
			Ok(origin) => Some(origin),
			Err(_) => {
				tracing::warn!("ignoring invalid origin {x:?}");
				None
			}
		})
		.collect::<Vec<_>>();
	CorsLayer::new()
		.allow_origin(AllowOrigin::list(origins))
		.allow_methods([Method::GET, Method::POST])
}

pub async fn initialize_server(config: &Config) -> anyhow::Result<()> {
	let endpoint = HttpProcessClient::new(&config.backend_url, config.request_timeout())
		.context("failed to set up the processing client")?;
	tracing::info!("processing endpoint is {}", endpoint.url());

	let sessions = Arc::new(SessionManager::new(Arc::new(endpoint), config.session_ttl()));
	tokio::spawn({
		let sessions = sessions.clone();
		async move {
			let mut interval = tokio::time::interval(PRUNE_INTERVAL);
			loop {
				interval.tick().await;
				let pruned = sessions.prune().await;
				if pruned > 0 {
					tracing::debug!("pruned {pruned} idle sessions");
				}
			}
		}
	});

	let router = router(AppState::new(sessions, &config.accept), config.max_file_size)
		.layer(cors_layer(&config.allowed_origins));

	let addr = SocketAddr::from((config.bind_address, config.port));
	let server = axum::Server::try_bind(&addr)
		.with_context(|| format!("failed to bind {addr}"))?
		.serve(router.into_make_service());
	tracing::info!("serving uploader on http://{}", server.local_addr());

	server
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
			tracing::info!("shutting down");
		})
		.await
		.context("server error")
}

enum EndpointResult<T: IntoResponse> {
	Ok(T),
	Err(StatusCode, Option<Cow<'static, str>>),
}

impl<T: IntoResponse> IntoResponse for EndpointResult<T> {
	fn into_response(self) -> axum::response::Response {
		match self {
			Self::Ok(t) => t.into_response(),
			Self::Err(code, msg) => (code, msg.unwrap_or_default()).into_response(),
		}
	}
}

/// Reads the `file` field. A browser submits an empty part with no file
/// name when nothing was picked, that yields `Ok(None)`.
async fn parse_multipart(
	multipart: &mut Multipart,
) -> Result<Option<SelectedFile>, Cow<'static, str>> {
	loop {
		let field = match multipart.next_field().await {
			Ok(Some(field)) => field,
			Ok(None) => return Ok(None),
			Err(err) => return Err(err.to_string().into()),
		};
		if field.name() != Some(FILE_FIELD) {
			continue;
		}

		let name = field.file_name().unwrap_or_default().to_owned();
		let content_type = field.content_type().map(str::to_owned);
		let data = field.bytes().await.map_err(|err| Cow::from(err.to_string()))?;
		if name.is_empty() && data.is_empty() {
			return Ok(None);
		}
		tracing::debug!("received {name} ({} bytes)", data.len());
		return Ok(Some(SelectedFile::from_bytes(name, content_type, data)));
	}
}

async fn drain_multipart(mut multipart: Multipart) {
	while let Some(mut field) = multipart.next_field().await.ok().flatten() {
		while let Some(x) = field.chunk().await.ok().flatten() {
			drop(x);
		}
	}
}

/// Shared part of `/select` and `/upload`: find the session and apply the
/// file, if the form carried one.
async fn accept_form<E: ProcessEndpoint>(
	state: &AppState<E>,
	headers: &HeaderMap,
	multipart: Result<Multipart, MultipartRejection>,
) -> Result<(Arc<Uploader<E>>, Option<SessionId>), EndpointResult<Response>> {
	let mut multipart = multipart.map_err(|err| {
		tracing::info!("rejected form: {err}");
		EndpointResult::Err(StatusCode::BAD_REQUEST, Some(err.to_string().into()))
	})?;

	let file = parse_multipart(&mut multipart)
		.await
		.map_err(|msg| EndpointResult::Err(StatusCode::BAD_REQUEST, Some(msg)))?;
	// drain the request so it's possible to send a response
	// in case the client sent multiple fields
	drain_multipart(multipart).await;

	let (uploader, new_id) = state.session(headers).await;
	if let Some(file) = file {
		uploader.select_file(file).await;
	}
	Ok((uploader, new_id))
}

async fn index<E: ProcessEndpoint>(
	State(state): State<AppState<E>>,
	headers: HeaderMap,
) -> Response {
	let (uploader, new_id) = state.session(&headers).await;
	let page = UploaderPage::new(&*state.accept, uploader.snapshot().await);
	with_session(page.into_response(), new_id)
}

/// Select a file without uploading it.
/// Accepts a `multipart/form-data` request with a `file` field.
async fn select<E: ProcessEndpoint>(
	State(state): State<AppState<E>>,
	headers: HeaderMap,
	multipart: Result<Multipart, MultipartRejection>,
) -> EndpointResult<Response> {
	match accept_form(&state, &headers, multipart).await {
		Ok((_, new_id)) => {
			EndpointResult::Ok(with_session(Redirect::to("/").into_response(), new_id))
		}
		Err(err) => err,
	}
}

/// Select the attached file, if any, then upload the session's file to the
/// processing endpoint. Responds once the endpoint answered.
async fn upload<E: ProcessEndpoint>(
	State(state): State<AppState<E>>,
	headers: HeaderMap,
	multipart: Result<Multipart, MultipartRejection>,
) -> EndpointResult<Response> {
	let (uploader, new_id) = match accept_form(&state, &headers, multipart).await {
		Ok(x) => x,
		Err(err) => return err,
	};

	let report = uploader.trigger_upload().await;
	tracing::debug!("upload finished: {report:?}");

	EndpointResult::Ok(with_session(Redirect::to("/").into_response(), new_id))
}

async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok" }))
}
