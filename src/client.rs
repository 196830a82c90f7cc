use std::{future::Future, time::Duration};

use reqwest::{
	multipart::{Form, Part},
	Body, StatusCode, Url,
};
use tokio_util::io::ReaderStream;

use crate::view::{FileSource, SelectedFile};

/// Path of the processing endpoint, relative to the backend origin.
pub const PROCESS_PATH: &str = "/process/";
/// Name of the multipart field carrying the video.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
	#[error("invalid endpoint {url:?}: {reason}")]
	InvalidEndpoint { url: String, reason: String },
	#[error("failed to read {name}: {source}")]
	Io {
		name: String,
		#[source]
		source: std::io::Error,
	},
	#[error("request failed: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("endpoint answered {status}: {detail}")]
	Status { status: StatusCode, detail: String },
	#[error("malformed response: {0}")]
	Malformed(String),
}

/// Successful answer of the processing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ProcessResponse {
	pub file_url: String,
	#[serde(default)]
	pub message: Option<String>,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
	error: String,
}

/// Something that takes a video and gives back where the result can be
/// downloaded.
pub trait ProcessEndpoint: Send + Sync + 'static {
	fn process(
		&self,
		file: &SelectedFile,
	) -> impl Future<Output = Result<ProcessResponse, ProcessError>> + Send;
}

/// Posts the file as `multipart/form-data` to `{backend}/process/`.
#[derive(Debug, Clone)]
pub struct HttpProcessClient {
	client: reqwest::Client,
	url: Url,
}

impl HttpProcessClient {
	pub fn new(backend_url: &str, timeout: Option<Duration>) -> Result<Self, ProcessError> {
		let invalid = |reason: String| ProcessError::InvalidEndpoint {
			url: backend_url.to_owned(),
			reason,
		};
		let url = Url::parse(backend_url)
			.and_then(|base| base.join(PROCESS_PATH))
			.map_err(|err| invalid(err.to_string()))?;

		let mut builder = reqwest::Client::builder().user_agent(concat!(
			env!("CARGO_PKG_NAME"),
			"/",
			env!("CARGO_PKG_VERSION")
		));
		if let Some(timeout) = timeout {
			builder = builder.timeout(timeout);
		}

		Ok(Self { client: builder.build()?, url })
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	async fn file_part(file: &SelectedFile) -> Result<Part, ProcessError> {
		let io_err = |source| ProcessError::Io { name: file.name().to_owned(), source };
		let part = match file.source() {
			FileSource::Memory(data) => {
				Part::stream_with_length(Body::from(data.clone()), data.len() as u64)
			}
			FileSource::Disk(path) => {
				let handle = tokio::fs::File::open(path).await.map_err(io_err)?;
				let len = handle.metadata().await.map_err(io_err)?.len();
				Part::stream_with_length(Body::wrap_stream(ReaderStream::new(handle)), len)
			}
		};
		let part = part.file_name(file.name().to_owned());
		match file.content_type() {
			Some(content_type) => Ok(part.mime_str(content_type)?),
			None => Ok(part),
		}
	}
}

impl ProcessEndpoint for HttpProcessClient {
	async fn process(&self, file: &SelectedFile) -> Result<ProcessResponse, ProcessError> {
		let form = Form::new().part(FILE_FIELD, Self::file_part(file).await?);

		tracing::debug!("posting {} to {}", file.name(), self.url);
		let res = self.client.post(self.url.clone()).multipart(form).send().await?;
		let status = res.status();
		let body = res.bytes().await?;

		if !status.is_success() {
			let detail = serde_json::from_slice::<ErrorBody>(&body)
				.map(|x| x.error)
				.unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
			return Err(ProcessError::Status { status, detail });
		}

		serde_json::from_slice(&body).map_err(|err| ProcessError::Malformed(err.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use std::{
		net::{SocketAddr, TcpListener},
		sync::{Arc, Mutex},
	};

	use axum::{
		extract::Multipart,
		http::StatusCode,
		response::IntoResponse,
		routing::post,
		Json, Router,
	};
	use serde_json::json;

	use super::*;
	use crate::view::SelectedFile;

	fn serve(app: Router) -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));
		addr
	}

	fn demo() -> SelectedFile {
		SelectedFile::from_bytes(
			"demo.mp4",
			Some("video/mp4".to_owned()),
			axum::body::Bytes::from_static(b"not really a video"),
		)
	}

	/// Echoes what it received so the test can check the request shape.
	async fn echo(mut multipart: Multipart) -> impl IntoResponse {
		let mut parts = Vec::new();
		while let Some(field) = multipart.next_field().await.unwrap() {
			let name = field.name().unwrap_or_default().to_owned();
			let file_name = field.file_name().unwrap_or_default().to_owned();
			let content_type = field.content_type().unwrap_or_default().to_owned();
			let data = field.bytes().await.unwrap();
			parts.push(json!({
				"name": name,
				"file_name": file_name,
				"content_type": content_type,
				"data": String::from_utf8_lossy(&data),
			}));
		}
		let file_url = format!("/files/{}.mp4", parts.len());
		Json(json!({ "message": "success", "file_url": file_url, "parts": parts }))
	}

	#[tokio::test]
	async fn sends_one_file_part_and_reads_the_url() {
		let addr = serve(Router::new().route("/process/", post(echo)));
		let client = HttpProcessClient::new(&format!("http://{addr}"), None).unwrap();
		assert_eq!(client.url().path(), "/process/");

		let res = client.process(&demo()).await.unwrap();
		assert_eq!(res.file_url, "/files/1.mp4");
		assert_eq!(res.message.as_deref(), Some("success"));
	}

	#[tokio::test]
	async fn part_carries_name_type_and_content() {
		let (tx, rx) = tokio::sync::oneshot::channel();
		let tx = Arc::new(Mutex::new(Some(tx)));
		let app = Router::new().route(
			"/process/",
			post(move |mut multipart: Multipart| {
				let tx = tx.clone();
				async move {
					let field = multipart.next_field().await.unwrap().unwrap();
					let seen = (
						field.name().map(str::to_owned),
						field.file_name().map(str::to_owned),
						field.content_type().map(str::to_owned),
						field.bytes().await.unwrap(),
					);
					let sender = tx.lock().unwrap().take();
					if let Some(sender) = sender {
						let _ = sender.send(seen);
					}
					Json(json!({ "file_url": "https://example.com/out.mp4" }))
				}
			}),
		);
		let addr = serve(app);
		let client = HttpProcessClient::new(&format!("http://{addr}/"), None).unwrap();

		client.process(&demo()).await.unwrap();

		let (name, file_name, content_type, data) = rx.await.unwrap();
		assert_eq!(name.as_deref(), Some("file"));
		assert_eq!(file_name.as_deref(), Some("demo.mp4"));
		assert_eq!(content_type.as_deref(), Some("video/mp4"));
		assert_eq!(&data[..], b"not really a video");
	}

	#[tokio::test]
	async fn streams_files_from_disk() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("clip.mp4");
		std::fs::write(&path, vec![7u8; 64 * 1024]).unwrap();

		let app = Router::new().route(
			"/process/",
			post(|mut multipart: Multipart| async move {
				let field = multipart.next_field().await.unwrap().unwrap();
				let len = field.bytes().await.unwrap().len();
				Json(json!({ "file_url": format!("/files/{len}.mp4") }))
			}),
		);
		let addr = serve(app);
		let client = HttpProcessClient::new(&format!("http://{addr}"), None).unwrap();

		let res = client.process(&SelectedFile::from_path(&path)).await.unwrap();
		assert_eq!(res.file_url, "/files/65536.mp4");
	}

	#[tokio::test]
	async fn missing_file_on_disk_is_an_io_error() {
		let client = HttpProcessClient::new("http://127.0.0.1:9", None).unwrap();
		let err = client
			.process(&SelectedFile::from_path("/definitely/not/here.mp4"))
			.await
			.unwrap_err();
		assert!(matches!(err, ProcessError::Io { .. }), "{err}");
	}

	#[tokio::test]
	async fn server_error_keeps_the_detail() {
		let app = Router::new().route(
			"/process/",
			post(|| async {
				(StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "ffmpeg exited with 1" })))
			}),
		);
		let addr = serve(app);
		let client = HttpProcessClient::new(&format!("http://{addr}"), None).unwrap();

		match client.process(&demo()).await {
			Err(ProcessError::Status { status, detail }) => {
				assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
				assert_eq!(detail, "ffmpeg exited with 1");
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn body_without_url_is_malformed() {
		let app = Router::new()
			.route("/process/", post(|| async { Json(json!({ "message": "success" })) }));
		let addr = serve(app);
		let client = HttpProcessClient::new(&format!("http://{addr}"), None).unwrap();

		let err = client.process(&demo()).await.unwrap_err();
		assert!(matches!(err, ProcessError::Malformed(_)), "{err}");

		let app = Router::new().route("/process/", post(|| async { "<html>oops</html>" }));
		let addr = serve(app);
		let client = HttpProcessClient::new(&format!("http://{addr}"), None).unwrap();
		let err = client.process(&demo()).await.unwrap_err();
		assert!(matches!(err, ProcessError::Malformed(_)), "{err}");
	}

	#[tokio::test]
	async fn refused_connection_is_a_transport_error() {
		let addr = {
			let listener = TcpListener::bind("127.0.0.1:0").unwrap();
			listener.local_addr().unwrap()
		};
		let client = HttpProcessClient::new(&format!("http://{addr}"), None).unwrap();

		let err = client.process(&demo()).await.unwrap_err();
		assert!(matches!(err, ProcessError::Transport(_)), "{err}");
	}

	#[test]
	fn relative_backend_is_rejected() {
		let err = HttpProcessClient::new("/process/", None).unwrap_err();
		assert!(matches!(err, ProcessError::InvalidEndpoint { .. }));
	}
}
