use askama::Template;

use crate::{uploader::ViewSnapshot, uri::encode_uri};

/// The uploader page. Rendered from a session's view on every `GET /`.
#[derive(Template)]
#[template(path = "index.html")]
pub struct UploaderPage {
	accept: String,
	message: &'static str,
	link_href: String,
	link_text: String,
	pending: bool,
	file_name: String,
}

impl UploaderPage {
	pub fn new(accept: impl Into<String>, snapshot: ViewSnapshot) -> Self {
		let link_text = snapshot.link.unwrap_or_default();
		Self {
			accept: accept.into(),
			message: snapshot.message,
			link_href: encode_uri(&link_text),
			link_text,
			pending: snapshot.pending,
			file_name: snapshot.file_name.unwrap_or_default(),
		}
	}
}
