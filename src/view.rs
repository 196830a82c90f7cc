//! State of one uploader: the selected file, the status message and the
//! download link, kept as a single value so that they can't disagree.

use std::{
	fmt::Display,
	path::{Path, PathBuf},
};

use axum::body::Bytes;

pub const PROMPT_MESSAGE: &str = "Please select a file first.";
pub const SUCCESS_MESSAGE: &str = "✅ Processing finished! COPY PASTE THIS LINK INTO A NEW WINDOW TO DOWNLOAD THE TRANSLATED VIDEO:";
pub const FAILURE_MESSAGE: &str = "❌ Upload / processing failed – see the log for details.";

/// Where the content of a [`SelectedFile`] comes from.
#[derive(Debug, Clone)]
pub enum FileSource {
	/// Received whole, e.g. from a browser form.
	Memory(Bytes),
	/// Read from disk when the request is sent.
	Disk(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SelectedFile {
	name: String,
	content_type: Option<String>,
	source: FileSource,
}

impl SelectedFile {
	pub fn from_bytes(
		name: impl Into<String>,
		content_type: Option<String>,
		data: Bytes,
	) -> Self {
		Self { name: name.into(), content_type, source: FileSource::Memory(data) }
	}

	/// The content type is guessed from the extension.
	pub fn from_path(path: impl AsRef<Path>) -> Self {
		let path = path.as_ref();
		let name = path
			.file_name()
			.map(|x| x.to_string_lossy().into_owned())
			.unwrap_or_else(|| "upload".to_owned());
		let content_type =
			path.extension().and_then(|x| x.to_str()).and_then(mime_from_extension);
		Self {
			name,
			content_type: content_type.map(str::to_owned),
			source: FileSource::Disk(path.to_path_buf()),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn content_type(&self) -> Option<&str> {
		self.content_type.as_deref()
	}

	pub fn source(&self) -> &FileSource {
		&self.source
	}
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
	match ext.to_ascii_lowercase().as_str() {
		"mp4" | "m4v" => Some("video/mp4"),
		"webm" => Some("video/webm"),
		"mov" => Some("video/quicktime"),
		"mkv" => Some("video/x-matroska"),
		"avi" => Some("video/x-msvideo"),
		_ => None,
	}
}

/// Numbers the requests issued by one view.
pub type AttemptId = u64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Status {
	#[default]
	Idle,
	/// Upload was triggered without a file.
	Prompted,
	Pending { attempt: AttemptId },
	Succeeded { link: String },
	Failed,
}

impl Display for Status {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Idle => write!(f, "Idle"),
			Self::Prompted => write!(f, "Prompted"),
			Self::Pending { attempt } => write!(f, "Pending({attempt})"),
			Self::Succeeded { .. } => write!(f, "Succeeded"),
			Self::Failed => write!(f, "Failed"),
		}
	}
}

/// Result of [`UploaderView::trigger`].
#[derive(Debug, Clone)]
pub enum Trigger {
	Prompted,
	/// A request is already outstanding, nothing changed.
	Busy,
	Started { attempt: AttemptId, file: SelectedFile },
}

/// What the processing endpoint answered, as far as the view cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Processed { file_url: String },
	Failed,
}

#[derive(Debug, Default)]
pub struct UploaderView {
	file: Option<SelectedFile>,
	status: Status,
	next_attempt: AttemptId,
}

impl UploaderView {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replaces the selected file and clears the message and link.
	/// A response still pending for the previous file will be discarded.
	pub fn select_file(&mut self, file: SelectedFile) {
		self.file = Some(file);
		self.status = Status::Idle;
	}

	pub fn trigger(&mut self) -> Trigger {
		if self.is_pending() {
			return Trigger::Busy;
		}
		let Some(file) = self.file.clone() else {
			self.status = Status::Prompted;
			return Trigger::Prompted;
		};

		let attempt = self.next_attempt;
		self.next_attempt += 1;
		self.status = Status::Pending { attempt };
		Trigger::Started { attempt, file }
	}

	/// Applies the outcome of `attempt`. Returns `false` if the attempt is no
	/// longer the pending one and the outcome was dropped.
	pub fn finish(&mut self, attempt: AttemptId, outcome: Outcome) -> bool {
		if self.status != (Status::Pending { attempt }) {
			return false;
		}
		self.status = match outcome {
			Outcome::Processed { file_url } => Status::Succeeded { link: file_url },
			Outcome::Failed => Status::Failed,
		};
		true
	}

	pub fn status(&self) -> &Status {
		&self.status
	}

	pub fn selected_file(&self) -> Option<&SelectedFile> {
		self.file.as_ref()
	}

	pub fn is_pending(&self) -> bool {
		matches!(self.status, Status::Pending { .. })
	}

	/// Empty when there is nothing to say.
	pub fn message(&self) -> &'static str {
		match self.status {
			Status::Idle | Status::Pending { .. } => "",
			Status::Prompted => PROMPT_MESSAGE,
			Status::Succeeded { .. } => SUCCESS_MESSAGE,
			Status::Failed => FAILURE_MESSAGE,
		}
	}

	pub fn link(&self) -> Option<&str> {
		match &self.status {
			Status::Succeeded { link } => Some(link),
			_ => None,
		}
	}
}
