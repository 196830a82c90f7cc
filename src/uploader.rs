use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
	client::ProcessEndpoint,
	view::{AttemptId, Outcome, SelectedFile, Trigger, UploaderView},
};

/// What the feedback area shows, detached from the view's lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSnapshot {
	pub message: &'static str,
	pub link: Option<String>,
	pub pending: bool,
	pub file_name: Option<String>,
}

impl From<&UploaderView> for ViewSnapshot {
	fn from(view: &UploaderView) -> Self {
		Self {
			message: view.message(),
			link: view.link().map(str::to_owned),
			pending: view.is_pending(),
			file_name: view.selected_file().map(|x| x.name().to_owned()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReport {
	/// No file was selected, nothing was sent.
	Prompted,
	/// Another upload of this view is still running, nothing was sent.
	Busy,
	Completed(ViewSnapshot),
	/// The file was re-selected while the request ran, its answer was dropped.
	Superseded,
}

/// Drives an [`UploaderView`] against a processing endpoint.
pub struct Uploader<E> {
	view: Mutex<UploaderView>,
	endpoint: Arc<E>,
}

impl<E: ProcessEndpoint> Uploader<E> {
	pub fn new(endpoint: Arc<E>) -> Self {
		Self { view: Mutex::new(UploaderView::new()), endpoint }
	}

	pub async fn select_file(&self, file: SelectedFile) {
		tracing::debug!("selected {}", file.name());
		self.view.lock().await.select_file(file);
	}

	/// Sends the selected file, if any, and waits for the endpoint.
	///
	/// The request and the update of the view run in their own task, so the
	/// view settles even when the caller is dropped mid-request (e.g. the
	/// browser went away). The view is not locked while the request is in
	/// flight.
	pub async fn trigger_upload(self: &Arc<Self>) -> UploadReport {
		let trigger = self.view.lock().await.trigger();
		let (attempt, file) = match trigger {
			Trigger::Prompted => return UploadReport::Prompted,
			Trigger::Busy => {
				tracing::debug!("upload already in progress");
				return UploadReport::Busy;
			}
			Trigger::Started { attempt, file } => (attempt, file),
		};

		tracing::info!("uploading {} (attempt {attempt})", file.name());
		let task = tokio::spawn({
			let uploader = Arc::clone(self);
			async move { uploader.run_attempt(attempt, file).await }
		});

		match task.await {
			Ok(report) => report,
			Err(err) => {
				tracing::error!("upload task of attempt {attempt} died: {err}");
				self.settle(attempt, Outcome::Failed).await
			}
		}
	}

	async fn run_attempt(&self, attempt: AttemptId, file: SelectedFile) -> UploadReport {
		let outcome = match self.endpoint.process(&file).await {
			Ok(res) => {
				tracing::info!("{} processed: {}", file.name(), res.file_url);
				Outcome::Processed { file_url: res.file_url }
			}
			Err(err) => {
				tracing::error!("upload / processing of {} failed: {err}", file.name());
				Outcome::Failed
			}
		};
		self.settle(attempt, outcome).await
	}

	async fn settle(&self, attempt: AttemptId, outcome: Outcome) -> UploadReport {
		let mut view = self.view.lock().await;
		if view.finish(attempt, outcome) {
			tracing::debug!("attempt {attempt} settled as {}", view.status());
			UploadReport::Completed(ViewSnapshot::from(&*view))
		} else {
			tracing::debug!(
				"dropping outcome of attempt {attempt}, view is {} after re-selection",
				view.status()
			);
			UploadReport::Superseded
		}
	}

	pub async fn snapshot(&self) -> ViewSnapshot {
		ViewSnapshot::from(&*self.view.lock().await)
	}
}
