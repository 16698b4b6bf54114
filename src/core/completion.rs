use crate::domain::model::UploadOutcome;
use crate::utils::error::{Result, UploadError};
use tokio::sync::watch;

pub(crate) type CompletionSlot = Option<Result<UploadOutcome>>;

/// Resolves once the upload stream it was taken from has been closed and the
/// object is stored (or the upload failed).
///
/// Handles are cheap to clone; every clone observes the same result. Waiting
/// before the stream is closed is allowed and simply waits for the close.
#[derive(Debug, Clone)]
pub struct UploadCompletion {
    rx: watch::Receiver<CompletionSlot>,
}

pub(crate) fn channel() -> (watch::Sender<CompletionSlot>, UploadCompletion) {
    let (tx, rx) = watch::channel(None);
    (tx, UploadCompletion { rx })
}

impl UploadCompletion {
    pub async fn wait(mut self) -> Result<UploadOutcome> {
        match self.rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone().unwrap_or(Err(UploadError::Abandoned)),
            // sender dropped without a result: stream was dropped unclosed
            Err(_) => Err(UploadError::Abandoned),
        }
    }

    pub fn try_result(&self) -> Option<Result<UploadOutcome>> {
        if let Some(result) = self.rx.borrow().clone() {
            return Some(result);
        }
        if self.rx.has_changed().is_err() {
            return Some(Err(UploadError::Abandoned));
        }
        None
    }

    pub fn is_finished(&self) -> bool {
        self.try_result().is_some()
    }
}
