//! Per-connection writer task shared by both ends.

use mondo_rpc::{Completer, Outcome, Tag};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::frame::{Frame, write_frame};

/// A frame queued for writing, optionally followed by a completion.
#[derive(Debug)]
pub(crate) struct Outbound {
	pub frame: Frame,
	/// Posted with [`Outcome::Ok`] once the frame is flushed, [`Outcome::Failed`] otherwise.
	pub notify: Option<(Tag, Completer)>,
}

impl Outbound {
	pub fn plain(frame: Frame) -> Self {
		Self { frame, notify: None }
	}
}

pub(crate) type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// Writes queued frames in order until every sender is gone, `closed` fires, or a write fails.
///
/// Frames still queued after a failure have their completions posted as failed.
pub(crate) async fn write_loop<W: AsyncWrite + Unpin>(
	mut writer: W,
	mut rx: mpsc::UnboundedReceiver<Outbound>,
	closed: CancellationToken,
) {
	loop {
		let outbound = tokio::select! {
			biased;
			() = closed.cancelled() => break,
			outbound = rx.recv() => match outbound {
				Some(outbound) => outbound,
				None => break,
			},
		};
		let written = write_frame(&mut writer, &outbound.frame).await;
		let failed = written.is_err();
		if let Err(e) = written {
			debug!(error = %e, "transport.write_failed");
		}
		if let Some((tag, completer)) = outbound.notify {
			let outcome = if failed { Outcome::Failed } else { Outcome::Ok };
			post(&completer, tag, outcome);
		}
		if failed {
			closed.cancel();
			break;
		}
	}

	rx.close();
	while let Ok(outbound) = rx.try_recv() {
		if let Some((tag, completer)) = outbound.notify {
			post(&completer, tag, Outcome::Failed);
		}
	}
}

/// Posts a completion, tolerating a queue that already shut down.
pub(crate) fn post(completer: &Completer, tag: Tag, outcome: Outcome) {
	if completer.complete(tag, outcome).is_err() {
		trace!(tag = %tag, ?outcome, "transport.completion_after_shutdown");
	}
}
