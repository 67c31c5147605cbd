// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tokio::task::JoinHandle;

/// A background task that is aborted when its handle is dropped.
pub(crate) struct OwnedTaskHandle(Option<JoinHandle<()>>);

impl OwnedTaskHandle {
	pub fn new(inner: JoinHandle<()>) -> Self {
		Self(Some(inner))
	}

	pub fn is_finished(&self) -> bool {
		self.0.as_ref().map_or(true, JoinHandle::is_finished)
	}
}

impl Drop for OwnedTaskHandle {
	fn drop(&mut self) {
		if let Some(handle) = self.0.take() {
			handle.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Arc;
	use std::time::Duration;

	#[tokio::test]
	async fn dropping_the_handle_aborts_the_task() {
		let reached = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&reached);
		let handle = OwnedTaskHandle::new(tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(100)).await;
			flag.store(true, Ordering::SeqCst);
		}));

		assert!(!handle.is_finished());
		drop(handle);
		tokio::time::sleep(Duration::from_millis(200)).await;

		assert!(!reached.load(Ordering::SeqCst));
	}
}
