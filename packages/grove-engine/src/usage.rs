use std::sync::Mutex;

use ahash::AHashMap;

use crate::{BoxFuture, Error, Result};

/// Per-namespace retrieval-query metering. `record_queries` must be cheap
/// and infallible from the caller's point of view; implementations that talk
/// to a remote meter spawn their own delivery task.
pub trait UsageAccountant
where
	Self: Send + Sync,
{
	/// Checked before any retrieval work starts.
	fn check_quota<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<()>>;

	/// Fire-and-forget increment, called once per completed request.
	fn record_queries(&self, namespace: &str, queries: u32);
}

/// In-memory accountant with an optional shared ceiling. Counters reset
/// with the process; durable metering belongs behind the trait.
pub struct MeteredUsage {
	ceiling: Option<u64>,
	counters: Mutex<AHashMap<String, u64>>,
}
impl MeteredUsage {
	pub fn new(ceiling: Option<u64>) -> Self {
		Self { ceiling, counters: Mutex::new(AHashMap::new()) }
	}

	pub fn total(&self, namespace: &str) -> u64 {
		self.counters.lock().expect("usage counters poisoned").get(namespace).copied().unwrap_or(0)
	}
}
impl UsageAccountant for MeteredUsage {
	fn check_quota<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let Some(ceiling) = self.ceiling else {
				return Ok(());
			};
			let used = self.total(namespace);

			if used >= ceiling {
				return Err(Error::RateLimited {
					message: format!(
						"Namespace {namespace:?} used {used} of {ceiling} retrieval queries."
					),
				});
			}

			Ok(())
		})
	}

	fn record_queries(&self, namespace: &str, queries: u32) {
		let mut counters = self.counters.lock().expect("usage counters poisoned");
		let counter = counters.entry(namespace.to_string()).or_insert(0);

		*counter += u64::from(queries);

		tracing::debug!(namespace, queries, total = *counter, "Recorded retrieval queries.");
	}
}
