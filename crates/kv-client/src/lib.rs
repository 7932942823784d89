//! Client facade: wires the cluster runtime, the sync and async command
//! pipelines, and the async scheduler/timeout-queue/buffer-pool trio into
//! one handle an application constructs once and shares.

pub mod error;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use kv_async::{AsyncScheduler, BufferPool, Strategy, TimeoutQueue};
use kv_cluster::Cluster;
use kv_core::policy::RetryPolicy;
use kv_core::ClientPolicy;
use kv_exec::ExecError;

pub use error::ClientError;

/// Tuning for the ambient async machinery that has no counterpart in
/// `ClientPolicy` because it governs the async pipeline's own resource
/// limits rather than cluster topology or retries.
#[derive(Debug, Clone, Copy)]
pub struct AsyncPolicy {
    pub max_commands: usize,
    pub max_commands_in_queue: Option<usize>,
    pub strategy: Strategy,
    pub timeout_tick: Duration,
    pub buffer_segments: usize,
    pub buffer_segment_size: usize,
    pub buffer_cutoff: usize,
}

impl Default for AsyncPolicy {
    fn default() -> Self {
        Self {
            max_commands: 100,
            max_commands_in_queue: Some(1000),
            strategy: Strategy::Block,
            timeout_tick: Duration::from_millis(50),
            buffer_segments: 100,
            buffer_segment_size: 8 * 1024,
            buffer_cutoff: 1024 * 1024,
        }
    }
}

pub struct Client {
    cluster: Arc<Cluster>,
    scheduler: Arc<AsyncScheduler>,
    timeout_queue: Arc<TimeoutQueue>,
    buffer_pool: Arc<BufferPool>,
}

impl Client {
    pub fn connect(policy: ClientPolicy, async_policy: AsyncPolicy) -> Result<Self, ClientError> {
        let cluster = Cluster::connect(policy)?;
        let scheduler = AsyncScheduler::new(async_policy.max_commands, async_policy.strategy, async_policy.max_commands_in_queue);
        let timeout_queue = TimeoutQueue::start(async_policy.timeout_tick);
        let buffer_pool = Arc::new(BufferPool::new(
            async_policy.buffer_segments,
            async_policy.buffer_segment_size,
            async_policy.buffer_cutoff,
        ));
        info!("client connected");
        Ok(Self { cluster, scheduler, timeout_queue, buffer_pool })
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Run one command on the caller's thread via the synchronous pipeline.
    pub fn execute_sync<T>(
        &self,
        namespace: &str,
        digest: &[u8],
        retry: &RetryPolicy,
        is_write: bool,
        build_request: impl FnMut() -> Vec<u8>,
        parse_response: impl FnMut(&[u8]) -> Result<T, ExecError>,
    ) -> Result<T, ClientError> {
        kv_exec::execute(&self.cluster, namespace, digest, retry, is_write, build_request, parse_response)
            .map_err(ClientError::from)
    }

    /// Run one command on the host's `tokio` runtime via the async pipeline,
    /// bounded by the scheduler and swept by the timeout queue.
    pub async fn execute_async<T: Send + 'static>(
        &self,
        namespace: impl Into<String>,
        digest: Vec<u8>,
        retry: RetryPolicy,
        is_write: bool,
        build_request: impl FnMut() -> Vec<u8> + Send,
        parse_response: impl FnMut(&[u8]) -> Result<T, ExecError> + Send,
    ) -> Result<T, ClientError> {
        kv_async::execute(
            self.cluster.clone(),
            self.scheduler.clone(),
            self.timeout_queue.clone(),
            self.buffer_pool.clone(),
            namespace.into(),
            digest,
            retry,
            is_write,
            build_request,
            parse_response,
        )
        .await
        .map_err(ClientError::from)
    }

    pub fn close(&self) {
        self.timeout_queue.shutdown();
        self.cluster.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_fails_fast_on_empty_seed_list() {
        let policy = ClientPolicy { fail_if_not_connected: false, ..ClientPolicy::default() };
        let result = Client::connect(policy, AsyncPolicy::default());
        assert!(result.is_err());
    }
}
