//! Async command pipeline (§4.5): one `tokio` task per in-flight command,
//! suspending on socket readiness instead of blocking a thread. The state
//! machine itself is the `CommandSlot` CAS cell from `timeout_queue`, shared
//! between this task and the timeout sweep so the two never both resolve
//! the same command.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use kv_cluster::{select_node, Cluster, Node};
use kv_core::partition::partition_id;
use kv_core::policy::{ReadModeSc, RetryPolicy};
use kv_exec::ExecError;
use kv_wire::framing::{Header, TYPE_AS_MSG, VERSION_MESSAGE};

use crate::buffer_pool::BufferPool;
use crate::error::AsyncError;
use crate::scheduler::AsyncScheduler;
use crate::timeout_queue::{
    CommandSlot, TimeoutQueue, STATE_FAIL_SOCKET_TIMEOUT, STATE_FAIL_TOTAL_TIMEOUT, STATE_SUCCESS,
};

async fn open(node: &Node, connect_timeout: Duration) -> Result<TcpStream, std::io::Error> {
    let addr = format!("{}:{}", node.host.name, node.host.port);
    tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))?
}

/// Execute one command asynchronously against `namespace`, bounded by the
/// scheduler's in-flight limit and the timeout queue's deadline sweep.
#[allow(clippy::too_many_arguments)]
pub async fn execute<T: Send + 'static>(
    cluster: Arc<Cluster>,
    scheduler: Arc<AsyncScheduler>,
    timeout_queue: Arc<TimeoutQueue>,
    buffer_pool: Arc<BufferPool>,
    namespace: String,
    digest: Vec<u8>,
    retry: RetryPolicy,
    is_write: bool,
    mut build_request: impl FnMut() -> Vec<u8> + Send,
    mut parse_response: impl FnMut(&[u8]) -> Result<T, ExecError> + Send,
) -> Result<T, AsyncError> {
    let permit = scheduler.acquire().await?;

    let slot = CommandSlot::new();
    let deadline = Instant::now() + retry.total_timeout;
    timeout_queue.register(&slot, deadline, STATE_FAIL_TOTAL_TIMEOUT);

    let partition = partition_id(&digest);
    let mut sequence = 0u32;
    let mut sequence_sc = 0u32;
    let mut iteration = 0u32;
    let mut in_doubt = false;
    let mut previous: Option<Arc<Node>> = None;

    let outcome = loop {
        if !slot.is_in_progress() {
            break Err(AsyncError::TotalTimeout);
        }
        if iteration > retry.max_retries || Instant::now() >= deadline {
            break Err(AsyncError::Exec(ExecError::TotalTimeout { iterations: iteration, in_doubt }));
        }

        let partitions = match cluster.topology().namespace(&namespace) {
            Some(p) => p,
            None => break Err(AsyncError::Cluster(kv_cluster::ClusterError::InvalidNode)),
        };
        let all_nodes = cluster.active_nodes();

        let node = match select_node(
            &partitions,
            partition,
            retry.effective_replica_policy(),
            &mut sequence,
            &[],
            &namespace,
            &all_nodes,
            &cluster.counters(),
            previous.as_ref(),
        ) {
            Ok(node) => node,
            Err(err) => break Err(AsyncError::Cluster(err)),
        };
        node.add_reference();

        let attempt = run_attempt(&node, &retry, is_write, &buffer_pool, &mut build_request, &mut parse_response).await;

        match attempt {
            Ok(value) => break Ok(value),
            Err(err) => {
                node.record_error();
                previous = Some(node);
                if err.in_doubt() {
                    in_doubt = true;
                }
                let socket_timeout = matches!(err, ExecError::SocketTimeout { .. });
                if socket_timeout && retry.read_mode_sc == ReadModeSc::Linearize {
                    // See §9: a linearize-read socket timeout never advances sequenceSC.
                } else {
                    sequence_sc = sequence_sc.wrapping_add(1);
                }
                sequence = sequence.wrapping_add(1);
                iteration += 1;

                if !err.is_retryable() {
                    break Err(AsyncError::Exec(err));
                }
                debug!(iteration, error = %err, "async command attempt failed, retrying");
            }
        }
    };

    match &outcome {
        Ok(_) => {
            slot.try_complete(STATE_SUCCESS);
        }
        Err(AsyncError::TotalTimeout) => {
            slot.try_complete(STATE_FAIL_TOTAL_TIMEOUT);
        }
        Err(_) => {
            slot.try_complete(STATE_FAIL_SOCKET_TIMEOUT);
        }
    }
    scheduler.release(permit).await;
    outcome
}

async fn run_attempt<T>(
    node: &Node,
    retry: &RetryPolicy,
    is_write: bool,
    buffer_pool: &BufferPool,
    build_request: &mut (impl FnMut() -> Vec<u8> + Send),
    parse_response: &mut (impl FnMut(&[u8]) -> Result<T, ExecError> + Send),
) -> Result<T, ExecError> {
    let socket_timeout = if retry.socket_timeout.is_zero() { Duration::from_secs(1) } else { retry.socket_timeout };

    let mut stream = open(node, socket_timeout).await.map_err(wrap_io)?;

    let payload = build_request();
    let header = Header::new(VERSION_MESSAGE, TYPE_AS_MSG, payload.len() as u64);
    let write_result = write_frame(&mut stream, &header.encode(), &payload, socket_timeout).await;
    if let Err(err) = write_result {
        return Err(classify_timeout(err, is_write));
    }

    let mut header_buf = [0u8; kv_wire::framing::HEADER_LEN];
    let header_read = tokio::time::timeout(socket_timeout, stream.read_exact(&mut header_buf)).await;
    let header = match header_read {
        Ok(Ok(_)) => Header::decode(&header_buf)?,
        Ok(Err(err)) => return Err(ExecError::Io(err)),
        Err(_) => return Err(ExecError::SocketTimeout { iteration: 0, in_doubt: is_write }),
    };

    let mut segment = buffer_pool.acquire(header.length as usize);
    let buf = segment.as_mut();
    buf.resize(header.length as usize, 0);
    let body_read = tokio::time::timeout(socket_timeout, stream.read_exact(buf)).await;
    let result = match body_read {
        Ok(Ok(_)) => parse_response(buf),
        Ok(Err(err)) => Err(ExecError::Io(err)),
        Err(_) => Err(ExecError::SocketTimeout { iteration: 0, in_doubt: is_write }),
    };
    buffer_pool.release(segment);
    result
}

async fn write_frame(
    stream: &mut TcpStream,
    header: &[u8],
    payload: &[u8],
    socket_timeout: Duration,
) -> Result<(), std::io::Error> {
    tokio::time::timeout(socket_timeout, async {
        stream.write_all(header).await?;
        stream.write_all(payload).await
    })
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))?
}

fn wrap_io(err: std::io::Error) -> ExecError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        ExecError::SocketTimeout { iteration: 0, in_doubt: false }
    } else {
        ExecError::Io(err)
    }
}

fn classify_timeout(err: std::io::Error, is_write: bool) -> ExecError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        ExecError::SocketTimeout { iteration: 0, in_doubt: is_write }
    } else {
        ExecError::Io(err)
    }
}
