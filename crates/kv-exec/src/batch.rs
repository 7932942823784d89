//! Batch planner (§4.6): group N keys into one sub-command per target node,
//! and re-plan across topology changes when a sub-command must retry.

use std::collections::HashMap;
use std::sync::Arc;

use kv_core::partition::partition_id;
use kv_core::policy::RetryPolicy;
use kv_cluster::{select_node, Cluster, ClusterError, Node};

use crate::error::ExecError;

pub struct BatchKey {
    pub offset: usize,
    pub digest: Vec<u8>,
}

pub struct SubCommand {
    pub node: Arc<Node>,
    pub offsets: Vec<usize>,
}

/// Group `keys` by the node each one's partition currently resolves to.
/// Each distinct node yields exactly one `SubCommand` carrying every offset
/// routed to it.
pub fn plan(
    cluster: &Cluster,
    namespace: &str,
    keys: &[BatchKey],
    retry: &RetryPolicy,
) -> Result<Vec<SubCommand>, ExecError> {
    plan_offsets(cluster, namespace, keys, retry)
}

fn plan_offsets(
    cluster: &Cluster,
    namespace: &str,
    keys: &[BatchKey],
    retry: &RetryPolicy,
) -> Result<Vec<SubCommand>, ExecError> {
    let partitions = cluster
        .topology()
        .namespace(namespace)
        .ok_or(ExecError::Cluster(ClusterError::InvalidNode))?;
    let all_nodes = cluster.active_nodes();
    let counters = cluster.counters();

    let mut by_node: HashMap<String, SubCommand> = HashMap::new();
    for key in keys {
        let pid = partition_id(&key.digest);
        let mut sequence = 0u32;
        let node = select_node(
            &partitions,
            pid,
            retry.effective_replica_policy(),
            &mut sequence,
            &[],
            namespace,
            &all_nodes,
            &counters,
            None,
        )
        .map_err(ExecError::Cluster)?;

        by_node
            .entry(node.name.clone())
            .or_insert_with(|| {
                node.add_reference();
                SubCommand { node: node.clone(), offsets: Vec::new() }
            })
            .offsets
            .push(key.offset);
    }

    Ok(by_node.into_values().collect())
}

/// Parent executor state tracked across the lifetime of one batch request.
pub struct BatchState<T> {
    pub max: usize,
    pub count: usize,
    pub exception: Option<ExecError>,
    pub row_error: bool,
    pub rows: HashMap<usize, T>,
    pub row_errors: HashMap<usize, ExecError>,
}

impl<T> BatchState<T> {
    pub fn new(sub_command_count: usize) -> Self {
        Self {
            max: sub_command_count,
            count: 0,
            exception: None,
            row_error: false,
            rows: HashMap::new(),
            row_errors: HashMap::new(),
        }
    }

    pub fn record_row(&mut self, offset: usize, result: Result<T, ExecError>) {
        match result {
            Ok(value) => {
                self.rows.insert(offset, value);
            }
            Err(err) => {
                self.row_error = true;
                self.row_errors.insert(offset, err);
            }
        }
    }

    pub fn complete_sub_command(&mut self, outcome: Result<(), ExecError>) {
        self.count += 1;
        if let Err(err) = outcome {
            if self.exception.is_none() {
                self.exception = Some(err);
            }
        }
    }

    /// The parent succeeds iff every sub-command (including re-planned
    /// children) reported success; row-specific errors do not fail the
    /// batch, they only set `row_error`.
    pub fn is_success(&self) -> bool {
        self.count >= self.max && self.exception.is_none()
    }

    /// Re-planning grew the child count; adjust `max` accordingly.
    pub fn adjust_max(&mut self, delta: isize) {
        self.max = (self.max as isize + delta).max(0) as usize;
    }
}

/// Re-plan one sub-command's offsets against the *current* topology. If
/// every offset still maps to the sub-command's original node, the caller
/// should retry in place rather than calling this.
pub fn replan_sub_command(
    cluster: &Cluster,
    namespace: &str,
    original: &SubCommand,
    digests: &HashMap<usize, Vec<u8>>,
    retry: &RetryPolicy,
) -> Result<Vec<SubCommand>, ExecError> {
    let keys: Vec<BatchKey> = original
        .offsets
        .iter()
        .filter_map(|&offset| digests.get(&offset).map(|d| BatchKey { offset, digest: d.clone() }))
        .collect();
    plan_offsets(cluster, namespace, &keys, retry)
}

/// Whether re-planned offsets are unchanged from the original single-node
/// assignment (in which case the caller should retry in place).
pub fn unchanged(original: &SubCommand, replanned: &[SubCommand]) -> bool {
    replanned.len() == 1 && replanned[0].node.name == original.node.name
}

/// Drain a queue of sub-commands, dispatching each through the command
/// pipeline's single-attempt primitive and handing a retryable failure to
/// `replan` for re-routing. Kept free of any `Cluster` dependency so the
/// dispatch/retry bookkeeping can be exercised directly against a mock node.
fn run_batch_loop<T>(
    retry: &RetryPolicy,
    is_write: bool,
    initial: Vec<SubCommand>,
    mut build_request: impl FnMut(&SubCommand) -> Vec<u8>,
    mut parse_rows: impl FnMut(&[u8], &SubCommand) -> HashMap<usize, Result<T, ExecError>>,
    mut replan: impl FnMut(&SubCommand) -> Result<Vec<SubCommand>, ExecError>,
) -> BatchState<T> {
    let mut state = BatchState::new(initial.len());
    let mut queue: Vec<(SubCommand, u32)> = initial.into_iter().map(|s| (s, 0)).collect();

    while let Some((sub, attempt)) = queue.pop() {
        let mut cmd_state = crate::command::CommandState { iteration: attempt, ..Default::default() };
        let outcome = crate::command::run_attempt(
            &sub.node,
            retry,
            is_write,
            &mut cmd_state,
            &mut || build_request(&sub),
            &mut |body: &[u8]| Ok(parse_rows(body, &sub)),
        );

        match outcome {
            Ok(rows) => {
                for (offset, row) in rows {
                    state.record_row(offset, row);
                }
                state.complete_sub_command(Ok(()));
            }
            Err(err) => {
                sub.node.record_error();
                if attempt >= retry.max_retries || !err.is_retryable() {
                    state.complete_sub_command(Err(err));
                    continue;
                }
                match replan(&sub) {
                    Ok(replanned) if unchanged(&sub, &replanned) => {
                        queue.push((sub, attempt + 1));
                    }
                    Ok(replanned) => {
                        state.adjust_max(replanned.len() as isize - 1);
                        queue.extend(replanned.into_iter().map(|child| (child, attempt + 1)));
                    }
                    Err(replan_err) => {
                        state.complete_sub_command(Err(replan_err));
                    }
                }
            }
        }
    }

    state
}

/// Run a batch end to end (§4.6): plan, dispatch one request per node,
/// parse per-row results out of each sub-command's response, and re-plan
/// across topology changes when a sub-command fails retryably.
///
/// `build_request` builds one sub-command's request payload. `parse_rows`
/// splits that sub-command's response body into a result per offset it
/// carried; row-level result codes are the caller's concern (record/UDF
/// decoding is out of scope here), so a row failure belongs in the map,
/// not as a `Result::Err` from the closure itself.
pub fn execute<T>(
    cluster: &Cluster,
    namespace: &str,
    keys: &[BatchKey],
    retry: &RetryPolicy,
    is_write: bool,
    build_request: impl FnMut(&SubCommand) -> Vec<u8>,
    parse_rows: impl FnMut(&[u8], &SubCommand) -> HashMap<usize, Result<T, ExecError>>,
) -> Result<BatchState<T>, ExecError> {
    let digests: HashMap<usize, Vec<u8>> =
        keys.iter().map(|k| (k.offset, k.digest.clone())).collect();

    let sub_commands = plan(cluster, namespace, keys, retry)?;
    Ok(run_batch_loop(retry, is_write, sub_commands, build_request, parse_rows, |sub| {
        replan_sub_command(cluster, namespace, sub, &digests, retry)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_core::Host;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    /// Start a loopback server that answers every request frame it reads
    /// with one fixed response frame, and return the host it's listening on.
    fn spawn_responder(response: Vec<u8>) -> Host {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut header_buf = [0u8; kv_wire::framing::HEADER_LEN];
                if stream.read_exact(&mut header_buf).is_err() {
                    continue;
                }
                let header = kv_wire::framing::Header::decode(&header_buf).unwrap();
                let mut body = vec![0u8; header.length as usize];
                if stream.read_exact(&mut body).is_err() {
                    continue;
                }
                let resp_header = kv_wire::framing::Header::new(
                    kv_wire::framing::VERSION_MESSAGE,
                    kv_wire::framing::TYPE_AS_MSG,
                    response.len() as u64,
                );
                let _ = stream.write_all(&resp_header.encode());
                let _ = stream.write_all(&response);
            }
        });
        Host::new("127.0.0.1", addr.port())
    }

    /// A host nothing is listening on: connecting to it always yields a
    /// connection-refused i/o error.
    fn closed_host() -> Host {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Host::new("127.0.0.1", addr.port())
    }

    fn test_node(name: &str, host: Host) -> Arc<Node> {
        Arc::new(Node::new(name, host, kv_pool::NodePool::new(1, 0, 4, Duration::from_secs(60))))
    }

    fn test_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, total_timeout: Duration::from_secs(2), ..RetryPolicy::default() }
    }

    #[test]
    fn dispatch_succeeds_and_records_rows() {
        let host = spawn_responder(b"ok-A".to_vec());
        let node = test_node("A", host);
        let sub = SubCommand { node, offsets: vec![0, 1] };
        let retry = test_retry(2);

        let state = run_batch_loop(
            &retry,
            false,
            vec![sub],
            |_sub| b"request".to_vec(),
            |body, sub| {
                let text = String::from_utf8(body.to_vec()).unwrap();
                sub.offsets.iter().map(|&offset| (offset, Ok(text.clone()))).collect()
            },
            |_sub| panic!("replan should not be called on success"),
        );

        assert!(state.is_success());
        assert_eq!(state.rows[&0], "ok-A");
        assert_eq!(state.rows[&1], "ok-A");
    }

    #[test]
    fn replans_to_a_healthy_node_after_retryable_failure() {
        let dead = test_node("A", closed_host());
        let healthy = test_node("B", spawn_responder(b"ok-B".to_vec()));
        let original = SubCommand { node: dead, offsets: vec![0] };
        let retry = test_retry(2);

        let state = run_batch_loop(
            &retry,
            false,
            vec![original],
            |_sub| b"request".to_vec(),
            |body, sub| {
                let text = String::from_utf8(body.to_vec()).unwrap();
                sub.offsets.iter().map(|&offset| (offset, Ok(text.clone()))).collect()
            },
            |_sub| Ok(vec![SubCommand { node: healthy.clone(), offsets: vec![0] }]),
        );

        assert!(state.is_success());
        assert_eq!(state.rows[&0], "ok-B");
    }

    #[test]
    fn exhausted_retries_complete_the_sub_command_with_an_error() {
        let dead = test_node("A", closed_host());
        let sub = SubCommand { node: dead, offsets: vec![0] };
        let retry = test_retry(0);

        let state = run_batch_loop(
            &retry,
            false,
            vec![sub],
            |_sub| b"request".to_vec(),
            |_body, _sub| HashMap::new(),
            |_sub| panic!("replan should not be called once retries are exhausted"),
        );

        assert!(!state.is_success());
        assert_eq!(state.count, 1);
        assert!(state.exception.is_some());
    }

    #[test]
    fn batch_state_succeeds_only_when_every_child_completes() {
        let mut state: BatchState<()> = BatchState::new(2);
        state.complete_sub_command(Ok(()));
        assert!(!state.is_success());
        state.complete_sub_command(Ok(()));
        assert!(state.is_success());
    }

    #[test]
    fn batch_state_fails_on_first_exception_only() {
        let mut state: BatchState<()> = BatchState::new(2);
        state.complete_sub_command(Err(ExecError::CommandRejected));
        state.complete_sub_command(Err(ExecError::CommandRejected));
        assert!(!state.is_success());
        assert!(matches!(state.exception, Some(ExecError::CommandRejected)));
    }

    #[test]
    fn row_errors_do_not_fail_the_batch() {
        let mut state: BatchState<i32> = BatchState::new(1);
        state.record_row(0, Ok(42));
        state.record_row(1, Err(ExecError::CommandRejected));
        state.complete_sub_command(Ok(()));
        assert!(state.is_success());
        assert!(state.row_error);
        assert_eq!(state.rows[&0], 42);
    }

    #[test]
    fn adjust_max_accounts_for_replanned_children() {
        let mut state: BatchState<()> = BatchState::new(1);
        state.adjust_max(2); // original 1 sub-command split into 3.
        assert_eq!(state.max, 3);
    }
}
