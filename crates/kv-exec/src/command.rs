//! Synchronous command pipeline (§4.4): select a node, check out a
//! connection, write a framed request, read and parse the response, retry
//! on transient failure.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use kv_core::partition::partition_id;
use kv_core::policy::{ReadModeSc, RetryPolicy};
use kv_cluster::{select_node, Cluster, Node};
use kv_pool::{Connection, PoolError};
use kv_wire::framing::{Header, TYPE_AS_MSG, VERSION_MESSAGE};

use crate::error::{is_retryable_result_code, ExecError, RESULT_OK};

/// Open a fresh plain-TCP connection to `node`. TLS dialing is out of scope
/// here: a caller running with `policy.use_tls` is expected to supply a
/// pool opener that wraps the stream itself (see `kv-client`).
fn open_plain(node: &Node, connect_timeout: Duration, pool_index: usize) -> Result<Connection, PoolError> {
    let addr = (node.host.name.as_str(), node.host.port)
        .to_socket_addrs()
        .map_err(PoolError::Connect)?
        .next()
        .ok_or_else(|| PoolError::Connect(std::io::Error::new(std::io::ErrorKind::NotFound, "no address")))?;
    let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(PoolError::Connect)?;
    Ok(Connection::new_plain(stream, pool_index))
}

fn write_frame(conn: &mut Connection, payload: &[u8]) -> std::io::Result<()> {
    let header = Header::new(VERSION_MESSAGE, TYPE_AS_MSG, payload.len() as u64);
    conn.transport.write_all(&header.encode())?;
    conn.transport.write_all(payload)?;
    Ok(())
}

fn read_frame(conn: &mut Connection) -> std::io::Result<Vec<u8>> {
    let mut header_buf = [0u8; kv_wire::framing::HEADER_LEN];
    conn.transport.read_exact(&mut header_buf)?;
    let header = Header::decode(&header_buf)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let mut body = vec![0u8; header.length as usize];
    conn.transport.read_exact(&mut body)?;
    Ok(body)
}

/// Per-command retry/sequence bookkeeping (§3 "Command state").
#[derive(Debug, Default)]
pub struct CommandState {
    pub sequence: u32,
    pub sequence_sc: u32,
    pub iteration: u32,
    pub commands_sent: u32,
    pub in_doubt: bool,
}

/// Execute one command against `namespace`, routed by `digest`, parsing the
/// response body with `parse_response`. `build_request` is called once per
/// attempt since the payload may embed the attempt's sequence-derived
/// routing hints.
pub fn execute<T>(
    cluster: &Cluster,
    namespace: &str,
    digest: &[u8],
    retry: &RetryPolicy,
    is_write: bool,
    mut build_request: impl FnMut() -> Vec<u8>,
    mut parse_response: impl FnMut(&[u8]) -> Result<T, ExecError>,
) -> Result<T, ExecError> {
    let partition = partition_id(digest);
    let deadline = Instant::now() + retry.total_timeout;
    let mut state = CommandState::default();
    let mut previous: Option<std::sync::Arc<Node>> = None;

    loop {
        if state.iteration > retry.max_retries {
            return Err(ExecError::TotalTimeout { iterations: state.iteration, in_doubt: state.in_doubt });
        }
        if Instant::now() >= deadline {
            return Err(ExecError::TotalTimeout { iterations: state.iteration, in_doubt: state.in_doubt });
        }

        let partitions = cluster
            .topology()
            .namespace(namespace)
            .ok_or(ExecError::Cluster(kv_cluster::ClusterError::InvalidNode))?;
        let all_nodes = cluster.active_nodes();

        let node = match select_node(
            &partitions,
            partition,
            retry.effective_replica_policy(),
            &mut state.sequence,
            &[],
            namespace,
            &all_nodes,
            &cluster.counters(),
            previous.as_ref(),
        ) {
            Ok(node) => node,
            Err(err) => return Err(err.into()),
        };
        node.add_reference();

        let attempt_result =
            run_attempt(&node, retry, is_write, &mut state, &mut build_request, &mut parse_response);

        match attempt_result {
            Ok(value) => return Ok(value),
            Err(err) => {
                node.record_error();
                previous = Some(node);
                let socket_timeout = matches!(err, ExecError::SocketTimeout { .. });
                if socket_timeout && retry.read_mode_sc == ReadModeSc::Linearize {
                    // Per §9: a linearize-read socket timeout must not
                    // advance sequenceSC.
                } else {
                    state.sequence_sc = state.sequence_sc.wrapping_add(1);
                }
                state.sequence = state.sequence.wrapping_add(1);
                state.iteration += 1;

                if !err.is_retryable() {
                    return Err(err);
                }
                debug!(iteration = state.iteration, error = %err, "command attempt failed, retrying");
            }
        }
    }
}

/// Run a single request/response attempt against an already-selected node.
/// Exposed crate-wide so the batch executor can dispatch each sub-command
/// to the node the planner chose for it, without re-running node selection
/// per attempt the way the single-key pipeline does.
pub(crate) fn run_attempt<T>(
    node: &Node,
    retry: &RetryPolicy,
    is_write: bool,
    state: &mut CommandState,
    build_request: &mut impl FnMut() -> Vec<u8>,
    parse_response: &mut impl FnMut(&[u8]) -> Result<T, ExecError>,
) -> Result<T, ExecError> {
    let socket_timeout = if retry.socket_timeout.is_zero() { Duration::from_secs(1) } else { retry.socket_timeout };

    let mut conn = node
        .pool
        .checkout(|idx| open_plain(node, socket_timeout, idx))
        .map_err(ExecError::Pool)?;
    conn.transport.set_timeouts(Some(socket_timeout)).map_err(ExecError::Io)?;

    let payload = build_request();
    state.commands_sent += 1;
    let wrote = write_frame(&mut conn, &payload);
    if let Err(err) = wrote {
        if is_write {
            state.in_doubt = true;
        }
        node.pool.discard_checked_out(conn.pool_index);
        return Err(classify_io_error(err, state));
    }

    let body = match read_frame(&mut conn) {
        Ok(body) => body,
        Err(err) => {
            if is_write {
                state.in_doubt = true;
            }
            node.pool.discard_checked_out(conn.pool_index);
            return Err(classify_io_error(err, state));
        }
    };

    match parse_response(&body) {
        Ok(value) => {
            node.pool.return_connection(conn);
            Ok(value)
        }
        Err(err) => {
            node.pool.return_connection(conn);
            Err(err)
        }
    }
}

fn classify_io_error(err: std::io::Error, state: &CommandState) -> ExecError {
    if err.kind() == std::io::ErrorKind::WouldBlock || err.kind() == std::io::ErrorKind::TimedOut {
        ExecError::SocketTimeout { iteration: state.iteration, in_doubt: state.in_doubt }
    } else {
        ExecError::Io(err)
    }
}

/// Interpret a server result code, producing the nested `UDF_BAD_RESPONSE`
/// message extraction hook callers should use inside `parse_response`.
pub fn check_result_code(code: u8, udf_message: Option<&str>) -> Result<(), ExecError> {
    if code == RESULT_OK {
        return Ok(());
    }
    if let (crate::error::RESULT_UDF_BAD_RESPONSE, Some(message)) = (code, udf_message) {
        return Err(ExecError::UdfBadResponse(message.to_string()));
    }
    Err(ExecError::ServerResult { code, retryable: is_retryable_result_code(code) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_result_code_ok_passes() {
        assert!(check_result_code(RESULT_OK, None).is_ok());
    }

    #[test]
    fn check_result_code_udf_extracts_message() {
        let err = check_result_code(crate::error::RESULT_UDF_BAD_RESPONSE, Some("boom")).unwrap_err();
        assert!(matches!(err, ExecError::UdfBadResponse(ref m) if m == "boom"));
    }

    #[test]
    fn check_result_code_marks_retryable_subset() {
        let err = check_result_code(crate::error::RESULT_DEVICE_OVERLOAD, None).unwrap_err();
        assert!(err.is_retryable());

        let err = check_result_code(250, None).unwrap_err();
        assert!(!err.is_retryable());
    }
}
