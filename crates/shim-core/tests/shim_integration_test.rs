//! # Shim Integration Tests
//!
//! Drives a full shim (client, manager, tasks) against a scripted peer on the
//! far side of an in-memory transport.
//!
//! ## Test Strategy
//!
//! 1. Peer receives REGISTER and answers REGISTERED then READY
//! 2. Peer sends INIT/TRANSACTION frames
//! 3. Chaincode issues state requests, peer answers (or does not)
//! 4. Peer asserts on the terminal frame for every transaction

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shim_core::{
    Chaincode, ChaincodeStub, ChaincodeSupportClient, Dispatch, InvocationTaskManager, Response,
    ShimConfig, ShimError, ShimResult,
};
use shim_stream::{MemoryTransport, Transport, TransportError};
use shim_types::{
    decode, encode, ChaincodeId, ChaincodeInput, ChaincodeMessage, GetState, MessageType, TxKey,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const CHANNEL: &str = "ch1";

/// Key-value chaincode: `get <key>` reads, `put <key> <value>` writes.
#[derive(Default)]
struct KvChaincode {
    cancelled: AtomicUsize,
}

#[async_trait]
impl Chaincode for KvChaincode {
    async fn init(&self, _stub: &mut ChaincodeStub) -> Response {
        Response::success(b"initialised".to_vec())
    }

    async fn invoke(&self, stub: &mut ChaincodeStub) -> Response {
        let (function, params) = stub.function_and_parameters();
        let result = match (function.as_str(), params.as_slice()) {
            ("get", [key]) => stub.get_state(key).await,
            ("put", [key, value]) => stub
                .put_state(key, value.as_bytes().to_vec())
                .await
                .map(|()| Vec::new()),
            // Gives up on the first read after a short wait, then reads again.
            ("impatient", [first, second]) => {
                match timeout(Duration::from_millis(20), stub.get_state(first)).await {
                    Ok(result) => result,
                    Err(_) => stub.get_state(second).await,
                }
            }
            _ => return Response::error(format!("unknown function {function}")),
        };

        match result {
            Ok(value) => Response::success(value),
            Err(e) => {
                if matches!(e, ShimError::TaskCancelled { .. }) {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                }
                Response::error(e.to_string())
            }
        }
    }
}

/// The peer side of the stream.
struct Peer {
    transport: MemoryTransport,
}

impl Peer {
    async fn send(&self, frame: ChaincodeMessage) {
        self.transport.send_frame(frame).await.expect("peer send");
    }

    async fn expect(&self) -> ChaincodeMessage {
        timeout(Duration::from_secs(2), self.transport.recv_frame())
            .await
            .expect("frame within timeout")
            .expect("stream open")
    }

    async fn transaction(&self, txid: &str, args: &[&str]) {
        let input = encode(&ChaincodeInput::from_strs(args)).unwrap();
        self.send(ChaincodeMessage::new(
            MessageType::Transaction,
            &TxKey::new(CHANNEL, txid),
            input,
        ))
        .await;
    }

    async fn respond(&self, txid: &str, payload: &[u8]) {
        self.send(ChaincodeMessage::new(
            MessageType::Response,
            &TxKey::new(CHANNEL, txid),
            payload.to_vec(),
        ))
        .await;
    }
}

struct Harness {
    peer: Peer,
    manager: Arc<InvocationTaskManager>,
    chaincode: Arc<KvChaincode>,
    client: JoinHandle<ShimResult<()>>,
}

fn config() -> ShimConfig {
    ShimConfig::new("mycc")
}

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Spawned = (
    Peer,
    Arc<InvocationTaskManager>,
    Arc<KvChaincode>,
    JoinHandle<ShimResult<()>>,
);

fn spawn_client(config: ShimConfig) -> Spawned {
    init_logs();
    let (local, remote) = MemoryTransport::pair();
    let chaincode = Arc::new(KvChaincode::default());
    let manager = Arc::new(InvocationTaskManager::new(chaincode.clone(), &config));
    let client = ChaincodeSupportClient::new(Arc::new(local), config);
    let handle = tokio::spawn(client.start(Some(Arc::clone(&manager))));
    (Peer { transport: remote }, manager, chaincode, handle)
}

/// Start a client and complete the handshake.
async fn connected(config: ShimConfig) -> Harness {
    let (peer, manager, chaincode, client) = spawn_client(config);

    let register = peer.expect().await;
    assert_eq!(register.msg_type, MessageType::Register);
    let id: ChaincodeId = decode(&register.payload).unwrap();
    assert_eq!(id.name, "mycc");

    peer.send(ChaincodeMessage::connection(MessageType::Registered, Vec::new()))
        .await;
    peer.send(ChaincodeMessage::connection(MessageType::Ready, Vec::new()))
        .await;

    Harness {
        peer,
        manager,
        chaincode,
        client,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition within timeout");
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_transaction_reads_state_and_completes() {
    let h = connected(config()).await;

    h.peer.transaction("t1", &["get", "k1"]).await;

    let request = h.peer.expect().await;
    assert_eq!(request.msg_type, MessageType::GetState);
    assert_eq!(request.txid, "t1");
    assert_eq!(request.channel_id, CHANNEL);
    let get: GetState = decode(&request.payload).unwrap();
    assert_eq!(get.key, "k1");
    assert!(h.manager.contains(&TxKey::new(CHANNEL, "t1")));

    h.peer.respond("t1", b"v1").await;

    let done = h.peer.expect().await;
    assert_eq!(done.msg_type, MessageType::Completed);
    assert_eq!(done.txid, "t1");
    let response: Response = decode(&done.payload).unwrap();
    assert_eq!(response.payload, b"v1".to_vec());

    wait_until(|| h.manager.active_tasks() == 0).await;
}

#[tokio::test]
async fn test_concurrent_transactions_resolve_independently() {
    let h = connected(config()).await;

    h.peer.transaction("t1", &["get", "a"]).await;
    h.peer.transaction("t2", &["get", "b"]).await;

    let mut requested = vec![h.peer.expect().await.txid, h.peer.expect().await.txid];
    requested.sort();
    assert_eq!(requested, vec!["t1".to_string(), "t2".to_string()]);

    // t2 answered first; t1 must stay suspended.
    h.peer.respond("t2", b"two").await;
    let done = h.peer.expect().await;
    assert_eq!(done.txid, "t2");
    assert_eq!(done.msg_type, MessageType::Completed);
    let response: Response = decode(&done.payload).unwrap();
    assert_eq!(response.payload, b"two".to_vec());
    assert!(h.manager.contains(&TxKey::new(CHANNEL, "t1")));

    h.peer.respond("t1", b"one").await;
    let done = h.peer.expect().await;
    assert_eq!(done.txid, "t1");
    let response: Response = decode(&done.payload).unwrap();
    assert_eq!(response.payload, b"one".to_vec());
}

#[tokio::test]
async fn test_duplicate_transaction_rejected() {
    let h = connected(config()).await;

    h.peer.transaction("t1", &["get", "k1"]).await;
    assert_eq!(h.peer.expect().await.msg_type, MessageType::GetState);

    h.peer.transaction("t1", &["get", "k1"]).await;
    let rejection = h.peer.expect().await;
    assert_eq!(rejection.msg_type, MessageType::Error);
    assert_eq!(rejection.txid, "t1");
    assert!(rejection.payload_text().contains("duplicate"));

    // Original task unaffected.
    h.peer.respond("t1", b"v1").await;
    let done = h.peer.expect().await;
    assert_eq!(done.msg_type, MessageType::Completed);
    assert_eq!(
        h.manager.stats().duplicates_rejected.load(Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn test_request_timeout_fails_transaction() {
    let h = connected(config().with_request_timeout(Duration::from_millis(50))).await;

    h.peer.transaction("t1", &["get", "k1"]).await;
    assert_eq!(h.peer.expect().await.msg_type, MessageType::GetState);

    // No reply: the chaincode sees RequestTimeout and fails the transaction.
    let failed = h.peer.expect().await;
    assert_eq!(failed.msg_type, MessageType::Error);
    assert_eq!(failed.txid, "t1");
    assert!(failed.payload_text().contains("timed out after 50ms"));
    wait_until(|| h.manager.active_tasks() == 0).await;

    // The late response matches nothing.
    let dropped_before = h.manager.stats().frames_dropped.load(Ordering::Relaxed);
    h.peer.respond("t1", b"late").await;
    wait_until(|| h.manager.stats().frames_dropped.load(Ordering::Relaxed) == dropped_before + 1)
        .await;
}

#[tokio::test]
async fn test_abandoned_state_call_does_not_block_next_call() {
    let h = connected(config()).await;

    h.peer.transaction("t1", &["impatient", "slow", "fast"]).await;
    let first = h.peer.expect().await;
    assert_eq!(first.msg_type, MessageType::GetState);
    let get: GetState = decode(&first.payload).unwrap();
    assert_eq!(get.key, "slow");

    // The chaincode stopped waiting and issues its second read.
    let second = h.peer.expect().await;
    assert_eq!(second.msg_type, MessageType::GetState);
    let get: GetState = decode(&second.payload).unwrap();
    assert_eq!(get.key, "fast");

    h.peer.respond("t1", b"v2").await;
    let done = h.peer.expect().await;
    assert_eq!(done.msg_type, MessageType::Completed);
    let response: Response = decode(&done.payload).unwrap();
    assert_eq!(response.payload, b"v2".to_vec());
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_stream_close_cancels_waiting_tasks() {
    let h = connected(config()).await;

    for i in 0..3 {
        h.peer.transaction(&format!("t{i}"), &["put", "k", "v"]).await;
    }
    for _ in 0..3 {
        assert_eq!(h.peer.expect().await.msg_type, MessageType::PutState);
    }

    h.peer.transport.close();

    let result = timeout(Duration::from_secs(2), h.client)
        .await
        .expect("client exits")
        .expect("client task");
    assert_eq!(result, Err(ShimError::Transport(TransportError::Closed)));
    assert_eq!(h.manager.active_tasks(), 0);
    assert!(h.manager.is_shut_down());

    let chaincode = Arc::clone(&h.chaincode);
    wait_until(move || chaincode.cancelled.load(Ordering::SeqCst) == 3).await;
    assert_eq!(h.manager.stats().tasks_cancelled.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn test_single_worker_does_not_deadlock() {
    let h = connected(config().with_max_workers(1)).await;

    h.peer.transaction("a", &["get", "x"]).await;
    h.peer.transaction("b", &["get", "y"]).await;

    // One task holds the worker; its RESPONSE must still get through.
    let first = h.peer.expect().await;
    assert_eq!(first.msg_type, MessageType::GetState);
    h.peer.respond(&first.txid, b"1").await;
    let done = h.peer.expect().await;
    assert_eq!(done.txid, first.txid);
    assert_eq!(done.msg_type, MessageType::Completed);

    let second = h.peer.expect().await;
    assert_eq!(second.msg_type, MessageType::GetState);
    assert_ne!(second.txid, first.txid);
    h.peer.respond(&second.txid, b"2").await;
    let done = h.peer.expect().await;
    assert_eq!(done.txid, second.txid);
    assert_eq!(done.msg_type, MessageType::Completed);
}

#[tokio::test]
async fn test_init_and_keepalive() {
    let h = connected(config()).await;

    h.peer.send(ChaincodeMessage::keepalive(b"probe".to_vec())).await;
    let echo = h.peer.expect().await;
    assert_eq!(echo.msg_type, MessageType::Keepalive);
    assert_eq!(echo.payload, b"probe".to_vec());

    let input = encode(&ChaincodeInput::from_strs::<&str>(&[])).unwrap();
    h.peer
        .send(ChaincodeMessage::new(
            MessageType::Init,
            &TxKey::new(CHANNEL, "init-1"),
            input,
        ))
        .await;
    let done = h.peer.expect().await;
    assert_eq!(done.msg_type, MessageType::Completed);
    let response: Response = decode(&done.payload).unwrap();
    assert_eq!(response.payload, b"initialised".to_vec());
}

#[tokio::test]
async fn test_unknown_function_fails_transaction() {
    let h = connected(config()).await;

    h.peer.transaction("t1", &["transfer"]).await;
    let failed = h.peer.expect().await;
    assert_eq!(failed.msg_type, MessageType::Error);
    assert_eq!(failed.payload_text(), "unknown function transfer");
}

// =============================================================================
// REGISTRATION
// =============================================================================

#[tokio::test]
async fn test_registration_rejected_by_peer() {
    let (peer, manager, _chaincode, client) = spawn_client(config());

    assert_eq!(peer.expect().await.msg_type, MessageType::Register);
    peer.send(ChaincodeMessage::connection(
        MessageType::Error,
        b"chaincode not allowed".to_vec(),
    ))
    .await;

    let result = timeout(Duration::from_secs(2), client).await.unwrap().unwrap();
    assert_eq!(
        result,
        Err(ShimError::Registration("chaincode not allowed".into()))
    );
    assert_eq!(manager.active_tasks(), 0);

    // Never bound to the failed stream, so nothing is started on it.
    let input = encode(&ChaincodeInput::from_strs(&["get", "k"])).unwrap();
    let frame = ChaincodeMessage::new(MessageType::Transaction, &TxKey::new(CHANNEL, "t1"), input);
    assert_eq!(manager.on_inbound_frame(frame), Dispatch::Dropped);
    assert_eq!(manager.active_tasks(), 0);
}

#[tokio::test]
async fn test_registration_times_out() {
    let (peer, _manager, _chaincode, client) =
        spawn_client(config().with_registration_timeout(Duration::from_millis(50)));

    assert_eq!(peer.expect().await.msg_type, MessageType::Register);

    let result = timeout(Duration::from_secs(2), client).await.unwrap().unwrap();
    assert!(matches!(result, Err(ShimError::Registration(_))));
}

#[tokio::test]
async fn test_unexpected_frame_before_ready() {
    let (peer, _manager, _chaincode, client) = spawn_client(config());

    assert_eq!(peer.expect().await.msg_type, MessageType::Register);
    peer.transaction("t1", &["get", "k"]).await;

    let result = timeout(Duration::from_secs(2), client).await.unwrap().unwrap();
    assert!(matches!(result, Err(ShimError::Registration(_))));
}

#[tokio::test]
async fn test_start_without_manager() {
    let (local, _remote) = MemoryTransport::pair();
    let client = ChaincodeSupportClient::new(Arc::new(local), config());
    let result = client.start(None).await;
    assert!(matches!(result, Err(ShimError::InvalidArgument(_))));
}
