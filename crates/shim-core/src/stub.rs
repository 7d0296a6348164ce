//! # Chaincode Stub
//!
//! The context handed to a [`Chaincode`](crate::Chaincode) for one
//! invocation. Every state call becomes one request frame on the stream and
//! suspends the calling worker until the peer answers.
//!
//! Keys are validated locally: an empty key never produces a frame.

use crate::errors::{ShimError, ShimResult};
use crate::task::InvocationTask;
use shim_types::{
    decode, encode, ChaincodeEvent, ChaincodeInput, DelState, GetState, GetStateByRange,
    InvokeChaincodeSpec, KeyValue, MessageType, PutState, QueryResponse, QueryStateClose,
    QueryStateNext, Response,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Per-invocation context.
pub struct ChaincodeStub {
    task: Arc<InvocationTask>,
    args: Vec<Vec<u8>>,
    event: Option<ChaincodeEvent>,
}

impl ChaincodeStub {
    pub(crate) fn new(task: Arc<InvocationTask>, args: Vec<Vec<u8>>) -> Self {
        Self {
            task,
            args,
            event: None,
        }
    }

    pub fn txid(&self) -> &str {
        &self.task.key().txid
    }

    pub fn channel_id(&self) -> &str {
        &self.task.key().channel_id
    }

    /// Raw invocation arguments.
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Arguments as UTF-8, lossy.
    pub fn string_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    /// First argument as the function name, the rest as its parameters.
    pub fn function_and_parameters(&self) -> (String, Vec<String>) {
        let mut args = self.string_args().into_iter();
        let function = args.next().unwrap_or_default();
        (function, args.collect())
    }

    /// Read a key. A missing key reads as empty.
    pub async fn get_state(&self, key: &str) -> ShimResult<Vec<u8>> {
        check_key(key)?;
        let payload = encode(&GetState {
            key: key.to_string(),
            collection: String::new(),
        })?;
        self.task.request_state(MessageType::GetState, payload).await
    }

    /// Write a key.
    pub async fn put_state(&self, key: &str, value: impl Into<Vec<u8>>) -> ShimResult<()> {
        check_key(key)?;
        let payload = encode(&PutState {
            key: key.to_string(),
            value: value.into(),
            collection: String::new(),
        })?;
        self.task.request_state(MessageType::PutState, payload).await?;
        Ok(())
    }

    /// Delete a key.
    pub async fn del_state(&self, key: &str) -> ShimResult<()> {
        check_key(key)?;
        let payload = encode(&DelState {
            key: key.to_string(),
            collection: String::new(),
        })?;
        self.task.request_state(MessageType::DelState, payload).await?;
        Ok(())
    }

    /// Open a range query over `[start_key, end_key)`.
    ///
    /// Empty bounds mean unbounded on that side.
    pub async fn get_state_by_range(
        &self,
        start_key: &str,
        end_key: &str,
    ) -> ShimResult<StateRangeIterator> {
        let payload = encode(&GetStateByRange {
            start_key: start_key.to_string(),
            end_key: end_key.to_string(),
            collection: String::new(),
        })?;
        let reply = self
            .task
            .request_state(MessageType::GetStateByRange, payload)
            .await?;
        let page: QueryResponse = decode(&reply)?;
        Ok(StateRangeIterator::new(Arc::clone(&self.task), page))
    }

    /// Call another chaincode and return its response.
    pub async fn invoke_chaincode<S: AsRef<str>>(
        &self,
        chaincode_name: &str,
        args: &[S],
    ) -> ShimResult<Response> {
        if chaincode_name.is_empty() {
            return Err(ShimError::InvalidArgument(
                "chaincode name must not be empty".into(),
            ));
        }
        let payload = encode(&InvokeChaincodeSpec {
            chaincode_name: chaincode_name.to_string(),
            input: ChaincodeInput::from_strs(args),
        })?;
        let reply = self
            .task
            .request_state(MessageType::InvokeChaincode, payload)
            .await?;
        Ok(decode(&reply)?)
    }

    /// Attach an event to the COMPLETED frame. The last call wins.
    pub fn set_event(&mut self, name: &str, payload: impl Into<Vec<u8>>) -> ShimResult<()> {
        if name.is_empty() {
            return Err(ShimError::InvalidArgument(
                "event name must not be empty".into(),
            ));
        }
        self.event = Some(ChaincodeEvent {
            event_name: name.to_string(),
            payload: payload.into(),
        });
        Ok(())
    }

    pub(crate) fn take_event(&mut self) -> Option<ChaincodeEvent> {
        self.event.take()
    }
}

fn check_key(key: &str) -> ShimResult<()> {
    if key.is_empty() {
        return Err(ShimError::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

/// Paged iterator over a range query.
///
/// Pages are fetched lazily with QUERY_STATE_NEXT. Call [`close`](Self::close)
/// if the iterator is abandoned before it is exhausted.
pub struct StateRangeIterator {
    task: Arc<InvocationTask>,
    page: VecDeque<KeyValue>,
    has_more: bool,
    id: String,
    closed: bool,
}

impl StateRangeIterator {
    fn new(task: Arc<InvocationTask>, first: QueryResponse) -> Self {
        Self {
            task,
            page: first.results.into(),
            has_more: first.has_more,
            id: first.id,
            closed: false,
        }
    }

    /// Query identifier assigned by the peer.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next entry, or `None` when exhausted.
    pub async fn next(&mut self) -> ShimResult<Option<KeyValue>> {
        loop {
            if let Some(kv) = self.page.pop_front() {
                return Ok(Some(kv));
            }
            if !self.has_more || self.closed {
                return Ok(None);
            }

            let payload = encode(&QueryStateNext {
                id: self.id.clone(),
            })?;
            let reply = self
                .task
                .request_state(MessageType::QueryStateNext, payload)
                .await?;
            let page: QueryResponse = decode(&reply)?;
            debug!(query_id = %self.id, entries = page.results.len(), "Fetched next page");
            self.page = page.results.into();
            self.has_more = page.has_more;
        }
    }

    /// Release the query on the peer. Idempotent.
    pub async fn close(&mut self) -> ShimResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.page.clear();
        let payload = encode(&QueryStateClose {
            id: self.id.clone(),
        })?;
        self.task
            .request_state(MessageType::QueryStateClose, payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::RecordingSink;
    use shim_types::{ChaincodeMessage, TxKey};
    use std::sync::Weak;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn key() -> TxKey {
        TxKey::new("ch", "t1")
    }

    fn stub_with(args: &[&str]) -> (ChaincodeStub, mpsc::UnboundedReceiver<ChaincodeMessage>) {
        let (sink, rx) = RecordingSink::forwarding();
        let task = Arc::new(InvocationTask::new(
            key(),
            Arc::new(sink),
            Duration::from_secs(5),
            Weak::new(),
        ));
        task.mark_executing();
        let args = args.iter().map(|a| a.as_bytes().to_vec()).collect();
        (ChaincodeStub::new(task, args), rx)
    }

    /// Answers each request frame with the next scripted payload.
    fn respond(
        task: Arc<InvocationTask>,
        mut requests: mpsc::UnboundedReceiver<ChaincodeMessage>,
        replies: Vec<Vec<u8>>,
    ) -> tokio::task::JoinHandle<Vec<ChaincodeMessage>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for reply in replies {
                let Some(request) = requests.recv().await else { break };
                while task.state() != crate::task::TaskState::AwaitingResponse {
                    tokio::task::yield_now().await;
                }
                task.handle_inbound(ChaincodeMessage::new(MessageType::Response, &key(), reply));
                seen.push(request);
            }
            seen
        })
    }

    #[test]
    fn test_function_and_parameters() {
        let (stub, _rx) = stub_with(&["transfer", "a", "b"]);
        let (function, params) = stub.function_and_parameters();
        assert_eq!(function, "transfer");
        assert_eq!(params, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stub.txid(), "t1");
        assert_eq!(stub.channel_id(), "ch");
    }

    #[test]
    fn test_no_args_gives_empty_function() {
        let (stub, _rx) = stub_with(&[]);
        let (function, params) = stub.function_and_parameters();
        assert!(function.is_empty());
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn test_empty_key_rejected_before_send() {
        let (stub, mut rx) = stub_with(&[]);
        assert!(matches!(
            stub.get_state("").await,
            Err(ShimError::InvalidArgument(_))
        ));
        assert!(matches!(
            stub.put_state("", b"v".to_vec()).await,
            Err(ShimError::InvalidArgument(_))
        ));
        assert!(matches!(
            stub.del_state("").await,
            Err(ShimError::InvalidArgument(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_get_state_sends_encoded_key() {
        let (stub, rx) = stub_with(&[]);
        let peer = respond(Arc::clone(&stub.task), rx, vec![b"v1".to_vec()]);

        let value = timeout(Duration::from_secs(1), stub.get_state("k1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, b"v1".to_vec());

        let seen = peer.await.unwrap();
        assert_eq!(seen[0].msg_type, MessageType::GetState);
        let request: GetState = decode(&seen[0].payload).unwrap();
        assert_eq!(request.key, "k1");
    }

    #[tokio::test]
    async fn test_range_iterator_pages_and_closes() {
        let (stub, rx) = stub_with(&[]);
        let first = encode(&QueryResponse {
            results: vec![KeyValue {
                key: "a".into(),
                value: b"1".to_vec(),
            }],
            has_more: true,
            id: "q1".into(),
        })
        .unwrap();
        let second = encode(&QueryResponse {
            results: vec![KeyValue {
                key: "b".into(),
                value: b"2".to_vec(),
            }],
            has_more: false,
            id: "q1".into(),
        })
        .unwrap();
        let closed = encode(&QueryResponse::default()).unwrap();
        let peer = respond(Arc::clone(&stub.task), rx, vec![first, second, closed]);

        let mut iter = stub.get_state_by_range("a", "z").await.unwrap();
        assert_eq!(iter.id(), "q1");
        assert_eq!(iter.next().await.unwrap().unwrap().key, "a");
        assert_eq!(iter.next().await.unwrap().unwrap().key, "b");
        assert!(iter.next().await.unwrap().is_none());
        iter.close().await.unwrap();
        iter.close().await.unwrap();

        let kinds: Vec<_> = peer.await.unwrap().iter().map(|f| f.msg_type).collect();
        assert_eq!(
            kinds,
            vec![
                MessageType::GetStateByRange,
                MessageType::QueryStateNext,
                MessageType::QueryStateClose
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke_chaincode_decodes_response() {
        let (stub, rx) = stub_with(&[]);
        let reply = encode(&Response::success(b"pong".to_vec())).unwrap();
        let peer = respond(Arc::clone(&stub.task), rx, vec![reply]);

        let response = stub.invoke_chaincode("other", &["ping"]).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.payload, b"pong".to_vec());

        let seen = peer.await.unwrap();
        let spec: InvokeChaincodeSpec = decode(&seen[0].payload).unwrap();
        assert_eq!(spec.chaincode_name, "other");
    }

    #[test]
    fn test_set_event() {
        let (mut stub, _rx) = stub_with(&[]);
        assert!(stub.set_event("", Vec::new()).is_err());
        stub.set_event("first", b"1".to_vec()).unwrap();
        stub.set_event("second", b"2".to_vec()).unwrap();
        let event = stub.take_event().unwrap();
        assert_eq!(event.event_name, "second");
        assert!(stub.take_event().is_none());
    }
}
