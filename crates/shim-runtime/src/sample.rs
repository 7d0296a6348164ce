//! Key-value chaincode hosted by the default binary.
//!
//! | Function | Args | Result payload |
//! |----------|------|----------------|
//! | `put` | key, value | empty |
//! | `get` | key | value bytes |
//! | `del` | key | empty |
//! | `range` | start, end | JSON array of `{key, value}` |
//! | `call` | chaincode, args... | the callee's payload |
//!
//! `init` accepts key/value pairs and writes each of them.

use async_trait::async_trait;
use serde::Serialize;
use shim_core::{Chaincode, ChaincodeStub, Response, ShimResult};
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct KvChaincode;

#[derive(Serialize)]
struct Entry {
    key: String,
    value: String,
}

impl KvChaincode {
    async fn dispatch(&self, stub: &mut ChaincodeStub) -> ShimResult<Response> {
        let (function, params) = stub.function_and_parameters();
        debug!(function = %function, params = params.len(), "Dispatching");

        let response = match (function.as_str(), params.as_slice()) {
            ("put", [key, value]) => {
                stub.put_state(key, value.as_bytes().to_vec()).await?;
                stub.set_event("put", key.as_bytes().to_vec())?;
                Response::success(Vec::new())
            }
            ("get", [key]) => Response::success(stub.get_state(key).await?),
            ("del", [key]) => {
                stub.del_state(key).await?;
                Response::success(Vec::new())
            }
            ("range", [start, end]) => {
                let mut iter = stub.get_state_by_range(start, end).await?;
                let mut entries = Vec::new();
                while let Some(kv) = iter.next().await? {
                    entries.push(Entry {
                        key: kv.key,
                        value: String::from_utf8_lossy(&kv.value).into_owned(),
                    });
                }
                iter.close().await?;
                match serde_json::to_vec(&entries) {
                    Ok(json) => Response::success(json),
                    Err(e) => Response::error(format!("failed to encode range: {e}")),
                }
            }
            ("call", [chaincode, args @ ..]) => {
                let callee = stub.invoke_chaincode(chaincode, args).await?;
                if callee.is_success() {
                    Response::success(callee.payload)
                } else {
                    Response::error(format!("{chaincode} failed: {}", callee.message))
                }
            }
            _ => Response::error(format!(
                "unknown function {function:?} with {} args",
                params.len()
            )),
        };
        Ok(response)
    }
}

#[async_trait]
impl Chaincode for KvChaincode {
    async fn init(&self, stub: &mut ChaincodeStub) -> Response {
        let args = stub.string_args();
        if args.len() % 2 != 0 {
            return Response::error("init expects key/value pairs");
        }
        for pair in args.chunks(2) {
            if let Err(e) = stub.put_state(&pair[0], pair[1].as_bytes().to_vec()).await {
                return Response::error(e.to_string());
            }
        }
        Response::success(Vec::new())
    }

    async fn invoke(&self, stub: &mut ChaincodeStub) -> Response {
        match self.dispatch(stub).await {
            Ok(response) => response,
            Err(e) => Response::error(e.to_string()),
        }
    }
}
