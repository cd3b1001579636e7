//! JSON-RPC client for the chain gateway

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::error::{MonitorError, Result};
use crate::fetch::ChainSource;
use crate::models::{BlockInfo, ChainValidator, PeerInfo};

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: u64,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    peer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsensusInfo {
    last_finalized_block_height: u64,
}

pub struct ChainRpcClient {
    url: Url,
    next_id: Arc<Mutex<u64>>,
}

impl ChainRpcClient {
    pub fn new(url: Url) -> Result<Self> {
        match url.scheme() {
            "ws" | "wss" => Ok(Self {
                url,
                next_id: Arc::new(Mutex::new(1)),
            }),
            other => Err(MonitorError::Config(format!(
                "chain endpoint must be ws:// or wss://, got {}://",
                other
            ))),
        }
    }

    async fn call_method(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| MonitorError::Rpc(format!("WebSocket connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();

        let id = {
            let mut next_id = self.next_id.lock().await;
            let id = *next_id;
            *next_id += 1;
            id
        };

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };

        debug!(method, id, "sending rpc request");
        write
            .send(Message::Text(serde_json::to_string(&request)?))
            .await
            .map_err(|e| MonitorError::Rpc(format!("Send failed: {}", e)))?;

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let response: JsonRpcResponse = serde_json::from_str(&text)?;

                    if response.id != id {
                        continue;
                    }

                    if let Some(error) = response.error {
                        return Err(MonitorError::Rpc(format!(
                            "{} failed with {}: {}",
                            method, error.code, error.message
                        )));
                    }

                    if let Err(e) = write.close().await {
                        debug!(method, "closing rpc connection failed: {}", e);
                    }
                    return Ok(response.result);
                }
                Ok(Message::Close(_)) => break,
                Err(e) => return Err(MonitorError::Rpc(format!("WebSocket error: {}", e))),
                _ => continue,
            }
        }

        Err(MonitorError::Rpc(format!("{}: connection closed without response", method)))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let result = self.call_method(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ChainSource for ChainRpcClient {
    async fn get_node_id(&self) -> Result<String> {
        let info: NodeInfo = self.call("getNodeInfo", serde_json::json!([])).await?;
        Ok(info.peer_id)
    }

    async fn get_peers(&self) -> Result<Vec<PeerInfo>> {
        self.call("getPeersInfo", serde_json::json!([])).await
    }

    async fn get_baker_ids(&self) -> Result<Vec<u64>> {
        self.call("getBakerList", serde_json::json!([])).await
    }

    async fn get_pool_info(&self, baker_id: u64) -> Result<ChainValidator> {
        self.call("getPoolInfo", serde_json::json!([baker_id])).await
    }

    async fn get_finalized_height(&self) -> Result<u64> {
        let info: ConsensusInfo = self.call("getConsensusInfo", serde_json::json!([])).await?;
        Ok(info.last_finalized_block_height)
    }

    async fn get_block_at_height(&self, height: u64) -> Result<BlockInfo> {
        let blocks: Vec<BlockInfo> = self.call("getBlocksAtHeight", serde_json::json!([height])).await?;
        blocks
            .into_iter()
            .next()
            .ok_or_else(|| MonitorError::NotFound(format!("no finalized block at height {}", height)))
    }
}
