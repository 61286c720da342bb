use crate::chain::{Broadcaster, ChainQueryService, ChainUtxo, UtxoSource};
use crate::error::ChainQueryError;
use crate::utils::to_hex;
use async_trait::async_trait;
use bitcoin::{Address, Txid};
use log::{debug, info};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: Txid,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

impl From<EsploraUtxo> for ChainUtxo {
    fn from(utxo: EsploraUtxo) -> Self {
        ChainUtxo {
            txid: utxo.txid,
            vout: utxo.vout,
            value_sat: utxo.value,
            confirmed: utxo.status.confirmed,
        }
    }
}

/// Client for an Esplora-compatible REST chain source
#[derive(Clone, Debug)]
pub struct EsploraClient {
    client: Client,
    url: Url,
}

impl EsploraClient {
    pub fn new(mut url: Url, timeout: Duration) -> Result<Self, ChainQueryError> {
        // Url::join replaces the last segment unless the base ends in a slash
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainQueryError::Request(e.to_string()))?;
        Ok(EsploraClient { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChainQueryError> {
        self.url
            .join(path)
            .map_err(|e| ChainQueryError::Request(format!("bad endpoint {path}: {e}")))
    }

    async fn check(res: Response) -> Result<Response, ChainQueryError> {
        let status = res.status();
        if status.is_client_error() || status.is_server_error() {
            let body = res.text().await.unwrap_or_default();
            return Err(ChainQueryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res)
    }

    async fn get_text(&self, path: &str) -> Result<String, ChainQueryError> {
        let url = self.endpoint(path)?;
        debug!("GET {url}");
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ChainQueryError::Request(e.to_string()))?;
        let text = Self::check(res)
            .await?
            .text()
            .await
            .map_err(|e| ChainQueryError::Parse(e.to_string()))?;
        Ok(text.trim().to_string())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChainQueryError> {
        let url = self.endpoint(path)?;
        debug!("GET {url}");
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ChainQueryError::Request(e.to_string()))?;
        Self::check(res)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ChainQueryError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ChainQueryService for EsploraClient {
    async fn latest_block_hash(&self) -> Result<String, ChainQueryError> {
        let hash = self.get_text("blocks/tip/hash").await?;
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChainQueryError::Parse(format!("not a block hash: {hash}")));
        }
        Ok(hash)
    }

    async fn latest_block_height(&self) -> Result<u64, ChainQueryError> {
        let height = self.get_text("blocks/tip/height").await?;
        height
            .parse::<u64>()
            .map_err(|e| ChainQueryError::Parse(format!("not a block height: {height}: {e}")))
    }
}

#[async_trait]
impl UtxoSource for EsploraClient {
    async fn list_unspent(&self, address: &Address) -> Result<Vec<ChainUtxo>, ChainQueryError> {
        let utxos: Vec<EsploraUtxo> = self.get_json(&format!("address/{address}/utxo")).await?;
        Ok(utxos.into_iter().map(ChainUtxo::from).collect())
    }
}

#[async_trait]
impl Broadcaster for EsploraClient {
    async fn broadcast(&self, tx: &[u8]) -> Result<Txid, ChainQueryError> {
        let url = self.endpoint("tx")?;
        let res = self
            .client
            .post(url)
            .body(to_hex(tx))
            .send()
            .await
            .map_err(|e| ChainQueryError::Request(e.to_string()))?;
        let body = Self::check(res)
            .await?
            .text()
            .await
            .map_err(|e| ChainQueryError::Parse(e.to_string()))?;
        let txid = Txid::from_str(body.trim())
            .map_err(|e| ChainQueryError::Parse(format!("not a txid: {body}: {e}")))?;
        info!("Broadcast transaction {txid}");
        Ok(txid)
    }
}
