//! Upstream broker over REST.
//!
//! Every call carries the client-level deadline configured at build time;
//! transport failures (timeout, connect, DNS) classify as `Retriable`,
//! non-2xx statuses classify via [`BrokerError::from_status`].

use crate::adapter::{BrokerAdapter, CancelResponse, PlaceOrderRequest, PlaceOrderResponse};
use crate::error::BrokerError;
use pdk_config::BrokerCredentials;
use pdk_schemas::{BrokerOrderView, BrokerPositionView};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct HttpBroker {
    base_url: String,
    creds: BrokerCredentials,
    http: reqwest::Client,
}

impl HttpBroker {
    pub fn new(
        base_url: impl Into<String>,
        creds: BrokerCredentials,
        request_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BrokerError::Fatal(format!("build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            creds,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.header("X-Api-Key-Id", &self.creds.key_id)
            .header("X-Api-Secret", &self.creds.secret)
    }

    async fn parse_json<T: DeserializeOwned>(resp: Response) -> Result<T, BrokerError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BrokerError::Retriable(format!("read body: {e}")))?;
        if !status.is_success() {
            return Err(BrokerError::from_status(status.as_u16(), body));
        }
        serde_json::from_str(&body)
            .map_err(|e| BrokerError::Fatal(format!("malformed broker response: {e}")))
    }
}

fn transport(e: reqwest::Error) -> BrokerError {
    // Deadline and connection failures leave the broker's state unknown to
    // us; both retry under the same idempotency key.
    BrokerError::Retriable(format!("transport: {e}"))
}

impl BrokerAdapter for HttpBroker {
    async fn place(&self, req: &PlaceOrderRequest) -> Result<PlaceOrderResponse, BrokerError> {
        let resp = self
            .authed(self.http.post(self.url("/orders")))
            .json(req)
            .send()
            .await
            .map_err(transport)?;
        Self::parse_json(resp).await
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<CancelResponse, BrokerError> {
        let resp = self
            .authed(
                self.http
                    .delete(self.url(&format!("/orders/{broker_order_id}"))),
            )
            .send()
            .await
            .map_err(transport)?;
        Self::parse_json(resp).await
    }

    async fn get_order(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrderView>, BrokerError> {
        let resp = self
            .authed(self.http.get(self.url("/orders")))
            .query(&[("client_order_id", client_order_id)])
            .send()
            .await
            .map_err(transport)?;

        // 404 is a definitive "not found", not an error.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_json(resp).await.map(Some)
    }

    async fn list_open_orders(&self) -> Result<Vec<BrokerOrderView>, BrokerError> {
        let resp = self
            .authed(self.http.get(self.url("/orders/open")))
            .send()
            .await
            .map_err(transport)?;
        Self::parse_json(resp).await
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPositionView>, BrokerError> {
        let resp = self
            .authed(self.http.get(self.url("/positions")))
            .send()
            .await
            .map_err(transport)?;
        Self::parse_json(resp).await
    }

    async fn cancel_all(&self) -> Result<u32, BrokerError> {
        #[derive(serde::Deserialize)]
        struct CancelAllResponse {
            cancelled: u32,
        }

        let resp = self
            .authed(self.http.delete(self.url("/orders")))
            .send()
            .await
            .map_err(transport)?;
        let parsed: CancelAllResponse = Self::parse_json(resp).await?;
        Ok(parsed.cancelled)
    }
}
