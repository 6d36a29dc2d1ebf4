use std::time::Duration;

use crate::error::RetrievalError;

const USER_AGENT: &str = concat!("planbbr/", env!("CARGO_PKG_VERSION"));

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// The two HTTP calls the register clients need.
pub trait Transport {
    fn get(&self, url: &str) -> Result<RawResponse, RetrievalError>;

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<RawResponse, RetrievalError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<RawResponse, RetrievalError> {
        (**self).get(url)
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<RawResponse, RetrievalError> {
        (**self).post_json(url, body)
    }
}

/// Blocking reqwest client. One instance is reused for every page of a
/// retrieval so the connection stays open between requests.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, RetrievalError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<RawResponse, RetrievalError> {
        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(RawResponse { status, body })
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<RawResponse, RetrievalError> {
        // .json() sets content-type: application/json
        let response = self.client.post(url).json(body).send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(RawResponse { status, body })
    }
}
