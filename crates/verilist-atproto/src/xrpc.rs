//! Thin XRPC transport over `reqwest`.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::XrpcError;

/// Header selecting the service a PDS forwards a request to.
pub const PROXY_HEADER: &str = "atproto-proxy";

pub const USER_AGENT: &str = concat!("verilist/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client for every remote call.
pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Per-call options.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallOptions<'a> {
    /// Bearer token.
    pub token: Option<&'a str>,
    /// Value of the `atproto-proxy` header.
    pub proxy: Option<&'a str>,
}

impl<'a> CallOptions<'a> {
    pub fn authed(token: &'a str) -> Self {
        Self {
            token: Some(token),
            proxy: None,
        }
    }

    pub fn via(mut self, proxy: &'a str) -> Self {
        self.proxy = Some(proxy);
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        if let Some(proxy) = self.proxy {
            if let Ok(value) = HeaderValue::from_str(proxy) {
                headers.insert(PROXY_HEADER, value);
            }
        }
        headers
    }
}

/// Client for one XRPC service (a PDS or an app view).
#[derive(Debug, Clone)]
pub struct XrpcClient {
    http: reqwest::Client,
    service: Url,
}

impl XrpcClient {
    pub fn new(http: reqwest::Client, service: &str) -> Result<Self, XrpcError> {
        Ok(Self {
            http,
            service: Url::parse(service)?,
        })
    }

    pub fn service(&self) -> &Url {
        &self.service
    }

    fn endpoint(&self, nsid: &str) -> Result<Url, XrpcError> {
        Ok(self.service.join(&format!("/xrpc/{nsid}"))?)
    }

    /// `GET /xrpc/<nsid>?params`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, &str)],
        options: CallOptions<'_>,
    ) -> Result<T, XrpcError> {
        let request = self
            .http
            .get(self.endpoint(nsid)?)
            .query(params)
            .headers(options.headers());
        send(request).await
    }

    /// `POST /xrpc/<nsid>` with a JSON body.
    pub async fn procedure<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: &B,
        options: CallOptions<'_>,
    ) -> Result<T, XrpcError> {
        let request = self
            .http
            .post(self.endpoint(nsid)?)
            .json(body)
            .headers(options.headers());
        send(request).await
    }

    /// `POST /xrpc/<nsid>` with no body, e.g. `refreshSession`.
    pub async fn procedure_empty<T: DeserializeOwned>(
        &self,
        nsid: &str,
        options: CallOptions<'_>,
    ) -> Result<T, XrpcError> {
        let request = self
            .http
            .post(self.endpoint(nsid)?)
            .headers(options.headers());
        send(request).await
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, XrpcError> {
    let response = request.send().await?;
    Ok(check(response).await?.json().await?)
}

async fn check(response: Response) -> Result<Response, XrpcError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.json::<ErrorBody>().await.ok();
    Err(XrpcError::Response {
        status,
        error: body.as_ref().and_then(|b| b.error.clone()),
        message: body.and_then(|b| b.message),
    })
}
