use crate::error::ShieldError;
use crate::gate::context::BoxBody;
use anyhow::Result;
use http::header::{HeaderName, HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING};
use http::uri::{Authority, Scheme};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::time::Duration;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards admitted requests to the single configured upstream.
///
/// Plain `http://` goes through the inner connector directly; `https://` is
/// terminated with rustls (ring backend, webpki roots), with HTTP/2 via ALPN.
pub struct UpstreamForwarder {
    client: Client<HttpsConnector<HttpConnector>, BoxBody>,
    scheme: Scheme,
    authority: Authority,
}

impl UpstreamForwarder {
    pub fn new(url: &str) -> Result<Self> {
        let uri: http::Uri = url.parse()?;
        let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("upstream_url {:?} has no host", url))?;

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.set_connect_timeout(Some(CONNECT_TIMEOUT));
        http.enforce_http(false);

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(60))
            .build(https);

        Ok(Self {
            client,
            scheme,
            authority,
        })
    }

    pub async fn forward(
        &self,
        req: Request<Incoming>,
        peer: SocketAddr,
    ) -> Result<Response<BoxBody>, ShieldError> {
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned());

        let uri = http::Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ShieldError::Upstream(e.to_string()))?;

        remove_hop_headers(&mut parts.headers);
        inject_forwarded_headers(&mut parts.headers, peer);
        parts.headers.insert(
            HOST,
            HeaderValue::from_str(self.authority.as_str())
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );

        let mut upstream_req = Request::builder()
            .method(parts.method)
            .uri(uri)
            .body(body.boxed())
            .map_err(|e| ShieldError::Upstream(e.to_string()))?;
        *upstream_req.headers_mut() = parts.headers;

        let resp = tokio::time::timeout(UPSTREAM_TIMEOUT, self.client.request(upstream_req))
            .await
            .map_err(|_| ShieldError::Upstream("upstream timed out".into()))?
            .map_err(|e| ShieldError::Upstream(e.to_string()))?;

        Ok(resp.map(|b| b.boxed()))
    }
}

fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];
    for h in hop_headers {
        headers.remove(h);
    }
}

/// Append this hop to `X-Forwarded-For` and record the inbound protocol.
/// The upstream sees the full chain; trust evaluation happened at the gate.
fn inject_forwarded_headers(headers: &mut http::HeaderMap, peer: SocketAddr) {
    let peer_ip = peer.ip().to_string();
    let forwarded = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, peer_ip),
        None => peer_ip,
    };
    if let Ok(v) = HeaderValue::from_str(&forwarded) {
        headers.insert("x-forwarded-for", v);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_url_without_host() {
        assert!(UpstreamForwarder::new("/just/a/path").is_err());
    }

    #[test]
    fn test_accepts_http_and_https() {
        assert!(UpstreamForwarder::new("http://backend:8081").is_ok());
        assert!(UpstreamForwarder::new("https://backend.internal").is_ok());
    }

    #[test]
    fn test_forwarded_chain_appends_peer() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("6.6.6.6"));
        inject_forwarded_headers(&mut headers, "10.0.0.9:4711".parse().unwrap());
        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "6.6.6.6, 10.0.0.9"
        );
    }
}
