//! Custom Axum extractors.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::net::SocketAddr;

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Best guess at the caller's address: the first `X-Forwarded-For` hop,
/// else the peer address of the connection.
///
/// Handlers prefer an explicit `ip` query parameter over this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty() && !ip.eq_ignore_ascii_case("unknown"));
        if let Some(ip) = forwarded {
            return Ok(ClientIp(Some(ip.to_string())));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientIp(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> ClientIp {
        let (mut parts, _) = request.into_parts();
        ClientIp::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn first_forwarded_hop_wins() {
        let request = Request::builder()
            .header("X-Forwarded-For", " 10.0.0.7 , 172.16.0.1")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await, ClientIp(Some("10.0.0.7".into())));
    }

    #[tokio::test]
    async fn falls_back_to_peer_address() {
        let mut request = Request::builder()
            .header("X-Forwarded-For", "unknown")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 40000))));
        assert_eq!(extract(request).await, ClientIp(Some("192.168.1.5".into())));
    }

    #[tokio::test]
    async fn nothing_known() {
        let request = Request::builder().body(()).unwrap();
        assert_eq!(extract(request).await, ClientIp(None));
    }
}
