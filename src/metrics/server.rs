//! HTTP server for the Prometheus metrics endpoint.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::pool::ImagePool;

/// Serve pool statistics on the given address until the task is dropped.
///
/// The server exposes:
/// - GET /metrics - Prometheus format metrics
/// - GET /health - Health check endpoint
pub async fn run_metrics_server(addr: SocketAddr, pool: Arc<ImagePool>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}/metrics", listener.local_addr()?);

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to accept metrics connection: {}", e);
                continue;
            }
        };

        let pool = pool.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: Request<Incoming>| {
                let pool = pool.clone();
                async move { Ok::<_, Infallible>(handle_request(&req, &pool)) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Metrics connection error from {}: {}", remote_addr, e);
            }
        });
    }
}

/// Route a request to its response body.
fn handle_request<B>(req: &Request<B>, pool: &ImagePool) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => (
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            pool.stats().to_prometheus_string(),
        ),
        (&Method::GET, "/health") => (
            StatusCode::OK,
            "application/json",
            "{\"status\":\"ok\"}".to_string(),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain",
            "Not Found".to_string(),
        ),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolPolicy;
    use crate::types::PixelFormat;

    fn pool() -> ImagePool {
        ImagePool::new(PoolPolicy::new([(16, 16)], [1], 4096).unwrap())
    }

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[test]
    fn test_metrics_route() {
        let pool = pool();
        let _img = pool.acquire(8, 8, PixelFormat::Argb8888).unwrap();

        let resp = handle_request(&get("/metrics"), &pool);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[CONTENT_TYPE],
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }

    #[test]
    fn test_health_and_not_found() {
        let pool = pool();
        assert_eq!(handle_request(&get("/health"), &pool).status(), StatusCode::OK);
        assert_eq!(
            handle_request(&get("/nope"), &pool).status(),
            StatusCode::NOT_FOUND
        );

        let post = Request::builder()
            .method(Method::POST)
            .uri("/metrics")
            .body(())
            .unwrap();
        assert_eq!(handle_request(&post, &pool).status(), StatusCode::NOT_FOUND);
    }
}
