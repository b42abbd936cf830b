//! Prometheus exposition endpoint
//!
//! Serves the text exposition format over HTTP so that an external scraper
//! can collect everything the interceptor records.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;

use crate::metrics::REGISTRY_INSTANCE;

/// Renders the current contents of `registry` in text exposition format.
pub fn render(registry: &Registry) -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        log::error!("failed to encode metrics: {:?}", e);
    }
    buffer
}

/// Spawns the exposition server for `registry` on `addr`.
pub fn spawn(addr: SocketAddr, registry: Registry) {
    let make_svc = make_service_fn(move |_| {
        let registry = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |_: Request<Body>| {
                let registry = registry.clone();
                async move { Ok::<_, hyper::Error>(Response::new(Body::from(render(&registry)))) }
            }))
        }
    });
    let server = hyper::Server::bind(&addr).serve(make_svc);
    tokio::spawn(async move {
        tokio::pin!(server);
        if let Err(e) = server.await {
            log::error!("metrics server error: {:?}", e);
        }
    });
    log::info!("metrics server started on {}", addr);
}

/// Spawns the exposition server for the process-wide registry.
pub fn spawn_global(addr: SocketAddr) {
    spawn(addr, REGISTRY_INSTANCE.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::metrics::{CallMetrics, DefaultMetrics};

    #[test]
    fn test_render_contains_written_samples() {
        let registry = Registry::new();
        let metrics = DefaultMetrics::new(&registry, false).unwrap();
        let desc = classify(false, false, "/helloworld.Greeter/SayHello").unwrap();
        metrics.started(&desc);

        let body = String::from_utf8(render(&registry)).unwrap();
        assert!(body.contains("grpc_server_started_total"));
        assert!(body.contains("grpc_service=\"helloworld.Greeter\""));
        assert!(body.contains("grpc_method=\"SayHello\""));
        assert!(body.contains("grpc_type=\"UNARY\""));
    }

    #[test]
    fn test_render_empty_registry() {
        let registry = Registry::new();
        assert!(render(&registry).is_empty());
    }
}
