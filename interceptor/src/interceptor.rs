//! Server-side interception core
//!
//! Sits between the gRPC transport and the registered service handlers.
//! Every incoming call is classified, its handler rebuilt with the same
//! shape and codecs, and the rebuilt behavior drives the metric recorder at
//! call start, per streamed message, and at completion. The wrapped handler
//! is otherwise indistinguishable from the one it replaces: same inputs,
//! same outputs, and errors re-raised unchanged.

use std::sync::Arc;
use std::time::Instant;

use prometheus::Registry;

use crate::classify::{classify, CallDescriptor};
use crate::config::{self, RuntimeConfig};
use crate::error::Error;
use crate::handler::{resolve_status, Behavior, CallDetails, MethodHandler};
use crate::metrics::{CallMetrics, DefaultMetrics, LegacyMetrics, REGISTRY_INSTANCE};
use crate::stream::{self, MsgDirection};

/// Elapsed wall-clock seconds since `start`, clamped to be non-negative.
pub(crate) fn elapsed_seconds(start: Instant) -> f64 {
    Instant::now()
        .saturating_duration_since(start)
        .as_secs_f64()
        .max(0.0)
}

/// Prometheus server interceptor.
///
/// Construct one per server process and hand it the interception hook of
/// the RPC runtime. The metric schema (default or legacy) and the latency
/// histogram flag are fixed at construction.
pub struct PromServerInterceptor {
    metrics: Arc<dyn CallMetrics>,
    legacy: bool,
}

impl PromServerInterceptor {
    /// Builds an interceptor recording into `registry` per `config`.
    pub fn new(config: &RuntimeConfig, registry: &Registry) -> Result<Self, Error> {
        let metrics: Arc<dyn CallMetrics> = if config.legacy {
            Arc::new(LegacyMetrics::new(registry)?)
        } else {
            Arc::new(DefaultMetrics::new(
                registry,
                config.enable_handling_time_histogram,
            )?)
        };
        Ok(PromServerInterceptor {
            metrics,
            legacy: config.legacy,
        })
    }

    /// Builds an interceptor from the process config singleton, recording
    /// into the global registry.
    pub fn from_global_config() -> Result<Self, Error> {
        let config = config::instance().lock().unwrap().clone();
        Self::new(&config, &REGISTRY_INSTANCE)
    }

    /// Intercepts one incoming call.
    ///
    /// `continuation` yields the underlying handler for the call details;
    /// the returned handler has the identical shape and codecs, with metric
    /// bookkeeping folded into its behavior. A `None` handler (unknown
    /// method) passes through untouched.
    pub fn intercept<F>(
        &self,
        continuation: F,
        details: &CallDetails,
    ) -> Result<Option<MethodHandler>, Error>
    where
        F: FnOnce(&CallDetails) -> Option<MethodHandler>,
    {
        let handler = match continuation(details) {
            Some(handler) => handler,
            None => return Ok(None),
        };

        let descriptor = classify(
            handler.request_streaming(),
            handler.response_streaming(),
            &details.method,
        )
        .map_err(|e| {
            log::warn!("refusing to intercept call: {}", e);
            e
        })?;

        let behavior = match handler.behavior {
            Behavior::Unary(inner) => self.wrap_unary(inner, descriptor),
            Behavior::ClientStream(inner) => self.wrap_client_stream(inner, descriptor),
            Behavior::ServerStream(inner) => self.wrap_server_stream(inner, descriptor),
            Behavior::BidiStream(inner) => self.wrap_bidi_stream(inner, descriptor),
        };

        Ok(Some(MethodHandler {
            behavior,
            request_deserializer: handler.request_deserializer,
            response_serializer: handler.response_serializer,
        }))
    }

    fn wrap_unary(
        &self,
        inner: crate::handler::UnaryBehavior,
        descriptor: CallDescriptor,
    ) -> Behavior {
        let metrics = Arc::clone(&self.metrics);
        Behavior::Unary(Arc::new(move |request, ctx| {
            let inner = Arc::clone(&inner);
            let metrics = Arc::clone(&metrics);
            let desc = descriptor.clone();
            Box::pin(async move {
                let start = Instant::now();
                metrics.started(&desc);
                let result = inner(request, Arc::clone(&ctx)).await;
                let code = match &result {
                    Ok(_) => resolve_status(ctx.as_ref()),
                    Err(status) => status.code(),
                };
                metrics.handled(&desc, code);
                metrics.observe_latency(&desc, elapsed_seconds(start));
                result
            })
        }))
    }

    fn wrap_client_stream(
        &self,
        inner: crate::handler::ClientStreamBehavior,
        descriptor: CallDescriptor,
    ) -> Behavior {
        let metrics = Arc::clone(&self.metrics);
        let legacy = self.legacy;
        Behavior::ClientStream(Arc::new(move |requests, ctx| {
            let inner = Arc::clone(&inner);
            let metrics = Arc::clone(&metrics);
            let desc = descriptor.clone();
            Box::pin(async move {
                let start = Instant::now();
                let mut requests = stream::wrap(
                    requests,
                    Arc::clone(&metrics),
                    desc.clone(),
                    MsgDirection::Received,
                );
                if !legacy {
                    requests = stream::wrap(
                        requests,
                        Arc::clone(&metrics),
                        desc.clone(),
                        MsgDirection::Sent,
                    );
                }
                let result = inner(requests, Arc::clone(&ctx)).await;
                let code = match &result {
                    Ok(_) => resolve_status(ctx.as_ref()),
                    Err(status) => status.code(),
                };
                metrics.handled(&desc, code);
                metrics.observe_latency(&desc, elapsed_seconds(start));
                result
            })
        }))
    }

    fn wrap_server_stream(
        &self,
        inner: crate::handler::ServerStreamBehavior,
        descriptor: CallDescriptor,
    ) -> Behavior {
        let metrics = Arc::clone(&self.metrics);
        let legacy = self.legacy;
        Behavior::ServerStream(Arc::new(move |request, ctx| {
            let inner = Arc::clone(&inner);
            let metrics = Arc::clone(&metrics);
            let desc = descriptor.clone();
            Box::pin(async move {
                metrics.started(&desc);
                match inner(request, ctx).await {
                    Ok(responses) => {
                        // Streamed completions carry no handled or latency
                        // event; only the per-message counters run.
                        let responses = if legacy {
                            responses
                        } else {
                            stream::wrap(
                                responses,
                                Arc::clone(&metrics),
                                desc.clone(),
                                MsgDirection::Received,
                            )
                        };
                        Ok(stream::wrap(
                            responses,
                            Arc::clone(&metrics),
                            desc,
                            MsgDirection::Sent,
                        ))
                    }
                    Err(status) => {
                        metrics.handled(&desc, status.code());
                        Err(status)
                    }
                }
            })
        }))
    }

    fn wrap_bidi_stream(
        &self,
        inner: crate::handler::BidiStreamBehavior,
        descriptor: CallDescriptor,
    ) -> Behavior {
        let metrics = Arc::clone(&self.metrics);
        let legacy = self.legacy;
        Behavior::BidiStream(Arc::new(move |requests, ctx| {
            let inner = Arc::clone(&inner);
            let metrics = Arc::clone(&metrics);
            let desc = descriptor.clone();
            Box::pin(async move {
                let mut requests = stream::wrap(
                    requests,
                    Arc::clone(&metrics),
                    desc.clone(),
                    MsgDirection::Received,
                );
                if !legacy {
                    requests = stream::wrap(
                        requests,
                        Arc::clone(&metrics),
                        desc.clone(),
                        MsgDirection::Sent,
                    );
                }
                match inner(requests, ctx).await {
                    Ok(responses) => {
                        let responses = if legacy {
                            responses
                        } else {
                            stream::wrap(
                                responses,
                                Arc::clone(&metrics),
                                desc.clone(),
                                MsgDirection::Received,
                            )
                        };
                        Ok(stream::wrap(
                            responses,
                            Arc::clone(&metrics),
                            desc,
                            MsgDirection::Sent,
                        ))
                    }
                    Err(status) => {
                        metrics.handled(&desc, status.code());
                        Err(status)
                    }
                }
            })
        }))
    }
}
