// src/server/handler.rs
use crate::metrics::MetricsCollector;
use crate::server::routes::{dispatch, ApiState, Route};
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tower::Service;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct RequestHandler {
    state: Arc<ApiState>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RequestHandler {
    pub fn new(state: Arc<ApiState>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { state, metrics }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let route = Route::resolve(&method, &path);
        let pattern = route.pattern();

        let response = match dispatch(&self.state, route, req).await {
            Ok(response) => response,
            Err(err) => err.into(),
        };

        let status = response.status();
        if status.is_server_error() {
            warn!(%method, %path, status = status.as_u16(), "request failed");
        } else {
            info!(%method, %path, status = status.as_u16(), elapsed_ms = start.elapsed().as_millis() as u64, "request");
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_request(method.as_str(), pattern, status.as_u16(), start.elapsed());
        }

        response
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        let span = tracing::info_span!("http", request_id = %Uuid::new_v4());
        Box::pin(async move { Ok(handler.handle(req).await) }.instrument(span))
    }
}
