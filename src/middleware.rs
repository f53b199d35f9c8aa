//! Middleware pipeline (spec §4.6): ordered request transformers, reverse-
//! ordered response transformers. Per-engine, immutable after the engine
//! starts.

use async_trait::async_trait;

use crate::fetcher::{FetchRequest, FetchResponse};

/// Signal a request middleware can raise instead of returning a (possibly
/// mutated) request.
pub enum RequestAction {
    Continue(FetchRequest),
    Skip,
}

/// Signal a response middleware can raise instead of returning a (possibly
/// mutated) response.
pub enum ResponseAction {
    Continue(FetchResponse),
    Skip,
    Replace(FetchResponse),
}

/// A single middleware layer. Either hook may be a no-op default.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_request(&self, request: FetchRequest) -> Result<RequestAction, String> {
        Ok(RequestAction::Continue(request))
    }

    async fn on_response(
        &self,
        response: FetchResponse,
        _request: &FetchRequest,
    ) -> Result<ResponseAction, String> {
        Ok(ResponseAction::Continue(response))
    }
}

/// Outcome of running the full chain on a request.
pub enum RequestOutcome {
    Proceed(FetchRequest),
    Skip,
    Error(String),
}

/// Outcome of running the full chain on a response.
pub enum ResponseOutcome {
    Proceed(FetchResponse),
    Skip,
    Error(String),
}

/// Ordered chain of middlewares. Request middlewares run in registration
/// order; response middlewares run in reverse registration order, so each
/// layer observes its own transformation to the request first on the way
/// out (spec §4.6, and the two-layer scenario in spec §8.6).
#[derive(Default)]
pub struct MiddlewarePipeline {
    layers: Vec<Box<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push(&mut self, middleware: Box<dyn Middleware>) {
        self.layers.push(middleware);
    }

    pub async fn run_request(&self, mut request: FetchRequest) -> RequestOutcome {
        for layer in &self.layers {
            match layer.on_request(request).await {
                Ok(RequestAction::Continue(r)) => request = r,
                Ok(RequestAction::Skip) => return RequestOutcome::Skip,
                Err(e) => return RequestOutcome::Error(e),
            }
        }
        RequestOutcome::Proceed(request)
    }

    pub async fn run_response(
        &self,
        mut response: FetchResponse,
        request: &FetchRequest,
    ) -> ResponseOutcome {
        for layer in self.layers.iter().rev() {
            match layer.on_response(response, request).await {
                Ok(ResponseAction::Continue(r)) => response = r,
                Ok(ResponseAction::Skip) => return ResponseOutcome::Skip,
                Ok(ResponseAction::Replace(r)) => return ResponseOutcome::Proceed(r),
                Err(e) => return ResponseOutcome::Error(e),
            }
        }
        ResponseOutcome::Proceed(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct SetUserAgent(&'static str);

    #[async_trait]
    impl Middleware for SetUserAgent {
        async fn on_request(&self, mut request: FetchRequest) -> Result<RequestAction, String> {
            request
                .headers
                .insert("User-Agent".to_string(), self.0.to_string());
            Ok(RequestAction::Continue(request))
        }
    }

    struct RecordObservationOrder {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for RecordObservationOrder {
        async fn on_response(
            &self,
            response: FetchResponse,
            _request: &FetchRequest,
        ) -> Result<ResponseAction, String> {
            self.order.lock().unwrap().push(self.name);
            Ok(ResponseAction::Continue(response))
        }
    }

    fn empty_response() -> FetchResponse {
        FetchResponse {
            status: 200,
            headers: Default::default(),
            body: Vec::new(),
            final_url: "https://example.com/".to_string(),
        }
    }

    #[tokio::test]
    async fn later_registered_middleware_wins_request_header() {
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.push(Box::new(SetUserAgent("TestBot/1.0")));
        pipeline.push(Box::new(SetUserAgent("Spider/2.0")));

        let request = FetchRequest::new("https://example.com/");
        match pipeline.run_request(request).await {
            RequestOutcome::Proceed(r) => {
                assert_eq!(r.headers.get("User-Agent").map(String::as_str), Some("Spider/2.0"));
            }
            _ => panic!("expected proceed"),
        }
    }

    #[tokio::test]
    async fn response_middlewares_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.push(Box::new(RecordObservationOrder {
            name: "A",
            order: order.clone(),
        }));
        pipeline.push(Box::new(RecordObservationOrder {
            name: "B",
            order: order.clone(),
        }));

        let request = FetchRequest::new("https://example.com/");
        let outcome = pipeline.run_response(empty_response(), &request).await;
        assert!(matches!(outcome, ResponseOutcome::Proceed(_)));
        assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
    }
}
