//! The request pipeline.
//!
//! # Overview
//! [`ServiceProvider`] executes one logical API call end to end:
//!
//! 1. resolve the definition into an [`ApiTarget`],
//! 2. map the target into an [`HttpRequest`],
//! 3. answer immediately with placeholder data when the definition has some,
//! 4. fold the plugins' request mutations, then notify them,
//! 5. execute through the stub strategy or the executor,
//! 6. fold the raw outcome into a [`DataResult`],
//! 7. notify the plugins, then fold their result mutations,
//! 8. ask the completion strategy whether to deliver or retry from step 4,
//! 9. decode successful bodies on the blocking pool.
//!
//! # Design
//! Each call runs on its own tokio task and reports through a oneshot
//! channel, so the caller gets exactly one result however many attempts ran.
//! Retries reuse the request mapped in step 2; the target is never
//! re-resolved. The handle's [`ServiceCancellable`] installs a fresh child
//! token per attempt.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::api::ApiDefinition;
use crate::cancel::ServiceCancellable;
use crate::completion::{CompletionDecision, CompletionStrategy, ProceedStrategy};
use crate::error::{ParsingError, ServiceError, TransportError};
use crate::executor::{Executor, TransportOutcome, UreqExecutor};
use crate::http::{HttpRequest, HttpResponse};
use crate::parser::{JsonResponseParser, ResponseParser};
use crate::plugin::ServicePlugin;
use crate::stub::{StubResponse, StubStrategy};
use crate::target::{ApiTarget, DefaultRequestMapper, DefaultTargetResolver, RequestMapper, TargetResolver};

/// Raw outcome of a request that reached a server (or a stub).
#[derive(Debug, Clone, PartialEq)]
pub struct DataResponse {
    pub data: Vec<u8>,
    /// The request as finally submitted, after plugin mutation.
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
}

impl DataResponse {
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

pub type DataResult = Result<DataResponse, ServiceError>;

/// A decoded body together with the response it came from.
#[derive(Debug, Clone)]
pub struct ParsedResponse<T> {
    pub parsed: T,
    pub data_response: DataResponse,
}

/// Handle to a running request. Await it for the result; cancel it through
/// [`cancellable`](Self::cancellable).
#[derive(Debug)]
pub struct ServiceTask<R> {
    receiver: oneshot::Receiver<Result<R, ServiceError>>,
    cancellable: ServiceCancellable,
}

impl<R> ServiceTask<R> {
    pub fn cancellable(&self) -> ServiceCancellable {
        self.cancellable.clone()
    }

    pub fn cancel(&self) {
        self.cancellable.cancel();
    }
}

impl<R> Future for ServiceTask<R> {
    type Output = Result<R, ServiceError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ServiceError::Underlying {
                    error: TransportError::Unknown,
                    response: None,
                })
            })
        })
    }
}

/// Executes API definitions through a configurable pipeline.
///
/// Cheap to clone; clones share plugins and strategies. Requests must be
/// started from within a tokio runtime.
pub struct ServiceProvider<P = JsonResponseParser> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for ServiceProvider<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<P> {
    target_resolver: Arc<dyn TargetResolver>,
    request_mapper: Arc<dyn RequestMapper>,
    plugins: Vec<Arc<dyn ServicePlugin>>,
    stub_strategy: StubStrategy,
    completion_strategy: Arc<dyn CompletionStrategy>,
    executor: Arc<dyn Executor>,
    parser: P,
}

impl ServiceProvider {
    pub fn builder() -> ServiceProviderBuilder {
        ServiceProviderBuilder::default()
    }
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<P: ResponseParser> ServiceProvider<P> {
    /// Performs `api` and decodes a successful body into `T`.
    pub fn request<T>(&self, api: ApiDefinition) -> ServiceTask<ParsedResponse<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.spawn(api, |inner, api, cancellable| async move {
            let data = inner.perform(&api, &cancellable).await?;
            inner.parse(data).await
        })
    }

    /// Performs `api` without decoding the body.
    pub fn request_data(&self, api: ApiDefinition) -> ServiceTask<DataResponse> {
        self.spawn(api, |inner, api, cancellable| async move {
            inner.perform(&api, &cancellable).await
        })
    }

    /// Callback form of [`request`](Self::request). `completion` is invoked
    /// exactly once, on a runtime worker.
    pub fn request_with<T, F>(&self, api: ApiDefinition, completion: F) -> ServiceCancellable
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<ParsedResponse<T>, ServiceError>) + Send + 'static,
    {
        let task = self.request::<T>(api);
        let cancellable = task.cancellable();
        tokio::spawn(async move { completion(task.await) });
        cancellable
    }

    fn spawn<R, F, Fut>(&self, api: ApiDefinition, run: F) -> ServiceTask<R>
    where
        R: Send + 'static,
        F: FnOnce(Arc<Inner<P>>, ApiDefinition, ServiceCancellable) -> Fut,
        Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
    {
        let cancellable = ServiceCancellable::new();
        let (sender, receiver) = oneshot::channel();
        let span = info_span!("service.request", request_id = %Uuid::new_v4(), api = %api.label());
        let work = run(Arc::clone(&self.inner), api, cancellable.clone());

        tokio::spawn(
            async move {
                let result = work.await;
                if let Err(err) = &result {
                    debug!(error = %err, "request failed");
                }
                // The caller may have dropped the task.
                let _ = sender.send(result);
            }
            .instrument(span),
        );

        ServiceTask { receiver, cancellable }
    }
}

impl<P: ResponseParser> Inner<P> {
    async fn perform(&self, api: &ApiDefinition, cancellable: &ServiceCancellable) -> DataResult {
        let target = self.target_resolver.resolve(api).await?;
        let mapped = self.request_mapper.map(&target)?;

        if let Some(data) = &api.placeholder_data {
            debug!("answering with placeholder data");
            return Ok(DataResponse {
                data: data.clone(),
                request: mapped,
                response: Some(HttpResponse::new(200)),
            });
        }

        loop {
            let token = cancellable.install_attempt();
            let attempt = cancellable.attempts();

            let request = self
                .plugins
                .iter()
                .fold(mapped.clone(), |request, plugin| plugin.mutate_request(request, api));
            for plugin in &self.plugins {
                plugin.will_submit(&request, api);
            }

            debug!(attempt, url = %request.url, "executing request");
            let outcome = self.execute(api, &target, request.clone(), &token).await;
            let result = into_result(outcome, request);

            for plugin in &self.plugins {
                plugin.did_receive(&result, api);
            }
            let result = self
                .plugins
                .iter()
                .fold(result, |result, plugin| plugin.mutate_result(result, api));

            if cancellable.is_cancelled() {
                return result;
            }
            match self.completion_strategy.should_finish(&result, api).await {
                CompletionDecision::Proceed => return result,
                CompletionDecision::Retry => debug!(attempt, "completion strategy requested a retry"),
            }
        }
    }

    async fn execute(
        &self,
        api: &ApiDefinition,
        target: &ApiTarget,
        request: HttpRequest,
        token: &CancellationToken,
    ) -> TransportOutcome {
        if token.is_cancelled() {
            return TransportOutcome::failure(TransportError::Cancelled);
        }

        let transport = async {
            if let StubStrategy::Stub { delay, provider } = &self.stub_strategy {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                match provider(api, target) {
                    StubResponse::NetworkResponse { status, headers, data } => {
                        return TransportOutcome::response(HttpResponse { status, headers }, data);
                    }
                    StubResponse::NetworkError(error) => return TransportOutcome::failure(error),
                    StubResponse::ContinueCourse => {}
                }
            }
            self.executor.execute(request).await
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => TransportOutcome::failure(TransportError::Cancelled),
            outcome = transport => outcome,
        }
    }

    async fn parse<T>(self: &Arc<Self>, response: DataResponse) -> Result<ParsedResponse<T>, ServiceError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let inner = Arc::clone(self);
        let decoded = tokio::task::spawn_blocking(move || {
            let parsed = inner.parser.parse::<T>(&response);
            (parsed, response)
        })
        .await;

        match decoded {
            Ok((Ok(parsed), data_response)) => Ok(ParsedResponse { parsed, data_response }),
            Ok((Err(ParsingError::Parsing(source)), response)) => Err(ServiceError::Parsing { source, response }),
            Ok((Err(ParsingError::Response(error)), response)) => Err(ServiceError::Api { error, response }),
            Err(err) => {
                debug!(error = %err, "decode task did not complete");
                Err(ServiceError::Underlying {
                    error: TransportError::Unknown,
                    response: None,
                })
            }
        }
    }
}

/// Folds a raw transport outcome into a result.
fn into_result(outcome: TransportOutcome, request: HttpRequest) -> DataResult {
    let TransportOutcome { data, response, error } = outcome;
    match (response, error) {
        (Some(response), None) => Ok(DataResponse {
            data: data.unwrap_or_default(),
            request,
            response: Some(response),
        }),
        (Some(response), Some(error)) => Err(ServiceError::Underlying {
            error,
            response: Some(DataResponse {
                data: data.unwrap_or_default(),
                request,
                response: Some(response),
            }),
        }),
        (None, Some(error)) => Err(ServiceError::Underlying { error, response: None }),
        (None, None) => Err(ServiceError::Underlying {
            error: TransportError::Unknown,
            response: None,
        }),
    }
}

/// Configures a [`ServiceProvider`]. Every component has a default: plain
/// URL resolution, [`ApiTarget::to_request`] mapping, no plugins, no stubs,
/// [`ProceedStrategy`], [`UreqExecutor`] and [`JsonResponseParser`].
pub struct ServiceProviderBuilder<P = JsonResponseParser> {
    target_resolver: Option<Arc<dyn TargetResolver>>,
    request_mapper: Option<Arc<dyn RequestMapper>>,
    plugins: Vec<Arc<dyn ServicePlugin>>,
    stub_strategy: StubStrategy,
    completion_strategy: Option<Arc<dyn CompletionStrategy>>,
    executor: Option<Arc<dyn Executor>>,
    parser: P,
}

impl Default for ServiceProviderBuilder {
    fn default() -> Self {
        Self {
            target_resolver: None,
            request_mapper: None,
            plugins: Vec::new(),
            stub_strategy: StubStrategy::DontStub,
            completion_strategy: None,
            executor: None,
            parser: JsonResponseParser,
        }
    }
}

impl<P: ResponseParser> ServiceProviderBuilder<P> {
    pub fn target_resolver(mut self, resolver: Arc<dyn TargetResolver>) -> Self {
        self.target_resolver = Some(resolver);
        self
    }

    pub fn request_mapper(mut self, mapper: Arc<dyn RequestMapper>) -> Self {
        self.request_mapper = Some(mapper);
        self
    }

    /// Appends a plugin. Hooks run in registration order.
    pub fn plugin(mut self, plugin: Arc<dyn ServicePlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn stub_strategy(mut self, strategy: StubStrategy) -> Self {
        self.stub_strategy = strategy;
        self
    }

    pub fn completion_strategy(mut self, strategy: Arc<dyn CompletionStrategy>) -> Self {
        self.completion_strategy = Some(strategy);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn parser<Q: ResponseParser>(self, parser: Q) -> ServiceProviderBuilder<Q> {
        ServiceProviderBuilder {
            target_resolver: self.target_resolver,
            request_mapper: self.request_mapper,
            plugins: self.plugins,
            stub_strategy: self.stub_strategy,
            completion_strategy: self.completion_strategy,
            executor: self.executor,
            parser,
        }
    }

    pub fn build(self) -> ServiceProvider<P> {
        ServiceProvider {
            inner: Arc::new(Inner {
                target_resolver: self.target_resolver.unwrap_or_else(|| Arc::new(DefaultTargetResolver)),
                request_mapper: self.request_mapper.unwrap_or_else(|| Arc::new(DefaultRequestMapper)),
                plugins: self.plugins,
                stub_strategy: self.stub_strategy,
                completion_strategy: self.completion_strategy.unwrap_or_else(|| Arc::new(ProceedStrategy)),
                executor: self.executor.unwrap_or_else(|| Arc::new(UreqExecutor::default())),
                parser: self.parser,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;
    use crate::http::HttpMethod;

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for CountingExecutor {
        async fn execute(&self, request: HttpRequest) -> TransportOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            TransportOutcome::response(HttpResponse::new(200), request.url.into_bytes())
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echo {
        foo: String,
    }

    fn echo_api() -> ApiDefinition {
        ApiDefinition::new(HttpMethod::Get, "https://postman-echo.com", "/get")
    }

    fn provider_with(executor: Arc<CountingExecutor>) -> ServiceProvider {
        ServiceProvider::builder().executor(executor).build()
    }

    #[test]
    fn outcome_with_response_and_no_error_is_success() {
        let request = HttpRequest::new(HttpMethod::Get, "https://h/get");
        let result = into_result(
            TransportOutcome {
                data: None,
                response: Some(HttpResponse::new(204)),
                error: None,
            },
            request,
        );
        let response = result.unwrap();
        assert!(response.data.is_empty());
        assert_eq!(response.status(), Some(204));
    }

    #[test]
    fn outcome_with_response_and_error_keeps_response() {
        let request = HttpRequest::new(HttpMethod::Get, "https://h/get");
        let outcome = TransportOutcome::failure_with_response(
            TransportError::TimedOut,
            HttpResponse::new(200),
            Some(b"partial".to_vec()),
        );
        let err = into_result(outcome, request).unwrap_err();
        assert_eq!(err.transport_error(), Some(&TransportError::TimedOut));
        assert_eq!(err.data_response().unwrap().data, b"partial".to_vec());
    }

    #[test]
    fn outcome_with_error_only_has_no_response() {
        let request = HttpRequest::new(HttpMethod::Get, "https://h/get");
        let err = into_result(TransportOutcome::failure(TransportError::Cancelled), request).unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.data_response().is_none());
    }

    #[test]
    fn empty_outcome_is_unknown_error() {
        let request = HttpRequest::new(HttpMethod::Get, "https://h/get");
        let err = into_result(TransportOutcome::default(), request).unwrap_err();
        assert_eq!(err.transport_error(), Some(&TransportError::Unknown));
    }

    #[tokio::test]
    async fn placeholder_data_skips_the_executor() {
        let executor = Arc::new(CountingExecutor::default());
        let provider = provider_with(Arc::clone(&executor));
        let api = echo_api().with_placeholder_data(br#"{"foo":"placeholder"}"#.to_vec());

        let response = provider.request::<Echo>(api).await.unwrap();
        assert_eq!(response.parsed, Echo { foo: "placeholder".to_string() });
        assert_eq!(response.data_response.status(), Some(200));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolver_failure_makes_no_network_call() {
        let executor = Arc::new(CountingExecutor::default());
        let provider = provider_with(Arc::clone(&executor));
        let api = ApiDefinition::new(HttpMethod::Get, "::not a url::", "/get");

        let err = provider.request_data(api).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResolvedUrl(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn request_data_returns_raw_body() {
        let executor = Arc::new(CountingExecutor::default());
        let provider = provider_with(Arc::clone(&executor));

        let response = provider.request_data(echo_api()).await.unwrap();
        assert_eq!(response.text(), Some("https://postman-echo.com/get"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decode_failure_carries_raw_response() {
        let executor = Arc::new(CountingExecutor::default());
        let provider = provider_with(executor);

        let err = provider.request::<Echo>(echo_api()).await.unwrap_err();
        match err {
            ServiceError::Parsing { response, .. } => {
                assert_eq!(response.text(), Some("https://postman-echo.com/get"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stub_error_is_underlying_failure() {
        let executor = Arc::new(CountingExecutor::default());
        let provider = ServiceProvider::builder()
            .executor(Arc::clone(&executor) as Arc<dyn Executor>)
            .stub_strategy(StubStrategy::immediate(|_, _| StubResponse::timed_out()))
            .build();

        let err = provider.request_data(echo_api()).await.unwrap_err();
        assert_eq!(err.transport_error(), Some(&TransportError::TimedOut));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stub_can_continue_course() {
        let executor = Arc::new(CountingExecutor::default());
        let provider = ServiceProvider::builder()
            .executor(Arc::clone(&executor) as Arc<dyn Executor>)
            .stub_strategy(StubStrategy::immediate(|_, _| StubResponse::ContinueCourse))
            .build();

        provider.request_data(echo_api()).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_stub_delay() {
        let provider = ServiceProvider::builder()
            .stub_strategy(StubStrategy::delayed(Duration::from_secs(60), |_, _| {
                StubResponse::ok(b"late".to_vec())
            }))
            .build();

        let task = provider.request_data(echo_api());
        let cancellable = task.cancellable();
        tokio::task::yield_now().await;
        cancellable.cancel();
        assert!(cancellable.is_cancelled());

        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn error_status_surfaces_as_api_error() {
        let provider = ServiceProvider::builder()
            .stub_strategy(StubStrategy::immediate(|_, _| {
                StubResponse::json(404, &serde_json::json!({ "error": "missing" }))
            }))
            .build();

        let err = provider.request::<Echo>(echo_api()).await.unwrap_err();
        match err {
            ServiceError::Api { response, .. } => assert_eq!(response.status(), Some(404)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
