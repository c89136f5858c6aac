//! Client-side HTTP request pipeline with HAL service discovery.
//!
//! # Overview
//! Callers describe an endpoint as an [`ApiDefinition`] (method, path,
//! encoding, authentication) and hand it to a [`ServiceProvider`], which
//! resolves it to a URL, maps it to an [`HttpRequest`], runs it through the
//! plugin chain and an injected [`Executor`], and decodes the response.
//!
//! Endpoints can also be named symbolically. A HAL definition carries a
//! relation name such as `account:x`; the [`HalTargetResolver`] looks the
//! name up in a [`ServiceDiscovery`] document fetched from the API root and
//! expands the URI template it finds there.
//!
//! # Design
//! - The pipeline owns no I/O. Transport, target resolution, request
//!   mapping, completion and parsing are all traits with default
//!   implementations, injected through [`ServiceProviderBuilder`].
//! - Every failure is a typed [`ServiceError`] delivered through the
//!   request's result. Each call produces exactly one result, however many
//!   attempts its completion strategy asks for.
//! - Discovery is an explicitly constructed `Arc<ServiceDiscovery>`; several
//!   environments can coexist in one process.

pub mod api;
pub mod cancel;
pub mod completion;
pub mod discovery;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod hal;
pub mod http;
pub mod parser;
pub mod plugin;
pub mod provider;
pub mod stub;
pub mod target;
pub mod template;

pub use api::{ApiDefinition, AuthenticationStrategy, EncodingStrategy, JsonEncoder, Payload};
pub use cancel::ServiceCancellable;
pub use completion::{CompletionDecision, CompletionStrategy, ProceedStrategy};
pub use discovery::{DiscoveryConfig, DiscoveryState, ServiceDiscovery};
pub use error::{DiscoveryError, ParsingError, ServiceError, TemplateError, TransportError};
pub use executor::{Executor, TransportOutcome, UreqExecutor};
pub use hal::{EntityResolution, HalTargetResolver, NamedEntity, UriEntity};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use parser::{JsonResponseParser, ResponseParser};
pub use plugin::{AuthenticationPlugin, LoggingPlugin, ServicePlugin};
pub use provider::{DataResponse, DataResult, ParsedResponse, ServiceProvider, ServiceProviderBuilder, ServiceTask};
pub use stub::{StubResponse, StubStrategy};
pub use target::{ApiTarget, DefaultRequestMapper, DefaultTargetResolver, RequestMapper, TargetResolver};
pub use template::UriTemplate;
