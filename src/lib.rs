#![forbid(unsafe_code)]
#![doc = r#"
Modelgate

Policy-driven LLM request router: accepts text-generation requests on behalf
of internal callers and dispatches each to one of several upstream model
providers under quality, latency, cost, and safety constraints.

Crate highlights
- Library: the routing pipeline (`pipeline::RoutePipeline`) and its
  subsystems are plain constructor-injected components usable without the
  HTTP surface.
- HTTP server (in `server`): `POST /v1/route` plus stats, catalog, and
  health endpoints.
- Upstreams: a single adapter contract (`upstream::Upstream`) regardless of
  provider, with an OpenAI-compatible HTTP adapter and a scriptable mock.

Modules
- `models`: Typed records flowing through the pipeline.
- `classifier`: Rule tier plus optional semantic tier.
- `guard`: Prompt-injection defence and response validation.
- `cache`: Bounded response cache with similarity lookup.
- `circuit`: Per-key circuit breaker.
- `predictor`: Statistical performance prediction and health scoring.
- `policy`: Deterministic candidate selection.
- `pipeline`: Per-request orchestration.
- `catalog`: Model catalog with pluggable discovery and pricing.
- `feedback`: Background refresh loops.
- `server`: Axum router/handlers (the binary uses this).
- `util`: Shared helpers (tracing, env, CORS).
"#]

pub mod cache;
pub mod catalog;
pub mod circuit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod feedback;
pub mod guard;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod predictor;
pub mod server;
pub mod upstream;
pub mod util;

// Re-export the primary types for ergonomic library use.
pub use crate::error::RouteError;
pub use crate::pipeline::RoutePipeline;

// Re-export model namespaces for convenience (downstream users can do
// `use modelgate::models::RouteRequest`).
pub use crate::models::{Classification, RouteRequest, RouteResponse};
