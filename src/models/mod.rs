//! Data models for the routing core.
//!
//! This module groups the typed records flowing through the pipeline:
//! - `request`: ingress request, caller hints, attachments.
//! - `response`: routed response, token usage, stats projection.
//! - `classification`: domain/task/complexity/priority enums and the
//!   classifier output record.
//! - `catalog`: model entries with capabilities, pricing, performance and
//!   availability, plus composite health scoring.
//! - `metrics`: terminal outcomes and per-request metrics.

pub mod catalog;
pub mod classification;
pub mod metrics;
pub mod request;
pub mod response;

// Optional convenience re-exports for downstream users.
// These allow importing commonly-used types directly from `modelgate::models::*`.
pub use catalog::{
    AvailabilityStatus, Capability, HealthScore, Model, ModelAvailability, ModelPerformance,
    ModelPricing, PricingSourceKind, Trend,
};
pub use classification::{Classification, Complexity, Domain, Priority, TaskType};
pub use metrics::{Outcome, RequestMetric};
pub use request::{Attachment, AttachmentKind, RequestHints, RouteRequest};
pub use response::{ResponseMetadata, RouteResponse, RouteStats, TokenUsage};
