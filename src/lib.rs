//! tracewarden: a behavioral-assurance engine for distributed traces.
//!
//! Ingests OpenTelemetry spans ([`span`]), groups them into traces and
//! detects completion ([`buffer`], [`trace_fsm`]), compiles a
//! `when`/`always`/`never` rule DSL ([`dsl`]) into an executable form
//! against a concurrent rule catalog ([`registry`], [`rule`]), evaluates
//! completed traces ([`evaluator`], [`sandbox`]), and signs + stores the
//! resulting violations ([`violation`]). [`engine`] wires all of the above
//! behind a single facade; [`config`] carries its tunables.

pub mod attribute;
pub mod buffer;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod registry;
pub mod rule;
pub mod sandbox;
pub mod span;
pub mod trace;
pub mod trace_fsm;
pub mod violation;

pub use config::{Configuration, ConfigurationBuilder};
pub use engine::Engine;
pub use error::{EngineError, IngestError, ParseError, Position, ValidationError};
pub use rule::{Rule, RuleSummary, Severity};
pub use span::{Kind, Span, SpanBuilder, SpanId, Status, Timestamp, TraceId};
pub use violation::{HmacSigner, Signer, Violation, ViolationFilter};
