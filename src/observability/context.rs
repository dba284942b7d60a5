//! Trace context propagation
//!
//! A `TraceContext` names one point in a trace tree. It is a plain value:
//! callers pass it explicitly into nested work, derive children from it and
//! never mutate it in place.

use serde::{Deserialize, Serialize};

use super::ids::{generate_span_id, generate_trace_id, is_valid_span_id, is_valid_trace_id};
use crate::error::ObservabilityError;

const TRACEPARENT_VERSION: &str = "00";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    /// Trace name for the root, span name hint for children
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Knowledge base or other resource the work belongs to
    pub resource_id: Option<String>,
    /// Primary trace id assigned by the durable store
    pub db_trace_id: Option<String>,
    /// Primary span id assigned by the durable store
    pub db_span_id: Option<String>,
}

impl TraceContext {
    /// Build a root context with fresh identifiers.
    pub fn root(
        name: impl Into<String>,
        user_id: Option<String>,
        session_id: Option<String>,
        resource_id: Option<String>,
    ) -> Self {
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            parent_span_id: None,
            name: Some(name.into()),
            user_id,
            session_id,
            resource_id,
            db_trace_id: None,
            db_span_id: None,
        }
    }

    /// Derive a child context one level down the tree.
    ///
    /// The child keeps the trace id and correlation fields, gets a fresh span
    /// id and points back at this context's span.
    pub fn child_context(&self, name_hint: Option<&str>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: generate_span_id(),
            parent_span_id: Some(self.span_id.clone()),
            name: name_hint.map(str::to_string),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            resource_id: self.resource_id.clone(),
            db_trace_id: self.db_trace_id.clone(),
            db_span_id: None,
        }
    }

    #[must_use]
    pub fn with_db_trace_id(mut self, id: Option<String>) -> Self {
        self.db_trace_id = id;
        self
    }

    #[must_use]
    pub fn with_db_span_id(mut self, id: Option<String>) -> Self {
        self.db_span_id = id;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Durable-store trace id when one was assigned, else the hex trace id.
    pub fn primary_trace_id(&self) -> &str {
        self.db_trace_id.as_deref().unwrap_or(&self.trace_id)
    }

    /// Durable-store span id when one was assigned, else the hex span id.
    pub fn primary_span_id(&self) -> &str {
        self.db_span_id.as_deref().unwrap_or(&self.span_id)
    }

    /// Render as a W3C `traceparent` header value (always sampled).
    pub fn to_traceparent(&self) -> String {
        format!("{TRACEPARENT_VERSION}-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Continue a trace started by a remote caller.
    ///
    /// The returned context keeps the remote trace id, records the remote span
    /// as its parent and gets a fresh local span id.
    pub fn from_traceparent(header: &str) -> Result<Self, ObservabilityError> {
        let parts: Vec<&str> = header.trim().split('-').collect();
        let [version, trace_id, parent_id, flags] = parts.as_slice() else {
            return Err(ObservabilityError::InvalidTraceparent(
                "expected four dash-separated fields".to_string(),
            ));
        };

        if *version != TRACEPARENT_VERSION {
            return Err(ObservabilityError::InvalidTraceparent(format!(
                "unsupported version {version}"
            )));
        }
        if !is_valid_trace_id(trace_id) {
            return Err(ObservabilityError::InvalidTraceparent("bad trace id".to_string()));
        }
        if !is_valid_span_id(parent_id) {
            return Err(ObservabilityError::InvalidTraceparent("bad parent id".to_string()));
        }
        if flags.len() != 2 || !flags.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ObservabilityError::InvalidTraceparent("bad flags".to_string()));
        }

        Ok(Self {
            trace_id: trace_id.to_string(),
            span_id: generate_span_id(),
            parent_span_id: Some(parent_id.to_string()),
            name: None,
            user_id: None,
            session_id: None,
            resource_id: None,
            db_trace_id: None,
            db_span_id: None,
        })
    }
}
