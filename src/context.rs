//! Request-scoped context
//!
//! Every inbound request gets one `RequestContext`, bound to the request's
//! task with a tokio task-local. Code running inside the request can read or
//! enrich it through the free functions below without threading it through
//! every signature. The binding lives exactly as long as the scoped future:
//! it is released when the future completes, panics, or is dropped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Handle to the state of one in-flight request. Clones share the same state.
#[derive(Clone, Debug)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    request_id: String,
    user_id: Option<String>,
    start_time: Instant,
    started_at: DateTime<Utc>,
    metadata: Mutex<Map<String, Value>>,
}

impl RequestContext {
    /// Allocate a context, minting a request id when none is supplied
    pub fn begin(request_id: Option<String>, user_id: Option<String>) -> Self {
        let request_id = request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            inner: Arc::new(ContextInner {
                request_id,
                user_id,
                start_time: Instant::now(),
                started_at: Utc::now(),
                metadata: Mutex::new(Map::new()),
            }),
        }
    }

    /// Run `fut` with this context bound as the current one
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// Synchronous counterpart of [`RequestContext::scope`]
    #[cfg(test)]
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self, f)
    }

    /// Context bound to the running task, if any
    pub fn current() -> Option<Self> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.inner.user_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn duration_ms(&self) -> f64 {
        self.inner.start_time.elapsed().as_secs_f64() * 1000.0
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.metadata.lock().insert(key.into(), value.into());
    }

    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.inner.metadata.lock().get(key).cloned()
    }

    /// Copy of the metadata map
    pub fn all_metadata(&self) -> Map<String, Value> {
        self.inner.metadata.lock().clone()
    }

    /// Fields attached to structured log records for this request
    pub fn context_fields(&self) -> Value {
        serde_json::json!({
            "request_id": self.request_id(),
            "user_id": self.user_id(),
            "started_at": self.started_at().to_rfc3339(),
            "duration_ms": self.duration_ms(),
            "metadata": Value::Object(self.all_metadata()),
        })
    }
}

pub fn current_request_id() -> Option<String> {
    CURRENT
        .try_with(|ctx| ctx.request_id().to_string())
        .ok()
}

pub fn current_user_id() -> Option<String> {
    CURRENT
        .try_with(|ctx| ctx.user_id().map(str::to_string))
        .ok()
        .flatten()
}

/// No-op when no context is bound
pub fn set_metadata(key: impl Into<String>, value: impl Into<Value>) {
    let _ = CURRENT.try_with(|ctx| ctx.set_metadata(key, value));
}

pub fn get_metadata(key: &str, default: Value) -> Value {
    CURRENT
        .try_with(|ctx| ctx.get_metadata(key))
        .ok()
        .flatten()
        .unwrap_or(default)
}

pub fn get_all_metadata() -> Map<String, Value> {
    CURRENT
        .try_with(|ctx| ctx.all_metadata())
        .unwrap_or_default()
}

pub fn duration_ms() -> f64 {
    CURRENT.try_with(|ctx| ctx.duration_ms()).unwrap_or(0.0)
}
