//! Span contract consumed by the telemetry components.
//!
//! The runtime never talks to a tracing backend directly; it goes through
//! [`SpanTracer`]/[`SpanHandle`], keeping the backend swappable (OpenTelemetry
//! in production, a recorder in tests). All operations are infallible:
//! failures stay inside the implementation so telemetry can never take down
//! the data path.

use std::fmt;
use std::sync::Arc;

/// Attribute value accepted by spans.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    I64(i64),
    Bool(bool),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        Self::I64(value as i64)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Handle to a live tracing span.
///
/// Ending a span twice is tolerated; implementations ignore the second call.
pub trait SpanHandle: Send + Sync {
    fn set_attribute(&self, key: &'static str, value: AttrValue);

    fn add_event(&self, name: &'static str, attributes: Vec<(&'static str, AttrValue)>);

    fn end(&self);

    /// Backend downcast hook, used for parent linkage. Wrappers forward this
    /// to the span they wrap.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared reference to a span. The span's lifetime (start/end) is owned by
/// whichever component created it; clones only share the handle.
pub type SpanRef = Arc<dyn SpanHandle>;

/// Identity comparison of span handles: same allocation, not same content.
pub fn same_span(a: &SpanRef, b: &SpanRef) -> bool {
    // Compare data pointers only; the vtable half of the fat pointer is not
    // stable across codegen units.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Creates spans and exposes the backend's ambient active span.
pub trait SpanTracer: Send + Sync {
    /// Start a span, optionally parented to `parent`. Creation is synchronous
    /// and never suspends.
    fn start_span(
        &self,
        name: &str,
        attributes: Vec<(&'static str, AttrValue)>,
        parent: Option<&SpanRef>,
    ) -> SpanRef;

    /// The span the surrounding execution context considers current, if any.
    /// Used only as a last-resort parent.
    fn active_span(&self) -> Option<SpanRef>;
}

/// One step in a parent-span lookup.
pub type ParentResolver = Arc<dyn Fn() -> Option<SpanRef> + Send + Sync>;

/// Ordered parent-span resolution.
///
/// An explicit list of resolver functions evaluated front to back;
/// [`resolve`](Self::resolve) returns the first hit. Precedence is therefore a
/// property of construction and can be exercised in isolation.
#[derive(Clone, Default)]
pub struct ParentResolvers {
    resolvers: Vec<ParentResolver>,
}

impl ParentResolvers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver, builder-style.
    pub fn with(mut self, resolver: impl Fn() -> Option<SpanRef> + Send + Sync + 'static) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Append an already-boxed resolver.
    pub fn push(&mut self, resolver: ParentResolver) {
        self.resolvers.push(resolver);
    }

    /// First non-empty result, front to back.
    pub fn resolve(&self) -> Option<SpanRef> {
        self.resolvers.iter().find_map(|resolver| resolver())
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl fmt::Debug for ParentResolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentResolvers")
            .field("len", &self.resolvers.len())
            .finish()
    }
}
