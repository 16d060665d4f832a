//! Composable request handling
//!
//! A filter is the unit of request handling: it may fully handle a
//! request, decline it, or fail. Filters compose by wrapping - a chain
//! link holds an optional fallback, a branch picks a sub-filter by
//! predicate, a router dispatches on the path - and every invocation
//! appends one immutable link to the request's trace.
//!
//! Failure never crosses the filter boundary as an unwind or an `Err`
//! bubbling up the chain: the runner records it in the trace link and
//! the caller inspects `Trace::primary_error`.

pub mod chain;
pub mod router;

pub use chain::{Branch, Chain, Trace, TraceLink};
pub use router::Router;

use crate::http::body::Response;
use crate::http::driver::Request;
use crate::state::ConnectionState;
use std::fmt;

/// Boxed error type carried through trace links
pub type FilterError = Box<dyn std::error::Error + Send + Sync>;

/// A leaf filter in function form
pub type FilterFn<H> = Chain<H>;

/// What one filter invocation did with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The filter produced (or committed to producing) the response
    Handled,
    /// The filter declined and had no onward filter
    Unhandled,
    /// The filter declined and passed the request onward
    Delegated,
    /// Handling failed; the error is captured in the trace link
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Handled => "handled",
            Outcome::Unhandled => "unhandled",
            Outcome::Delegated => "delegated",
            Outcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Outcome plus optional error: the explicit result of one invocation
///
/// "Failed but the response pipeline continues" is a first-class value
/// here, not a suppressed exception.
#[derive(Debug)]
pub struct Verdict {
    pub outcome: Outcome,
    pub error: Option<FilterError>,
}

impl Verdict {
    pub fn handled() -> Self {
        Verdict { outcome: Outcome::Handled, error: None }
    }

    pub fn unhandled() -> Self {
        Verdict { outcome: Outcome::Unhandled, error: None }
    }

    pub fn delegated() -> Self {
        Verdict { outcome: Outcome::Delegated, error: None }
    }

    pub fn failed(error: FilterError) -> Self {
        Verdict { outcome: Outcome::Failed, error: Some(error) }
    }
}

/// The handling logic of a leaf filter
///
/// `Ok(true)` means the request was fully handled, `Ok(false)` declines
/// it, `Err` is captured at the filter boundary. Implemented for any
/// matching closure.
pub trait Handler: Send + Sync {
    fn handle(
        &self,
        req: &mut Request,
        resp: &mut Response<'_>,
        state: &mut ConnectionState,
    ) -> Result<bool, FilterError>;
}

impl<F> Handler for F
where
    F: Fn(&mut Request, &mut Response<'_>, &mut ConnectionState) -> Result<bool, FilterError>
        + Send
        + Sync,
{
    fn handle(
        &self,
        req: &mut Request,
        resp: &mut Response<'_>,
        state: &mut ConnectionState,
    ) -> Result<bool, FilterError> {
        self(req, resp, state)
    }
}

/// A composable request filter
///
/// `invoke` receives the trace so far and returns it extended with the
/// links this filter (and anything it delegated to) produced. Composite
/// filters thread the trace through their children; leaves append
/// exactly one link.
pub trait Filter: Send + Sync {
    /// Name recorded in trace links
    fn name(&self) -> &str;

    /// Handle the request, extending the trace
    fn invoke(
        &self,
        trace: Trace,
        req: &mut Request,
        resp: &mut Response<'_>,
        state: &mut ConnectionState,
    ) -> Trace;

    /// Release resources; called exactly once at shutdown
    ///
    /// Composites forward the close to their children. Errors during
    /// close must be swallowed, never surfaced.
    fn close(&self) {}
}
