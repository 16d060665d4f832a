//! Trace records and filter composition
//!
//! `Trace` is an immutable singly-linked record of the path a request
//! took through composed filters, used only for logging and diagnosis,
//! never for control flow. `Chain` is the composable base filter: own
//! handling logic plus an optional fallback. `Branch` splits on a
//! predicate.

use super::{Filter, FilterError, Handler, Outcome, Verdict};
use crate::http::body::Response;
use crate::http::driver::Request;
use crate::state::ConnectionState;
use std::fmt;
use std::sync::{Arc, Once};

/// One filter's participation in handling a request
///
/// Populated once when the invocation returns and never mutated after.
#[derive(Debug)]
pub struct TraceLink {
    name: String,
    verdict: Verdict,
    prev: Option<Arc<TraceLink>>,
}

impl TraceLink {
    /// Name of the filter that produced this link
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outcome(&self) -> Outcome {
        self.verdict.outcome
    }

    /// The captured error, if handling failed
    pub fn error(&self) -> Option<&FilterError> {
        self.verdict.error.as_ref()
    }
}

/// The trace of one request through the filter chain
///
/// Cloning is cheap; links are shared. An empty trace means no filter
/// has run yet.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    last: Option<Arc<TraceLink>>,
}

impl Trace {
    /// An empty trace
    pub fn root() -> Self {
        Trace { last: None }
    }

    /// Extend the trace with one link
    pub fn record(self, name: impl Into<String>, verdict: Verdict) -> Trace {
        Trace {
            last: Some(Arc::new(TraceLink {
                name: name.into(),
                verdict,
                prev: self.last,
            })),
        }
    }

    /// The innermost link - the filter that produced (or failed to
    /// produce) the response
    pub fn last(&self) -> Option<&TraceLink> {
        self.last.as_deref()
    }

    /// Outcome of the innermost link
    pub fn outcome(&self) -> Option<Outcome> {
        self.last().map(TraceLink::outcome)
    }

    /// Whether any filter reported `Handled`
    pub fn handled(&self) -> bool {
        self.links().iter().any(|l| l.outcome() == Outcome::Handled)
    }

    /// Links ordered from the outermost filter to the innermost
    pub fn links(&self) -> Vec<&TraceLink> {
        let mut out = Vec::new();
        let mut cur = self.last.as_deref();
        while let Some(link) = cur {
            out.push(link);
            cur = link.prev.as_deref();
        }
        out.reverse();
        out
    }

    /// Number of links
    pub fn len(&self) -> usize {
        self.links().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// First error found walking from the outermost link inward
    pub fn primary_error(&self) -> Option<&FilterError> {
        self.links().into_iter().find_map(|l| l.error())
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for link in self.links() {
            if !first {
                write!(f, " > ")?;
            }
            write!(f, "{}:{}", link.name(), link.outcome())?;
            first = false;
        }
        Ok(())
    }
}

/// The composable base filter: handling logic plus optional fallback
///
/// If the logic handles the request the link reads `Handled`; if it
/// declines and a fallback is configured the link reads `Delegated` and
/// the fallback runs; declining with no fallback reads `Unhandled`. A
/// failing handler is recorded `Failed` with its error - the error does
/// not propagate further.
pub struct Chain<H: Handler> {
    name: String,
    handler: H,
    next: Option<Arc<dyn Filter>>,
    closed: Once,
}

impl<H: Handler> Chain<H> {
    /// A leaf filter with no fallback
    pub fn new(name: impl Into<String>, handler: H) -> Self {
        Chain {
            name: name.into(),
            handler,
            next: None,
            closed: Once::new(),
        }
    }

    /// Configure the fallback run when this filter declines
    pub fn with_fallback(mut self, next: Arc<dyn Filter>) -> Self {
        self.next = Some(next);
        self
    }
}

impl<H: Handler> Filter for Chain<H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        trace: Trace,
        req: &mut Request,
        resp: &mut Response<'_>,
        state: &mut ConnectionState,
    ) -> Trace {
        match self.handler.handle(req, resp, state) {
            Ok(true) => trace.record(self.name.as_str(), Verdict::handled()),
            Ok(false) => match &self.next {
                Some(next) => {
                    let trace = trace.record(self.name.as_str(), Verdict::delegated());
                    next.invoke(trace, req, resp, state)
                }
                None => trace.record(self.name.as_str(), Verdict::unhandled()),
            },
            Err(e) => trace.record(self.name.as_str(), Verdict::failed(e)),
        }
    }

    fn close(&self) {
        self.closed.call_once(|| {
            if let Some(next) = &self.next {
                next.close();
            }
        });
    }
}

/// Predicate branch: route to one of two sub-filters
pub struct Branch<P> {
    name: String,
    predicate: P,
    when_true: Arc<dyn Filter>,
    when_false: Arc<dyn Filter>,
    closed: Once,
}

impl<P> Branch<P>
where
    P: Fn(&Request, &ConnectionState) -> bool + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        predicate: P,
        when_true: Arc<dyn Filter>,
        when_false: Arc<dyn Filter>,
    ) -> Self {
        Branch {
            name: name.into(),
            predicate,
            when_true,
            when_false,
            closed: Once::new(),
        }
    }
}

impl<P> Filter for Branch<P>
where
    P: Fn(&Request, &ConnectionState) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        trace: Trace,
        req: &mut Request,
        resp: &mut Response<'_>,
        state: &mut ConnectionState,
    ) -> Trace {
        let pick = if (self.predicate)(req, state) {
            &self.when_true
        } else {
            &self.when_false
        };
        let trace = trace.record(self.name.as_str(), Verdict::delegated());
        pick.invoke(trace, req, resp, state)
    }

    fn close(&self) {
        self.closed.call_once(|| {
            self.when_true.close();
            self.when_false.close();
        });
    }
}
