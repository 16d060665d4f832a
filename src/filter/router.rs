//! Path dispatch with copy-on-write tables
//!
//! Routes a request to a sub-filter by exact path first, then by the
//! longest registered prefix. The dispatch table is an immutable
//! snapshot behind an atomic swap: registration clones the current
//! table, inserts, and publishes the replacement - concurrent readers
//! never observe a partially-updated table.

use super::{Filter, Trace, Verdict};
use crate::http::body::Response;
use crate::http::driver::Request;
use crate::state::ConnectionState;
use arc_swap::ArcSwap;
use std::sync::{Arc, Once};

#[derive(Default)]
struct RouteTable {
    exact: Vec<(String, Arc<dyn Filter>)>,
    /// Sorted longest-first, then lexicographic, so the first match is
    /// the deterministic winner
    prefixes: Vec<(String, Arc<dyn Filter>)>,
}

impl RouteTable {
    fn clone_contents(&self) -> RouteTable {
        RouteTable {
            exact: self.exact.clone(),
            prefixes: self.prefixes.clone(),
        }
    }

    fn lookup(&self, path: &str) -> Option<&Arc<dyn Filter>> {
        if let Some((_, filter)) = self.exact.iter().find(|(p, _)| p == path) {
            return Some(filter);
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, filter)| filter)
    }
}

/// Path-dispatching composite filter
pub struct Router {
    name: String,
    table: ArcSwap<RouteTable>,
    closed: Once,
}

impl Router {
    pub fn new(name: impl Into<String>) -> Self {
        Router {
            name: name.into(),
            table: ArcSwap::from_pointee(RouteTable::default()),
            closed: Once::new(),
        }
    }

    /// Register a filter for an exact path
    ///
    /// Publishes a fresh table snapshot; a previous registration for the
    /// same path is replaced.
    pub fn route(&self, path: impl Into<String>, filter: Arc<dyn Filter>) {
        let path = path.into();
        let mut next = self.table.load().clone_contents();
        next.exact.retain(|(p, _)| *p != path);
        next.exact.push((path, filter));
        self.table.store(Arc::new(next));
    }

    /// Register a filter for a path prefix
    ///
    /// Longest prefix wins at dispatch; ties between equal-length
    /// prefixes cannot arise (same prefix replaces) and distinct
    /// prefixes order lexicographically.
    pub fn route_prefix(&self, prefix: impl Into<String>, filter: Arc<dyn Filter>) {
        let prefix = prefix.into();
        let mut next = self.table.load().clone_contents();
        next.prefixes.retain(|(p, _)| *p != prefix);
        next.prefixes.push((prefix, filter));
        next.prefixes
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self.table.store(Arc::new(next));
    }
}

impl Filter for Router {
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
        let table = self.table.load();
        match table.lookup(req.head().path()) {
            Some(filter) => {
                let filter = Arc::clone(filter);
                let trace = trace.record(self.name.as_str(), Verdict::delegated());
                filter.invoke(trace, req, resp, state)
            }
            None => trace.record(self.name.as_str(), Verdict::unhandled()),
        }
    }

    fn close(&self) {
        self.closed.call_once(|| {
            let table = self.table.load();
            for (_, filter) in table.exact.iter().chain(table.prefixes.iter()) {
                filter.close();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Chain, FilterError, Outcome};
    use crate::http::message::{Method, ResponseHead, Version};
    use crate::http::session::{Conduit, FdSessionOps};
    use crate::http::Headers;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    fn conduit() -> (Conduit, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        (
            Conduit::new(
                Box::new(FdSessionOps::new(accepted)),
                Some(Duration::from_secs(2)),
            ),
            client,
        )
    }

    fn request(path: &str) -> Request {
        let mut head = crate::http::RequestHead::new();
        head.populate(Method::Get, path.to_string(), Version::Http11, Headers::new());
        Request::new(head, bytes::Bytes::new(), "127.0.0.1:1234".parse().unwrap(), 80, false)
    }

    fn tag(name: &'static str) -> Arc<dyn Filter> {
        Arc::new(Chain::new(
            name,
            move |_req: &mut Request,
                  _resp: &mut Response<'_>,
                  state: &mut ConnectionState|
                  -> Result<bool, FilterError> {
                state.put("hit", name.to_string());
                Ok(true)
            },
        ))
    }

    fn dispatch(router: &Router, path: &str) -> (Trace, Option<String>) {
        let (mut conduit, _client) = conduit();
        let mut head = ResponseHead::new();
        let mut resp = Response::new(&mut conduit, &mut head, Version::Http11, false);
        let mut req = request(path);
        let mut state = ConnectionState::new();

        let trace = router.invoke(Trace::root(), &mut req, &mut resp, &mut state);
        let hit = state.get::<String>("hit").cloned();
        (trace, hit)
    }

    #[test]
    fn test_exact_beats_prefix() {
        let router = Router::new("router");
        router.route_prefix("/static/", tag("prefix"));
        router.route("/static/exact", tag("exact"));

        let (_, hit) = dispatch(&router, "/static/exact");
        assert_eq!(hit.as_deref(), Some("exact"));

        let (_, hit) = dispatch(&router, "/static/other");
        assert_eq!(hit.as_deref(), Some("prefix"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = Router::new("router");
        router.route_prefix("/api/", tag("api"));
        router.route_prefix("/api/v2/", tag("v2"));

        let (_, hit) = dispatch(&router, "/api/v2/users");
        assert_eq!(hit.as_deref(), Some("v2"));

        let (_, hit) = dispatch(&router, "/api/v1/users");
        assert_eq!(hit.as_deref(), Some("api"));
    }

    #[test]
    fn test_miss_is_unhandled() {
        let router = Router::new("router");
        router.route("/only", tag("only"));

        let (trace, hit) = dispatch(&router, "/elsewhere");
        assert_eq!(hit, None);
        assert_eq!(trace.outcome(), Some(Outcome::Unhandled));
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn test_trace_shows_delegation() {
        let router = Router::new("router");
        router.route("/x", tag("leaf"));

        let (trace, _) = dispatch(&router, "/x");
        let links = trace.links();
        assert_eq!((links[0].name(), links[0].outcome()), ("router", Outcome::Delegated));
        assert_eq!((links[1].name(), links[1].outcome()), ("leaf", Outcome::Handled));
    }

    #[test]
    fn test_registration_replaces() {
        let router = Router::new("router");
        router.route("/x", tag("old"));
        router.route("/x", tag("new"));

        let (_, hit) = dispatch(&router, "/x");
        assert_eq!(hit.as_deref(), Some("new"));
    }

    #[test]
    fn test_runtime_registration_is_visible() {
        let router = Router::new("router");
        let (trace, _) = dispatch(&router, "/late");
        assert_eq!(trace.outcome(), Some(Outcome::Unhandled));

        router.route("/late", tag("late"));
        let (_, hit) = dispatch(&router, "/late");
        assert_eq!(hit.as_deref(), Some("late"));
    }
}
