//! The engine routing table: maps inbound paths to registered handlers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use openhim_mediator_core::{MediatorError, Result};
use regex::Regex;

use crate::context::EngineContext;
use crate::messages::{InboundRequest, RequestHandle};

/// A registered request handler. The engine invokes it once per routed
/// request; the handler reports progress and completion through the
/// [`RequestHandle`] and makes outbound calls through the context's
/// connectors. A returned error is converted into a 500 by the lifecycle.
#[async_trait]
pub trait MediatorRequestHandler: Send + Sync {
    async fn handle(
        &self,
        request: InboundRequest,
        handle: RequestHandle,
        ctx: Arc<EngineContext>,
    ) -> Result<()>;
}

#[derive(Clone)]
enum RouteMatcher {
    Exact,
    Pattern(Regex),
}

#[derive(Clone)]
struct Route {
    pattern: String,
    matcher: RouteMatcher,
    handler: Arc<dyn MediatorRequestHandler>,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        match &self.matcher {
            RouteMatcher::Exact => self.pattern == path,
            RouteMatcher::Pattern(regex) => regex.is_match(path),
        }
    }
}

/// An insertion-ordered routing table. Lookup is first-match-wins, with no
/// implicit priority between exact and regex entries. The pattern namespace
/// is shared: adding a pattern twice is an error even across kinds.
#[derive(Clone, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exact path, matched on string equality.
    pub fn add_route(
        &mut self,
        path: impl Into<String>,
        handler: Arc<dyn MediatorRequestHandler>,
    ) -> Result<()> {
        let path = path.into();
        self.ensure_unmapped(&path)?;
        self.routes.push(Route {
            pattern: path,
            matcher: RouteMatcher::Exact,
            handler,
        });
        Ok(())
    }

    /// Add a regex pattern, matched against the entire path (anchored).
    /// The pattern is compiled and validated here, at registration time.
    pub fn add_regex_route(
        &mut self,
        pattern: impl Into<String>,
        handler: Arc<dyn MediatorRequestHandler>,
    ) -> Result<()> {
        let pattern = pattern.into();
        self.ensure_unmapped(&pattern)?;
        let compiled = Regex::new(&format!(r"\A(?:{pattern})\z"))?;
        self.routes.push(Route {
            pattern,
            matcher: RouteMatcher::Pattern(compiled),
            handler,
        });
        Ok(())
    }

    pub fn remove_route(&mut self, pattern: &str) -> Option<Arc<dyn MediatorRequestHandler>> {
        let index = self.routes.iter().position(|route| route.pattern == pattern)?;
        Some(self.routes.remove(index).handler)
    }

    /// Find the handler for a path, searching entries in insertion order.
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn MediatorRequestHandler>> {
        self.routes
            .iter()
            .find(|route| route.matches(path))
            .map(|route| route.handler.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    fn ensure_unmapped(&self, pattern: &str) -> Result<()> {
        if self.routes.iter().any(|route| route.pattern == pattern) {
            return Err(MediatorError::duplicate_route(pattern));
        }
        Ok(())
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|route| &route.pattern))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl MediatorRequestHandler for NoopHandler {
        async fn handle(
            &self,
            _request: InboundRequest,
            _handle: RequestHandle,
            _ctx: Arc<EngineContext>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn handler() -> Arc<dyn MediatorRequestHandler> {
        Arc::new(NoopHandler)
    }

    #[test]
    fn test_exact_route_resolution() {
        let mut table = RoutingTable::new();
        let target = handler();
        table.add_route("/test", target.clone()).unwrap();

        let resolved = table.resolve("/test").unwrap();
        assert!(Arc::ptr_eq(&resolved, &target));
        assert!(table.resolve("/test/sub").is_none());
        assert!(table.resolve("/other").is_none());
    }

    #[test]
    fn test_regex_route_is_anchored() {
        let mut table = RoutingTable::new();
        table.add_regex_route("/test/.+", handler()).unwrap();

        assert!(table.resolve("/test/123").is_some());
        assert!(table.resolve("/test/").is_none());
        // a full match is required, not a substring search
        assert!(table.resolve("/prefix/test/123").is_none());
        assert!(table.resolve("/test/123/suffix").is_some()); // ".+" spans the rest
    }

    #[test]
    fn test_first_match_wins_across_interleaved_kinds() {
        let mut table = RoutingTable::new();
        let first = handler();
        let second = handler();
        let third = handler();
        table.add_regex_route("/pa.+", first.clone()).unwrap();
        table.add_route("/patients", second.clone()).unwrap();
        table.add_regex_route("/patients.*", third.clone()).unwrap();

        // the regex added first shadows the later exact entry
        let resolved = table.resolve("/patients").unwrap();
        assert!(Arc::ptr_eq(&resolved, &first));

        // insertion order decides, not entry kind
        let mut table = RoutingTable::new();
        table.add_route("/patients", second.clone()).unwrap();
        table.add_regex_route("/pa.+", first.clone()).unwrap();
        let resolved = table.resolve("/patients").unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));
    }

    #[test]
    fn test_duplicate_pattern_is_an_error() {
        let mut table = RoutingTable::new();
        table.add_route("/test", handler()).unwrap();

        match table.add_route("/test", handler()) {
            Err(MediatorError::DuplicateRoute(pattern)) => assert_eq!(pattern, "/test"),
            other => panic!("expected DuplicateRoute, got {other:?}"),
        }

        // the namespace is shared between exact and regex entries
        assert!(table.add_regex_route("/test", handler()).is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_route() {
        let mut table = RoutingTable::new();
        table.add_route("/test", handler()).unwrap();

        assert!(table.remove_route("/test").is_some());
        assert!(table.resolve("/test").is_none());
        assert!(table.remove_route("/test").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_invalid_regex_is_a_configuration_error() {
        let mut table = RoutingTable::new();
        let err = table.add_regex_route("/unclosed[", handler()).unwrap_err();
        assert!(err.is_fatal());
        assert!(table.is_empty());
    }
}
