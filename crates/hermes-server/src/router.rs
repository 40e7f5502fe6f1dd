//! Route table.
//!
//! A small segment matcher: literal segments must match exactly, `{name}`
//! segments capture a parameter. Routes resolve to operation IDs that the
//! orchestrator's dispatcher handles.

use std::collections::HashMap;

use http::Method;

/// One registered route.
struct Route {
    method: Method,
    segments: Vec<Segment>,
    operation: &'static str,
}

enum Segment {
    Literal(String),
    Param(String),
}

/// The result of a successful route match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The operation to invoke.
    pub operation: &'static str,
    /// Captured path parameters.
    pub params: HashMap<String, String>,
}

/// Method- and path-based route table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the control plane's route table.
    #[must_use]
    pub fn control_plane() -> Self {
        let mut router = Self::new();
        router.add_route(Method::GET, "/health", "health");
        router.add_route(Method::GET, "/middleware/status", "middlewareStatus");
        router.add_route(Method::GET, "/middleware/config", "getMiddlewareConfig");
        router.add_route(Method::PUT, "/middleware/config", "updateMiddlewareConfig");
        router.add_route(Method::POST, "/auth/login", "login");
        router.add_route(Method::POST, "/auth/logout", "logout");
        router.add_route(Method::POST, "/auth/refresh", "refresh");
        router.add_route(Method::GET, "/agents/{id}/status", "agentStatus");
        router.add_route(Method::POST, "/agents/{id}/messages", "sendAgentMessage");
        router
    }

    /// Registers a route pattern for an operation.
    pub fn add_route(&mut self, method: Method, pattern: &str, operation: &'static str) {
        let segments = pattern
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| {
                if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();

        self.routes.push(Route {
            method,
            segments,
            operation,
        });
    }

    /// Matches a request against the table.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let parts: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        'routes: for route in &self.routes {
            if route.method != *method || route.segments.len() != parts.len() {
                continue;
            }

            let mut params = HashMap::new();
            for (segment, part) in route.segments.iter().zip(&parts) {
                match segment {
                    Segment::Literal(literal) if literal == part => {}
                    Segment::Literal(_) => continue 'routes,
                    Segment::Param(name) => {
                        params.insert(name.clone(), (*part).to_string());
                    }
                }
            }

            return Some(RouteMatch {
                operation: route.operation,
                params,
            });
        }
        None
    }
}
