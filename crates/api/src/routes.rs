//! Route registration with a per-route authorization flag.

use std::collections::HashSet;

use axum::Router;
use axum::routing::MethodRouter;

use crate::gate::ExemptRoutes;

/// Whether the authorization gate checks a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Requires resource/action headers and a granting permission.
    Protected,
    /// Skips the permission check. Handlers may still require a session.
    Exempt,
}

/// Router builder that records each route's [`Access`] at registration.
pub struct RouteRegistry<S> {
    router: Router<S>,
    exempt: HashSet<String>,
}

impl<S> Default for RouteRegistry<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            router: Router::new(),
            exempt: HashSet::new(),
        }
    }
}

impl<S> RouteRegistry<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: &str, method_router: MethodRouter<S>, access: Access) -> Self {
        if access == Access::Exempt {
            self.exempt.insert(path.to_string());
        }
        self.router = self.router.route(path, method_router);
        self
    }

    pub fn into_parts(self) -> (Router<S>, ExemptRoutes) {
        (self.router, ExemptRoutes::new(self.exempt))
    }
}
