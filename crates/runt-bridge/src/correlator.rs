//! Routing of kernel events by correlation id.
//!
//! Every request the bridge sends is registered here under the id the kernel
//! will echo back. Events for ids that are not (or no longer) registered are
//! stale and get dropped.

use std::collections::HashMap;

use crate::side_query::SideQuery;

/// Where events for a correlation id go.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// The active cell execution: output is forwarded live and persisted.
    Primary,
    /// A side query: a single payload is decoded into an editor event.
    Side(SideQuery),
    /// Bridge-internal execution (working directory, plot backend): consumed.
    Housekeeping,
}

impl Route {
    /// Whether the kernel's idle status ends this route.
    ///
    /// Inspect replies arrive on the shell channel, independently of the
    /// broadcast idle, so those routes end with their reply instead.
    pub fn ends_on_idle(&self) -> bool {
        match self {
            Route::Side(query) => !query.ends_on_reply(),
            Route::Primary | Route::Housekeeping => true,
        }
    }
}

/// Dispatch table from correlation id to route.
#[derive(Debug, Default)]
pub struct Correlator {
    routes: HashMap<String, Route>,
    /// At most one primary route exists at a time.
    primary: Option<String>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the active execution. A previous primary route, if any, is
    /// retired so its late events are treated as stale.
    pub fn register_primary(&mut self, correlation_id: &str) {
        if let Some(previous) = self.primary.replace(correlation_id.to_string()) {
            self.routes.remove(&previous);
        }
        self.routes.insert(correlation_id.to_string(), Route::Primary);
    }

    pub fn register_side(&mut self, correlation_id: &str, query: SideQuery) {
        self.routes.insert(correlation_id.to_string(), Route::Side(query));
    }

    pub fn register_housekeeping(&mut self, correlation_id: &str) {
        self.routes.insert(correlation_id.to_string(), Route::Housekeeping);
    }

    pub fn route(&self, correlation_id: &str) -> Option<&Route> {
        self.routes.get(correlation_id)
    }

    pub fn primary(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    /// Remove a route. Later events for the id are stale.
    pub fn release(&mut self, correlation_id: &str) -> Option<Route> {
        if self.primary.as_deref() == Some(correlation_id) {
            self.primary = None;
        }
        self.routes.remove(correlation_id)
    }

    /// Number of outstanding routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::side_query::SideQueryKind;

    #[test]
    fn test_unknown_ids_have_no_route() {
        let correlator = Correlator::new();
        assert!(correlator.route("m1").is_none());
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_primary_replaces_previous() {
        let mut correlator = Correlator::new();
        correlator.register_primary("m1");
        correlator.register_primary("m2");

        assert_eq!(correlator.primary(), Some("m2"));
        assert!(correlator.route("m1").is_none());
        assert_eq!(correlator.route("m2"), Some(&Route::Primary));
    }

    #[test]
    fn test_side_routes_coexist_with_primary() {
        let mut correlator = Correlator::new();
        correlator.register_primary("m1");
        correlator.register_side("s1", SideQuery::new(SideQueryKind::Variables, None));
        correlator.register_side("s2", SideQuery::new(SideQueryKind::Peek, Some("df".into())));

        assert_eq!(correlator.len(), 3);
        assert!(matches!(correlator.route("s2"), Some(Route::Side(q)) if q.kind == SideQueryKind::Peek));
    }

    #[test]
    fn test_release_makes_events_stale() {
        let mut correlator = Correlator::new();
        correlator.register_primary("m1");

        assert_eq!(correlator.release("m1"), Some(Route::Primary));
        assert!(correlator.primary().is_none());
        assert!(correlator.route("m1").is_none());
        assert_eq!(correlator.release("m1"), None);
    }

    #[test]
    fn test_idle_policy() {
        assert!(Route::Primary.ends_on_idle());
        assert!(Route::Housekeeping.ends_on_idle());
        assert!(Route::Side(SideQuery::new(SideQueryKind::Dataframe, Some("df".into()))).ends_on_idle());
        assert!(!Route::Side(SideQuery::new(SideQueryKind::Inspect, Some("x".into()))).ends_on_idle());
    }
}
