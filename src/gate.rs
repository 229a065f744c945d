//! Navigation gate: route access policy and the redirect driver.
//!
//! DESIGN
//! ======
//! [`RoutePolicy::decide`] is a pure function of (phase, route, splash flag).
//! [`NavigationGate`] keeps the last known inputs and turns decisions into
//! at most one redirect per input change. It never redirects to where the
//! host already is, and never repeats a redirect the host has not yet
//! acknowledged with a route change (unless the phase changed in between),
//! so policy re-evaluation cannot loop.
//!
//! Until hydration resolves the phase, only the root is allowed; every other
//! route is held (the host renders a neutral loading state).

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::session::{Phase, SessionManager};

pub const DEFAULT_AUTH_GROUP: &str = "(auth)";
pub const DEFAULT_TABS_GROUP: &str = "(tabs)";
pub const DEFAULT_HOME_TAB: &str = "home";
pub const DEFAULT_GUEST_ROUTE: &str = "generate-guest";
pub const DEFAULT_GUEST_TABS: [&str; 2] = ["generate", "explore"];

// =============================================================================
// ROUTES
// =============================================================================

/// Active screen group: `(primary, secondary)`. Root when `primary` is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RouteLocation {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

impl RouteLocation {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn at(primary: &str, secondary: Option<&str>) -> Self {
        Self::from_segments(primary, secondary.unwrap_or(""))
    }

    /// Build from raw segments. Empty segments are absent, and a secondary
    /// segment without a primary one is dropped.
    #[must_use]
    pub fn from_segments(primary: &str, secondary: &str) -> Self {
        let primary = non_empty(primary);
        let secondary = primary.as_ref().and_then(|_| non_empty(secondary));
        Self { primary, secondary }
    }

    /// Parse a `/`-separated path such as `/(tabs)/home`. Segments past the
    /// second are ignored.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let mut segments = path.split('/').map(str::trim).filter(|s| !s.is_empty());
        let primary = segments.next().unwrap_or("");
        let secondary = segments.next().unwrap_or("");
        Self::from_segments(primary, secondary)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.primary.is_none()
    }
}

impl fmt::Display for RouteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.primary, &self.secondary) {
            (None, _) => f.write_str("/"),
            (Some(p), None) => write!(f, "/{p}"),
            (Some(p), Some(s)) => write!(f, "/{p}/{s}"),
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// What the host should do with the current route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Allow,
    /// Phase not resolved yet; render a loading state, do not navigate.
    Hold,
    Redirect(RouteLocation),
}

// =============================================================================
// POLICY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub auth_group: String,
    pub tabs_group: String,
    pub home_tab: String,
    pub guest_route: String,
    pub guest_tabs: Vec<String>,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            auth_group: DEFAULT_AUTH_GROUP.to_owned(),
            tabs_group: DEFAULT_TABS_GROUP.to_owned(),
            home_tab: DEFAULT_HOME_TAB.to_owned(),
            guest_route: DEFAULT_GUEST_ROUTE.to_owned(),
            guest_tabs: DEFAULT_GUEST_TABS.iter().map(|t| (*t).to_owned()).collect(),
        }
    }
}

impl RoutePolicy {
    #[must_use]
    pub fn with_guest_tabs(mut self, tabs: Vec<String>) -> Self {
        self.guest_tabs = tabs;
        self
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        match &config.guest_tabs {
            Some(tabs) => Self::default().with_guest_tabs(tabs.clone()),
            None => Self::default(),
        }
    }

    /// The signed-in landing tab.
    #[must_use]
    pub fn home(&self) -> RouteLocation {
        RouteLocation::at(&self.tabs_group, Some(&self.home_tab))
    }

    #[must_use]
    pub fn decide(&self, phase: Phase, route: &RouteLocation, splash_done: bool) -> Action {
        let Some(primary) = route.primary.as_deref() else {
            return match phase {
                Phase::LoggedIn if splash_done => Action::Redirect(self.home()),
                _ => Action::Allow,
            };
        };

        match phase {
            Phase::Uninitialized | Phase::Hydrating => Action::Hold,
            Phase::LoggedOut => {
                if self.guest_allowed(primary, route.secondary.as_deref()) {
                    Action::Allow
                } else {
                    Action::Redirect(RouteLocation::root())
                }
            }
            Phase::LoggedIn if primary == self.auth_group => Action::Redirect(self.home()),
            Phase::LoggedIn => Action::Allow,
        }
    }

    fn guest_allowed(&self, primary: &str, secondary: Option<&str>) -> bool {
        if primary == self.auth_group || primary == self.guest_route {
            return true;
        }
        primary == self.tabs_group
            && secondary.is_some_and(|tab| self.guest_tabs.iter().any(|allowed| allowed == tab))
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Input from the host on every navigation change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUpdate {
    pub route: RouteLocation,
    pub splash_done: bool,
}

#[derive(Debug)]
pub struct NavigationGate {
    policy: RoutePolicy,
    location: RouteLocation,
    splash_done: bool,
    phase: Phase,
    /// Redirect issued but not yet answered by a route change.
    pending_redirect: Option<RouteLocation>,
}

impl NavigationGate {
    #[must_use]
    pub fn new(policy: RoutePolicy) -> Self {
        Self {
            policy,
            location: RouteLocation::root(),
            splash_done: false,
            phase: Phase::Uninitialized,
            pending_redirect: None,
        }
    }

    #[must_use]
    pub fn location(&self) -> &RouteLocation {
        &self.location
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    /// Decision for the current inputs, without side effects.
    #[must_use]
    pub fn action(&self) -> Action {
        self.policy.decide(self.phase, &self.location, self.splash_done)
    }

    pub fn on_route_change(&mut self, route: RouteLocation) -> Option<RouteLocation> {
        self.pending_redirect = None;
        self.location = route;
        self.evaluate()
    }

    pub fn on_splash_finished(&mut self) -> Option<RouteLocation> {
        if self.splash_done {
            return None;
        }
        self.splash_done = true;
        self.evaluate()
    }

    /// A phase change starts a fresh decision, so an unanswered redirect no
    /// longer suppresses the same target.
    pub fn on_session_change(&mut self, phase: Phase) -> Option<RouteLocation> {
        if self.phase != phase {
            self.pending_redirect = None;
        }
        self.phase = phase;
        self.evaluate()
    }

    /// Apply a host update carrying both the route and the splash flag.
    pub fn on_update(&mut self, update: RouteUpdate) -> Option<RouteLocation> {
        self.splash_done |= update.splash_done;
        self.on_route_change(update.route)
    }

    fn evaluate(&mut self) -> Option<RouteLocation> {
        let Action::Redirect(target) = self.action() else {
            return None;
        };
        if target == self.location || self.pending_redirect.as_ref() == Some(&target) {
            debug!(%target, "redirect suppressed");
            return None;
        }
        info!(from = %self.location, to = %target, phase = %self.phase, "redirect");
        self.pending_redirect = Some(target.clone());
        Some(target)
    }
}

/// Run `gate` on a task, reacting to session changes and host route updates.
///
/// Redirects are sent on `redirects`. The task ends when the route channel
/// closes, the redirect receiver is dropped, or the session manager goes away.
pub fn spawn_gate_task(
    session: &SessionManager,
    mut gate: NavigationGate,
    mut routes: mpsc::Receiver<RouteUpdate>,
    redirects: mpsc::Sender<RouteLocation>,
) -> JoinHandle<NavigationGate> {
    let mut session_rx = session.subscribe();

    tokio::spawn(async move {
        let phase = session_rx.borrow_and_update().phase();
        let mut next = gate.on_session_change(phase);

        loop {
            if let Some(target) = next.take() {
                if redirects.send(target).await.is_err() {
                    debug!("redirect receiver dropped; stopping gate");
                    break;
                }
            }

            tokio::select! {
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        debug!("session closed; stopping gate");
                        break;
                    }
                    let phase = session_rx.borrow_and_update().phase();
                    next = gate.on_session_change(phase);
                }
                update = routes.recv() => {
                    let Some(update) = update else {
                        debug!("route channel closed; stopping gate");
                        break;
                    };
                    next = gate.on_update(update);
                }
            }
        }

        gate
    })
}

#[cfg(test)]
#[path = "gate_test.rs"]
mod tests;
