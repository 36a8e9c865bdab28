//! Hooks into the hosting shell: page navigation and user-visible notices.
//!
//! The session store and the authenticated client never render anything
//! themselves; they tell the shell where to go and what to show.

use std::fmt;

/// Entry points the core can redirect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Anonymous entry point
    Landing,
    Login,
    /// Authenticated home
    Dashboard,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Landing => "/",
            Route::Login => "/auth/login",
            Route::Dashboard => "/dashboard",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A failure the user should see. The core only ever reports errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Moves the user to another entry point. Navigating to the current route
/// must be harmless.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Shows a transient, non-fatal message to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}
