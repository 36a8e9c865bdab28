//! Console stand-ins for the web shell: redirects become hints, toasts
//! become stderr lines.

use std::sync::{Mutex, PoisonError};

use greenfuel_core::{Navigator, Notice, Notifier, Route};
use tracing::info;

/// Remembers the last redirect so the command can explain it.
#[derive(Default)]
pub struct ConsoleNavigator {
    last: Mutex<Option<Route>>,
}

impl ConsoleNavigator {
    pub fn last_route(&self) -> Option<Route> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Navigator for ConsoleNavigator {
    fn navigate(&self, route: Route) {
        info!(%route, "Navigate");
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(route);
    }
}

pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        eprintln!("error: {}", notice.message);
    }
}
