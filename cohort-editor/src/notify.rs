//! Outward notifications of a cohort session: user-facing toasts and updates
//! for whatever keeps cohort lists in sync.

use tracing::{error, info};

use crate::cohort_models::Cohort;

/// Called while the session holds its poll lock. Implementations must not call
/// back into the session's `save`, `delete`, `unmount` or `is_polling`.
pub trait Notifier {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Writes toasts to the log. Used when nothing renders them.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn success(&self, message: &str) {
        info!(toast = "success", "{}", message);
    }

    fn error(&self, message: &str) {
        error!(toast = "error", "{}", message);
    }
}

/// Receives cohort lifecycle events. Every method defaults to doing nothing.
///
/// Like `Notifier`, events are delivered under the session's poll lock.
pub trait CohortObserver {
    fn cohort_created(&self, _cohort: &Cohort) {}
    fn cohort_updated(&self, _cohort: &Cohort) {}
    fn cohort_deleted(&self, _cohort: &Cohort) {}
    /// Membership of the cohort may have changed, dependent person lists should reload.
    fn membership_changed(&self, _cohort: &Cohort) {}
    fn navigate_to_list(&self) {}
}

pub struct NoopObserver;

impl CohortObserver for NoopObserver {}
