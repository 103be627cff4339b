//! Save and poll lifecycle of one cohort being edited.
//!
//! A session moves through `Idle -> Saving -> Calculating -> Settled`. A failed
//! save goes back to `Idle` with the document untouched. While the server is
//! calculating membership, a background task re-fetches the cohort until it
//! settles. Unmounting the session cancels that task, and any response that
//! arrives afterwards is dropped without touching the session.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClientError, CohortClient, HttpCohortClient};
use crate::cohort_models::{Cohort, CohortId};
use crate::config::Config;
use crate::document::{process_on_set, CohortEdit};
use crate::errors::CohortError;
use crate::format::{select_format, CohortFormat};
use crate::notify::{CohortObserver, Notifier};
use crate::retry::RetryPolicy;
use crate::validation::CohortErrors;

pub const SAVE_SUCCEEDED: &str =
    "Cohort saved. Please wait up to a few minutes for it to be calculated";
pub const SAVE_FAILED: &str = "Failed to save cohort";
pub const FETCH_FAILED: &str = "Failed to fetch cohort";
pub const DELETE_FAILED: &str = "Failed to delete cohort";
pub const POLL_FAILED: &str = "Failed to check cohort calculation status";

const COHORT_SAVES: &str = "cohort_editor_saves_total";
const COHORT_SAVE_FAILURES: &str = "cohort_editor_save_failures_total";
const COHORT_INVALID_SUBMITS: &str = "cohort_editor_invalid_submits_total";
const COHORT_POLLS: &str = "cohort_editor_calculation_polls_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Saving,
    Calculating,
    Settled,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Delay between status checks while the cohort is calculating.
    pub poll_interval: Duration,
    /// Backoff for status checks that fail.
    pub retry_policy: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval.0,
            retry_policy: RetryPolicy::from(&config.retry_policy),
        }
    }
}

struct Document {
    cohort: Cohort,
    // only set once a submit has been attempted
    errors: Option<CohortErrors>,
}

struct SessionInner {
    document: Mutex<Document>,
    state: watch::Sender<SaveState>,
    format: Arc<dyn CohortFormat + Send + Sync>,
    client: Arc<dyn CohortClient + Send + Sync>,
    notifier: Arc<dyn Notifier + Send + Sync>,
    observer: Arc<dyn CohortObserver + Send + Sync>,
    options: SessionOptions,
    shutdown: CancellationToken,
    pending_poll: Mutex<Option<CancellationToken>>,
}

/// Owns the cohort being edited and drives it through save and calculation.
///
/// Dropping the session has the same effect as `unmount`.
pub struct CohortSession {
    inner: Arc<SessionInner>,
}

impl CohortSession {
    pub fn new(
        client: Arc<dyn CohortClient + Send + Sync>,
        format: Arc<dyn CohortFormat + Send + Sync>,
        notifier: Arc<dyn Notifier + Send + Sync>,
        observer: Arc<dyn CohortObserver + Send + Sync>,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SaveState::Idle);
        let inner = SessionInner {
            document: Mutex::new(Document {
                cohort: process_on_set(&Cohort::new_cohort()),
                errors: None,
            }),
            state,
            format,
            client,
            notifier,
            observer,
            options,
            shutdown: CancellationToken::new(),
            pending_poll: Mutex::new(None),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// A session talking to the cohorts API described by `config`.
    pub fn from_config(
        config: &Config,
        notifier: Arc<dyn Notifier + Send + Sync>,
        observer: Arc<dyn CohortObserver + Send + Sync>,
    ) -> Result<Self, CohortError> {
        let client = HttpCohortClient::from_config(config)?;

        Ok(Self::new(
            Arc::new(client),
            select_format(config.cohort_filters_enabled),
            notifier,
            observer,
            SessionOptions::from(config),
        ))
    }

    /// Loads the cohort to edit: a blank one for `None`, otherwise the server copy.
    /// A failed fetch keeps the current document.
    #[instrument(skip_all)]
    pub async fn mount(&self, id: Option<CohortId>) -> Result<(), CohortError> {
        let Some(id) = id else {
            self.set_cohort(Cohort::new_cohort());
            return Ok(());
        };
        self.inner.ensure_open()?;

        let result = self.inner.client.fetch_cohort(id).await;
        self.inner
            .commit(&self.inner.shutdown, |pending| match result {
                Ok(cohort) => {
                    self.inner.set_cohort(&cohort);
                    self.inner.observer.cohort_updated(&cohort);
                    self.inner.check_if_finished_calculating(pending, cohort);
                    Ok(())
                }
                Err(e) => {
                    warn!(cohort_id = id, "failed to fetch cohort: {}", e);
                    self.inner.notifier.error(e.detail().unwrap_or(FETCH_FAILED));
                    Err(CohortError::from(e))
                }
            })
            .unwrap_or(Err(CohortError::SessionClosed))
    }

    pub fn dispatch(&self, edit: CohortEdit) {
        let mut document = self.inner.lock_document();
        document.cohort = self.inner.format.apply_edit(&document.cohort, &edit);
        if document.errors.is_some() {
            document.errors = Some(self.inner.format.validate(&document.cohort));
        }
    }

    /// Replaces the whole document, normalizing ids and match types.
    pub fn set_cohort(&self, cohort: Cohort) {
        self.inner.set_cohort(&cohort);
    }

    pub fn cohort(&self) -> Cohort {
        self.inner.lock_document().cohort.clone()
    }

    /// Errors of the last submit, kept up to date with later edits.
    pub fn errors(&self) -> Option<CohortErrors> {
        self.inner.lock_document().errors.clone()
    }

    pub fn state(&self) -> SaveState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.inner.state.subscribe()
    }

    /// Validates the document and saves it when valid. An invalid document is
    /// never sent.
    #[instrument(skip_all)]
    pub async fn submit(&self) -> Result<Cohort, CohortError> {
        let cohort = self.cohort();
        let errors = self.inner.format.validate(&cohort);
        self.inner.lock_document().errors = Some(errors.clone());

        if errors.has_errors() {
            metrics::counter!(COHORT_INVALID_SUBMITS).increment(1);
            debug!("cohort failed validation");
            return Err(CohortError::Invalid(errors));
        }

        self.save(cohort).await
    }

    /// Creates or updates `cohort` depending on whether it has an id yet.
    ///
    /// If the session is unmounted while the request is in flight, the response is
    /// dropped and the session goes back to `Idle`.
    #[instrument(skip_all)]
    pub async fn save(&self, cohort: Cohort) -> Result<Cohort, CohortError> {
        let started = self
            .inner
            .commit(&self.inner.shutdown, |pending| {
                let started = self.inner.state.send_if_modified(|state| {
                    if *state == SaveState::Saving {
                        false
                    } else {
                        *state = SaveState::Saving;
                        true
                    }
                });
                if started {
                    cancel_poll(pending);
                }
                started
            })
            .ok_or(CohortError::SessionClosed)?;
        if !started {
            return Err(CohortError::SaveInProgress);
        }

        let payload = self.inner.format.payload(&cohort);
        let (kind, result) = match cohort.id {
            Some(id) => ("update", self.inner.client.update_cohort(id, &payload).await),
            None => ("create", self.inner.client.create_cohort(&payload).await),
        };

        match self.inner.commit(&self.inner.shutdown, |pending| {
            self.inner.finish_save(pending, &cohort, kind, result)
        }) {
            Some(outcome) => outcome,
            None => {
                self.inner.state.send_replace(SaveState::Idle);
                Err(CohortError::SessionClosed)
            }
        }
    }

    /// Settles `cohort` right away when the server is done calculating it,
    /// otherwise starts polling for it. Does nothing once the session is unmounted.
    ///
    /// # Panics
    ///
    /// Polling is spawned onto the current Tokio runtime, so this panics when called
    /// outside one with a cohort that is still calculating.
    pub fn check_if_finished_calculating(&self, cohort: Cohort) {
        self.inner.commit(&self.inner.shutdown, |pending| {
            self.inner.check_if_finished_calculating(pending, cohort)
        });
    }

    /// Waits until the session is back to `Idle` or has `Settled`.
    pub async fn wait_until_settled(&self) -> Result<SaveState, CohortError> {
        let mut receiver = self.subscribe();
        let state = receiver
            .wait_for(|state| matches!(state, SaveState::Idle | SaveState::Settled))
            .await
            .map_err(|_| CohortError::SessionClosed)?;
        Ok(*state)
    }

    /// Soft deletes the cohort and sends the user back to the cohort list.
    #[instrument(skip_all)]
    pub async fn delete(&self) -> Result<(), CohortError> {
        let cohort = self.cohort();
        let id = cohort.id.ok_or(CohortError::NotCreated)?;
        self.inner.ensure_open()?;

        let result = self.inner.client.delete_cohort(id).await;
        self.inner
            .commit(&self.inner.shutdown, |pending| {
                if let Err(e) = result {
                    warn!(cohort_id = id, "failed to delete cohort: {}", e);
                    self.inner.notifier.error(e.detail().unwrap_or(DELETE_FAILED));
                    return Err(CohortError::from(e));
                }

                cancel_poll(pending);
                let deleted = Cohort {
                    deleted: true,
                    ..cohort
                };
                self.inner.observer.cohort_deleted(&deleted);
                self.inner.observer.navigate_to_list();
                Ok(())
            })
            .unwrap_or(Err(CohortError::SessionClosed))
    }

    /// Ends the session. A pending status check is cancelled and its response,
    /// if already in flight, is discarded.
    pub fn unmount(&self) {
        self.inner.close();
    }

    pub fn is_polling(&self) -> bool {
        self.inner.lock_pending_poll().is_some()
    }
}

impl Drop for CohortSession {
    fn drop(&mut self) {
        self.inner.close();
    }
}

fn cancel_poll(pending: &mut Option<CancellationToken>) {
    if let Some(token) = pending.take() {
        token.cancel();
    }
}

impl SessionInner {
    fn lock_document(&self) -> MutexGuard<'_, Document> {
        match self.document.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_pending_poll(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        match self.pending_poll.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_open(&self) -> Result<(), CohortError> {
        if self.shutdown.is_cancelled() {
            debug!("session closed, not sending request");
            return Err(CohortError::SessionClosed);
        }
        Ok(())
    }

    /// Applies a response while holding the poll lock, unless `token` has been
    /// cancelled. Every cancellation also happens under this lock, so a response
    /// that passes the check cannot race with `unmount` or a newer save.
    fn commit<R>(
        &self,
        token: &CancellationToken,
        apply: impl FnOnce(&mut Option<CancellationToken>) -> R,
    ) -> Option<R> {
        let mut pending = self.lock_pending_poll();
        if token.is_cancelled() {
            debug!("request cancelled, dropping response");
            return None;
        }
        Some(apply(&mut *pending))
    }

    fn close(&self) {
        let mut pending = self.lock_pending_poll();
        self.shutdown.cancel();
        cancel_poll(&mut pending);
    }

    fn set_cohort(&self, cohort: &Cohort) {
        self.lock_document().cohort = process_on_set(cohort);
    }

    fn finish_save(
        self: &Arc<Self>,
        pending: &mut Option<CancellationToken>,
        cohort: &Cohort,
        kind: &'static str,
        result: Result<Cohort, ClientError>,
    ) -> Result<Cohort, CohortError> {
        let mut saved = match result {
            Ok(saved) => saved,
            Err(e) => {
                metrics::counter!(COHORT_SAVE_FAILURES, "kind" => kind).increment(1);
                warn!("failed to {} cohort: {}", kind, e);
                self.notifier.error(e.detail().unwrap_or(SAVE_FAILED));
                self.state.send_replace(SaveState::Idle);
                return Err(e.into());
            }
        };

        metrics::counter!(COHORT_SAVES, "kind" => kind).increment(1);
        saved.csv = None;
        self.set_cohort(&saved);
        if cohort.is_new() {
            self.observer.cohort_created(&saved);
        } else {
            self.observer.cohort_updated(&saved);
        }
        self.notifier.success(SAVE_SUCCEEDED);
        info!(cohort_id = ?saved.id, "cohort saved");

        self.check_if_finished_calculating(pending, saved.clone());
        Ok(saved)
    }

    fn check_if_finished_calculating(
        self: &Arc<Self>,
        pending: &mut Option<CancellationToken>,
        cohort: Cohort,
    ) {
        match (cohort.is_calculating, cohort.id) {
            (true, Some(id)) => {
                self.state.send_replace(SaveState::Calculating);
                self.schedule_poll(pending, id);
            }
            _ => self.settle(pending, cohort),
        }
    }

    fn settle(&self, pending: &mut Option<CancellationToken>, cohort: Cohort) {
        cancel_poll(pending);
        self.set_cohort(&cohort);
        self.observer.cohort_updated(&cohort);
        self.observer.membership_changed(&cohort);
        self.state.send_replace(SaveState::Settled);
    }

    fn schedule_poll(self: &Arc<Self>, pending: &mut Option<CancellationToken>, id: CohortId) {
        let token = self.shutdown.child_token();
        if let Some(previous) = pending.replace(token.clone()) {
            previous.cancel();
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.poll_until_settled(id, token).await });
    }

    #[instrument(skip_all, fields(cohort_id = id))]
    async fn poll_until_settled(&self, id: CohortId, token: CancellationToken) {
        let mut failures = 0;
        let mut delay = self.options.poll_interval;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            metrics::counter!(COHORT_POLLS).increment(1);
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = self.client.fetch_cohort(id) => result,
            };

            match result {
                Ok(cohort) if cohort.is_calculating => {
                    failures = 0;
                    delay = self.options.poll_interval;
                }
                Ok(cohort) => {
                    self.commit(&token, |pending| self.settle(pending, cohort));
                    return;
                }
                Err(e) => {
                    failures += 1;
                    if !self.options.retry_policy.should_retry(failures) {
                        warn!(failures, "giving up on cohort calculation status: {}", e);
                        self.commit(&token, |pending| {
                            cancel_poll(pending);
                            self.notifier.error(POLL_FAILED);
                            self.state.send_replace(SaveState::Idle);
                        });
                        return;
                    }
                    delay = self.options.retry_policy.retry_interval(failures);
                    debug!(failures, "status check failed, retrying in {:?}: {}", delay, e);
                }
            }
        }
    }
}
