use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::models::{Pagination, RankedEntity, RankingFilters};
use crate::pagination::{compute_window, PageItem};
use crate::sources::RankingSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPhase {
    #[default]
    Idle,
    Fetching,
    Applied,
    Failed,
}

/// Everything a ranking view renders. Replaced as a whole on every applied
/// or failed completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingState {
    pub entities: Vec<RankedEntity>,
    pub pagination: Pagination,
    pub subjects: Vec<String>,
    pub filters: RankingFilters,
    pub phase: FetchPhase,
    pub error: Option<FetchError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { epoch: u64 },
    /// A newer refresh was issued, or the view was torn down, before this
    /// one completed. Nothing was written.
    Discarded { epoch: u64 },
    Failed { epoch: u64, error: FetchError },
}

/// Cooperative cancellation: in-flight requests keep running, but nothing
/// they return is written once the token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Shared<S> {
    source: S,
    state: Mutex<RankingState>,
    epoch: AtomicU64,
    token: CancellationToken,
}

impl<S> Shared<S> {
    fn lock_state(&self) -> MutexGuard<'_, RankingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the ranking state for one view. Every refresh gets a new epoch and
/// only the completion carrying the latest epoch is applied, whatever order
/// the responses arrive in.
pub struct RankingController<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for RankingController<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: RankingSource + 'static> RankingController<S> {
    pub fn new(source: S, initial: RankingFilters) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                state: Mutex::new(RankingState {
                    filters: initial,
                    ..RankingState::default()
                }),
                epoch: AtomicU64::new(0),
                token: CancellationToken::default(),
            }),
        }
    }

    /// Fire-and-forget refresh. The returned handle only reports what
    /// happened; the state update happens whether or not it is awaited.
    pub fn refresh(&self, filters: RankingFilters) -> JoinHandle<FetchOutcome> {
        let epoch = self.begin(&filters);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { complete(&shared, epoch, filters).await })
    }

    pub async fn refresh_inline(&self, filters: RankingFilters) -> FetchOutcome {
        let epoch = self.begin(&filters);
        complete(&self.shared, epoch, filters).await
    }

    /// Initial load with whatever filters the controller currently holds.
    pub fn mount(&self) -> JoinHandle<FetchOutcome> {
        self.refresh(self.filters())
    }

    pub fn teardown(&self) {
        debug!("ranking view torn down");
        self.shared.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    pub fn state(&self) -> RankingState {
        self.shared.lock_state().clone()
    }

    pub fn filters(&self) -> RankingFilters {
        self.shared.lock_state().filters.clone()
    }

    pub fn current_epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    /// Derived on every call from the applied pagination.
    pub fn page_window(&self) -> Vec<PageItem> {
        let state = self.shared.lock_state();
        compute_window(state.pagination.page, state.pagination.total_pages)
    }

    fn begin(&self, filters: &RankingFilters) -> u64 {
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, ?filters, "ranking refresh issued");

        if !self.shared.token.is_cancelled() {
            let mut state = self.shared.lock_state();
            state.phase = FetchPhase::Fetching;
            state.filters = filters.clone();
        }
        epoch
    }
}

async fn complete<S: RankingSource>(
    shared: &Shared<S>,
    epoch: u64,
    filters: RankingFilters,
) -> FetchOutcome {
    let result = shared.source.ranking(&filters).await;

    if shared.token.is_cancelled() {
        debug!(epoch, "ranking completion dropped after teardown");
        return FetchOutcome::Discarded { epoch };
    }

    let mut state = shared.lock_state();
    // teardown may have landed while waiting for the lock
    if shared.token.is_cancelled() {
        debug!(epoch, "ranking completion dropped after teardown");
        return FetchOutcome::Discarded { epoch };
    }
    let latest = shared.epoch.load(Ordering::SeqCst);
    if latest != epoch {
        debug!(epoch, latest, "stale ranking completion discarded");
        return FetchOutcome::Discarded { epoch };
    }

    match result {
        Ok(response) => {
            let mut filters = filters;
            if let Some(subject) = filters.subject.as_deref() {
                if !response.subjects.iter().any(|s| s == subject) {
                    debug!(subject, "selected subject no longer offered, resetting to all");
                    filters.subject = None;
                }
            }

            info!(
                epoch,
                entries = response.data.len(),
                page = response.pagination.page,
                total_pages = response.pagination.total_pages,
                "ranking applied"
            );
            *state = RankingState {
                entities: response.data,
                pagination: response.pagination,
                subjects: response.subjects,
                filters,
                phase: FetchPhase::Applied,
                error: None,
            };
            FetchOutcome::Applied { epoch }
        }
        Err(err) => {
            let error = FetchError::classify(&err);
            warn!(epoch, %err, kind = ?error, "ranking refresh failed");
            let mut filters = filters;
            if let Some(subject) = filters.subject.as_deref() {
                if !state.subjects.is_empty() && !state.subjects.iter().any(|s| s == subject) {
                    debug!(subject, "unknown subject on failed refresh, resetting to all");
                    filters.subject = None;
                }
            }
            state.entities = Vec::new();
            state.pagination = Pagination::default();
            state.filters = filters;
            state.phase = FetchPhase::Failed;
            state.error = Some(error);
            FetchOutcome::Failed { epoch, error }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    use super::*;
    use crate::error::SourceError;
    use crate::models::RankingResponse;
    use crate::pagination::PageItem::{Ellipsis, Page};

    type Reply = Result<RankingResponse, SourceError>;

    /// Each page number gets its own reply channel so tests decide the
    /// order in which requests complete.
    #[derive(Default)]
    struct ScriptedSource {
        pending: Mutex<HashMap<u32, oneshot::Receiver<Reply>>>,
    }

    impl ScriptedSource {
        fn expect(&self, page: u32) -> oneshot::Sender<Reply> {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().insert(page, rx);
            tx
        }
    }

    #[async_trait]
    impl RankingSource for ScriptedSource {
        async fn ranking(&self, filters: &RankingFilters) -> Reply {
            let rx = self.pending.lock().unwrap().remove(&filters.page);
            match rx {
                Some(rx) => rx.await.unwrap_or(Err(SourceError::Other("dropped".into()))),
                None => Err(SourceError::Other("unexpected request".into())),
            }
        }
    }

    fn response(name: &str, page: u32, total_pages: u32, subjects: &[&str]) -> RankingResponse {
        RankingResponse {
            data: vec![RankedEntity {
                id: Uuid::new_v4(),
                name: name.to_string(),
                rank: 1,
                score: 91.0,
                grade: "A".to_string(),
                subjects: Vec::new(),
            }],
            pagination: Pagination {
                total: u64::from(total_pages) * 10,
                page,
                total_pages,
                has_more: page < total_pages,
            },
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn page(page: u32) -> RankingFilters {
        RankingFilters {
            page,
            ..RankingFilters::default()
        }
    }

    fn controller() -> (Arc<ScriptedSource>, RankingController<Arc<ScriptedSource>>) {
        let source = Arc::new(ScriptedSource::default());
        let controller = RankingController::new(Arc::clone(&source), RankingFilters::default());
        (source, controller)
    }

    #[tokio::test]
    async fn last_issued_refresh_wins_in_any_completion_order() {
        for second_finishes_first in [true, false] {
            let (source, controller) = controller();
            let first_tx = source.expect(1);
            let second_tx = source.expect(2);

            let first = controller.refresh(page(1));
            let second = controller.refresh(page(2));

            let (first_outcome, second_outcome) = if second_finishes_first {
                second_tx.send(Ok(response("second", 2, 5, &[]))).unwrap();
                let second_outcome = second.await.unwrap();
                first_tx.send(Ok(response("first", 1, 5, &[]))).unwrap();
                (first.await.unwrap(), second_outcome)
            } else {
                first_tx.send(Ok(response("first", 1, 5, &[]))).unwrap();
                let first_outcome = first.await.unwrap();
                second_tx.send(Ok(response("second", 2, 5, &[]))).unwrap();
                (first_outcome, second.await.unwrap())
            };

            assert_eq!(first_outcome, FetchOutcome::Discarded { epoch: 1 });
            assert_eq!(second_outcome, FetchOutcome::Applied { epoch: 2 });
            let state = controller.state();
            assert_eq!(state.entities[0].name, "second");
            assert_eq!(state.pagination.page, 2);
            assert_eq!(state.phase, FetchPhase::Applied);
        }
    }

    #[tokio::test]
    async fn stale_failure_does_not_reset_applied_state() {
        let (source, controller) = controller();
        let first_tx = source.expect(1);
        let second_tx = source.expect(2);

        let first = controller.refresh(page(1));
        let second = controller.refresh(page(2));
        second_tx.send(Ok(response("second", 2, 3, &[]))).unwrap();
        second.await.unwrap();
        first_tx.send(Err(SourceError::Timeout)).unwrap();

        assert_eq!(first.await.unwrap(), FetchOutcome::Discarded { epoch: 1 });
        assert_eq!(controller.state().entities.len(), 1);
        assert_eq!(controller.state().error, None);
    }

    #[tokio::test]
    async fn failure_resets_dataset_and_pagination() {
        let (source, controller) = controller();
        source
            .expect(1)
            .send(Ok(response("avery", 1, 4, &["Math"])))
            .unwrap();
        controller.refresh_inline(page(1)).await;

        source
            .expect(2)
            .send(Err(SourceError::Status {
                code: 401,
                message: "expired".into(),
            }))
            .unwrap();
        let outcome = controller.refresh_inline(page(2)).await;

        assert_eq!(
            outcome,
            FetchOutcome::Failed {
                epoch: 2,
                error: FetchError::Unauthorized
            }
        );
        let state = controller.state();
        assert!(state.entities.is_empty());
        assert_eq!(state.pagination, Pagination::default());
        assert_eq!(state.phase, FetchPhase::Failed);
        assert_eq!(state.error, Some(FetchError::Unauthorized));
        assert!(controller.page_window().is_empty());
    }

    #[tokio::test]
    async fn unknown_subject_filter_resets_to_all() {
        let (source, controller) = controller();
        source
            .expect(1)
            .send(Ok(response("kiara", 1, 1, &["Math", "Science"])))
            .unwrap();
        let filters = RankingFilters {
            subject: Some("Physics".to_string()),
            ..page(1)
        };

        controller.refresh_inline(filters).await;
        assert_eq!(controller.filters().subject, None);

        source
            .expect(1)
            .send(Ok(response("kiara", 1, 1, &["Math", "Science"])))
            .unwrap();
        let filters = RankingFilters {
            subject: Some("Math".to_string()),
            ..page(1)
        };
        controller.refresh_inline(filters).await;
        assert_eq!(controller.filters().subject.as_deref(), Some("Math"));
    }

    #[tokio::test]
    async fn failed_refresh_for_unknown_subject_drops_the_filter() {
        let (source, controller) = controller();
        source
            .expect(1)
            .send(Ok(response("avery", 1, 1, &["Math"])))
            .unwrap();
        controller.refresh_inline(page(1)).await;

        let not_found = || {
            Err(SourceError::Status {
                code: 404,
                message: "no leaderboard entries match".into(),
            })
        };
        source.expect(1).send(not_found()).unwrap();
        let outcome = controller
            .refresh_inline(RankingFilters {
                subject: Some("Physics".to_string()),
                ..page(1)
            })
            .await;

        assert!(matches!(
            outcome,
            FetchOutcome::Failed {
                error: FetchError::NoRecords,
                ..
            }
        ));
        assert_eq!(controller.filters().subject, None);
        assert_eq!(controller.state().subjects, vec!["Math".to_string()]);

        source.expect(1).send(not_found()).unwrap();
        controller
            .refresh_inline(RankingFilters {
                subject: Some("Math".to_string()),
                ..page(1)
            })
            .await;
        assert_eq!(controller.filters().subject.as_deref(), Some("Math"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn teardown_while_completion_waits_for_lock_discards() {
        let (source, controller) = controller();
        let tx = source.expect(1);
        let handle = controller.refresh(page(1));

        let guard = controller.shared.lock_state();
        tx.send(Ok(response("late", 1, 2, &[]))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.teardown();
        drop(guard);

        assert_eq!(handle.await.unwrap(), FetchOutcome::Discarded { epoch: 1 });
        let state = controller.state();
        assert!(state.entities.is_empty());
        assert_eq!(state.phase, FetchPhase::Fetching);
    }

    #[tokio::test]
    async fn teardown_suppresses_late_completion() {
        let (source, controller) = controller();
        let tx = source.expect(1);
        let handle = controller.refresh(page(1));
        let before = controller.state();

        controller.teardown();
        tx.send(Ok(response("late", 1, 2, &[]))).unwrap();

        assert_eq!(handle.await.unwrap(), FetchOutcome::Discarded { epoch: 1 });
        assert_eq!(controller.state(), before);
        assert!(controller.token().is_cancelled());
    }

    #[tokio::test]
    async fn page_window_follows_applied_pagination() {
        let (source, controller) = controller();
        source
            .expect(10)
            .send(Ok(response("jules", 10, 20, &[])))
            .unwrap();
        controller.refresh_inline(page(10)).await;

        assert_eq!(
            controller.page_window(),
            vec![Page(1), Ellipsis, Page(9), Page(10), Page(11), Ellipsis, Page(20)]
        );
    }

    #[tokio::test]
    async fn mount_shares_the_epoch_sequence() {
        let (source, controller) = controller();
        source.expect(1).send(Ok(response("avery", 1, 1, &[]))).unwrap();
        assert_eq!(
            controller.mount().await.unwrap(),
            FetchOutcome::Applied { epoch: 1 }
        );
        assert_eq!(controller.current_epoch(), 1);
    }
}
