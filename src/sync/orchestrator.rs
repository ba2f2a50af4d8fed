//! The per-subject integration loop.
//!
//! Subjects are processed one after another in the order the source
//! returned them. Each subject walks authenticate → aggregate → check empty
//! → deliver; a failure at any step is logged, recorded in the run summary
//! and the loop moves on to the next subject.

use super::aggregator::Aggregator;
use crate::auth::{Authenticator, SessionProvider};
use crate::config::{ReferenceScope, SyncConfig};
use crate::delivery::Delivery;
use crate::error::{AuthError, SourceError, SubjectError, SyncError};
use crate::models::{
    Category, Payload, RecordSet, RunSummary, Stage, Subject, SubjectOutcome, SubjectReport,
};
use crate::source::SubjectSource;
use chrono::{DateTime, Duration, Utc};
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run behaviour the loop needs from the configuration.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Oldest checkpoint honoured, relative to now.
    pub fetch_since: Duration,
    pub reference_scope: ReferenceScope,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            fetch_since: config.fetch_since(),
            reference_scope: config.reference_scope,
        }
    }
}

/// Bound a checkpoint to the fetch-since window.
///
/// A checkpoint older than `now - window` is replaced by `now - window`.
pub fn clamp_checkpoint(
    last_sync: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> DateTime<Utc> {
    let floor = now - window;
    if last_sync < floor {
        floor
    } else {
        last_sync
    }
}

/// Drives one integration run.
pub struct Orchestrator<S, A, D> {
    source: S,
    sessions: SessionProvider<A>,
    aggregator: Aggregator,
    delivery: D,
    settings: SyncSettings,
    progress: ProgressBar,
}

impl<S, A, D> Orchestrator<S, A, D>
where
    S: SubjectSource,
    A: Authenticator,
    D: Delivery,
{
    pub fn new(
        source: S,
        sessions: SessionProvider<A>,
        aggregator: Aggregator,
        delivery: D,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            sessions,
            aggregator,
            delivery,
            settings,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress over subjects on the given bar.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// List the subjects and the checkpoint each would be fetched from,
    /// without authenticating, fetching or delivering anything.
    pub async fn plan(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<(Subject, DateTime<Utc>)>, SyncError> {
        let subjects = self.source.list_subjects(cancel).await?;
        let now = Utc::now();
        Ok(subjects
            .into_iter()
            .map(|subject| {
                let since = clamp_checkpoint(subject.last_sync, now, self.settings.fetch_since);
                (subject, since)
            })
            .collect())
    }

    /// Run the job over every subject the source returns.
    ///
    /// Only a source failure, a shared-session failure or cancellation
    /// fail the run; everything else is isolated to its subject.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, SyncError> {
        let started_at = Utc::now();
        info!("Starting Vestro data import job...");

        info!("Fetching subjects to integrate...");
        let subjects = self.source.list_subjects(cancel).await.map_err(|e| match e {
            SourceError::Cancelled => SyncError::Cancelled,
            other => SyncError::Source(other),
        })?;

        if subjects.is_empty() {
            info!("No subjects to integrate. Job finished.");
            return Ok(RunSummary {
                started_at,
                finished_at: Utc::now(),
                subjects: Vec::new(),
            });
        }
        info!("Found {} subjects to process.", subjects.len());

        let shared_token = self.sessions.start_run(cancel).await.map_err(|e| match e {
            AuthError::Cancelled => SyncError::Cancelled,
            other => SyncError::SharedAuth(other),
        })?;

        let reference = match (self.settings.reference_scope, shared_token) {
            (ReferenceScope::PerRun, Some(token)) => Some(
                self.aggregator
                    .fetch_reference(&token, cancel)
                    .await
                    .map_err(|_| SyncError::Cancelled)?,
            ),
            (ReferenceScope::PerRun, None) => {
                warn!("Per-run reference data needs a shared session; fetching per subject");
                None
            }
            (ReferenceScope::PerSubject, _) => None,
        };

        self.progress.set_length(subjects.len() as u64);
        let mut reports = Vec::with_capacity(subjects.len());

        for subject in &subjects {
            if cancel.is_cancelled() {
                break;
            }
            let report = self
                .process_subject(subject, reference.as_ref(), cancel)
                .await;
            reports.push(report);
            self.progress.inc(1);
        }
        self.progress.finish_and_clear();

        if cancel.is_cancelled() {
            warn!(
                "Run cancelled after {} of {} subjects.",
                reports.len(),
                subjects.len()
            );
            return Err(SyncError::Cancelled);
        }

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            subjects: reports,
        };
        info!(
            "Job finished: {} delivered, {} empty, {} skipped.",
            summary.delivered(),
            summary.empty(),
            summary.skipped()
        );
        Ok(summary)
    }

    async fn process_subject(
        &mut self,
        subject: &Subject,
        reference: Option<&RecordSet>,
        cancel: &CancellationToken,
    ) -> SubjectReport {
        let since = clamp_checkpoint(subject.last_sync, Utc::now(), self.settings.fetch_since);
        info!(
            subject = subject.id,
            "Processing subject {} (since {})",
            subject.id,
            since.to_rfc3339()
        );
        self.progress.set_message(format!("subject {}", subject.id));

        let mut report = SubjectReport {
            subject_id: subject.id,
            since,
            outcome: SubjectOutcome::Empty,
            supplies: 0,
            product_sales: 0,
        };

        let payload = match self.fetch_payload(subject, since, reference, cancel).await {
            Ok(payload) => payload,
            Err((stage, e)) => {
                error!(
                    subject = subject.id,
                    stage = %stage,
                    "Failed to process subject {}: {}. Skipping.",
                    subject.id,
                    e
                );
                report.outcome = SubjectOutcome::Skipped {
                    stage,
                    reason: e.to_string(),
                };
                return report;
            }
        };

        report.supplies = payload.records.count(Category::Supplies);
        report.product_sales = payload.records.count(Category::ProductSales);

        if payload.is_empty() {
            info!(subject = subject.id, "No new data found for subject {}.", subject.id);
            return report;
        }

        info!(
            subject = subject.id,
            "Sending payload for subject {} ({} supplies, {} product sales)...",
            subject.id,
            report.supplies,
            report.product_sales
        );
        match self.delivery.deliver(&payload, cancel).await {
            Ok(()) => {
                info!(subject = subject.id, "Successfully processed subject {}.", subject.id);
                report.outcome = SubjectOutcome::Delivered;
            }
            Err(e) => {
                let e = SubjectError::from(e);
                error!(
                    subject = subject.id,
                    stage = %Stage::Deliver,
                    "Failed to send data for subject {}: {}. Skipping.",
                    subject.id,
                    e
                );
                report.outcome = SubjectOutcome::Skipped {
                    stage: Stage::Deliver,
                    reason: e.to_string(),
                };
            }
        }

        report
    }

    /// Authenticate and aggregate one subject.
    async fn fetch_payload(
        &mut self,
        subject: &Subject,
        since: DateTime<Utc>,
        reference: Option<&RecordSet>,
        cancel: &CancellationToken,
    ) -> Result<Payload, (Stage, SubjectError)> {
        if self.sessions.requires_identity() && subject.identity().is_none() {
            return Err((Stage::Authenticate, SubjectError::MissingIdentity));
        }

        let token = self
            .sessions
            .session_for(subject, cancel)
            .await
            .map_err(|e| (Stage::Authenticate, SubjectError::from(e)))?;

        self.aggregator
            .aggregate(subject, &token, since, reference, cancel)
            .await
            .map_err(|e| (Stage::Aggregate, SubjectError::from(e)))
    }
}
