//! Periodic workers.
//!
//! Each job is a spawned interval loop (missed ticks are skipped, errors
//! are logged and the loop continues). Cross-worker coordination happens
//! in the database: the decay pass is deduplicated by the `decay_runs`
//! key, item claims use SKIP LOCKED, so running several replicas of this
//! process is safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::calibration::drift::{evaluate, DriftNotifier, DriftThresholds};
use crate::cluster::lifecycle;
use crate::config::Settings;
use crate::engine::{logodds_to_prob, run_decay_for_trend};
use crate::models::LifecycleStatus;
use crate::pipeline::Pipeline;
use crate::storage::{events, items, snapshots, trends};

pub struct Scheduler {
    pool: PgPool,
    settings: Settings,
    pipeline: Arc<Pipeline>,
    notifier: Arc<DriftNotifier>,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        settings: Settings,
        pipeline: Arc<Pipeline>,
        notifier: Arc<DriftNotifier>,
    ) -> Self {
        Self {
            pool,
            settings,
            pipeline,
            notifier,
        }
    }

    /// Spawn every periodic job. Returns immediately; the loops run for
    /// the life of the process.
    pub fn spawn_all(self: Arc<Self>) {
        tokio::spawn(self.clone().process_pending_loop());
        tokio::spawn(self.clone().snapshot_loop());
        tokio::spawn(self.clone().decay_loop());
        tokio::spawn(self.clone().lifecycle_loop());
        tokio::spawn(self.clone().reaper_loop());
        tokio::spawn(self.clone().retention_loop());
        tokio::spawn(self.calibration_loop());
        info!("scheduler started");
    }

    async fn process_pending_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.settings.process_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.pipeline.process_pending_batch().await {
                Ok(stats) if stats.claimed > 0 => {
                    info!(
                        claimed = stats.claimed,
                        classified = stats.classified,
                        noise = stats.noise,
                        deferred = stats.deferred,
                        errored = stats.errored,
                        "pending batch processed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("process_pending failed: {e:#}"),
            }
        }
    }

    /// Hourly log-odds snapshot per active trend.
    async fn snapshot_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(3600));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.snapshot_once().await {
                error!("snapshot_trends failed: {e:#}");
            }
        }
    }

    async fn snapshot_once(&self) -> anyhow::Result<()> {
        let all = trends::all(&self.pool, true).await?;
        for trend in &all {
            let events_24h =
                events::count_recent_for_trend(&self.pool, &trend.id, ChronoDuration::hours(24))
                    .await?;
            snapshots::record(&self.pool, &trend.id, trend.current_log_odds, events_24h as i32)
                .await?;
        }
        info!(trends = all.len(), "snapshots recorded");
        Ok(())
    }

    /// Daily decay. The loop ticks hourly; the per-(trend, day) run guard
    /// makes extra ticks no-ops, so a restart never skips or doubles a day.
    async fn decay_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(3600));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match trends::all(&self.pool, true).await {
                Ok(all) => {
                    for trend in all {
                        match run_decay_for_trend(&self.pool, &trend.id).await {
                            Ok(Some(new_lo)) => info!(
                                trend = %trend.id,
                                log_odds = new_lo,
                                probability = logodds_to_prob(new_lo),
                                "decay applied"
                            ),
                            Ok(None) => {}
                            Err(e) => error!(trend = %trend.id, "decay failed: {e:#}"),
                        }
                    }
                }
                Err(e) => error!("decay pass could not list trends: {e:#}"),
            }
        }
    }

    /// Hourly lifecycle sweep: confirmed events fade after the quiet
    /// window, fading/stale-emerging events archive.
    async fn lifecycle_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(3600));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.lifecycle_once().await {
                error!("check_event_lifecycles failed: {e:#}");
            }
        }
    }

    async fn lifecycle_once(&self) -> anyhow::Result<()> {
        let fading_after = ChronoDuration::hours(self.settings.fading_after_hours);
        let archive_after = ChronoDuration::days(self.settings.archive_after_days);
        let stale = events::stale_for_lifecycle(&self.pool, fading_after, archive_after).await?;

        let now = chrono::Utc::now();
        let mut transitions = 0usize;
        for (event_id, status, last_mention_at) in stale {
            let Some(current) = LifecycleStatus::parse(&status) else {
                warn!(%event_id, status, "unknown lifecycle status");
                continue;
            };
            if let Some(next) =
                lifecycle::on_quiet_check(current, last_mention_at, now, fading_after, archive_after)
            {
                events::set_lifecycle(&self.pool, event_id, next).await?;
                transitions += 1;
            }
        }
        if transitions > 0 {
            info!(transitions, "lifecycle transitions applied");
        }
        Ok(())
    }

    /// Stale-item reaper: claims older than the timeout go back to
    /// pending so a dead worker can never strand an item.
    async fn reaper_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(300));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let timeout = ChronoDuration::minutes(self.settings.reaper_timeout_minutes);
            match items::reap_stale_processing(&self.pool, timeout).await {
                Ok(0) => {}
                Ok(reaped) => {
                    warn!(reaped, "stale processing items reset to pending");
                    metrics::counter!("reaper_resets_total", reaped);
                }
                Err(e) => error!("reaper failed: {e:#}"),
            }
        }
    }

    /// Daily retention cleanup: old noise/error items and expired
    /// snapshots.
    async fn retention_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(86_400));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match items::purge_old_noise(&self.pool, self.settings.retention_days).await {
                Ok(purged) if purged > 0 => info!(purged, "old noise/error items purged"),
                Ok(_) => {}
                Err(e) => error!("retention purge failed: {e:#}"),
            }
            match snapshots::purge_older_than(&self.pool, self.settings.retention_days * 4).await {
                Ok(purged) if purged > 0 => info!(purged, "old snapshots purged"),
                Ok(_) => {}
                Err(e) => error!("snapshot retention failed: {e:#}"),
            }
        }
    }

    /// Daily calibration check with drift alerting.
    async fn calibration_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(86_400));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match crate::calibration::report(&self.pool).await {
                Ok(report) => {
                    let thresholds = DriftThresholds {
                        brier_warn: self.settings.brier_warn_threshold,
                        brier_critical: self.settings.brier_critical_threshold,
                        bucket_error_warn: self.settings.bucket_error_warn_threshold,
                        bucket_error_critical: self.settings.bucket_error_critical_threshold,
                        min_samples: self.settings.calibration_min_samples,
                    };
                    let assessment = evaluate(&report, &thresholds);
                    self.notifier.notify(&assessment).await;
                }
                Err(e) => error!("calibration report failed: {e:#}"),
            }
        }
    }
}
