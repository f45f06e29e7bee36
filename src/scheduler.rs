// src/scheduler.rs
//! Background refresh jobs.
//!
//! Three jobs keep the cache fresh without any inbound request:
//! - startup: one freshness check (`get`) right away;
//! - daily: `force_refresh` at a wall-clock time in a given zone;
//! - interval: `force_refresh` every period, covering a daily run missed
//!   across a restart.
//!
//! Job failures are logged and never stop the loop or touch the last good
//! result.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cache::FreshnessCache;
use crate::config::AppConfig;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// A repeatable job; each call produces one run.
pub type Task = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

pub trait Scheduler {
    fn schedule_daily(&self, at: NaiveTime, zone: Tz, task: Task) -> JoinHandle<()>;
    fn schedule_interval(&self, period: Duration, task: Task) -> JoinHandle<()>;
    fn run_once(&self, task: Task) -> JoinHandle<()>;
}

/// Resolve a local wall-clock time, stepping past a DST gap.
fn resolve_local(zone: Tz, date: NaiveDate, at: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(at);
    zone.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            zone.from_local_datetime(&(naive + ChronoDuration::hours(1)))
                .earliest()
        })
        .map(|t| t.with_timezone(&Utc))
}

/// First instant strictly after `now` at which the zone's clock reads `at`.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime, zone: Tz) -> DateTime<Utc> {
    let mut date = now.with_timezone(&zone).date_naive();
    for _ in 0..3 {
        if let Some(t) = resolve_local(zone, date, at).filter(|t| *t > now) {
            return t;
        }
        match date.succ_opt() {
            Some(d) => date = d,
            None => break,
        }
    }
    now + ChronoDuration::days(1)
}

/// Runs jobs as tokio tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_daily(&self, at: NaiveTime, zone: Tz, task: Task) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_daily_run(now, at, zone);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tracing::debug!(target: "scheduler", next = %next, "daily job armed");
                tokio::time::sleep(wait).await;
                task().await;
            }
        })
    }

    fn schedule_interval(&self, period: Duration, task: Task) -> JoinHandle<()> {
        tokio::spawn(async move {
            // First run one full period from now.
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task().await;
            }
        })
    }

    fn run_once(&self, task: Task) -> JoinHandle<()> {
        tokio::spawn(async move { task().await })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPlan {
    pub daily_at: NaiveTime,
    pub zone: Tz,
    pub interval: Duration,
}

impl RefreshPlan {
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            daily_at: cfg.daily_time()?,
            zone: cfg.zone()?,
            interval: cfg.refresh_interval(),
        })
    }
}

fn startup_task(cache: Arc<FreshnessCache>) -> Task {
    Arc::new(move || {
        let cache = Arc::clone(&cache);
        Box::pin(async move {
            tracing::info!(target: "scheduler", state = ?cache.state(), "startup cache check");
            let r = cache.get().await;
            tracing::info!(target: "scheduler", computed_at = %r.computed_at, "startup cache ready");
        })
    })
}

fn refresh_task(cache: Arc<FreshnessCache>, job: &'static str) -> Task {
    Arc::new(move || {
        let cache = Arc::clone(&cache);
        Box::pin(async move {
            tracing::info!(target: "scheduler", job, "scheduled analysis starting");
            match cache.try_force_refresh().await {
                Ok(r) => {
                    tracing::info!(target: "scheduler", job, computed_at = %r.computed_at, "scheduled analysis completed")
                }
                Err(e) => {
                    tracing::warn!(target: "scheduler", job, error = %format!("{e:#}"), "scheduled analysis failed; keeping last result")
                }
            }
        })
    })
}

/// Wire the startup, daily and interval jobs for `cache`.
pub fn spawn_refresh_jobs(
    scheduler: &dyn Scheduler,
    cache: Arc<FreshnessCache>,
    plan: RefreshPlan,
) -> Vec<JoinHandle<()>> {
    tracing::info!(
        target: "scheduler",
        daily_at = %plan.daily_at,
        zone = %plan.zone,
        interval_secs = plan.interval.as_secs(),
        "refresh jobs scheduled"
    );
    vec![
        scheduler.run_once(startup_task(Arc::clone(&cache))),
        scheduler.schedule_daily(
            plan.daily_at,
            plan.zone,
            refresh_task(Arc::clone(&cache), "daily"),
        ),
        scheduler.schedule_interval(plan.interval, refresh_task(cache, "interval")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::US::Eastern;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn next_run_same_day_before_noon() {
        // 2025-06-10 14:00 UTC = 10:00 EDT
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap();
        let next = next_daily_run(now, noon(), Eastern);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 10, 16, 0, 0).unwrap());
    }

    #[test]
    fn next_run_rolls_to_tomorrow_after_noon() {
        // 2025-01-10 18:00 UTC = 13:00 EST
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 18, 0, 0).unwrap();
        let next = next_daily_run(now, noon(), Eastern);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 11, 17, 0, 0).unwrap());
    }

    #[test]
    fn exactly_at_run_time_schedules_next_day() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 17, 0, 0).unwrap();
        let next = next_daily_run(now, noon(), Eastern);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 11, 17, 0, 0).unwrap());
    }

    #[test]
    fn dst_gap_steps_forward() {
        // 2025-03-09 02:30 does not exist in US/Eastern.
        let at = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 5, 0, 0).unwrap();
        let next = next_daily_run(now, at, Eastern);
        // 03:30 EDT = 07:30 UTC
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 9, 7, 30, 0).unwrap());
    }

    fn counting_task(n: Arc<AtomicUsize>) -> Task {
        Arc::new(move || {
            let n = Arc::clone(&n);
            Box::pin(async move {
                n.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn interval_waits_a_full_period_first() {
        let runs = Arc::new(AtomicUsize::new(0));
        let h = TokioScheduler.schedule_interval(Duration::from_secs(60), counting_task(runs.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        h.abort();
    }

    #[tokio::test]
    async fn run_once_runs_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        TokioScheduler
            .run_once(counting_task(runs.clone()))
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
