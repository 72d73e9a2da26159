// src/updates/mod.rs

//! Update notifications and the periodic sync scheduler
//!
//! After a sync, [`UpdatesNotificationManager::check`] publishes the
//! installed packages that have a strictly newer version available.
//! [`UpdateScheduler`] decides when the next automatic sync is due; its
//! state (interval and time of the last check) lives in the struct and in
//! the settings table, never in globals.

use crate::db::Storage;
use crate::error::Result;
use crate::events::{Event, EventBus, PackageRef};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tracing::{debug, info, warn};

/// Settings key holding the RFC 3339 time of the last update check
pub const LAST_CHECK_KEY: &str = "last_update_check";

/// How often automatic syncs run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
pub enum UpdateInterval {
    #[serde(rename = "8h")]
    #[strum(serialize = "8h")]
    EightHours,
    #[default]
    #[serde(rename = "1d")]
    #[strum(serialize = "1d")]
    OneDay,
    #[serde(rename = "2d")]
    #[strum(serialize = "2d")]
    TwoDays,
    #[serde(rename = "4d")]
    #[strum(serialize = "4d")]
    FourDays,
    #[serde(rename = "1w")]
    #[strum(serialize = "1w")]
    OneWeek,
    #[serde(rename = "2w")]
    #[strum(serialize = "2w")]
    TwoWeeks,
    #[serde(rename = "never")]
    #[strum(serialize = "never")]
    Never,
}

impl UpdateInterval {
    /// `None` for [`UpdateInterval::Never`]
    pub fn duration(self) -> Option<Duration> {
        const HOUR: u64 = 3600;
        let hours = match self {
            Self::EightHours => 8,
            Self::OneDay => 24,
            Self::TwoDays => 48,
            Self::FourDays => 96,
            Self::OneWeek => 168,
            Self::TwoWeeks => 336,
            Self::Never => return None,
        };
        Some(Duration::from_secs(hours * HOUR))
    }
}

/// User-facing sentence announcing available updates
pub fn notification_text(packages: &[PackageRef]) -> String {
    match packages {
        [one] => format!("A new version of {} is available.", one.name),
        [first, second] => format!(
            "New versions of {} and {} are available.",
            first.name, second.name
        ),
        _ => format!("New versions are available for {} packages.", packages.len()),
    }
}

/// Computes and announces available updates
pub struct UpdatesNotificationManager {
    storage: Arc<Storage>,
    events: EventBus,
    /// Set carried by the last announcement
    announced: Mutex<HashSet<PackageRef>>,
}

impl UpdatesNotificationManager {
    pub fn new(storage: Arc<Storage>, events: EventBus) -> Self {
        Self {
            storage,
            events,
            announced: Mutex::new(HashSet::new()),
        }
    }

    /// Newest known version of every installed package that has one newer
    /// than what is installed
    pub fn available_updates(&self) -> Result<Vec<PackageRef>> {
        Ok(self
            .storage
            .upgradable()?
            .into_iter()
            .map(|(_, newest)| newest.to_ref())
            .collect())
    }

    /// Emit [`Event::UpdatesAvailable`] when the set of available updates
    /// is non-empty and differs from the one last announced
    pub fn check(&self) -> Result<Vec<PackageRef>> {
        let packages = self.available_updates()?;
        let current: HashSet<PackageRef> = packages.iter().cloned().collect();
        let mut announced = self.announced.lock();
        if packages.is_empty() {
            debug!("No updates available");
        } else if *announced == current {
            debug!("{} known updates, already announced", packages.len());
        } else {
            info!("{}", notification_text(&packages));
            self.events.emit(Event::UpdatesAvailable {
                packages: packages.clone(),
            });
        }
        *announced = current;
        Ok(packages)
    }
}

/// Timing state for automatic syncs
pub struct UpdateScheduler {
    storage: Arc<Storage>,
    interval: UpdateInterval,
    last_check: Option<DateTime<Utc>>,
}

impl UpdateScheduler {
    /// Load the last check time from the settings table
    pub fn load(storage: Arc<Storage>, interval: UpdateInterval) -> Result<Self> {
        let last_check = match storage.setting(LAST_CHECK_KEY)? {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(e) => {
                    warn!("Ignoring invalid {} setting {:?}: {}", LAST_CHECK_KEY, raw, e);
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            storage,
            interval,
            last_check,
        })
    }

    pub fn interval(&self) -> UpdateInterval {
        self.interval
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    /// When the next automatic sync is due; `None` if disabled
    pub fn next_check(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = chrono::Duration::from_std(self.interval.duration()?).ok()?;
        Some(match self.last_check {
            Some(last) => last + interval,
            None => now,
        })
    }

    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        self.next_check(now).is_some_and(|next| now >= next)
    }

    pub fn time_until_next(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_check(now)
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Remember that a check ran at `at`, persisting it
    pub fn record_check(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.storage.set_setting(LAST_CHECK_KEY, &at.to_rfc3339())?;
        self.last_check = Some(at);
        Ok(())
    }

    /// Run `job` on a background thread whenever a check is due
    ///
    /// The check is recorded even when `job` fails so a broken repository
    /// does not cause back-to-back retries.
    pub fn spawn<F>(mut self, mut job: F) -> SchedulerHandle
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = std::thread::spawn(move || {
            info!("Update scheduler started ({})", self.interval);
            loop {
                let wait = match self.time_until_next(Utc::now()) {
                    Some(wait) => wait,
                    None => {
                        // Disabled: only wait for stop
                        let _ = stop_rx.recv();
                        break;
                    }
                };
                match stop_rx.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                if !self.should_run(Utc::now()) {
                    continue;
                }

                debug!("Running scheduled update check");
                if let Err(e) = job() {
                    warn!("Scheduled update check failed: {}", e);
                }
                if let Err(e) = self.record_check(Utc::now()) {
                    warn!("Failed to record update check time: {}", e);
                }
            }
            info!("Update scheduler stopped");
        });

        SchedulerHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

/// Owner of a running scheduler thread
pub struct SchedulerHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Cancel the pending wait and join the thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Update scheduler thread panicked");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Package;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pref(name: &str) -> PackageRef {
        PackageRef {
            id: None,
            name: name.into(),
            version: "1.0".into(),
        }
    }

    #[test]
    fn test_notification_text() {
        assert_eq!(notification_text(&[pref("foo")]), "A new version of foo is available.");
        assert_eq!(
            notification_text(&[pref("foo"), pref("bar")]),
            "New versions of foo and bar are available."
        );
        assert_eq!(
            notification_text(&[pref("a"), pref("b"), pref("c")]),
            "New versions are available for 3 packages."
        );
    }

    #[test]
    fn test_interval_strings() {
        assert_eq!(UpdateInterval::from_str("1w").unwrap(), UpdateInterval::OneWeek);
        assert_eq!(UpdateInterval::TwoDays.to_string(), "2d");
        assert!(UpdateInterval::from_str("3h").is_err());
        assert_eq!(
            UpdateInterval::EightHours.duration(),
            Some(Duration::from_secs(8 * 3600))
        );
        assert_eq!(UpdateInterval::Never.duration(), None);
    }

    #[test]
    fn test_check_emits_only_when_newer_exists() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let repo = storage.add_repository("mem:/r").unwrap().id();
        let comp = storage.upsert_component(repo, "main").unwrap().id();
        let mut old = Package::new(comp, "foo".into(), "1.0".into());
        let old_id = storage.upsert_package(&mut old).unwrap().id();
        let mut record = crate::db::models::InstalledRecord::new(
            old_id,
            "foo".into(),
            "1.0".into(),
            "/root".into(),
            "/m/foo.json".into(),
        );
        storage.record_install(&mut record).unwrap();

        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let manager = UpdatesNotificationManager::new(Arc::clone(&storage), bus);
        assert!(manager.check().unwrap().is_empty());
        assert!(rx.try_recv().is_err());

        let mut new = Package::new(comp, "foo".into(), "1.1".into());
        storage.upsert_package(&mut new).unwrap();
        let found = manager.check().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version, "1.1");
        assert!(matches!(rx.try_recv().unwrap(), Event::UpdatesAvailable { .. }));

        // Same set again stays quiet but is still reported to the caller
        assert_eq!(manager.check().unwrap().len(), 1);
        assert!(rx.try_recv().is_err());

        let mut newer = Package::new(comp, "foo".into(), "1.2".into());
        storage.upsert_package(&mut newer).unwrap();
        assert_eq!(manager.check().unwrap()[0].version, "1.2");
        assert!(matches!(rx.try_recv().unwrap(), Event::UpdatesAvailable { .. }));
    }

    #[test]
    fn test_schedule_from_persisted_last_check() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let now = Utc::now();

        let fresh = UpdateScheduler::load(Arc::clone(&storage), UpdateInterval::OneDay).unwrap();
        assert!(fresh.should_run(now));

        let mut scheduler =
            UpdateScheduler::load(Arc::clone(&storage), UpdateInterval::OneDay).unwrap();
        scheduler.record_check(now).unwrap();
        assert!(!scheduler.should_run(now + chrono::Duration::hours(23)));
        assert!(scheduler.should_run(now + chrono::Duration::hours(24)));

        let reloaded = UpdateScheduler::load(Arc::clone(&storage), UpdateInterval::OneDay).unwrap();
        assert_eq!(reloaded.last_check().map(|t| t.timestamp()), Some(now.timestamp()));

        let disabled = UpdateScheduler::load(storage, UpdateInterval::Never).unwrap();
        assert!(!disabled.should_run(now + chrono::Duration::weeks(10)));
        assert_eq!(disabled.next_check(now), None);
    }

    #[test]
    fn test_spawned_scheduler_runs_due_job_and_stops() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let scheduler =
            UpdateScheduler::load(Arc::clone(&storage), UpdateInterval::EightHours).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let (ran_tx, ran_rx) = mpsc::channel();

        let counter = Arc::clone(&runs);
        let handle = scheduler.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = ran_tx.send(());
            Ok(())
        });
        ran_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.stop();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(storage.setting(LAST_CHECK_KEY).unwrap().is_some());
    }

    #[test]
    fn test_disabled_scheduler_stops_promptly() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let scheduler = UpdateScheduler::load(storage, UpdateInterval::Never).unwrap();
        let handle = scheduler.spawn(|| panic!("must not run"));
        handle.stop();
    }
}
