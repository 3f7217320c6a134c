//! In-progress marker tracking.
//!
//! A single timestamp in the settings document says "a backup is active".
//! The marker must never end up inside a database snapshot: a restored
//! snapshot would then report an active backup forever. `pre_dump` hides
//! the marker for the duration of the dump and `post_dump` puts it back.

use crate::error::Result;
use crate::notice::{Notice, Severity};
use crate::settings::SettingsStore;
use std::sync::{Arc, Mutex};

/// Backups rarely take this long; past it the notice stops tracking.
const STALE_AFTER_SECS: i64 = 15 * 60;

pub struct InProgressTracker {
    store: Arc<dyn SettingsStore>,
    /// Marker value captured by `pre_dump`, restored by `post_dump`.
    hidden: Mutex<Option<i64>>,
}

impl InProgressTracker {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            hidden: Mutex::new(None),
        }
    }

    /// Record that a backup started. Defaults to the current time.
    pub fn set(&self, started_at: Option<i64>) -> Result<()> {
        let mut doc = self.store.get()?;
        doc.in_progress = Some(started_at.unwrap_or_else(now));
        self.store.save(&doc)
    }

    pub fn get(&self) -> Result<Option<i64>> {
        Ok(self.store.get()?.in_progress)
    }

    /// Clear the marker. Safe to call when none is set.
    pub fn end(&self) -> Result<()> {
        let mut doc = self.store.get()?;
        if doc.in_progress.take().is_some() {
            self.store.save(&doc)?;
        }
        Ok(())
    }

    /// Append a "backup in progress" notice when a marker is present.
    ///
    /// Past the staleness threshold the notice gains a closing remark and
    /// the marker is cleared, so the remark appears exactly once.
    pub fn add_notice(&self, mut notices: Vec<Notice>) -> Result<Vec<Notice>> {
        let Some(started_at) = self.get()? else {
            return Ok(notices);
        };

        let elapsed = now() - started_at;
        let mut message = format!(
            "A backup of your site began {} ago.",
            format_elapsed(elapsed.max(0) as u64)
        );

        if elapsed > STALE_AFTER_SECS {
            message.push_str(
                " Most backups finish well before this, so we will stop tracking this one.",
            );
            self.end()?;
        }

        notices.push(Notice::new(message, Severity::Warning));
        Ok(notices)
    }

    /// Capture and clear the marker just before the database is dumped.
    pub fn pre_dump(&self) -> Result<()> {
        let current = self.get()?;
        {
            let mut hidden = self
                .hidden
                .lock()
                .map_err(|_| anyhow::anyhow!("tracker mutex poisoned"))?;
            *hidden = current;
        }
        self.end()
    }

    /// Restore the marker captured by `pre_dump`, if any.
    pub fn post_dump(&self) -> Result<()> {
        let captured = {
            let mut hidden = self
                .hidden
                .lock()
                .map_err(|_| anyhow::anyhow!("tracker mutex poisoned"))?;
            hidden.take()
        };
        if let Some(started_at) = captured {
            self.set(Some(started_at))?;
        }
        Ok(())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Human-readable duration, coarsest unit only ("5 minutes", "2 hours").
pub fn format_elapsed(secs: u64) -> String {
    const UNITS: &[(u64, &str)] = &[(86_400, "day"), (3_600, "hour"), (60, "minute")];

    for &(size, name) in UNITS {
        if secs >= size {
            let count = secs / size;
            return if count == 1 {
                format!("1 {name}")
            } else {
                format!("{count} {name}s")
            };
        }
    }
    if secs == 1 {
        "1 second".into()
    } else {
        format!("{secs} seconds")
    }
}
