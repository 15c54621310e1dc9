//! Capabilities injected into the repository.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use uuid::Uuid;

/// Produces identity tokens for new sections.
pub trait UuidGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random (v4) UUIDs in hyphenated form.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4UuidGenerator;

impl UuidGenerator for V4UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.now.lock() {
            *current += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}
