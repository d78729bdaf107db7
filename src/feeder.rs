//! # Stage: Ingestion Feeder
//!
//! ## Responsibility
//! Simulates live data arrival by inserting one synthetic participant per
//! tick into the shared [`Store`].
//!
//! ## Guarantees
//! - First tick fires immediately, then once per `interval`
//! - Missed ticks are skipped, never bursted
//! - A failed insert is logged and dropped; the loop keeps going
//! - [`FeederHandle::stop`] cancels cleanly between ticks
//!
//! ## NOT Responsible For
//! - Retrying failed inserts
//! - Rate limiting or backpressure

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{NewParticipant, Participant};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Vocabularies
// ---------------------------------------------------------------------------

pub const DIAGNOSES: [&str; 5] = ["ADHD", "Autism", "Dyslexia", "Anxiety", "Depression"];
pub const STATES: [&str; 5] = ["NY", "CA", "TX", "FL", "IL"];
pub const GENDERS: [&str; 3] = ["Male", "Female", "Other"];

pub const MIN_AGE: i64 = 3;
pub const MAX_AGE: i64 = 18;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of `joined_at` timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// `A` followed by twelve uppercase hex digits of a fresh v4 UUID.
pub fn generate_external_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("A{}", hex[..12].to_uppercase())
}

fn pick<R: Rng + ?Sized>(rng: &mut R, vocab: &[&str]) -> String {
    vocab.choose(rng).copied().unwrap_or_default().to_string()
}

/// Build one random participant stamped with `joined_at`.
pub fn synthesize<R: Rng + ?Sized>(rng: &mut R, joined_at: NaiveDateTime) -> NewParticipant {
    NewParticipant {
        external_id: generate_external_id(),
        diagnosis: pick(rng, &DIAGNOSES),
        age: rng.gen_range(MIN_AGE..=MAX_AGE),
        gender: pick(rng, &GENDERS),
        state: pick(rng, &STATES),
        joined_at,
    }
}

// ---------------------------------------------------------------------------
// Feeder
// ---------------------------------------------------------------------------

pub struct Feeder {
    store: Store,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Feeder {
    /// Feeder on the default 30 s period with the system clock.
    pub fn new(store: Store) -> Self {
        Self {
            store,
            interval: DEFAULT_INTERVAL,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Synthesize and commit one participant.
    pub async fn tick(&self) -> Result<Participant> {
        let candidate = synthesize(&mut rand::thread_rng(), self.clock.now());
        let inserted = self.store.insert(candidate).await?;
        info!(
            external_id = %inserted.external_id,
            age = inserted.age,
            state = %inserted.state,
            "feeder inserted participant"
        );
        Ok(inserted)
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs_f64(), "feeder started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "feeder tick failed, will retry next tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("feeder stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> FeederHandle {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        FeederHandle { shutdown: tx, task }
    }
}

/// Owner of a running feeder task.
pub struct FeederHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FeederHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "feeder task ended abnormally");
        }
    }
}
