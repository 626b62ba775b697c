//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hanzo_pii_guard::{
    AnomalyEvent, AnomalyStore, Entity, EntityScanner, GenerationClient, GenerationError,
    PersistenceError, RecordId, ScanError, ScreeningResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Answers from a fixed table; unknown text is clean
#[derive(Default)]
pub struct TableScanner {
    table: HashMap<String, Vec<Entity>>,
    failure: Option<fn() -> ScanError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl TableScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, entities: Vec<Entity>) -> Self {
        self.table.insert(text.to_string(), entities);
        self
    }

    pub fn failing(mut self, failure: fn() -> ScanError) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts scanned so far, in order
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl EntityScanner for TableScanner {
    async fn scan(&self, text: &str) -> Result<ScreeningResult, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(text.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.failure {
            return Err(failure());
        }

        Ok(ScreeningResult::new(
            self.table.get(text).cloned().unwrap_or_default(),
        ))
    }

    fn name(&self) -> &str {
        "table"
    }
}

/// Generator with a canned reply
pub struct CannedGenerator {
    reply: Result<String, fn() -> GenerationError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CannedGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(failure: fn() -> GenerationError) -> Self {
        Self {
            reply: Err(failure),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for CannedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(failure) => Err(failure()),
        }
    }

    fn name(&self) -> &str {
        "canned"
    }
}

/// Store whose writes always fail, or never finish
pub struct BrokenStore {
    hang: bool,
    attempts: AtomicUsize,
}

impl BrokenStore {
    pub fn failing() -> Self {
        Self {
            hang: false,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnomalyStore for BrokenStore {
    async fn record(&self, _event: &AnomalyEvent) -> Result<RecordId, PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        Err(PersistenceError::Connection("connection refused".to_string()))
    }

    fn kind(&self) -> &str {
        "broken"
    }
}
