#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use surcharge::{PercentageProvider, ProviderError};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Replays scripted answers, then keeps repeating the last one.
#[derive(Debug)]
pub struct ScriptedProvider {
    answers: Mutex<VecDeque<Result<Option<Decimal>, ProviderError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(answers: Vec<Result<Option<Decimal>, ProviderError>>) -> Arc<Self> {
        assert!(!answers.is_empty(), "script needs at least one answer");
        Arc::new(Self { answers: Mutex::new(answers.into()), calls: AtomicUsize::new(0) })
    }

    pub fn always_down() -> Arc<Self> {
        Self::new(vec![down()])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PercentageProvider for ScriptedProvider {
    async fn fetch(&self) -> Result<Option<Decimal>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut answers = self.answers.lock().unwrap();
        if answers.len() > 1 {
            answers.pop_front().unwrap()
        } else {
            answers.front().cloned().unwrap()
        }
    }
}

pub fn down() -> Result<Option<Decimal>, ProviderError> {
    Err(ProviderError::Failed("connection refused".into()))
}

pub fn up(value: Decimal) -> Result<Option<Decimal>, ProviderError> {
    Ok(Some(value))
}
