//! Rate limit por remetente.
//!
//! Token bucket: cada nó começa com `capacity` tokens, cada resposta
//! consome um, e os tokens voltam continuamente a `rate` por segundo.
//! Buckets nascem na primeira mensagem e somem após `idle` sem atividade.
//! Nada disso é persistido.

use meshgotchi_core::NodeId;
use meshgotchi_core::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    rate: f64,
    idle: Duration,
    inner: Mutex<Buckets>,
}

#[derive(Debug, Default)]
struct Buckets {
    map: HashMap<NodeId, TokenBucket>,
    swept_at: Option<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: u32, rate: f64, idle: Duration) -> Self {
        Self {
            capacity: capacity as f64,
            rate,
            idle,
            inner: Mutex::new(Buckets::default()),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.capacity, cfg.refill_per_sec, Duration::from_secs(cfg.idle_evict_secs))
    }

    /// Consome um token de `sender`. `false` = estourou o limite.
    pub fn try_acquire(&self, sender: &NodeId, now: Instant) -> bool {
        let mut inner = self.lock();

        let due = inner
            .swept_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.idle);
        if due {
            evict(&mut inner, self.idle, now);
        }

        inner
            .map
            .entry(sender.clone())
            .or_insert_with(|| TokenBucket::new(self.capacity, self.rate, now))
            .take(now)
    }

    /// Remove buckets ociosos. Retorna quantos saíram.
    pub fn evict_idle(&self, now: Instant) -> usize {
        evict(&mut self.lock(), self.idle, now)
    }

    /// Buckets vivos.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// Um pânico no meio de um acquire não invalida os buckets: no pior
    /// caso um token fica sem descontar.
    fn lock(&self) -> MutexGuard<'_, Buckets> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Mutex do rate limit envenenado, recuperando");
            poisoned.into_inner()
        })
    }
}

fn evict(inner: &mut Buckets, idle: Duration, now: Instant) -> usize {
    let before = inner.map.len();
    inner
        .map
        .retain(|_, bucket| now.saturating_duration_since(bucket.used_at) < idle);
    inner.swept_at = Some(now);

    let removed = before - inner.map.len();
    if removed > 0 {
        debug!("{removed} bucket(s) ocioso(s) removido(s)");
    }
    removed
}

#[derive(Debug)]
struct TokenBucket {
    /// Tokens por segundo
    rate: f64,
    capacity: f64,
    tokens: f64,
    refilled_at: Instant,
    /// Última tentativa, aceita ou não
    used_at: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, rate: f64, now: Instant) -> Self {
        Self {
            rate,
            capacity,
            tokens: capacity,
            refilled_at: now,
            used_at: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.refilled_at);
        let tokens = elapsed.as_secs_f64() * self.rate;

        self.tokens = (self.tokens + tokens).min(self.capacity);
        self.refilled_at = self.refilled_at.max(now);
    }

    fn take(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.used_at = self.used_at.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
