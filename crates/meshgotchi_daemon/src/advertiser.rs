//! Auto-anúncio do nó na malha: rajada na partida, depois um por período.

use crate::outbox::Outbox;
use crate::shutdown::Shutdown;
use meshgotchi_core::config::AdvertConfig;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    SteadyState,
}

pub struct AdvertisingScheduler {
    outbox: Outbox,
    phase: Phase,
    burst_count: u32,
    burst_delay: Duration,
    interval: Duration,
    zero_hop: bool,
    shutdown: Shutdown,
}

impl AdvertisingScheduler {
    pub fn new(outbox: Outbox, cfg: &AdvertConfig, shutdown: Shutdown) -> Self {
        Self {
            outbox,
            phase: Phase::Startup,
            burst_count: cfg.burst_count,
            burst_delay: Duration::from_secs_f64(cfg.burst_delay_secs.max(0.0)),
            interval: Duration::from_secs(cfg.interval_secs.max(1)),
            zero_hop: cfg.zero_hop,
            shutdown,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Um disparo. Em `Startup` enfileira a rajada inteira e passa para
    /// `SteadyState`; depois disso, um advert por chamada.
    ///
    /// Retorna quantos adverts foram enfileirados. Adverts não passam pelo
    /// rate limiter.
    pub fn fire(&mut self) -> u32 {
        match self.phase {
            Phase::Startup => {
                let mut queued = 0;
                for i in 0..self.burst_count {
                    if i > 0 && self.shutdown.wait(self.burst_delay) {
                        break;
                    }
                    if self.outbox.advert(self.zero_hop) {
                        queued += 1;
                    }
                }
                self.phase = Phase::SteadyState;
                info!("Rajada de anúncio: {queued}/{} advert(s)", self.burst_count);
                queued
            }
            Phase::SteadyState => {
                if self.outbox.advert(self.zero_hop) {
                    debug!("Re-anúncio enfileirado");
                    1
                } else {
                    warn!("Re-anúncio descartado");
                    0
                }
            }
        }
    }

    /// Rajada e depois um advert a cada `interval`, contado em relógio
    /// monotônico a partir do fim da rajada.
    pub fn run(mut self) {
        self.fire();
        debug!("Anunciador em {:?}", self.phase());
        let mut next = Instant::now() + self.interval;
        while !self.shutdown.wait_until(next) {
            self.fire();
            next += self.interval;
            // Atrasou mais de um período (suspensão): não recupera em rajada
            let now = Instant::now();
            if next <= now {
                next = now + self.interval;
            }
        }
        info!("Anunciador encerrado");
    }
}
