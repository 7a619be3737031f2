//! Tick periódico de decaimento de todos os pets vivos.

use crate::shutdown::Shutdown;
use meshgotchi_core::game::DecayOutcome;
use meshgotchi_core::store::PetStore;
use meshgotchi_core::types::unix_now;
use meshgotchi_core::Timestamp;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Resumo de um tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub ticked: usize,
    pub died: usize,
    pub failed: usize,
}

pub struct DecayScheduler {
    store: Arc<dyn PetStore>,
    period: Duration,
    shutdown: Shutdown,
}

impl DecayScheduler {
    pub fn new(store: Arc<dyn PetStore>, period: Duration, shutdown: Shutdown) -> Self {
        Self {
            store,
            period,
            shutdown,
        }
    }

    /// Decai cada pet vivo até `now`, a partir do `last_tick` gravado de
    /// cada um. Falha de um pet é logada e não interrompe os demais.
    pub fn tick(&self, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();
        let owners = match self.store.living_owners() {
            Ok(owners) => owners,
            Err(e) => {
                warn!("Tick de decaimento pulado: {e}");
                return report;
            }
        };

        for owner in &owners {
            report.ticked += 1;
            match self.store.apply_decay_step(owner, now) {
                Ok(Some(DecayOutcome::Died(reason))) => {
                    info!("Pet de {owner} morreu: {reason}");
                    report.died += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Decaimento falhou para {owner}: {e}");
                    report.failed += 1;
                }
            }
        }
        debug!("Tick: {report:?}");
        report
    }

    /// Um tick por período, agendado no relógio monotônico. O primeiro
    /// tick sai logo na partida e cobre o tempo em que o daemon ficou fora.
    pub fn run(self) {
        info!("Decaimento a cada {}s", self.period.as_secs());
        let mut next = Instant::now();
        while !self.shutdown.wait_until(next) {
            next += self.period;
            let report = self.tick(unix_now());
            if report.died > 0 || report.failed > 0 {
                info!(
                    "Tick: {} pet(s), {} morte(s), {} falha(s)",
                    report.ticked, report.died, report.failed
                );
            }
        }
        info!("Decaimento encerrado");
    }
}
