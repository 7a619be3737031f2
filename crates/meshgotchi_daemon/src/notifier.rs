//! Avisos proativos aos donos: evolução de estágio e alertas de saúde e
//! higiene.
//!
//! Vai direto para a fila de saída, sem rate limiter; o cooldown por pet
//! é o que limita.

use crate::outbox::Outbox;
use crate::shutdown::Shutdown;
use meshgotchi_core::config::NotificationConfig;
use meshgotchi_core::game;
use meshgotchi_core::store::PetStore;
use meshgotchi_core::types::unix_now;
use meshgotchi_core::{NodeId, Timestamp};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct Notifier {
    store: Arc<dyn PetStore>,
    outbox: Outbox,
    config: NotificationConfig,
    shutdown: Shutdown,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn PetStore>,
        outbox: Outbox,
        config: NotificationConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            outbox,
            config,
            shutdown,
        }
    }

    /// Uma varredura. Retorna quantos avisos foram enfileirados.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let owners = match self.store.living_owners() {
            Ok(owners) => owners,
            Err(e) => {
                warn!("Varredura de avisos pulada: {e}");
                return 0;
            }
        };
        owners.iter().filter(|owner| self.notify(owner, now)).count()
    }

    fn notify(&self, owner: &NodeId, now: Timestamp) -> bool {
        let pet = match self.store.get(owner) {
            Ok(Some(pet)) => pet,
            Ok(None) => return false,
            Err(e) => {
                warn!("Aviso para {owner} pulado: {e}");
                return false;
            }
        };
        let Some(notice) = game::pending_notice(&pet, now, self.config.cooldown_secs) else {
            return false;
        };
        if !self.outbox.reply(owner, &notice.text()) {
            return false;
        }

        debug!("Aviso {notice:?} para {owner}");
        if let Err(e) = self
            .store
            .mutate(owner, &mut |pet| game::mark_notified(pet, notice, now))
        {
            // Sem o registro o aviso pode repetir na próxima varredura
            warn!("Falha ao registrar aviso de {owner}: {e}");
        }
        true
    }

    pub fn run(self) {
        if !self.config.enabled {
            info!("Avisos desativados");
            return;
        }
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        info!("Avisos a cada {}s", period.as_secs());
        let mut next = Instant::now() + period;
        while !self.shutdown.wait_until(next) {
            let sent = self.sweep(unix_now());
            if sent > 0 {
                info!("{sent} aviso(s) enfileirado(s)");
            }
            next = Instant::now() + period;
        }
        info!("Avisos encerrados");
    }
}
