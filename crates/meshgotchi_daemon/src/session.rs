//! Contexto da sessão: tudo que os workers compartilham.
//!
//! Criado uma vez em `main` e passado por `Arc` para pump, agendadores e
//! writer. Nada aqui é global.

use crate::contacts::ContactRegistry;
use crate::limiter::RateLimiter;
use crate::link::TransportLink;
use crate::outbox::{Outbox, OutboxReceiver};
use crate::shutdown::Shutdown;
use meshgotchi_core::config::AppConfig;
use meshgotchi_core::store::{ContactStore, PetStore};
use std::sync::Arc;

pub struct Session {
    pub config: AppConfig,
    pub link: Arc<TransportLink>,
    pub outbox: Outbox,
    pub limiter: RateLimiter,
    pub contacts: ContactRegistry,
    pub store: Arc<dyn PetStore>,
    pub shutdown: Shutdown,
}

impl Session {
    /// Monta a sessão. O receptor devolvido alimenta o writer.
    pub fn new(
        config: AppConfig,
        link: Arc<TransportLink>,
        store: Arc<dyn PetStore>,
        contact_store: Arc<dyn ContactStore>,
        shutdown: Shutdown,
    ) -> (Self, OutboxReceiver) {
        let (outbox, rx) = Outbox::new(config.link.outbox_capacity, config.messages.max_bytes);
        let session = Self {
            limiter: RateLimiter::from_config(&config.rate_limit),
            contacts: ContactRegistry::load(contact_store),
            outbox,
            link,
            store,
            shutdown,
            config,
        };
        (session, rx)
    }
}
