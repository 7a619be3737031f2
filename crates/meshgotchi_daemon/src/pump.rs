//! Pump de entrada: drena o link, descarta duplicatas, classifica e despacha.

use crate::link::LinkError;
use crate::router::{CommandRouter, Reply};
use crate::session::Session;
use meshgotchi_core::config::DedupConfig;
use meshgotchi_core::protocol::{self, Inbound};
use meshgotchi_core::types::{FrameKind, unix_now};
use meshgotchi_core::{InboundFrame, NodeId};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────
// Deduplicação
// ──────────────────────────────────────────────

type DedupKey = (NodeId, [u8; 32]);

/// Janela de deduplicação: ring buffer de `(remetente, hash)` com TTL.
///
/// O hash cobre tipo, sequência do transporte e payload, então a mesma
/// mensagem chegando por saltos diferentes colide, mas duas mensagens
/// iguais com sequências diferentes não. Frames sem sequência levam no
/// hash uma faixa de tempo grossa no lugar dela: um `/feed` repetido pelo
/// dono em outra faixa é mensagem nova.
#[derive(Debug)]
pub struct DedupCache {
    entries: VecDeque<(DedupKey, Instant)>,
    capacity: usize,
    ttl: Duration,
    bucket: Duration,
    /// Início da contagem das faixas; fixado no primeiro frame
    origin: Option<Instant>,
}

impl DedupCache {
    pub fn new(capacity: usize, ttl: Duration, bucket: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            ttl,
            bucket: bucket.max(Duration::from_secs(1)),
            origin: None,
        }
    }

    pub fn from_config(cfg: &DedupConfig) -> Self {
        Self::new(
            cfg.capacity,
            Duration::from_secs(cfg.ttl_secs),
            Duration::from_secs(cfg.bucket_secs),
        )
    }

    fn key(&mut self, frame: &InboundFrame, now: Instant) -> DedupKey {
        let mut hasher = Sha256::new();
        hasher.update([match frame.kind {
            FrameKind::Advert => b'A',
            FrameKind::Text => b'T',
        }]);
        match frame.seq {
            Some(seq) => {
                hasher.update(b"s");
                hasher.update(seq.to_be_bytes());
            }
            None => {
                let origin = *self.origin.get_or_insert(now);
                let bucket = now.saturating_duration_since(origin).as_secs() / self.bucket.as_secs();
                hasher.update(b"b");
                hasher.update(bucket.to_be_bytes());
            }
        }
        hasher.update(&frame.payload);
        (frame.sender.clone(), hasher.finalize().into())
    }

    /// `true` se o frame é novo (e passa a ser lembrado); `false` se é
    /// repetição dentro da janela.
    pub fn check(&mut self, frame: &InboundFrame, now: Instant) -> bool {
        while let Some((_, seen)) = self.entries.front() {
            if now.saturating_duration_since(*seen) < self.ttl {
                break;
            }
            self.entries.pop_front();
        }

        let key = self.key(frame, now);
        if self.entries.iter().any(|(k, _)| *k == key) {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((key, now));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ──────────────────────────────────────────────
// Pump
// ──────────────────────────────────────────────

/// O que aconteceu com um frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Duplicate,
    Invalid,
    /// Advert registrado; `true` se o nó é novo
    Contact(bool),
    /// Comando despachado; `None` se caiu no rate limit
    Command(Option<Reply>),
}

pub struct InboundPump {
    session: Arc<Session>,
    router: CommandRouter,
    dedup: DedupCache,
}

impl InboundPump {
    pub fn new(session: Arc<Session>) -> Self {
        let dedup = DedupCache::from_config(&session.config.dedup);
        Self {
            session,
            router: CommandRouter::new(),
            dedup,
        }
    }

    /// Processa um frame. Nunca falha: erros de parse são logados e o
    /// frame é descartado.
    pub fn handle_frame(&mut self, frame: InboundFrame, now: Instant) -> Handled {
        if !self.dedup.check(&frame, now) {
            debug!("Duplicata de {} descartada", frame.sender);
            return Handled::Duplicate;
        }

        match protocol::classify(&frame) {
            Ok(Inbound::Advert { node, name }) => {
                Handled::Contact(self.session.contacts.upsert(&node, name.as_deref(), unix_now()))
            }
            Ok(Inbound::Command(cmd)) => {
                self.session.contacts.upsert(&cmd.sender, None, unix_now());
                debug!("← {}: /{} {:?}", cmd.sender, cmd.verb, cmd.args);
                Handled::Command(self.router.dispatch(&self.session, &cmd, now))
            }
            Err(e) => {
                debug!("Frame de {} ignorado: {e}", frame.sender);
                Handled::Invalid
            }
        }
    }

    /// Loop até o link fechar. `Err` só para link perdido.
    pub fn run(mut self) -> Result<(), LinkError> {
        info!("Pump de entrada iniciado");
        loop {
            match self.session.link.receive() {
                Ok(frame) => {
                    self.handle_frame(frame, Instant::now());
                }
                Err(LinkError::Closed) => {
                    info!("Pump encerrado");
                    return Ok(());
                }
                Err(e @ LinkError::Lost { .. }) => {
                    warn!("Pump parando: {e}");
                    return Err(e);
                }
                // receive não devolve esses, mas não vale derrubar o pump por isso
                Err(e @ (LinkError::Transient(_) | LinkError::Rejected(_))) => {
                    warn!("Erro inesperado no receive: {e}")
                }
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
