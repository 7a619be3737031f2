//! Link com o rádio: conexão única, reconexão com backoff exponencial.
//!
//! O [`Radio`] concreto fica atrás de um mutex. `receive` faz polls curtos
//! e solta o lock entre eles, então o writer nunca espera mais que um poll.
//! Falhas de E/S viram reconexão transparente; passado o teto de tentativas
//! o link devolve [`LinkError::Lost`] uma única vez e fica fechado.

use crate::shutdown::Shutdown;
use meshgotchi_core::config::LinkConfig;
use meshgotchi_core::{InboundFrame, NodeId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pausa do `receive` quando há envio aguardando o lock.
const YIELD_TO_SENDER: Duration = Duration::from_millis(5);

/// Erro do driver do rádio.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("Erro de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rádio respondeu com erro: {0}")]
    Device(String),

    #[error("Rádio não respondeu em {0:?}")]
    Timeout(Duration),
}

/// Driver do rádio. Implementado por `meshcli::MeshCliRadio` e pelo rádio
/// falso dos testes.
pub trait Radio: Send {
    /// Abre a conexão e aplica o preset.
    fn connect(&mut self) -> Result<(), RadioError>;

    /// Transmite um frame.
    fn transmit(&mut self, frame: &Outbound) -> Result<(), RadioError>;

    /// Espera até `timeout` pelo próximo frame.
    fn poll(&mut self, timeout: Duration) -> Result<Option<InboundFrame>, RadioError>;

    /// Libera o dispositivo.
    fn disconnect(&mut self);
}

/// Frame de saída.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Mensagem direta
    Text { to: NodeId, text: String },
    /// Anúncio de presença
    Advert { zero_hop: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Falha transitória: {0}")]
    Transient(RadioError),

    /// O firmware recusou este frame; o link continua de pé
    #[error("Frame recusado: {0}")]
    Rejected(RadioError),

    #[error("Link perdido após {attempts} falhas consecutivas")]
    Lost { attempts: u32 },

    #[error("Link fechado")]
    Closed,
}

// ──────────────────────────────────────────────
// Backoff
// ──────────────────────────────────────────────

/// Backoff exponencial com teto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Falhas consecutivas toleradas antes de `Lost`
    pub max_attempts: u32,
}

impl Backoff {
    pub fn from_config(cfg: &LinkConfig) -> Self {
        Self {
            initial: Duration::from_secs_f64(cfg.backoff_initial_secs),
            max: Duration::from_secs_f64(cfg.backoff_max_secs),
            max_attempts: cfg.max_reconnect_attempts,
        }
    }

    /// Atraso antes da tentativa seguinte à `failures`-ésima falha (≥ 1).
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << exp).min(self.max)
    }
}

// ──────────────────────────────────────────────
// TransportLink
// ──────────────────────────────────────────────

struct Inner {
    radio: Box<dyn Radio>,
    state: LinkState,
    /// Falhas consecutivas (conexão ou E/S)
    failures: u32,
}

pub struct TransportLink {
    inner: Mutex<Inner>,
    backoff: Backoff,
    poll: Duration,
    shutdown: Shutdown,
    waiting_senders: AtomicUsize,
    lost: AtomicBool,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransportLink({:?})", self.state())
    }
}

impl TransportLink {
    /// Conecta ao rádio, tentando com backoff até o teto.
    pub fn open(
        radio: Box<dyn Radio>,
        backoff: Backoff,
        poll: Duration,
        shutdown: Shutdown,
    ) -> Result<Self, LinkError> {
        let link = Self {
            inner: Mutex::new(Inner {
                radio,
                state: LinkState::Disconnected,
                failures: 0,
            }),
            backoff,
            poll,
            shutdown,
            waiting_senders: AtomicUsize::new(0),
            lost: AtomicBool::new(false),
        };
        {
            let mut inner = link.lock()?;
            link.ensure_connected(&mut inner)?;
        }
        info!("Rádio conectado");
        Ok(link)
    }

    pub fn state(&self) -> LinkState {
        match self.inner.lock() {
            Ok(inner) => inner.state,
            Err(_) => LinkState::Closed,
        }
    }

    /// `true` se o link já foi declarado perdido.
    pub fn was_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Envia um frame. Uma falha de E/S derruba a conexão e o envio é
    /// repetido uma vez após reconectar; a segunda falha volta como
    /// `Transient` e o frame é descartado.
    ///
    /// Recusa do firmware (contato desconhecido, por exemplo) volta como
    /// `Rejected` sem mexer na conexão nem no contador de falhas.
    pub fn send(&self, frame: &Outbound) -> Result<(), LinkError> {
        self.waiting_senders.fetch_add(1, Ordering::SeqCst);
        let guard = self.lock();
        self.waiting_senders.fetch_sub(1, Ordering::SeqCst);
        let mut inner = guard?;

        let mut retried = false;
        loop {
            self.ensure_connected(&mut inner)?;
            match inner.radio.transmit(frame) {
                Ok(()) => {
                    inner.failures = 0;
                    return Ok(());
                }
                Err(e @ RadioError::Device(_)) => {
                    debug!("Rádio recusou {frame:?}: {e}");
                    return Err(LinkError::Rejected(e));
                }
                Err(e) => {
                    self.mark_failed(&mut inner, &e);
                    if retried {
                        return Err(LinkError::Transient(e));
                    }
                    retried = true;
                }
            }
        }
    }

    /// Bloqueia até o próximo frame. Reconexões acontecem aqui dentro;
    /// só `Lost` e `Closed` chegam ao chamador.
    pub fn receive(&self) -> Result<InboundFrame, LinkError> {
        loop {
            if self.shutdown.is_triggered() {
                return Err(LinkError::Closed);
            }
            {
                let mut inner = self.lock()?;
                self.ensure_connected(&mut inner)?;
                let timeout = self.poll;
                match inner.radio.poll(timeout) {
                    Ok(Some(frame)) => {
                        inner.failures = 0;
                        return Ok(frame);
                    }
                    Ok(None) => inner.failures = 0,
                    Err(e) => self.mark_failed(&mut inner, &e),
                }
            }
            if self.waiting_senders.load(Ordering::SeqCst) > 0 {
                std::thread::sleep(YIELD_TO_SENDER);
            }
        }
    }

    /// Fecha o link e libera o rádio. Idempotente.
    pub fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state != LinkState::Closed {
                inner.radio.disconnect();
                inner.state = LinkState::Closed;
                info!("Link fechado");
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, LinkError> {
        self.inner.lock().map_err(|_| LinkError::Closed)
    }

    fn mark_failed(&self, inner: &mut Inner, err: &RadioError) {
        inner.failures += 1;
        if inner.state == LinkState::Connected {
            warn!("Rádio desconectado: {err}");
            inner.radio.disconnect();
            inner.state = LinkState::Disconnected;
        } else {
            debug!("Falha no rádio: {err}");
        }
    }

    fn ensure_connected(&self, inner: &mut Inner) -> Result<(), LinkError> {
        loop {
            match inner.state {
                LinkState::Connected => return Ok(()),
                LinkState::Closed => return Err(LinkError::Closed),
                LinkState::Disconnected => {}
            }

            if inner.failures >= self.backoff.max_attempts {
                error!("Desistindo do rádio após {} falhas consecutivas", inner.failures);
                inner.radio.disconnect();
                inner.state = LinkState::Closed;
                self.lost.store(true, Ordering::SeqCst);
                return Err(LinkError::Lost {
                    attempts: inner.failures,
                });
            }

            if inner.failures > 0 {
                let delay = self.backoff.delay(inner.failures);
                info!(
                    "Reconectando em {:.1}s (falha {}/{})",
                    delay.as_secs_f64(),
                    inner.failures,
                    self.backoff.max_attempts
                );
                if self.shutdown.wait(delay) {
                    inner.state = LinkState::Closed;
                    return Err(LinkError::Closed);
                }
            }

            match inner.radio.connect() {
                Ok(()) => {
                    if inner.failures > 0 {
                        info!("Rádio reconectado após {} falhas", inner.failures);
                    }
                    inner.state = LinkState::Connected;
                }
                Err(e) => {
                    inner.failures += 1;
                    warn!("Falha ao conectar no rádio: {e}");
                }
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use crate::testing::{FakeRadio, fast_backoff};

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let b = Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: 10,
        };
        let delays: Vec<u64> = (1..=8).map(|n| b.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(b.delay(200), Duration::from_secs(60));
    }

    #[test]
    fn reconnects_below_the_ceiling() {
        let (_trigger, shutdown) = shutdown::channel();
        let radio = FakeRadio::new();
        radio.fail_connects(4);
        let link = TransportLink::open(Box::new(radio.clone()), fast_backoff(5), Duration::from_millis(1), shutdown)
            .unwrap();
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(radio.connect_calls(), 5);

        // Primeiro poll bom zera o contador de falhas
        radio.push_text("BB22", "/help");
        assert_eq!(link.receive().unwrap().sender, node("BB22"));

        // Queda no meio da sessão: receive reconecta sem erro
        radio.fail_polls(1);
        radio.fail_connects(3);
        radio.push_text("AA11", "/stats");
        let frame = link.receive().unwrap();
        assert_eq!(frame.sender, node("AA11"));
        assert!(!link.was_lost());
    }

    #[test]
    fn lost_is_raised_exactly_once() {
        let (_trigger, shutdown) = shutdown::channel();
        let radio = FakeRadio::new();
        let link = TransportLink::open(Box::new(radio.clone()), fast_backoff(3), Duration::from_millis(1), shutdown)
            .unwrap();

        radio.fail_polls(1);
        radio.fail_connects(100);
        assert!(matches!(link.receive(), Err(LinkError::Lost { attempts: 3 })));
        assert!(link.was_lost());
        assert_eq!(link.state(), LinkState::Closed);

        // Depois disso só Closed
        assert!(matches!(link.receive(), Err(LinkError::Closed)));
        let msg = Outbound::Advert { zero_hop: true };
        assert!(matches!(link.send(&msg), Err(LinkError::Closed)));
    }

    #[test]
    fn open_fails_beyond_the_ceiling() {
        let (_trigger, shutdown) = shutdown::channel();
        let radio = FakeRadio::new();
        radio.fail_connects(3);
        let result = TransportLink::open(Box::new(radio.clone()), fast_backoff(3), Duration::from_millis(1), shutdown);
        assert!(matches!(result, Err(LinkError::Lost { attempts: 3 })));
        assert_eq!(radio.connect_calls(), 3);
    }

    #[test]
    fn send_retries_once_after_reconnect() {
        let (_trigger, shutdown) = shutdown::channel();
        let radio = FakeRadio::new();
        let link = TransportLink::open(Box::new(radio.clone()), fast_backoff(5), Duration::from_millis(1), shutdown)
            .unwrap();

        let msg = Outbound::Text { to: node("AA11"), text: "oi".into() };
        radio.fail_transmits(1);
        link.send(&msg).unwrap();
        assert_eq!(radio.sent(), vec![msg.clone()]);

        radio.fail_transmits(2);
        assert!(matches!(link.send(&msg), Err(LinkError::Transient(_))));
        assert_eq!(radio.sent().len(), 1);
        // Próximo envio volta a funcionar
        link.send(&msg).unwrap();
        assert_eq!(radio.sent().len(), 2);
    }

    #[test]
    fn firmware_rejection_keeps_the_link_up() {
        let (_trigger, shutdown) = shutdown::channel();
        let radio = FakeRadio::new();
        let link = TransportLink::open(Box::new(radio.clone()), fast_backoff(3), Duration::from_millis(1), shutdown)
            .unwrap();

        let msg = Outbound::Text { to: node("ZZ99"), text: "oi".into() };
        radio.reject_transmits(5);
        for _ in 0..5 {
            assert!(matches!(link.send(&msg), Err(LinkError::Rejected(_))));
        }
        assert_eq!(link.state(), LinkState::Connected);
        assert!(!link.was_lost());
        assert_eq!(radio.connect_calls(), 1);
        assert_eq!(radio.disconnect_calls(), 0);

        link.send(&msg).unwrap();
        assert_eq!(radio.sent(), vec![msg]);
    }

    #[test]
    fn shutdown_unblocks_receive_and_close_is_idempotent() {
        let (mut trigger, shutdown) = shutdown::channel();
        let radio = FakeRadio::new();
        let link = std::sync::Arc::new(
            TransportLink::open(Box::new(radio.clone()), fast_backoff(5), Duration::from_millis(2), shutdown)
                .unwrap(),
        );

        let pump = {
            let link = link.clone();
            std::thread::spawn(move || link.receive())
        };
        std::thread::sleep(Duration::from_millis(20));
        trigger.fire();
        assert!(matches!(pump.join().unwrap(), Err(LinkError::Closed)));

        link.close();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(radio.disconnect_calls(), 1);
    }
}
