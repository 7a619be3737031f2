//! Fila única de saída e a thread que escreve no rádio.
//!
//! Respostas, adverts e avisos entram aqui; só o writer chama
//! `TransportLink::send`, então nada disputa o rádio half-duplex.

use crate::link::{LinkError, Outbound, TransportLink};
use crate::shutdown::Shutdown;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use meshgotchi_core::NodeId;
use meshgotchi_core::protocol::{number_parts, sanitize_text};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Vagas da fila de adverts, separada da fila de respostas.
const ADVERT_SLOTS: usize = 16;

#[derive(Debug, Clone)]
pub struct Outbox {
    texts: Sender<Outbound>,
    adverts: Sender<Outbound>,
    max_bytes: usize,
}

/// Ponta do writer. Adverts têm fila própria e saem antes das respostas,
/// então tráfego de entrada não tira o lugar do re-anúncio.
#[derive(Debug)]
pub struct OutboxReceiver {
    texts: Receiver<Outbound>,
    adverts: Receiver<Outbound>,
}

impl OutboxReceiver {
    pub fn try_recv(&self) -> Option<Outbound> {
        self.adverts
            .try_recv()
            .or_else(|_| self.texts.try_recv())
            .ok()
    }

    /// Esvazia o que já está enfileirado, adverts primeiro.
    pub fn try_iter(&self) -> impl Iterator<Item = Outbound> + '_ {
        std::iter::from_fn(move || self.try_recv())
    }

    pub fn len(&self) -> usize {
        self.texts.len() + self.adverts.len()
    }
}

impl Outbox {
    /// `capacity` vale para as respostas; adverts usam [`ADVERT_SLOTS`].
    pub fn new(capacity: usize, max_bytes: usize) -> (Self, OutboxReceiver) {
        let (texts, texts_rx) = bounded(capacity);
        let (adverts, adverts_rx) = bounded(ADVERT_SLOTS);
        (
            Self {
                texts,
                adverts,
                max_bytes,
            },
            OutboxReceiver {
                texts: texts_rx,
                adverts: adverts_rx,
            },
        )
    }

    /// Enfileira sem bloquear. Fila cheia descarta o frame.
    pub fn enqueue(&self, msg: Outbound) -> bool {
        let queue = match msg {
            Outbound::Advert { .. } => &self.adverts,
            Outbound::Text { .. } => &self.texts,
        };
        match queue.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!("Fila de saída cheia, descartando {msg:?}");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Writer encerrado, frame descartado");
                false
            }
        }
    }

    /// Mensagem direta já saneada e cortada no limite de bytes.
    pub fn reply(&self, to: &NodeId, text: &str) -> bool {
        let text = sanitize_text(text, self.max_bytes);
        if text.is_empty() {
            return false;
        }
        self.enqueue(Outbound::Text {
            to: to.clone(),
            text,
        })
    }

    /// Resposta em várias partes, numeradas "(i/n)" e enviadas em ordem.
    pub fn reply_parts(&self, to: &NodeId, parts: &[String]) -> bool {
        number_parts(parts, self.max_bytes)
            .into_iter()
            .all(|text| {
                self.enqueue(Outbound::Text {
                    to: to.clone(),
                    text,
                })
            })
    }

    pub fn advert(&self, zero_hop: bool) -> bool {
        self.enqueue(Outbound::Advert { zero_hop })
    }
}

/// Inicia o writer. Mensagens de texto respeitam `min_interval` entre si;
/// adverts seguem o ritmo de quem os enfileirou.
pub fn spawn_writer(
    link: Arc<TransportLink>,
    rx: OutboxReceiver,
    min_interval: Duration,
    shutdown: Shutdown,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("radio-writer".into())
        .spawn(move || writer_loop(&link, &rx, min_interval, &shutdown))
}

fn writer_loop(
    link: &TransportLink,
    rx: &OutboxReceiver,
    min_interval: Duration,
    shutdown: &Shutdown,
) {
    let mut last_text: Option<Instant> = None;

    loop {
        if shutdown.is_triggered() {
            break;
        }
        let msg = match rx.adverts.try_recv() {
            Ok(msg) => msg,
            Err(_) => select! {
                recv(rx.adverts) -> msg => match msg {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
                recv(rx.texts) -> msg => match msg {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
                recv(shutdown.receiver()) -> _ => break,
            },
        };

        if let Outbound::Text { .. } = msg {
            if let Some(at) = last_text {
                if shutdown.wait_until(at + min_interval) {
                    break;
                }
            }
        }

        match link.send(&msg) {
            Ok(()) => {
                if let Outbound::Text { to, text } = &msg {
                    debug!("→ {to}: {} bytes", text.len());
                    last_text = Some(Instant::now());
                }
            }
            Err(LinkError::Transient(e)) => warn!("Envio descartado: {e}"),
            Err(e @ LinkError::Rejected(_)) => warn!("Envio descartado: {e}"),
            Err(e @ LinkError::Lost { .. }) => {
                error!("Writer parando: {e}");
                break;
            }
            Err(LinkError::Closed) => break,
        }
    }
    info!("Writer encerrado");
}
