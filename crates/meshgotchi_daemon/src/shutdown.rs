//! Sinal de encerramento compartilhado entre as threads.
//!
//! O gatilho guarda o único `Sender`; ao ser disparado (ou descartado) o
//! canal desconecta e toda espera em [`Shutdown`] retorna na hora.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::time::{Duration, Instant};

/// Lado que dispara o encerramento.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: Option<Sender<()>>,
}

impl ShutdownTrigger {
    pub fn fire(&mut self) {
        self.tx.take();
    }
}

/// Lado observado pelos workers.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Receiver<()>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = bounded(0);
    (ShutdownTrigger { tx: Some(tx) }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Dorme até `timeout`. Retorna `true` se o encerramento chegou antes.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }

    /// Dorme até o instante monotônico `deadline`.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.wait(deadline.saturating_duration_since(Instant::now()))
    }

    /// Canal para uso em `select!`: fica pronto quando desconecta.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
