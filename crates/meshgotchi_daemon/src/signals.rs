//! SIGINT/SIGTERM entregues num canal.
//!
//! A recepção fica com o `signals_receipts`: o handler só registra o
//! sinal e a thread interna dele repassa para o canal do supervisor.

use crossbeam_channel::Sender;
use signals_receipts::SignalNumber;
use signals_receipts::channel_notify_facility::{
    self, InstallError, SendError, SignalsChannel as _,
};
use std::io;

use self::channel_notify_facility_premade::SignalsChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `SIGINT`
    Interrupt,
    /// `SIGTERM`
    Terminate,
}

impl TryFrom<SignalNumber> for Signal {
    type Error = SignalNumber;

    fn try_from(value: SignalNumber) -> Result<Self, Self::Error> {
        match value {
            libc::SIGINT => Ok(Self::Interrupt),
            libc::SIGTERM => Ok(Self::Terminate),
            _ => Err(value),
        }
    }
}

signals_receipts::channel_notify_facility! {
    SIGINT
    SIGTERM
}

/// Adapta o `Sender` do crossbeam ao trait da facility, já convertendo o
/// número do sinal.
#[derive(Debug)]
struct Forward(Sender<Signal>);

impl channel_notify_facility::Sender for Forward {
    fn send(&self, sig_num: SignalNumber) -> Result<(), SendError> {
        match Signal::try_from(sig_num) {
            Ok(sig) => self.0.send(sig).or(Err(SendError::Disconnected)),
            Err(_) => Err(SendError::Ignored),
        }
    }
}

/// Instala os handlers. Só pode ser chamado uma vez por processo.
pub fn install(notify: Sender<Signal>) -> io::Result<()> {
    SignalsChannel::install_with_outside_channel(Forward(notify)).map_err(|e| match e {
        InstallError::AlreadyInstalled { unused_notify: _ } => io::Error::new(
            io::ErrorKind::AlreadyExists,
            "handlers de sinal já instalados",
        ),
        _ => io::Error::other(e),
    })
}
