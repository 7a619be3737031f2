//! Pareamento do rádio: escolha do endpoint e persistência do binding.
//!
//! ```text
//!  NoBinding ──[start]──▶ Discovering ──[found]──▶ AwaitingSelection
//!                             ▲                        │      │
//!                             └───────[rescan]─────────┘      │
//!                                              [serial]       [BLE]
//!                                                 │            ▼
//!                                                 │     AwaitingPairCode
//!                                                 ▼            │
//!                                               Paired ◀──[code]┘
//! ```
//!
//! A máquina de estados é pura; [`run_pairing`] faz a E/S (varredura do
//! `/dev` e prompts) e alimenta os eventos.

use meshgotchi_core::store::{BindingStore, StoreError};
use meshgotchi_core::{DeviceBinding, Endpoint};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::{info, warn};

/// Prefixos de dispositivos seriais aceitos.
const SERIAL_PREFIXES: [&str; 2] = ["ttyUSB", "ttyACM"];

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Evento {event} inválido no estado {state}")]
    UnexpectedEvent { state: &'static str, event: &'static str },

    #[error("Opção {0} não existe")]
    InvalidSelection(usize),

    #[error("Endereço BLE inválido: {0:?}")]
    InvalidAddress(String),

    #[error("Pareamento cancelado")]
    Aborted,

    #[error("Erro de E/S: {0}")]
    Io(#[from] io::Error),

    #[error("Falha ao gravar o binding: {0}")]
    Store(#[from] StoreError),
}

// ──────────────────────────────────────────────
// Máquina de estados
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    NoBinding,
    Discovering,
    AwaitingSelection { candidates: Vec<Endpoint> },
    AwaitingPairCode { endpoint: Endpoint },
    Paired(DeviceBinding),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    Start,
    Discovered(Vec<Endpoint>),
    /// Índice (base 0) na lista de candidatos
    Selected(usize),
    /// Endpoint digitado pelo usuário
    Manual(Endpoint),
    Rescan,
    /// Código vazio vira `None`
    PairCode(String),
}

impl PairingState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoBinding => "NoBinding",
            Self::Discovering => "Discovering",
            Self::AwaitingSelection { .. } => "AwaitingSelection",
            Self::AwaitingPairCode { .. } => "AwaitingPairCode",
            Self::Paired(_) => "Paired",
        }
    }

    /// Aplica um evento. Em erro o estado não muda.
    pub fn on_event(&mut self, event: PairingEvent) -> Result<(), PairingError> {
        let next = match (&*self, event) {
            (Self::NoBinding, PairingEvent::Start) => Self::Discovering,
            (Self::Discovering, PairingEvent::Discovered(candidates)) => {
                Self::AwaitingSelection { candidates }
            }
            (Self::AwaitingSelection { candidates }, PairingEvent::Selected(i)) => {
                let endpoint = candidates
                    .get(i)
                    .cloned()
                    .ok_or(PairingError::InvalidSelection(i + 1))?;
                Self::chosen(endpoint)
            }
            (Self::AwaitingSelection { .. }, PairingEvent::Manual(endpoint)) => Self::chosen(endpoint),
            (Self::AwaitingSelection { .. }, PairingEvent::Rescan) => Self::Discovering,
            (Self::AwaitingPairCode { endpoint }, PairingEvent::PairCode(code)) => {
                let code = code.trim();
                Self::Paired(DeviceBinding {
                    endpoint: endpoint.clone(),
                    secret: (!code.is_empty()).then(|| code.to_string()),
                })
            }
            (state, event) => {
                return Err(PairingError::UnexpectedEvent {
                    state: state.name(),
                    event: event.name(),
                });
            }
        };
        *self = next;
        Ok(())
    }

    /// Serial pareia direto; BLE ainda pede o código.
    fn chosen(endpoint: Endpoint) -> Self {
        match endpoint {
            Endpoint::Serial(_) => Self::Paired(DeviceBinding {
                endpoint,
                secret: None,
            }),
            Endpoint::Ble(_) => Self::AwaitingPairCode { endpoint },
        }
    }
}

impl PairingEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Discovered(_) => "Discovered",
            Self::Selected(_) => "Selected",
            Self::Manual(_) => "Manual",
            Self::Rescan => "Rescan",
            Self::PairCode(_) => "PairCode",
        }
    }
}

// ──────────────────────────────────────────────
// Descoberta e entrada
// ──────────────────────────────────────────────

/// Portas seriais candidatas em `dev_dir`, ordenadas.
pub fn discover_serial(dev_dir: &Path) -> io::Result<Vec<Endpoint>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dev_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if SERIAL_PREFIXES.iter().any(|p| name.starts_with(p)) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found.into_iter().map(Endpoint::Serial).collect())
}

/// Valida um endereço BLE no formato `AA:BB:CC:DD:EE:FF`.
pub fn parse_ble_address(raw: &str) -> Option<String> {
    let addr = raw.trim().to_uppercase();
    let parts: Vec<&str> = addr.split(':').collect();
    let valid = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
    valid.then_some(addr)
}

fn read_line(input: &mut impl BufRead) -> Result<String, PairingError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(PairingError::Aborted);
    }
    Ok(line.trim().to_string())
}

/// Interpreta a resposta ao menu de seleção.
fn selection_event(answer: &str) -> Result<PairingEvent, PairingError> {
    if answer.eq_ignore_ascii_case("r") {
        return Ok(PairingEvent::Rescan);
    }
    if let Ok(n) = answer.parse::<usize>() {
        return match n {
            0 => Err(PairingError::InvalidSelection(0)),
            n => Ok(PairingEvent::Selected(n - 1)),
        };
    }
    parse_ble_address(answer)
        .map(|addr| PairingEvent::Manual(Endpoint::Ble(addr)))
        .ok_or_else(|| PairingError::InvalidAddress(answer.to_string()))
}

/// Pareamento interativo. Persiste e devolve o binding escolhido.
///
/// `dev_dir` é o diretório varrido por portas seriais (`/dev` em produção).
pub fn run_pairing(
    store: &dyn BindingStore,
    dev_dir: &Path,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<DeviceBinding, PairingError> {
    let mut state = PairingState::NoBinding;
    state.on_event(PairingEvent::Start)?;

    let binding = loop {
        let event = match &state {
            PairingState::Discovering => {
                let found = discover_serial(dev_dir).unwrap_or_else(|e| {
                    warn!("Não foi possível listar {}: {e}", dev_dir.display());
                    Vec::new()
                });
                PairingEvent::Discovered(found)
            }
            PairingState::AwaitingSelection { candidates } => {
                writeln!(output, "\nRádios encontrados:")?;
                if candidates.is_empty() {
                    writeln!(output, "  (nenhuma porta serial)")?;
                }
                for (i, endpoint) in candidates.iter().enumerate() {
                    writeln!(output, "  [{}] {endpoint}", i + 1)?;
                }
                write!(output, "Número da porta, endereço BLE (AA:BB:CC:DD:EE:FF) ou 'r' para procurar de novo: ")?;
                output.flush()?;
                match selection_event(&read_line(input)?) {
                    Ok(event) => event,
                    Err(e) => {
                        writeln!(output, "{e}")?;
                        continue;
                    }
                }
            }
            PairingState::AwaitingPairCode { endpoint } => {
                write!(output, "Código de pareamento de {endpoint} (vazio se não houver): ")?;
                output.flush()?;
                PairingEvent::PairCode(read_line(input)?)
            }
            PairingState::Paired(binding) => break binding.clone(),
            PairingState::NoBinding => PairingEvent::Start,
        };

        if let Err(e) = state.on_event(event) {
            writeln!(output, "{e}")?;
        }
    };

    store.save_binding(&binding)?;
    info!("Rádio pareado: {}", binding.endpoint);
    writeln!(output, "Pareado com {}", binding.endpoint)?;
    Ok(binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgotchi_core::Database;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn serial(path: &str) -> Endpoint {
        Endpoint::Serial(PathBuf::from(path))
    }

    #[test]
    fn serial_path_pairs_without_code() {
        let mut state = PairingState::NoBinding;
        state.on_event(PairingEvent::Start).unwrap();
        state
            .on_event(PairingEvent::Discovered(vec![serial("/dev/ttyUSB0")]))
            .unwrap();
        state.on_event(PairingEvent::Selected(0)).unwrap();
        assert_eq!(
            state,
            PairingState::Paired(DeviceBinding {
                endpoint: serial("/dev/ttyUSB0"),
                secret: None
            })
        );
    }

    #[test]
    fn ble_asks_for_a_code() {
        let mut state = PairingState::AwaitingSelection { candidates: vec![] };
        let ble = Endpoint::Ble("C2:2B:A1:D5:3E:B6".into());
        state.on_event(PairingEvent::Manual(ble.clone())).unwrap();
        assert_eq!(state.name(), "AwaitingPairCode");

        state.on_event(PairingEvent::PairCode(" 123456 ".into())).unwrap();
        assert_eq!(
            state,
            PairingState::Paired(DeviceBinding {
                endpoint: ble,
                secret: Some("123456".into())
            })
        );
    }

    #[test]
    fn bad_events_leave_the_state_alone() {
        let mut state = PairingState::AwaitingSelection {
            candidates: vec![serial("/dev/ttyACM0")],
        };
        assert!(matches!(
            state.on_event(PairingEvent::Selected(3)),
            Err(PairingError::InvalidSelection(4))
        ));
        assert!(matches!(
            state.on_event(PairingEvent::PairCode("1".into())),
            Err(PairingError::UnexpectedEvent { .. })
        ));
        assert_eq!(state.name(), "AwaitingSelection");

        state.on_event(PairingEvent::Rescan).unwrap();
        assert_eq!(state, PairingState::Discovering);
    }

    #[test]
    fn ble_address_validation() {
        assert_eq!(parse_ble_address(" c2:2b:a1:d5:3e:b6 ").as_deref(), Some("C2:2B:A1:D5:3E:B6"));
        assert_eq!(parse_ble_address("C2:2B:A1:D5:3E"), None);
        assert_eq!(parse_ble_address("G2:2B:A1:D5:3E:B6"), None);
    }

    #[test]
    fn discovery_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyUSB1", "ttyS0", "ttyACM0", "ttyUSB0", "null"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = discover_serial(dir.path()).unwrap();
        let names: Vec<String> = found.iter().map(|e| e.address()).collect();
        assert_eq!(
            names,
            vec![
                dir.path().join("ttyACM0").display().to_string(),
                dir.path().join("ttyUSB0").display().to_string(),
                dir.path().join("ttyUSB1").display().to_string(),
            ]
        );
    }

    #[test]
    fn interactive_session_persists_the_binding() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ttyUSB0"), b"").unwrap();
        let db = Database::memory().unwrap();

        // Opção inexistente, depois endereço BLE e código
        let mut input = Cursor::new("7\nc2:2b:a1:d5:3e:b6\n0000\n");
        let mut output = Vec::new();
        let binding = run_pairing(&db, dir.path(), &mut input, &mut output).unwrap();

        assert_eq!(binding.endpoint, Endpoint::Ble("C2:2B:A1:D5:3E:B6".into()));
        assert_eq!(binding.secret.as_deref(), Some("0000"));
        assert_eq!(db.load_binding().unwrap(), Some(binding));
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("[1] serial:"));
        assert!(shown.contains("Opção 7 não existe"));
    }

    #[test]
    fn closed_input_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::memory().unwrap();
        let result = run_pairing(&db, dir.path(), &mut Cursor::new(""), &mut Vec::new());
        assert!(matches!(result, Err(PairingError::Aborted)));
        assert_eq!(db.load_binding().unwrap(), None);
    }
}
