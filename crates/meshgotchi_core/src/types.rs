//! Tipos do domínio compartilhados entre o core e o daemon.
//!
//! Identificadores de nó, binding do rádio, contatos, frames recebidos,
//! comandos e o registro de cada pet.

use crate::genetics::Genome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Segundos desde a época UNIX (relógio de parede).
pub type Timestamp = u64;

/// Relógio de parede atual em segundos.
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ──────────────────────────────────────────────
// Identidade na malha
// ──────────────────────────────────────────────

/// Identificador de um nó da malha (ex: `!a1b2c3`, `0b2c2328618f`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Normaliza um id vindo do rádio. Retorna `None` para ids vazios
    /// ou com espaços internos.
    pub fn new(raw: &str) -> Option<Self> {
        let id = raw.trim();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ──────────────────────────────────────────────
// Binding do rádio
// ──────────────────────────────────────────────

/// Ponto de conexão com o rádio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    /// Porta serial (ex: `/dev/ttyUSB0`)
    Serial(PathBuf),
    /// Endereço BLE (ex: `C2:2B:A1:D5:3E:B6`)
    Ble(String),
}

impl Endpoint {
    /// Nome curto do tipo, usado na persistência.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serial(_) => "serial",
            Self::Ble(_) => "ble",
        }
    }

    /// Endereço/caminho sem o tipo.
    pub fn address(&self) -> String {
        match self {
            Self::Serial(path) => path.display().to_string(),
            Self::Ble(addr) => addr.clone(),
        }
    }

    /// Reconstrói a partir de `(kind, address)` persistidos.
    pub fn from_parts(kind: &str, address: &str) -> Option<Self> {
        match kind {
            "serial" => Some(Self::Serial(PathBuf::from(address))),
            "ble" => Some(Self::Ble(address.trim().to_uppercase())),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.address())
    }
}

/// Rádio pareado. No máximo um binding ativo é persistido.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub endpoint: Endpoint,
    /// Código de pareamento BLE, quando exigido
    pub secret: Option<String>,
}

// ──────────────────────────────────────────────
// Contatos
// ──────────────────────────────────────────────

/// Um par já visto na malha.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub node: NodeId,
    /// Nome anunciado no advert, se conhecido
    pub name: Option<String>,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

// ──────────────────────────────────────────────
// Frames e comandos
// ──────────────────────────────────────────────

/// Tipo de frame entregue pelo rádio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Anúncio de presença de outro nó
    Advert,
    /// Mensagem de texto direta
    Text,
}

/// Frame recebido do rádio. Vive só durante o processamento do pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub sender: NodeId,
    pub kind: FrameKind,
    pub payload: Vec<u8>,
    /// Sequência/timestamp atribuído pelo remetente, quando o rádio informa
    pub seq: Option<u64>,
    /// Nome anunciado (adverts)
    pub name: Option<String>,
}

impl InboundFrame {
    pub fn text(sender: NodeId, text: &str) -> Self {
        Self {
            sender,
            kind: FrameKind::Text,
            payload: text.as_bytes().to_vec(),
            seq: None,
            name: None,
        }
    }

    pub fn advert(sender: NodeId, name: Option<String>) -> Self {
        Self {
            sender,
            kind: FrameKind::Advert,
            payload: Vec::new(),
            seq: None,
            name,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// Comando já interpretado: verbo em minúsculas + argumento livre.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub sender: NodeId,
    /// Vazio para texto sem delimitador
    pub verb: String,
    pub args: String,
}

// ──────────────────────────────────────────────
// Pet
// ──────────────────────────────────────────────

/// Estágio de vida do pet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeStage {
    Egg,
    Child,
    Teen,
    Adult,
    Elder,
}

impl AgeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Egg => "egg",
            Self::Child => "child",
            Self::Teen => "teen",
            Self::Adult => "adult",
            Self::Elder => "elder",
        }
    }

    /// Próximo estágio, se houver.
    pub fn next(&self) -> Option<AgeStage> {
        match self {
            Self::Egg => Some(Self::Child),
            Self::Child => Some(Self::Teen),
            Self::Teen => Some(Self::Adult),
            Self::Adult => Some(Self::Elder),
            Self::Elder => None,
        }
    }
}

impl fmt::Display for AgeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "egg" => Ok(Self::Egg),
            "child" => Ok(Self::Child),
            "teen" => Ok(Self::Teen),
            "adult" => Ok(Self::Adult),
            "elder" => Ok(Self::Elder),
            other => Err(format!("estágio desconhecido: {other}")),
        }
    }
}

/// Atributos do pet, todos em 0–100.
///
/// Guardados como `f32` para que ticks curtos de decaimento acumulem;
/// as respostas exibem valores arredondados.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PetStats {
    /// Fome (maior = mais faminto)
    pub hunger: f32,
    /// Higiene (menor = mais sujo)
    pub hygiene: f32,
    pub happiness: f32,
    pub energy: f32,
    pub health: f32,
}

impl Default for PetStats {
    fn default() -> Self {
        Self {
            hunger: 50.0,
            hygiene: 50.0,
            happiness: 50.0,
            energy: 100.0,
            health: 100.0,
        }
    }
}

/// Registro de um pet. Pertence ao pet store.
#[derive(Debug, Clone, PartialEq)]
pub struct PetState {
    pub id: i64,
    pub owner: NodeId,
    pub generation: u32,
    pub genome: Genome,
    pub name: Option<String>,
    pub birth: Timestamp,
    /// Último passo de decaimento aplicado
    pub last_tick: Timestamp,
    /// Última interação do dono (feed/clean/play)
    pub last_interaction: Timestamp,
    pub stage: AgeStage,
    /// Estágio já anunciado ao dono (detecção de evolução)
    pub announced_stage: AgeStage,
    pub stats: PetStats,
    pub alive: bool,
    pub death_reason: Option<String>,
    pub last_notification: Option<Timestamp>,
}

impl PetState {
    /// Pet recém-chocado.
    pub fn hatch(owner: NodeId, generation: u32, genome: Genome, now: Timestamp) -> Self {
        Self {
            id: 0,
            owner,
            generation,
            genome,
            name: None,
            birth: now,
            last_tick: now,
            last_interaction: now,
            stage: AgeStage::Egg,
            announced_stage: AgeStage::Egg,
            stats: PetStats::default(),
            alive: true,
            death_reason: None,
            last_notification: None,
        }
    }

    /// Idade em horas.
    pub fn age_hours(&self, now: Timestamp) -> f64 {
        now.saturating_sub(self.birth) as f64 / 3600.0
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
