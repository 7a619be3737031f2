//! Genoma do pet.
//!
//! Função pura de `(dono, geração)`: o mesmo nó na mesma geração sempre
//! recebe o mesmo pet, e cada nova geração sorteia outra espécie.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Espécies possíveis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Robot,
    Alien,
    Monster,
    Creature,
    Spirit,
    Machine,
    Beast,
    Entity,
    Cyborg,
    Phantom,
}

impl Species {
    pub const ALL: [Species; 10] = [
        Species::Robot,
        Species::Alien,
        Species::Monster,
        Species::Creature,
        Species::Spirit,
        Species::Machine,
        Species::Beast,
        Species::Entity,
        Species::Cyborg,
        Species::Phantom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Robot => "robot",
            Self::Alien => "alien",
            Self::Monster => "monster",
            Self::Creature => "creature",
            Self::Spirit => "spirit",
            Self::Machine => "machine",
            Self::Beast => "beast",
            Self::Entity => "entity",
            Self::Cyborg => "cyborg",
            Self::Phantom => "phantom",
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Temperamento herdado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Temperament {
    Calm,
    Playful,
    Grumpy,
    Curious,
}

impl Temperament {
    const ALL: [Temperament; 4] = [
        Temperament::Calm,
        Temperament::Playful,
        Temperament::Grumpy,
        Temperament::Curious,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calm => "calm",
            Self::Playful => "playful",
            Self::Grumpy => "grumpy",
            Self::Curious => "curious",
        }
    }
}

/// Traços herdados e individuais de um pet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genome {
    /// Semente hex (16 bytes) derivada de dono + geração
    pub seed: String,
    pub species: Species,
    pub temperament: Temperament,
    /// Índice de paleta/marcas (0–7)
    pub markings: u8,
}

/// Gera o genoma de `node` na geração `generation`.
pub fn generate(node: &NodeId, generation: u32) -> Genome {
    let digest = Sha256::digest(format!("{node}:{generation}").as_bytes());

    let seed = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let species = Species::ALL[head as usize % Species::ALL.len()];
    let temperament = Temperament::ALL[digest[4] as usize % Temperament::ALL.len()];

    Genome {
        seed,
        species,
        temperament,
        markings: digest[5] % 8,
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
