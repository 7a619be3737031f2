//! # MeshAgotchi Core
//!
//! Crate compartilhada com os tipos do domínio, o protocolo de texto do
//! rádio, a configuração TOML, as regras do jogo e a persistência SQLite.
//!
//! ## Módulos
//! - [`types`] – Ids de nó, binding, contatos, frames, comandos, pets
//! - [`protocol`] – Decodificação da saída do rádio, parsing de comandos, saneamento
//! - [`config`] – Configuração unificada via TOML
//! - [`genetics`] – Genoma determinístico por dono/geração
//! - [`game`] – Decaimento, envelhecimento, ações e avisos
//! - [`store`] – Banco SQLite e traits de armazenamento

pub mod types;
pub mod protocol;
pub mod config;
pub mod genetics;
pub mod game;
pub mod store;

// Re-exports convenientes
pub use types::{Command, Contact, DeviceBinding, Endpoint, InboundFrame, NodeId, PetState, Timestamp};
pub use protocol::{ParseError, MAX_MESSAGE_BYTES};
pub use config::AppConfig;
pub use store::{BindingStore, ContactStore, Database, PetStore, StoreError};
