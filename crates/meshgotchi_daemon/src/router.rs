//! Roteamento de comandos: verbo → handler → resposta na fila de saída.
//!
//! O router só resolve o verbo, aplica o rate limit e enfileira a resposta.
//! As regras ficam em `meshgotchi_core::game`, o estado no pet store.

use crate::session::Session;
use meshgotchi_core::game::{self, replies};
use meshgotchi_core::genetics;
use meshgotchi_core::store::{PetStore, StoreError};
use meshgotchi_core::types::unix_now;
use meshgotchi_core::{Command, PetState, Timestamp};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info};

/// Resposta de um handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Várias mensagens, numeradas e enviadas em ordem
    Parts(Vec<String>),
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

/// Handler: (sessão, comando, pet atual se houver, agora).
type Handler = fn(&Session, &Command, Option<PetState>, Timestamp) -> Result<Reply, StoreError>;

struct Verb {
    handler: Handler,
    /// Carrega o pet antes de chamar o handler
    needs_pet: bool,
}

pub struct CommandRouter {
    verbs: HashMap<&'static str, Verb>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRouter {
    pub fn new() -> Self {
        let table: [(&'static str, Handler, bool); 9] = [
            ("help", help, false),
            ("howto", howto, false),
            ("hatch", hatch, true),
            ("stats", stats, true),
            ("feed", feed, true),
            ("clean", clean, true),
            ("play", play, true),
            ("status", status, true),
            ("name", name, true),
        ];
        let verbs = table
            .into_iter()
            .map(|(verb, handler, needs_pet)| (verb, Verb { handler, needs_pet }))
            .collect();
        Self { verbs }
    }

    /// Processa um comando. `None` quando o remetente estourou o rate limit.
    ///
    /// A resposta já sai enfileirada; o retorno serve para log e testes.
    pub fn dispatch(&self, session: &Session, cmd: &Command, now: Instant) -> Option<Reply> {
        if !session.limiter.try_acquire(&cmd.sender, now) {
            debug!("Rate limit: /{} de {} descartado", cmd.verb, cmd.sender);
            return None;
        }

        let reply = match self.verbs.get(cmd.verb.as_str()) {
            Some(verb) => {
                let result = if verb.needs_pet {
                    session
                        .store
                        .get(&cmd.sender)
                        .and_then(|pet| (verb.handler)(session, cmd, pet, unix_now()))
                } else {
                    (verb.handler)(session, cmd, None, unix_now())
                };
                result.unwrap_or_else(|e| {
                    error!("Erro no store ao processar /{} de {}: {e}", cmd.verb, cmd.sender);
                    replies::STORE_FAILURE.into()
                })
            }
            None => replies::WELCOME.into(),
        };

        let queued = match &reply {
            Reply::Text(text) => session.outbox.reply(&cmd.sender, text),
            Reply::Parts(parts) => session.outbox.reply_parts(&cmd.sender, parts),
        };
        if !queued {
            debug!("Resposta para {} não enfileirada", cmd.sender);
        }
        Some(reply)
    }
}

// ──────────────────────────────────────────────
// Handlers
// ──────────────────────────────────────────────

fn help(_: &Session, _: &Command, _: Option<PetState>, _: Timestamp) -> Result<Reply, StoreError> {
    Ok(replies::HELP.into())
}

fn howto(_: &Session, _: &Command, _: Option<PetState>, _: Timestamp) -> Result<Reply, StoreError> {
    Ok(Reply::Parts(replies::HOWTO.iter().map(|p| p.to_string()).collect()))
}

fn hatch(
    session: &Session,
    cmd: &Command,
    pet: Option<PetState>,
    now: Timestamp,
) -> Result<Reply, StoreError> {
    if pet.is_some_and(|p| p.alive) {
        return Ok(replies::ALREADY_ALIVE.into());
    }
    let generation = session.store.generations(&cmd.sender)? + 1;
    let genome = genetics::generate(&cmd.sender, generation);
    let pet = session.store.create(&cmd.sender, genome, now)?;
    info!(
        "{} chocou a geração {} ({})",
        cmd.sender, pet.generation, pet.genome.species
    );
    Ok(replies::hatched(pet.generation).into())
}

/// Pet vivo ou a resposta adequada para quem não tem um.
fn living(pet: Option<PetState>) -> Result<PetState, Reply> {
    match pet {
        None => Err(replies::NO_PET.into()),
        Some(p) if !p.alive => Err(replies::DEAD_PET.into()),
        Some(p) => Ok(p),
    }
}

fn stats(_: &Session, _: &Command, pet: Option<PetState>, _: Timestamp) -> Result<Reply, StoreError> {
    Ok(match living(pet) {
        Ok(pet) => game::stats_text(&pet).into(),
        Err(reply) => reply,
    })
}

fn status(_: &Session, _: &Command, pet: Option<PetState>, now: Timestamp) -> Result<Reply, StoreError> {
    Ok(match pet {
        None => replies::NO_PET.into(),
        Some(pet) => game::status_text(&pet, now).into(),
    })
}

/// Aplica `action` ao pet vivo e devolve `done`. Se o pet morreu entre
/// a leitura e a escrita, responde como pet morto.
fn with_living(
    session: &Session,
    cmd: &Command,
    pet: Option<PetState>,
    action: &mut dyn FnMut(&mut PetState),
    done: Reply,
) -> Result<Reply, StoreError> {
    if let Err(reply) = living(pet) {
        return Ok(reply);
    }
    Ok(match session.store.mutate(&cmd.sender, action)? {
        Some(_) => done,
        None => replies::DEAD_PET.into(),
    })
}

fn feed(session: &Session, cmd: &Command, pet: Option<PetState>, now: Timestamp) -> Result<Reply, StoreError> {
    with_living(session, cmd, pet, &mut |p| game::feed(p, now), replies::FED.into())
}

fn clean(session: &Session, cmd: &Command, pet: Option<PetState>, now: Timestamp) -> Result<Reply, StoreError> {
    with_living(session, cmd, pet, &mut |p| game::clean(p, now), replies::CLEANED.into())
}

fn play(session: &Session, cmd: &Command, pet: Option<PetState>, now: Timestamp) -> Result<Reply, StoreError> {
    let mut played = false;
    let reply = with_living(
        session,
        cmd,
        pet,
        &mut |p| played = game::play(p, now),
        replies::PLAYED.into(),
    )?;
    if reply == Reply::from(replies::PLAYED) && !played {
        return Ok(replies::TOO_TIRED.into());
    }
    Ok(reply)
}

fn name(session: &Session, cmd: &Command, pet: Option<PetState>, _: Timestamp) -> Result<Reply, StoreError> {
    let Some(new_name) = game::clean_name(&cmd.args, session.config.messages.name_max_chars) else {
        return Ok(match living(pet) {
            Ok(_) => replies::NAME_USAGE.into(),
            Err(reply) => reply,
        });
    };
    let done = replies::named(&new_name).into();
    with_living(session, cmd, pet, &mut |p| p.name = Some(new_name.clone()), done)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
