//! Persistência em SQLite – binding do rádio, contatos, donos e pets.
//!
//! O daemon fala com o banco pelas traits [`PetStore`], [`ContactStore`]
//! e [`BindingStore`]; [`Database`] implementa as três sobre uma conexão
//! protegida por mutex, então cada chamada é serializada.

use crate::game::{self, DecayOutcome};
use crate::genetics::Genome;
use crate::types::{
    AgeStage, Contact, DeviceBinding, Endpoint, NodeId, PetState, PetStats, Timestamp,
};
use sqlite as sql;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Tempo máximo esperando o lock do arquivo.
const BUSY_TIMEOUT: Duration = Duration::from_secs(3);

/// Erros do armazenamento.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Erro SQLite: {0}")]
    Sql(#[from] sql::Error),

    #[error("Genoma inválido no banco: {0}")]
    Genome(#[from] bincode::Error),

    #[error("Registro corrompido: {0}")]
    Corrupt(String),

    #[error("Lock do banco envenenado")]
    Poisoned,
}

// ──────────────────────────────────────────────
// Traits consumidas pelo daemon
// ──────────────────────────────────────────────

/// Registro de pets por dono.
pub trait PetStore: Send + Sync {
    /// Pet mais recente do dono, vivo ou morto.
    fn get(&self, owner: &NodeId) -> Result<Option<PetState>, StoreError>;

    /// Cria a próxima geração do dono com o genoma dado.
    fn create(&self, owner: &NodeId, genome: Genome, now: Timestamp) -> Result<PetState, StoreError>;

    /// Decai o pet vivo do dono pelo tempo desde o `last_tick` gravado até
    /// `now`. Tempo parado (daemon fora do ar, tick que falhou) também conta.
    /// `None` se o dono não tem pet vivo.
    fn apply_decay_step(&self, owner: &NodeId, now: Timestamp) -> Result<Option<DecayOutcome>, StoreError>;

    /// Altera o pet vivo do dono e persiste. `None` se não houver.
    fn mutate(
        &self,
        owner: &NodeId,
        f: &mut dyn FnMut(&mut PetState),
    ) -> Result<Option<PetState>, StoreError>;

    /// Donos com pet vivo.
    fn living_owners(&self) -> Result<Vec<NodeId>, StoreError>;

    /// Quantas gerações o dono já chocou.
    fn generations(&self, owner: &NodeId) -> Result<u32, StoreError>;

    /// Marca o pet vivo do dono como morto. `false` se não havia.
    fn mark_dead(&self, owner: &NodeId, reason: &str) -> Result<bool, StoreError>;
}

/// Persistência do registro de contatos.
pub trait ContactStore: Send + Sync {
    fn load_contacts(&self) -> Result<Vec<Contact>, StoreError>;
    fn save_contact(&self, contact: &Contact) -> Result<(), StoreError>;
}

/// Persistência do rádio pareado.
pub trait BindingStore: Send + Sync {
    fn load_binding(&self) -> Result<Option<DeviceBinding>, StoreError>;
    /// Substitui o binding existente.
    fn save_binding(&self, binding: &DeviceBinding) -> Result<(), StoreError>;
}

// ──────────────────────────────────────────────
// Banco
// ──────────────────────────────────────────────

/// Roda `query` dentro de uma transação: commit no sucesso, rollback no erro.
fn transaction<T>(
    db: &sql::Connection,
    query: impl FnOnce(&sql::Connection) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    db.execute("BEGIN")?;

    match query(db) {
        Ok(result) => {
            db.execute("COMMIT")?;
            Ok(result)
        }
        Err(err) => {
            db.execute("ROLLBACK")?;
            Err(err)
        }
    }
}

/// Banco SQLite do daemon.
pub struct Database {
    db: Mutex<sql::ConnectionThreadSafe>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Database(..)")
    }
}

const PET_COLUMNS: &str = "id, owner, generation, genome, name, birth, last_tick, \
    last_interaction, stage, announced_stage, hunger, hygiene, happiness, energy, \
    health, alive, death_reason, last_notification";

impl Database {
    const SCHEMA: &'static str = include_str!("schema.sql");

    /// Abre (ou cria) o banco no caminho dado.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut db = sql::Connection::open_thread_safe(path.as_ref())?;
        db.set_busy_timeout(BUSY_TIMEOUT.as_millis() as usize)?;
        db.execute(Self::SCHEMA)?;
        info!("Banco aberto em {}", path.as_ref().display());

        Ok(Self { db: Mutex::new(db) })
    }

    /// Banco em memória (testes).
    pub fn memory() -> Result<Self, StoreError> {
        let db = sql::Connection::open_thread_safe(":memory:")?;
        db.execute(Self::SCHEMA)?;

        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, sql::ConnectionThreadSafe>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Pet mais recente do dono; com `living` filtra só os vivos.
    fn latest_pet(
        db: &sql::Connection,
        owner: &NodeId,
        living: bool,
    ) -> Result<Option<PetState>, StoreError> {
        let filter = if living { "AND alive = 1" } else { "" };
        let mut stmt = db.prepare(format!(
            "SELECT {PET_COLUMNS} FROM pets WHERE owner = ?1 {filter} ORDER BY id DESC LIMIT 1"
        ))?;
        stmt.bind((1, owner.as_str()))?;

        match stmt.into_iter().next() {
            Some(row) => Ok(Some(parse::pet(&row?)?)),
            None => Ok(None),
        }
    }

    fn save_pet(db: &sql::Connection, pet: &PetState) -> Result<(), StoreError> {
        let mut stmt = db.prepare(
            "UPDATE pets SET name = ?1, last_tick = ?2, last_interaction = ?3, stage = ?4,
                 announced_stage = ?5, hunger = ?6, hygiene = ?7, happiness = ?8,
                 energy = ?9, health = ?10, alive = ?11, death_reason = ?12,
                 last_notification = ?13
             WHERE id = ?14",
        )?;
        stmt.bind((1, pet.name.as_deref()))?;
        stmt.bind((2, pet.last_tick as i64))?;
        stmt.bind((3, pet.last_interaction as i64))?;
        stmt.bind((4, pet.stage.as_str()))?;
        stmt.bind((5, pet.announced_stage.as_str()))?;
        stmt.bind((6, pet.stats.hunger as f64))?;
        stmt.bind((7, pet.stats.hygiene as f64))?;
        stmt.bind((8, pet.stats.happiness as f64))?;
        stmt.bind((9, pet.stats.energy as f64))?;
        stmt.bind((10, pet.stats.health as f64))?;
        stmt.bind((11, pet.alive as i64))?;
        stmt.bind((12, pet.death_reason.as_deref()))?;
        stmt.bind((13, pet.last_notification.map(|t| t as i64)))?;
        stmt.bind((14, pet.id))?;
        stmt.next()?;

        if db.change_count() == 0 {
            return Err(StoreError::Corrupt(format!("pet {} sumiu do banco", pet.id)));
        }
        Ok(())
    }

    fn owner_generations(db: &sql::Connection, owner: &NodeId) -> Result<u32, StoreError> {
        let mut stmt = db.prepare("SELECT generations FROM owners WHERE node = ?1")?;
        stmt.bind((1, owner.as_str()))?;

        match stmt.into_iter().next() {
            Some(row) => Ok(row?.try_read::<i64, _>("generations")? as u32),
            None => Ok(0),
        }
    }
}

impl PetStore for Database {
    fn get(&self, owner: &NodeId) -> Result<Option<PetState>, StoreError> {
        let db = self.conn()?;
        Self::latest_pet(&db, owner, false)
    }

    fn create(&self, owner: &NodeId, genome: Genome, now: Timestamp) -> Result<PetState, StoreError> {
        let db = self.conn()?;
        let blob = bincode::serialize(&genome)?;

        transaction(&db, |db| {
            let mut stmt = db.prepare(
                "INSERT INTO owners (node, generations, created_at) VALUES (?1, 1, ?2)
                 ON CONFLICT (node) DO UPDATE SET generations = generations + 1",
            )?;
            stmt.bind((1, owner.as_str()))?;
            stmt.bind((2, now as i64))?;
            stmt.next()?;

            let generation = Self::owner_generations(db, owner)?;
            let mut pet = PetState::hatch(owner.clone(), generation, genome, now);

            let mut stmt = db.prepare(
                "INSERT INTO pets (owner, generation, genome, name, birth, last_tick,
                     last_interaction, stage, announced_stage, hunger, hygiene, happiness,
                     energy, health, alive, death_reason, last_notification)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?4, ?4, ?5, ?5, ?6, ?7, ?8, ?9, ?10, 1, NULL, NULL)",
            )?;
            stmt.bind((1, owner.as_str()))?;
            stmt.bind((2, generation as i64))?;
            stmt.bind((3, blob.as_slice()))?;
            stmt.bind((4, now as i64))?;
            stmt.bind((5, pet.stage.as_str()))?;
            stmt.bind((6, pet.stats.hunger as f64))?;
            stmt.bind((7, pet.stats.hygiene as f64))?;
            stmt.bind((8, pet.stats.happiness as f64))?;
            stmt.bind((9, pet.stats.energy as f64))?;
            stmt.bind((10, pet.stats.health as f64))?;
            stmt.next()?;

            let stmt = db.prepare("SELECT last_insert_rowid() AS id")?;
            if let Some(row) = stmt.into_iter().next() {
                pet.id = row?.try_read::<i64, _>("id")?;
            }
            debug!("Pet {} (geração {generation}) criado para {owner}", pet.id);
            Ok(pet)
        })
    }

    fn apply_decay_step(&self, owner: &NodeId, now: Timestamp) -> Result<Option<DecayOutcome>, StoreError> {
        let db = self.conn()?;
        let Some(mut pet) = Self::latest_pet(&db, owner, true)? else {
            return Ok(None);
        };
        // Relógio que voltou não gera decaimento negativo nem recua o last_tick
        let now = now.max(pet.last_tick);
        let elapsed_secs = now - pet.last_tick;
        let outcome = game::apply_decay(&mut pet, elapsed_secs, now);
        Self::save_pet(&db, &pet)?;
        Ok(Some(outcome))
    }

    fn mutate(
        &self,
        owner: &NodeId,
        f: &mut dyn FnMut(&mut PetState),
    ) -> Result<Option<PetState>, StoreError> {
        let db = self.conn()?;
        let Some(mut pet) = Self::latest_pet(&db, owner, true)? else {
            return Ok(None);
        };
        f(&mut pet);
        Self::save_pet(&db, &pet)?;
        Ok(Some(pet))
    }

    fn living_owners(&self) -> Result<Vec<NodeId>, StoreError> {
        let db = self.conn()?;
        let stmt = db.prepare("SELECT DISTINCT owner FROM pets WHERE alive = 1 ORDER BY owner")?;

        let mut owners = Vec::new();
        for row in stmt.into_iter() {
            let raw = row?.try_read::<&str, _>("owner")?.to_string();
            let node = NodeId::new(&raw).ok_or_else(|| StoreError::Corrupt(format!("dono inválido: {raw:?}")))?;
            owners.push(node);
        }
        Ok(owners)
    }

    fn generations(&self, owner: &NodeId) -> Result<u32, StoreError> {
        let db = self.conn()?;
        Self::owner_generations(&db, owner)
    }

    fn mark_dead(&self, owner: &NodeId, reason: &str) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "UPDATE pets SET alive = 0, death_reason = ?2 WHERE owner = ?1 AND alive = 1",
        )?;
        stmt.bind((1, owner.as_str()))?;
        stmt.bind((2, reason))?;
        stmt.next()?;

        Ok(db.change_count() > 0)
    }
}

impl ContactStore for Database {
    fn load_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let db = self.conn()?;
        let stmt = db.prepare(
            "SELECT node, name, first_seen, last_seen FROM contacts ORDER BY last_seen DESC",
        )?;

        let mut contacts = Vec::new();
        for row in stmt.into_iter() {
            contacts.push(parse::contact(&row?)?);
        }
        Ok(contacts)
    }

    fn save_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "INSERT INTO contacts (node, name, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (node) DO UPDATE
             SET name = coalesce(?2, name), last_seen = ?4",
        )?;
        stmt.bind((1, contact.node.as_str()))?;
        stmt.bind((2, contact.name.as_deref()))?;
        stmt.bind((3, contact.first_seen as i64))?;
        stmt.bind((4, contact.last_seen as i64))?;
        stmt.next()?;

        Ok(())
    }
}

impl BindingStore for Database {
    fn load_binding(&self) -> Result<Option<DeviceBinding>, StoreError> {
        let db = self.conn()?;
        let stmt = db.prepare("SELECT kind, address, secret FROM binding WHERE id = 1")?;

        match stmt.into_iter().next() {
            Some(row) => Ok(Some(parse::binding(&row?)?)),
            None => Ok(None),
        }
    }

    fn save_binding(&self, binding: &DeviceBinding) -> Result<(), StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "INSERT INTO binding (id, kind, address, secret) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET kind = ?1, address = ?2, secret = ?3",
        )?;
        stmt.bind((1, binding.endpoint.kind()))?;
        stmt.bind((2, binding.endpoint.address().as_str()))?;
        stmt.bind((3, binding.secret.as_deref()))?;
        stmt.next()?;

        info!("Binding salvo: {}", binding.endpoint);
        Ok(())
    }
}

mod parse {
    use super::*;

    pub fn pet(row: &sql::Row) -> Result<PetState, StoreError> {
        let owner_raw = row.try_read::<&str, _>("owner")?;
        let owner = NodeId::new(owner_raw)
            .ok_or_else(|| StoreError::Corrupt(format!("dono inválido: {owner_raw:?}")))?;
        let genome: Genome = bincode::deserialize(&row.try_read::<&[u8], _>("genome")?)?;

        Ok(PetState {
            id: row.try_read::<i64, _>("id")?,
            owner,
            generation: row.try_read::<i64, _>("generation")? as u32,
            genome,
            name: row.try_read::<Option<&str>, _>("name")?.map(str::to_string),
            birth: row.try_read::<i64, _>("birth")? as Timestamp,
            last_tick: row.try_read::<i64, _>("last_tick")? as Timestamp,
            last_interaction: row.try_read::<i64, _>("last_interaction")? as Timestamp,
            stage: stage(row, "stage")?,
            announced_stage: stage(row, "announced_stage")?,
            stats: PetStats {
                hunger: row.try_read::<f64, _>("hunger")? as f32,
                hygiene: row.try_read::<f64, _>("hygiene")? as f32,
                happiness: row.try_read::<f64, _>("happiness")? as f32,
                energy: row.try_read::<f64, _>("energy")? as f32,
                health: row.try_read::<f64, _>("health")? as f32,
            },
            alive: row.try_read::<i64, _>("alive")? != 0,
            death_reason: row
                .try_read::<Option<&str>, _>("death_reason")?
                .map(str::to_string),
            last_notification: row
                .try_read::<Option<i64>, _>("last_notification")?
                .map(|t| t as Timestamp),
        })
    }

    fn stage(row: &sql::Row, column: &str) -> Result<AgeStage, StoreError> {
        row.try_read::<&str, _>(column)?
            .parse()
            .map_err(StoreError::Corrupt)
    }

    pub fn contact(row: &sql::Row) -> Result<Contact, StoreError> {
        let raw = row.try_read::<&str, _>("node")?;
        let node =
            NodeId::new(raw).ok_or_else(|| StoreError::Corrupt(format!("contato inválido: {raw:?}")))?;

        Ok(Contact {
            node,
            name: row.try_read::<Option<&str>, _>("name")?.map(str::to_string),
            first_seen: row.try_read::<i64, _>("first_seen")? as Timestamp,
            last_seen: row.try_read::<i64, _>("last_seen")? as Timestamp,
        })
    }

    pub fn binding(row: &sql::Row) -> Result<DeviceBinding, StoreError> {
        let kind = row.try_read::<&str, _>("kind")?;
        let address = row.try_read::<&str, _>("address")?;
        let endpoint = Endpoint::from_parts(kind, address)
            .ok_or_else(|| StoreError::Corrupt(format!("endpoint desconhecido: {kind}")))?;

        Ok(DeviceBinding {
            endpoint,
            secret: row.try_read::<Option<&str>, _>("secret")?.map(str::to_string),
        })
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genetics;

    const T0: Timestamp = 1_700_000_000;

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn hatch(db: &Database, owner: &NodeId, now: Timestamp) -> PetState {
        let generation = db.generations(owner).unwrap() + 1;
        db.create(owner, genetics::generate(owner, generation), now).unwrap()
    }

    #[test]
    fn create_and_get() {
        let db = Database::memory().unwrap();
        let owner = node("AA11");
        assert!(db.get(&owner).unwrap().is_none());
        assert_eq!(db.generations(&owner).unwrap(), 0);

        let pet = hatch(&db, &owner, T0);
        assert_eq!(pet.generation, 1);
        assert!(pet.id > 0);

        let loaded = db.get(&owner).unwrap().unwrap();
        assert_eq!(loaded, pet);
        assert_eq!(loaded.genome, genetics::generate(&owner, 1));
    }

    #[test]
    fn new_generation_after_death() {
        let db = Database::memory().unwrap();
        let owner = node("AA11");
        hatch(&db, &owner, T0);

        assert!(db.mark_dead(&owner, game::DEATH_NEGLECT).unwrap());
        assert!(!db.mark_dead(&owner, game::DEATH_NEGLECT).unwrap());
        let dead = db.get(&owner).unwrap().unwrap();
        assert!(!dead.alive);
        assert_eq!(dead.death_reason.as_deref(), Some(game::DEATH_NEGLECT));
        assert!(db.living_owners().unwrap().is_empty());

        let second = hatch(&db, &owner, T0 + 10);
        assert_eq!(second.generation, 2);
        assert_eq!(db.get(&owner).unwrap().unwrap().id, second.id);
        assert_eq!(db.living_owners().unwrap(), vec![owner]);
    }

    #[test]
    fn mutate_persists_and_skips_dead() {
        let db = Database::memory().unwrap();
        let owner = node("BB22");
        hatch(&db, &owner, T0);

        let fed = db
            .mutate(&owner, &mut |pet| game::feed(pet, T0 + 60))
            .unwrap()
            .unwrap();
        assert_eq!(fed.stats.hunger, 20.0);
        assert_eq!(db.get(&owner).unwrap().unwrap().stats.hunger, 20.0);

        db.mark_dead(&owner, game::DEATH_OLD_AGE).unwrap();
        let mut called = false;
        assert!(db.mutate(&owner, &mut |_| called = true).unwrap().is_none());
        assert!(!called);
        assert!(db.mutate(&node("nobody"), &mut |_| {}).unwrap().is_none());
    }

    #[test]
    fn decay_step_records_death() {
        let db = Database::memory().unwrap();
        let owner = node("CC33");
        hatch(&db, &owner, T0);
        db.mutate(&owner, &mut |pet| {
            pet.stats.health = 1.0;
            pet.stats.hunger = 100.0;
        })
        .unwrap();

        let outcome = db.apply_decay_step(&owner, T0 + 3600).unwrap();
        assert_eq!(outcome, Some(DecayOutcome::Died(game::DEATH_NEGLECT)));
        assert!(!db.get(&owner).unwrap().unwrap().alive);
        assert_eq!(db.apply_decay_step(&owner, T0 + 3660).unwrap(), None);
    }

    #[test]
    fn decay_counts_from_the_stored_last_tick() {
        let db = Database::memory().unwrap();
        let owner = node("DD44");
        let hatched = hatch(&db, &owner, T0);

        // Primeiro tick depois de 6h parado: as 6h contam
        db.apply_decay_step(&owner, T0 + 6 * 3600).unwrap();
        let pet = db.get(&owner).unwrap().unwrap();
        let mut expected = hatched.stats;
        game::decay_stats(&mut expected, 6 * 3600);
        assert_eq!(pet.stats, expected);
        assert_eq!(pet.last_tick, T0 + 6 * 3600);

        // Relógio para trás não desfaz nada
        db.apply_decay_step(&owner, T0).unwrap();
        let pet = db.get(&owner).unwrap().unwrap();
        assert_eq!(pet.stats, expected);
        assert_eq!(pet.last_tick, T0 + 6 * 3600);
    }

    #[test]
    fn contacts_upsert_keeps_first_seen_and_name() {
        let db = Database::memory().unwrap();
        let a = Contact {
            node: node("!a1"),
            name: Some("Alpha".into()),
            first_seen: T0,
            last_seen: T0,
        };
        db.save_contact(&a).unwrap();
        db.save_contact(&Contact {
            name: None,
            first_seen: T0 + 50,
            last_seen: T0 + 50,
            ..a.clone()
        })
        .unwrap();
        db.save_contact(&Contact {
            node: node("!b2"),
            name: None,
            first_seen: T0 + 10,
            last_seen: T0 + 10,
        })
        .unwrap();

        let contacts = db.load_contacts().unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].node, node("!a1"));
        assert_eq!(contacts[0].first_seen, T0);
        assert_eq!(contacts[0].last_seen, T0 + 50);
        assert_eq!(contacts[0].name.as_deref(), Some("Alpha"));
    }

    #[test]
    fn binding_is_single_row_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshgotchi.db");

        {
            let db = Database::open(&path).unwrap();
            assert!(db.load_binding().unwrap().is_none());
            db.save_binding(&DeviceBinding {
                endpoint: Endpoint::Serial("/dev/ttyUSB0".into()),
                secret: None,
            })
            .unwrap();
            db.save_binding(&DeviceBinding {
                endpoint: Endpoint::Ble("C2:2B:A1:D5:3E:B6".into()),
                secret: Some("123456".into()),
            })
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let binding = db.load_binding().unwrap().unwrap();
        assert_eq!(binding.endpoint, Endpoint::Ble("C2:2B:A1:D5:3E:B6".into()));
        assert_eq!(binding.secret.as_deref(), Some("123456"));
    }
}
