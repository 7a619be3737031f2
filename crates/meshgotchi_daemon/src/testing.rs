//! Dublês para os testes: rádio roteirizado, store contador e sessão pronta.

use crate::link::{Backoff, Outbound, Radio, RadioError, TransportLink};
use crate::outbox::OutboxReceiver;
use crate::session::Session;
use crate::shutdown::{self, ShutdownTrigger};
use meshgotchi_core::config::AppConfig;
use meshgotchi_core::game::DecayOutcome;
use meshgotchi_core::genetics::Genome;
use meshgotchi_core::store::{ContactStore, PetStore, StoreError};
use meshgotchi_core::{Database, InboundFrame, NodeId, PetState, Timestamp};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn node(id: &str) -> NodeId {
    NodeId::new(id).unwrap()
}

/// Backoff de milissegundos para os testes não dormirem.
pub fn fast_backoff(max_attempts: u32) -> Backoff {
    Backoff {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(8),
        max_attempts,
    }
}

// ──────────────────────────────────────────────
// Rádio falso
// ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct FakeState {
    fail_connects: u32,
    fail_polls: u32,
    fail_transmits: u32,
    reject_transmits: u32,
    inbox: VecDeque<InboundFrame>,
    sent: Vec<Outbound>,
    connect_calls: u32,
    disconnect_calls: u32,
}

/// Rádio em memória. Clones compartilham o estado, então o teste guarda
/// um clone para roteirizar falhas e inspecionar o que foi transmitido.
#[derive(Debug, Clone, Default)]
pub struct FakeRadio {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_connects(&self, n: u32) {
        self.with(|s| s.fail_connects = n);
    }

    pub fn fail_polls(&self, n: u32) {
        self.with(|s| s.fail_polls = n);
    }

    pub fn fail_transmits(&self, n: u32) {
        self.with(|s| s.fail_transmits = n);
    }

    /// Próximos `n` envios recusados pelo "firmware" (`RadioError::Device`).
    pub fn reject_transmits(&self, n: u32) {
        self.with(|s| s.reject_transmits = n);
    }

    pub fn push(&self, frame: InboundFrame) {
        self.with(|s| s.inbox.push_back(frame));
    }

    pub fn push_text(&self, sender: &str, text: &str) {
        self.push(InboundFrame::text(node(sender), text));
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.with(|s| s.sent.clone())
    }

    pub fn connect_calls(&self) -> u32 {
        self.with(|s| s.connect_calls)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.with(|s| s.disconnect_calls)
    }
}

/// Falhas roteirizadas são de E/S, como um cabo solto.
fn scripted_failure(counter: &mut u32, what: &str) -> Result<(), RadioError> {
    if *counter > 0 {
        *counter -= 1;
        return Err(RadioError::Io(std::io::Error::other(format!("{what} roteirizado falhou"))));
    }
    Ok(())
}

impl Radio for FakeRadio {
    fn connect(&mut self) -> Result<(), RadioError> {
        self.with(|s| {
            s.connect_calls += 1;
            scripted_failure(&mut s.fail_connects, "connect")
        })
    }

    fn transmit(&mut self, frame: &Outbound) -> Result<(), RadioError> {
        self.with(|s| {
            scripted_failure(&mut s.fail_transmits, "transmit")?;
            if s.reject_transmits > 0 {
                s.reject_transmits -= 1;
                return Err(RadioError::Device("contato desconhecido".into()));
            }
            s.sent.push(frame.clone());
            Ok(())
        })
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<InboundFrame>, RadioError> {
        let next = self.with(|s| {
            scripted_failure(&mut s.fail_polls, "poll")?;
            Ok::<_, RadioError>(s.inbox.pop_front())
        })?;
        if next.is_none() {
            std::thread::sleep(timeout);
        }
        Ok(next)
    }

    fn disconnect(&mut self) {
        self.with(|s| s.disconnect_calls += 1);
    }
}

// ──────────────────────────────────────────────
// Store contador
// ──────────────────────────────────────────────

/// `Database::memory()` contando chamadas, com falhas de decaimento
/// configuráveis por dono.
pub struct CountingStore {
    db: Database,
    pub creates: AtomicUsize,
    pub mutates: AtomicUsize,
    pub decay_steps: AtomicUsize,
    failing: Mutex<HashSet<NodeId>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            db: Database::memory().unwrap(),
            creates: AtomicUsize::new(0),
            mutates: AtomicUsize::new(0),
            decay_steps: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_decay_for(&self, owner: &NodeId) {
        self.failing.lock().unwrap().insert(owner.clone());
    }

    pub fn heal_decay_for(&self, owner: &NodeId) {
        self.failing.lock().unwrap().remove(owner);
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl PetStore for CountingStore {
    fn get(&self, owner: &NodeId) -> Result<Option<PetState>, StoreError> {
        self.db.get(owner)
    }

    fn create(&self, owner: &NodeId, genome: Genome, now: Timestamp) -> Result<PetState, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.db.create(owner, genome, now)
    }

    fn apply_decay_step(&self, owner: &NodeId, now: Timestamp) -> Result<Option<DecayOutcome>, StoreError> {
        self.decay_steps.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(owner) {
            return Err(StoreError::Corrupt(format!("falha roteirizada para {owner}")));
        }
        self.db.apply_decay_step(owner, now)
    }

    fn mutate(
        &self,
        owner: &NodeId,
        f: &mut dyn FnMut(&mut PetState),
    ) -> Result<Option<PetState>, StoreError> {
        self.mutates.fetch_add(1, Ordering::SeqCst);
        self.db.mutate(owner, f)
    }

    fn living_owners(&self) -> Result<Vec<NodeId>, StoreError> {
        self.db.living_owners()
    }

    fn generations(&self, owner: &NodeId) -> Result<u32, StoreError> {
        self.db.generations(owner)
    }

    fn mark_dead(&self, owner: &NodeId, reason: &str) -> Result<bool, StoreError> {
        self.db.mark_dead(owner, reason)
    }
}

// ──────────────────────────────────────────────
// Sessão de teste
// ──────────────────────────────────────────────

pub struct Harness {
    pub session: Arc<Session>,
    pub outbound: OutboxReceiver,
    pub radio: FakeRadio,
    pub store: Arc<CountingStore>,
    pub contacts_db: Arc<Database>,
    pub trigger: ShutdownTrigger,
}

impl Harness {
    pub fn new(config: AppConfig) -> Self {
        let (trigger, shutdown) = shutdown::channel();
        let radio = FakeRadio::new();
        let link = TransportLink::open(
            Box::new(radio.clone()),
            fast_backoff(5),
            Duration::from_millis(1),
            shutdown.clone(),
        )
        .unwrap();
        let store = Arc::new(CountingStore::new());
        let contacts_db = Arc::new(Database::memory().unwrap());
        let (session, outbound) = Session::new(
            config,
            Arc::new(link),
            store.clone() as Arc<dyn PetStore>,
            contacts_db.clone() as Arc<dyn ContactStore>,
            shutdown,
        );

        Self {
            session: Arc::new(session),
            outbound,
            radio,
            store,
            contacts_db,
            trigger,
        }
    }

    /// Esvazia a fila de saída.
    pub fn drain(&self) -> Vec<Outbound> {
        self.outbound.try_iter().collect()
    }

    /// Textos enfileirados, na ordem.
    pub fn drain_texts(&self) -> Vec<(NodeId, String)> {
        self.drain()
            .into_iter()
            .filter_map(|msg| match msg {
                Outbound::Text { to, text } => Some((to, text)),
                Outbound::Advert { .. } => None,
            })
            .collect()
    }
}
