//! # MeshAgotchi
//!
//! Daemon que mantém um rádio LoRa pareado, recebe comandos da malha
//! MeshCore e responde cuidando do bichinho virtual de cada nó.
//!
//! ## Uso
//! ```bash
//! meshgotchi                     # config.toml ao lado do executável
//! meshgotchi --config /etc/meshgotchi.toml
//! meshgotchi --pair              # escolhe outro rádio
//! meshgotchi --contacts          # lista os nós já vistos e sai
//! ```
//!
//! Sai com código 1 quando o rádio é perdido de vez, para o gerenciador
//! de serviços reiniciar.

mod advertiser;
mod contacts;
mod decay;
mod limiter;
mod link;
mod meshcli;
mod notifier;
mod outbox;
mod pairing;
mod pump;
mod router;
mod session;
mod shutdown;
mod signals;
#[cfg(test)]
mod testing;

use advertiser::AdvertisingScheduler;
use contacts::ContactRegistry;
use crossbeam_channel::{bounded, select};
use decay::DecayScheduler;
use link::{Backoff, LinkError, TransportLink};
use meshcli::MeshCliRadio;
use meshgotchi_core::config::{AppConfig, ConfigError};
use meshgotchi_core::store::{BindingStore, ContactStore, PetStore, StoreError};
use meshgotchi_core::{Database, DeviceBinding};
use notifier::Notifier;
use pairing::PairingError;
use pump::InboundPump;
use session::Session;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const USAGE: &str = "\
Uso: meshgotchi [opções]

  -c, --config <arquivo>   Configuração (padrão: config.toml ao lado do executável)
      --pair               Pareia outro rádio antes de iniciar
      --contacts           Lista os contatos conhecidos e sai
  -h, --help               Mostra esta ajuda";

#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error("Argumentos inválidos: {0}")]
    Args(#[from] lexopt::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Configuração inválida:\n  - {}", .0.join("\n  - "))]
    InvalidConfig(Vec<String>),

    #[error("Banco de dados: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error("Rádio indisponível: {0}")]
    Link(#[from] LinkError),

    #[error("Erro de E/S: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    pair: bool,
    contacts: bool,
    help: bool,
}

fn parse_args() -> Result<Options, lexopt::Error> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_env();
    let mut opts = Options::default();

    while let Some(arg) = parser.next()? {
        match arg {
            Long("config") | Short('c') => opts.config = Some(parser.value()?.into()),
            Long("pair") => opts.pair = true,
            Long("contacts") => opts.contacts = true,
            Long("help") | Short('h') => opts.help = true,
            _ => return Err(arg.unexpected()),
        }
    }
    Ok(opts)
}

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, DaemonError> {
    let opts = parse_args()?;
    if opts.help {
        println!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    }

    // ── Carregar config ──
    let config_path = opts.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path)?;

    // Salva config padrão se não existir
    if !config_path.exists() {
        match config.save(&config_path) {
            Ok(()) => info!("Config padrão criada em {}", config_path.display()),
            Err(e) => warn!("Não foi possível salvar config padrão: {e}"),
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        return Err(DaemonError::InvalidConfig(problems));
    }

    // ── Banco ──
    let db_path = config.database_path(&config_path);
    let db = Arc::new(Database::open(&db_path)?);

    if opts.contacts {
        print_contacts(db);
        return Ok(ExitCode::SUCCESS);
    }

    // ── Pareamento ──
    let binding = match db.load_binding()? {
        Some(binding) if !opts.pair => binding,
        _ => {
            info!("Pareando rádio...");
            let stdin = io::stdin();
            pairing::run_pairing(&*db, Path::new("/dev"), &mut stdin.lock(), &mut io::stdout())?
        }
    };

    // ── Link ──
    let (mut trigger, shutdown) = shutdown::channel();
    let radio = MeshCliRadio::new(binding.clone(), &config.radio);
    let link = Arc::new(TransportLink::open(
        Box::new(radio),
        Backoff::from_config(&config.link),
        config.receive_poll(),
        shutdown.clone(),
    )?);

    banner(&config, &binding, &db_path);

    // ── Sessão e workers ──
    let (session, outbound) = Session::new(
        config.clone(),
        link.clone(),
        db.clone() as Arc<dyn PetStore>,
        db.clone() as Arc<dyn ContactStore>,
        shutdown.clone(),
    );
    let session = Arc::new(session);

    let writer = outbox::spawn_writer(
        link.clone(),
        outbound,
        Duration::from_secs_f64(config.link.min_send_interval_secs),
        shutdown.clone(),
    )?;

    let (sig_tx, sig_rx) = bounded(4);
    signals::install(sig_tx)?;

    let (pump_done_tx, pump_done_rx) = bounded(1);
    let pump = InboundPump::new(session.clone());
    let pump_handle = spawn("inbound-pump", move || {
        let result = pump.run();
        let _ = pump_done_tx.send(());
        result
    })?;

    let advertiser =
        AdvertisingScheduler::new(session.outbox.clone(), &config.advert, shutdown.clone());
    let decay = DecayScheduler::new(
        db.clone(),
        Duration::from_secs(config.decay.interval_secs),
        shutdown.clone(),
    );
    let notifier = Notifier::new(
        db.clone(),
        session.outbox.clone(),
        config.notifications.clone(),
        shutdown.clone(),
    );
    let timers = vec![
        spawn("advertiser", move || advertiser.run())?,
        spawn("decay", move || decay.run())?,
        spawn("notifier", move || notifier.run())?,
    ];

    // ── Supervisor ──
    select! {
        recv(sig_rx) -> sig => info!("Sinal {sig:?} recebido, encerrando"),
        recv(pump_done_rx) -> _ => warn!("Pump de entrada parou"),
    }

    // Timers e pump param pelo sinal; o writer termina o envio em curso
    trigger.fire();
    match pump_handle.join() {
        Ok(Err(e)) => error!("Pump: {e}"),
        Err(_) => error!("Thread do pump entrou em pânico"),
        Ok(Ok(())) => {}
    }
    for timer in timers {
        if timer.join().is_err() {
            error!("Thread de timer entrou em pânico");
        }
    }
    let grace = Duration::from_secs_f64(config.link.shutdown_grace_secs);
    if !join_within(writer, grace) {
        warn!("Writer não terminou em {grace:?}, fechando o link assim mesmo");
    }
    link.close();

    if link.was_lost() {
        error!("Rádio perdido, saindo com erro");
        return Ok(ExitCode::FAILURE);
    }
    info!("Encerrado");
    Ok(ExitCode::SUCCESS)
}

fn spawn<T, F>(name: &str, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new().name(name.into()).spawn(f)
}

/// Espera a thread até `grace`. `false` se ela ainda estiver rodando.
fn join_within(handle: JoinHandle<()>, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    handle.join().is_ok()
}

fn print_contacts(db: Arc<Database>) {
    let registry = ContactRegistry::load(db);
    if registry.len() == 0 {
        println!("Nenhum contato conhecido.");
        return;
    }
    println!("{} contato(s):", registry.len());
    println!("{:<20} {:<22} {:>12} {:>12}", "Nó", "Nome", "Primeiro", "Último");
    for c in registry.list() {
        println!(
            "{:<20} {:<22} {:>12} {:>12}",
            c.node.as_str(),
            c.name.as_deref().unwrap_or("-"),
            c.first_seen,
            c.last_seen
        );
    }
}

fn banner(config: &AppConfig, binding: &DeviceBinding, db_path: &Path) {
    let radio = &config.radio;
    println!();
    println!("══════════════════════════════════════════════");
    println!("   📡 MESHAGOTCHI – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Rádio:     {}", binding.endpoint);
    println!("  Nome:      {}", radio.name);
    println!(
        "  Preset:    {:.3} MHz | BW {:.1} kHz | SF{} | CR{} | {} dBm",
        f64::from(radio.frequency_hz) / 1e6,
        f64::from(radio.bandwidth_hz) / 1e3,
        radio.spreading_factor,
        radio.coding_rate,
        radio.tx_power_dbm
    );
    println!(
        "  Anúncio:   {}x na partida, depois a cada {}h",
        config.advert.burst_count,
        config.advert.interval_secs / 3600
    );
    println!("  Banco:     {}", db_path.display());
    println!("══════════════════════════════════════════════");
    println!();
}
