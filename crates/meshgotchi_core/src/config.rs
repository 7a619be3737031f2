//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável (ou passado com
//! `--config`). Todas as seções usam `#[serde(default)]`, então arquivos
//! parciais funcionam.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Preset do rádio, aplicado uma vez na conexão.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Nome anunciado na malha
    pub name: String,
    /// Frequência (Hz)
    pub frequency_hz: u32,
    /// Largura de banda (Hz)
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    /// Potência de transmissão (dBm)
    pub tx_power_dbm: i8,
    /// Programa da CLI do rádio
    pub cli_program: String,
    /// Timeout de cada comando de configuração/envio (segundos)
    pub command_timeout_secs: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            name: "MeshAgotchi".into(),
            frequency_hz: 910_525_000,
            bandwidth_hz: 62_500,
            spreading_factor: 7,
            coding_rate: 5,
            tx_power_dbm: 22,
            cli_program: "meshcli".into(),
            command_timeout_secs: 5.0,
        }
    }
}

/// Política de reconexão e polling do link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Primeiro atraso de reconexão (segundos)
    pub backoff_initial_secs: f64,
    /// Teto do atraso exponencial (segundos)
    pub backoff_max_secs: f64,
    /// Tentativas antes de declarar o link perdido
    pub max_reconnect_attempts: u32,
    /// Janela de cada poll de recepção (ms)
    pub receive_poll_ms: u64,
    /// Intervalo mínimo entre envios (segundos)
    pub min_send_interval_secs: f64,
    /// Capacidade da fila de envio
    pub outbox_capacity: usize,
    /// Tempo máximo para o envio em andamento no shutdown (segundos)
    pub shutdown_grace_secs: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            backoff_initial_secs: 1.0,
            backoff_max_secs: 60.0,
            max_reconnect_attempts: 10,
            receive_poll_ms: 1000,
            min_send_interval_secs: 2.0,
            outbox_capacity: 64,
            shutdown_grace_secs: 5.0,
        }
    }
}

/// Anúncios de presença.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertConfig {
    /// Adverts enviados na partida
    pub burst_count: u32,
    /// Atraso entre adverts da rajada (segundos)
    pub burst_delay_secs: f64,
    /// Período do re-anúncio (segundos)
    pub interval_secs: u64,
    /// Advert zero-hop (sem supressão por saltos)
    pub zero_hop: bool,
}

impl Default for AdvertConfig {
    fn default() -> Self {
        Self {
            burst_count: 5,
            burst_delay_secs: 0.5,
            interval_secs: 4 * 3600,
            zero_hop: true,
        }
    }
}

/// Token bucket por remetente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u32,
    /// Tokens por segundo
    pub refill_per_sec: f64,
    /// Buckets sem atividade são descartados após esse tempo (segundos)
    pub idle_evict_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_per_sec: 0.5,
            idle_evict_secs: 3600,
        }
    }
}

/// Janela de deduplicação.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Entradas mantidas no ring buffer
    pub capacity: usize,
    /// Tempo de vida de cada entrada (segundos)
    pub ttl_secs: u64,
    /// Faixa de tempo que entra na chave de frames sem sequência (segundos)
    pub bucket_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl_secs: 120,
            bucket_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Período do tick de decaimento (segundos)
    pub interval_secs: u64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Notificações proativas (evolução, saúde, higiene).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Período da varredura (segundos)
    pub interval_secs: u64,
    /// Intervalo mínimo entre avisos do mesmo pet (segundos)
    pub cooldown_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            cooldown_secs: 3600,
        }
    }
}

/// Limites de texto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Bytes por mensagem enviada
    pub max_bytes: usize,
    /// Caracteres do nome do pet
    pub name_max_chars: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_bytes: crate::protocol::MAX_MESSAGE_BYTES,
            name_max_chars: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Banco SQLite (relativo ao diretório do config)
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("meshgotchi.db"),
        }
    }
}

/// Configuração raiz do daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub radio: RadioConfig,
    pub link: LinkConfig,
    pub advert: AdvertConfig,
    pub rate_limit: RateLimitConfig,
    pub dedup: DedupConfig,
    pub decay: DecayConfig,
    pub notifications: NotificationConfig,
    pub messages: MessageConfig,
    pub storage: StorageConfig,
}

/// Erros de carga/gravação da configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao ler/gravar {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Erro ao parsear {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Erro ao serializar config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    ///
    /// Arquivo ausente → configuração padrão. Arquivo presente mas
    /// inválido é erro: o daemon não deve subir com valores inesperados.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("Usando configuração padrão ({} não existe)", path.display());
            return Ok(AppConfig::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<AppConfig>(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração carregada de {}", path.display());
        Ok(config)
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Caminho do banco, resolvido relativo ao diretório do config.
    pub fn database_path(&self, config_path: &Path) -> PathBuf {
        if self.storage.database.is_absolute() {
            return self.storage.database.clone();
        }
        config_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(&self.storage.database)
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.radio.name.trim().is_empty() {
            errors.push("Nome do rádio não pode ser vazio".into());
        }
        if !(7..=12).contains(&self.radio.spreading_factor) {
            errors.push(format!(
                "Spreading factor inválido: {} (7–12)",
                self.radio.spreading_factor
            ));
        }
        if !(5..=8).contains(&self.radio.coding_rate) {
            errors.push(format!("Coding rate inválido: {} (5–8)", self.radio.coding_rate));
        }
        if self.link.backoff_initial_secs <= 0.0
            || self.link.backoff_max_secs < self.link.backoff_initial_secs
        {
            errors.push(format!(
                "Backoff inválido: inicial {} / teto {}",
                self.link.backoff_initial_secs, self.link.backoff_max_secs
            ));
        }
        if self.link.max_reconnect_attempts == 0 {
            errors.push("max_reconnect_attempts deve ser ≥ 1".into());
        }
        if self.link.outbox_capacity == 0 {
            errors.push("outbox_capacity deve ser ≥ 1".into());
        }
        if self.advert.interval_secs == 0 {
            errors.push("Intervalo de advert não pode ser 0".into());
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.refill_per_sec <= 0.0 {
            errors.push(format!(
                "Rate limit inválido: capacidade {} / recarga {}",
                self.rate_limit.capacity, self.rate_limit.refill_per_sec
            ));
        }
        if self.dedup.capacity == 0 {
            errors.push("Capacidade do dedup deve ser ≥ 1".into());
        }
        if self.dedup.bucket_secs == 0 {
            errors.push("Faixa de tempo do dedup não pode ser 0".into());
        }
        if self.decay.interval_secs == 0 {
            errors.push("Intervalo de decaimento não pode ser 0".into());
        }
        if self.notifications.enabled && self.notifications.interval_secs == 0 {
            errors.push("Intervalo de notificações não pode ser 0".into());
        }
        if self.messages.max_bytes < 32 {
            errors.push(format!(
                "max_bytes muito pequeno: {} (mínimo 32)",
                self.messages.max_bytes
            ));
        }

        for e in &errors {
            warn!("Config: {e}");
        }
        errors
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.link.receive_poll_ms.max(1))
    }
}
