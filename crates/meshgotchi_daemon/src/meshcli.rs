//! Driver do rádio sobre a CLI do MeshCore (`meshcli`).
//!
//! Cada operação é uma execução do programa com saída JSON (`-j`). O
//! endpoint vai em toda chamada: `-s <porta>` para serial, `-a <endereço>`
//! (e `-p <código>` quando houver) para BLE.

use crate::link::{Outbound, Radio, RadioError};
use meshgotchi_core::config::RadioConfig;
use meshgotchi_core::protocol;
use meshgotchi_core::{DeviceBinding, Endpoint, InboundFrame};
use std::collections::VecDeque;
use crossbeam_channel::{Receiver, bounded, unbounded};
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Intervalo entre verificações do processo filho.
const CHILD_POLL: Duration = Duration::from_millis(10);
/// Quanto esperar pelos pipes depois que o filho terminou.
const PIPE_GRACE: Duration = Duration::from_secs(1);

pub struct MeshCliRadio {
    program: String,
    binding: DeviceBinding,
    preset: RadioConfig,
    timeout: Duration,
    pending: VecDeque<InboundFrame>,
}

impl MeshCliRadio {
    pub fn new(binding: DeviceBinding, preset: &RadioConfig) -> Self {
        Self {
            program: preset.cli_program.clone(),
            timeout: Duration::from_secs_f64(preset.command_timeout_secs.max(0.1)),
            preset: preset.clone(),
            binding,
            pending: VecDeque::new(),
        }
    }

    fn endpoint_args(&self) -> Vec<String> {
        let mut args = vec!["-j".to_string()];
        match &self.binding.endpoint {
            Endpoint::Serial(path) => {
                args.push("-s".into());
                args.push(path.display().to_string());
            }
            Endpoint::Ble(addr) => {
                args.push("-a".into());
                args.push(addr.clone());
                if let Some(pin) = &self.binding.secret {
                    args.push("-p".into());
                    args.push(pin.clone());
                }
            }
        }
        args
    }

    /// Executa um comando e devolve o stdout. Passado `timeout` o processo
    /// é morto e a chamada falha com [`RadioError::Timeout`].
    fn run(&self, args: &[String], timeout: Duration) -> Result<String, RadioError> {
        let out = self.exec(args, timeout)?;
        if out.timed_out {
            return Err(RadioError::Timeout(timeout));
        }
        Ok(out.stdout)
    }

    /// Como [`run`](Self::run), mas no timeout devolve o que o processo já
    /// tinha escrito no stdout antes de ser morto.
    fn exec(&self, args: &[String], timeout: Duration) -> Result<CliOutput, RadioError> {
        let mut child = Command::new(&self.program)
            .args(self.endpoint_args())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Os dois pipes são lidos em paralelo para o filho nunca travar
        let (line_tx, line_rx) = unbounded();
        if let Some(pipe) = child.stdout.take() {
            std::thread::Builder::new()
                .name("meshcli-stdout".into())
                .spawn(move || {
                    for line in BufReader::new(pipe).lines() {
                        let Ok(line) = line else { break };
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                })?;
        }
        let (err_tx, err_rx) = bounded(1);
        if let Some(mut pipe) = child.stderr.take() {
            std::thread::Builder::new()
                .name("meshcli-stderr".into())
                .spawn(move || {
                    let mut err = String::new();
                    let _ = pipe.read_to_string(&mut err);
                    let _ = err_tx.send(err);
                })?;
        }

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(CHILD_POLL);
        };

        let stdout = collect_lines(&line_rx);
        let Some(status) = status else {
            return Ok(CliOutput {
                stdout,
                timed_out: true,
            });
        };
        if !status.success() {
            let err = err_rx.recv_timeout(PIPE_GRACE).unwrap_or_default();
            let detail = if err.trim().is_empty() {
                status.to_string()
            } else {
                err.trim().to_string()
            };
            return Err(RadioError::Device(format!("{} {}: {detail}", self.program, args.join(" "))));
        }
        Ok(CliOutput {
            stdout,
            timed_out: false,
        })
    }
}

struct CliOutput {
    stdout: String,
    /// Processo morto no prazo; `stdout` é parcial
    timed_out: bool,
}

/// Junta as linhas até o stdout fechar ou `PIPE_GRACE` sem novidade.
fn collect_lines(rx: &Receiver<String>) -> String {
    let mut out = String::new();
    while let Ok(line) = rx.recv_timeout(PIPE_GRACE) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Comandos do preset aplicados na conexão.
fn preset_commands(preset: &RadioConfig) -> Vec<Vec<String>> {
    let radio = format!(
        "{},{},{},{}",
        f64::from(preset.frequency_hz) / 1e6,
        f64::from(preset.bandwidth_hz) / 1e3,
        preset.spreading_factor,
        preset.coding_rate,
    );
    vec![
        vec!["set".into(), "radio".into(), radio],
        vec!["set".into(), "tx".into(), preset.tx_power_dbm.to_string()],
        vec!["set".into(), "name".into(), preset.name.clone()],
    ]
}

fn transmit_args(frame: &Outbound) -> Vec<String> {
    match frame {
        Outbound::Text { to, text } => vec!["msg".into(), to.to_string(), text.clone()],
        Outbound::Advert { zero_hop: true } => vec!["advert".into()],
        Outbound::Advert { zero_hop: false } => vec!["floodadv".into()],
    }
}

/// Frames de uma saída do `recv`, uma linha por evento.
fn parse_output(out: &str) -> Vec<InboundFrame> {
    out.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match protocol::decode_radio_line(line) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Linha do rádio ignorada: {e}");
                None
            }
        })
        .collect()
}

impl Radio for MeshCliRadio {
    fn connect(&mut self) -> Result<(), RadioError> {
        self.run(&["infos".to_string()], self.timeout)?;
        info!("Rádio respondeu em {}", self.binding.endpoint);

        for cmd in preset_commands(&self.preset) {
            match self.run(&cmd, self.timeout) {
                Ok(_) => debug!("Preset: {}", cmd.join(" ")),
                // O firmware pode recusar um item do preset; o rádio segue usável
                Err(e) => warn!("Preset '{}' falhou: {e}", cmd.join(" ")),
            }
        }
        Ok(())
    }

    fn transmit(&mut self, frame: &Outbound) -> Result<(), RadioError> {
        self.run(&transmit_args(frame), self.timeout).map(|_| ())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<InboundFrame>, RadioError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let started = Instant::now();
        // No timeout o recv é morto, mas o que já saiu no stdout vale
        let out = self.exec(&["recv".to_string()], timeout)?;
        self.pending.extend(parse_output(&out.stdout));
        if out.timed_out {
            return Ok(self.pending.pop_front());
        }

        let frame = self.pending.pop_front();
        if frame.is_none() {
            // Evita relançar o processo em laço quando o recv volta vazio na hora
            std::thread::sleep(timeout.saturating_sub(started.elapsed()));
        }
        Ok(frame)
    }

    fn disconnect(&mut self) {
        debug!("Desconectando de {}", self.binding.endpoint);
    }
}
