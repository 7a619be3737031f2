//! Protocolo de texto entre o daemon e o rádio.
//!
//! O rádio (MeshCore CLI em modo JSON) entrega um evento por linha:
//!
//! ```text
//! {"type":"PRIV","pubkey_prefix":"a1b2c3","text":"/feed","sender_timestamp":1700000000}
//! {"type":"ADVERTISEMENT","public_key":"a1b2c3","adv_name":"Bob"}
//! !a1b2c3: /feed                      ← formato texto simples
//! ```
//!
//! Comandos são texto UTF-8 iniciado por `/`, seguido do verbo e de um
//! argumento livre. O verbo é comparado sem diferenciar maiúsculas.
//! Respostas são limitadas a [`MAX_MESSAGE_BYTES`] bytes por mensagem.

use crate::types::{Command, FrameKind, InboundFrame, NodeId};
use serde::Deserialize;

/// Caractere que inicia um comando.
pub const COMMAND_DELIMITER: char = '/';

/// Tamanho máximo do argumento de um comando (caracteres).
pub const MAX_ARG_CHARS: usize = 64;

/// Tamanho máximo de uma mensagem enviada pela malha (bytes).
pub const MAX_MESSAGE_BYTES: usize = 200;

/// Marcador de truncamento.
const ELLIPSIS: &str = "...";

/// Erros de interpretação de frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Linha vazia")]
    Empty,

    #[error("JSON inválido: {0}")]
    Json(String),

    #[error("Evento sem remetente")]
    MissingSender,

    #[error("Remetente inválido: {0:?}")]
    InvalidSender(String),

    #[error("Formato desconhecido: {0:?}")]
    Unrecognized(String),

    #[error("Payload não é UTF-8")]
    NotUtf8,

    #[error("Comando sem verbo")]
    EmptyVerb,
}

/// Evento JSON emitido pelo rádio. Os nomes de campo variam entre
/// versões do firmware, daí os aliases.
#[derive(Debug, Deserialize)]
struct RadioEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default, alias = "pubkey_prefix", alias = "public_key")]
    from: Option<String>,
    #[serde(default, alias = "message")]
    text: Option<String>,
    #[serde(default, alias = "adv_name")]
    name: Option<String>,
    #[serde(default, alias = "sender_timestamp")]
    seq: Option<u64>,
}

/// Decodifica uma linha de saída do rádio.
///
/// Retorna `Ok(None)` para eventos que o daemon ignora (ACKs, status…).
pub fn decode_radio_line(line: &str) -> Result<Option<InboundFrame>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if line.starts_with('{') {
        return decode_json_event(line);
    }

    // Formato simples: "!a1b2c3: mensagem"
    let Some((from, text)) = line.split_once(':') else {
        return Err(ParseError::Unrecognized(line.to_string()));
    };
    let sender = NodeId::new(from).ok_or_else(|| ParseError::InvalidSender(from.to_string()))?;
    Ok(Some(InboundFrame::text(sender, text.trim())))
}

fn decode_json_event(line: &str) -> Result<Option<InboundFrame>, ParseError> {
    let event: RadioEvent =
        serde_json::from_str(line).map_err(|e| ParseError::Json(e.to_string()))?;

    let kind = event.kind.as_deref().unwrap_or("").to_ascii_uppercase();
    let is_advert = kind.contains("ADVERT") || kind == "NEW_CONTACT";
    if !is_advert && event.text.is_none() {
        return Ok(None);
    }

    let from = event.from.ok_or(ParseError::MissingSender)?;
    let sender = NodeId::new(&from).ok_or(ParseError::InvalidSender(from))?;

    let frame = if is_advert {
        let name = event.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        InboundFrame::advert(sender, name)
    } else {
        InboundFrame::text(sender, event.text.as_deref().unwrap_or("").trim())
    };

    Ok(Some(InboundFrame {
        seq: event.seq,
        ..frame
    }))
}

/// Frame já classificado pelo pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Advert { node: NodeId, name: Option<String> },
    Command(Command),
}

/// Classifica um frame recebido.
pub fn classify(frame: &InboundFrame) -> Result<Inbound, ParseError> {
    match frame.kind {
        FrameKind::Advert => Ok(Inbound::Advert {
            node: frame.sender.clone(),
            name: frame.name.clone(),
        }),
        FrameKind::Text => parse_command(&frame.sender, &frame.payload).map(Inbound::Command),
    }
}

/// Interpreta o payload de texto como comando.
///
/// Texto sem o delimitador vira um comando de verbo vazio (o router
/// responde com a mensagem de boas-vindas).
pub fn parse_command(sender: &NodeId, payload: &[u8]) -> Result<Command, ParseError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ParseError::NotUtf8)?
        .trim();

    let Some(rest) = text.strip_prefix(COMMAND_DELIMITER) else {
        return Ok(Command {
            sender: sender.clone(),
            verb: String::new(),
            args: truncate_chars(text, MAX_ARG_CHARS),
        });
    };

    let (verb, args) = match rest.split_once(char::is_whitespace) {
        Some((verb, args)) => (verb, args.trim()),
        None => (rest, ""),
    };
    if verb.is_empty() {
        return Err(ParseError::EmptyVerb);
    }

    Ok(Command {
        sender: sender.clone(),
        verb: verb.to_lowercase(),
        args: truncate_chars(args, MAX_ARG_CHARS),
    })
}

/// Trunca em `max` caracteres (não bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Prepara um texto para envio: remove espaços no fim das linhas,
/// linhas vazias nas pontas, e limita a `max_bytes` respeitando
/// fronteiras de caractere.
pub fn sanitize_text(text: &str, max_bytes: usize) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    let joined = match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => return String::new(),
    };

    if joined.len() <= max_bytes {
        return joined;
    }
    if max_bytes <= ELLIPSIS.len() {
        return cut_at_boundary(&joined, max_bytes).to_string();
    }
    let mut out = cut_at_boundary(&joined, max_bytes - ELLIPSIS.len()).to_string();
    out.push_str(ELLIPSIS);
    out
}

fn cut_at_boundary(text: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Numera partes de uma resposta longa com o sufixo ` (i/n)`, mantendo
/// cada parte dentro de `max_bytes`.
pub fn number_parts(parts: &[String], max_bytes: usize) -> Vec<String> {
    let total = parts.len();
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let counter = format!(" ({}/{total})", i + 1);
            let budget = max_bytes.saturating_sub(counter.len());
            let mut body = sanitize_text(part, budget);
            body.push_str(&counter);
            body
        })
        .collect()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn decodes_json_private_message() {
        let line = r#"{"type":"PRIV","pubkey_prefix":"a1b2c3","text":" /feed ","sender_timestamp":42}"#;
        let frame = decode_radio_line(line).unwrap().unwrap();
        assert_eq!(frame.sender, node("a1b2c3"));
        assert_eq!(frame.kind, FrameKind::Text);
        assert_eq!(frame.payload, b"/feed");
        assert_eq!(frame.seq, Some(42));
    }

    #[test]
    fn decodes_json_advert_with_name() {
        let line = r#"{"type":"ADVERTISEMENT","public_key":"0b2c2328618f","adv_name":"Mattd-t1000"}"#;
        let frame = decode_radio_line(line).unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Advert);
        assert_eq!(frame.name.as_deref(), Some("Mattd-t1000"));
    }

    #[test]
    fn decodes_plain_format() {
        let frame = decode_radio_line("!a1b2c3: /hatch").unwrap().unwrap();
        assert_eq!(frame.sender, node("!a1b2c3"));
        assert_eq!(frame.payload, b"/hatch");
        assert_eq!(frame.seq, None);
    }

    #[test]
    fn ignores_unrelated_events() {
        assert_eq!(decode_radio_line(r#"{"type":"ACK","code":"1f"}"#).unwrap(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(decode_radio_line("   "), Err(ParseError::Empty));
        assert!(matches!(decode_radio_line("no colon here"), Err(ParseError::Unrecognized(_))));
        assert!(matches!(decode_radio_line("{not json"), Err(ParseError::Json(_))));
        assert_eq!(
            decode_radio_line(r#"{"type":"PRIV","text":"/feed"}"#),
            Err(ParseError::MissingSender)
        );
    }

    #[test]
    fn parses_verb_case_insensitive_with_args() {
        let cmd = parse_command(&node("AA11"), b"  /NAME   Sir Beeps  ").unwrap();
        assert_eq!(cmd.verb, "name");
        assert_eq!(cmd.args, "Sir Beeps");
    }

    #[test]
    fn free_text_is_empty_verb() {
        let cmd = parse_command(&node("AA11"), b"hello there").unwrap();
        assert_eq!(cmd.verb, "");
        assert_eq!(cmd.args, "hello there");
    }

    #[test]
    fn lone_delimiter_and_bad_utf8_fail() {
        assert_eq!(parse_command(&node("AA11"), b"/"), Err(ParseError::EmptyVerb));
        assert_eq!(parse_command(&node("AA11"), &[b'/', 0xff, 0xfe]), Err(ParseError::NotUtf8));
    }

    #[test]
    fn arguments_are_truncated() {
        let long = format!("/name {}", "x".repeat(200));
        let cmd = parse_command(&node("AA11"), long.as_bytes()).unwrap();
        assert_eq!(cmd.args.chars().count(), MAX_ARG_CHARS);
    }

    #[test]
    fn classify_routes_adverts_and_commands() {
        let advert = InboundFrame::advert(node("BB22"), Some("Bob".into()));
        assert_eq!(
            classify(&advert).unwrap(),
            Inbound::Advert { node: node("BB22"), name: Some("Bob".into()) }
        );
        let text = InboundFrame::text(node("BB22"), "/stats");
        assert!(matches!(classify(&text).unwrap(), Inbound::Command(c) if c.verb == "stats"));
    }

    #[test]
    fn sanitize_trims_lines_and_edges() {
        let out = sanitize_text("   \n  Line 1   \n\n  Line 2  \n  ", 200);
        assert_eq!(out, "  Line 1\n\n  Line 2");
    }

    #[test]
    fn sanitize_caps_bytes_on_char_boundary() {
        let out = sanitize_text(&"é".repeat(150), MAX_MESSAGE_BYTES);
        assert!(out.len() <= MAX_MESSAGE_BYTES);
        assert!(out.ends_with("..."));

        let exact = "A".repeat(200);
        assert_eq!(sanitize_text(&exact, 200), exact);
    }

    #[test]
    fn numbered_parts_fit_budget() {
        let parts = vec!["x".repeat(250), "short".to_string()];
        let out = number_parts(&parts, 200);
        assert!(out[0].ends_with(" (1/2)"));
        assert!(out[0].len() <= 200);
        assert_eq!(out[1], "short (2/2)");
    }
}
