//! Regras do jogo – decaimento, envelhecimento, morte, ações e avisos.
//!
//! Tudo aqui é puro: recebe um [`PetState`] e o relógio, devolve o novo
//! estado ou o texto. Persistência e envio ficam com o daemon.

use crate::types::{AgeStage, PetState, PetStats, Timestamp};

// ──────────────────────────────────────────────
// Constantes
// ──────────────────────────────────────────────

/// Variação por hora.
pub const HUNGER_PER_HOUR: f32 = 5.0;
pub const HYGIENE_PER_HOUR: f32 = 3.0;
pub const HAPPINESS_PER_HOUR: f32 = 2.0;
pub const ENERGY_REGEN_PER_HOUR: f32 = 10.0;
/// Perda de saúde enquanto faminto ou sujo
pub const HEALTH_PER_HOUR: f32 = 2.0;

/// Limites superiores de cada estágio (horas desde o nascimento).
pub const EGG_MAX_HOURS: f64 = 1.0;
pub const CHILD_MAX_HOURS: f64 = 24.0;
pub const TEEN_MAX_HOURS: f64 = 72.0;
pub const ADULT_MAX_HOURS: f64 = 168.0;
/// Vida máxima (14 dias)
pub const MAX_LIFESPAN_HOURS: f64 = 336.0;

pub const FEED_AMOUNT: f32 = 30.0;
pub const CLEAN_AMOUNT: f32 = 30.0;
pub const PLAY_HAPPINESS: f32 = 25.0;
pub const PLAY_ENERGY_COST: f32 = 20.0;

/// Abaixo disso o dono recebe aviso proativo
pub const LOW_HEALTH_THRESHOLD: f32 = 30.0;
pub const LOW_HYGIENE_THRESHOLD: f32 = 30.0;

pub const DEATH_NEGLECT: &str = "Health depleted (neglect)";
pub const DEATH_OLD_AGE: &str = "Natural death (old age)";

// ──────────────────────────────────────────────
// Decaimento e envelhecimento
// ──────────────────────────────────────────────

/// Resultado de um passo de decaimento.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecayOutcome {
    Alive,
    /// O pet cruzou um limiar de morte neste passo
    Died(&'static str),
}

/// Estágio para uma idade em horas.
pub fn stage_for_age(hours: f64) -> AgeStage {
    if hours <= EGG_MAX_HOURS {
        AgeStage::Egg
    } else if hours <= CHILD_MAX_HOURS {
        AgeStage::Child
    } else if hours <= TEEN_MAX_HOURS {
        AgeStage::Teen
    } else if hours <= ADULT_MAX_HOURS {
        AgeStage::Adult
    } else {
        AgeStage::Elder
    }
}

/// Limite superior (horas) do estágio; `None` para elder.
fn stage_end_hours(stage: AgeStage) -> Option<f64> {
    match stage {
        AgeStage::Egg => Some(EGG_MAX_HOURS),
        AgeStage::Child => Some(CHILD_MAX_HOURS),
        AgeStage::Teen => Some(TEEN_MAX_HOURS),
        AgeStage::Adult => Some(ADULT_MAX_HOURS),
        AgeStage::Elder => None,
    }
}

/// Aplica `elapsed_secs` de decaimento aos atributos.
pub fn decay_stats(stats: &mut PetStats, elapsed_secs: u64) {
    let hours = elapsed_secs as f32 / 3600.0;
    if hours <= 0.0 {
        return;
    }
    stats.hunger = clamp(stats.hunger + HUNGER_PER_HOUR * hours);
    stats.hygiene = clamp(stats.hygiene - HYGIENE_PER_HOUR * hours);
    stats.happiness = clamp(stats.happiness - HAPPINESS_PER_HOUR * hours);
    stats.energy = clamp(stats.energy + ENERGY_REGEN_PER_HOUR * hours);

    // Saúde avaliada sobre os valores já decaídos
    if stats.hunger > 80.0 || stats.hygiene < 20.0 {
        stats.health = clamp(stats.health - HEALTH_PER_HOUR * hours);
    }
}

/// Motivo de morte, se algum limiar foi cruzado.
pub fn death_reason(pet: &PetState, now: Timestamp) -> Option<&'static str> {
    if pet.stats.health <= 0.0 {
        Some(DEATH_NEGLECT)
    } else if pet.age_hours(now) >= MAX_LIFESPAN_HOURS {
        Some(DEATH_OLD_AGE)
    } else {
        None
    }
}

/// Um passo completo: atributos, estágio e verificação de morte.
///
/// Pets mortos não mudam. Em caso de morte o pet já sai marcado.
pub fn apply_decay(pet: &mut PetState, elapsed_secs: u64, now: Timestamp) -> DecayOutcome {
    if !pet.alive {
        return DecayOutcome::Alive;
    }
    decay_stats(&mut pet.stats, elapsed_secs);
    pet.last_tick = now;
    pet.stage = stage_for_age(pet.age_hours(now));

    match death_reason(pet, now) {
        Some(reason) => {
            pet.alive = false;
            pet.death_reason = Some(reason.to_string());
            DecayOutcome::Died(reason)
        }
        None => DecayOutcome::Alive,
    }
}

fn clamp(v: f32) -> f32 {
    v.clamp(0.0, 100.0)
}

// ──────────────────────────────────────────────
// Ações do dono
// ──────────────────────────────────────────────

pub fn feed(pet: &mut PetState, now: Timestamp) {
    pet.stats.hunger = clamp(pet.stats.hunger - FEED_AMOUNT);
    pet.last_interaction = now;
}

pub fn clean(pet: &mut PetState, now: Timestamp) {
    pet.stats.hygiene = clamp(pet.stats.hygiene + CLEAN_AMOUNT);
    pet.last_interaction = now;
}

/// Brincar exige energia. Retorna `false` sem alterar nada se faltar.
pub fn play(pet: &mut PetState, now: Timestamp) -> bool {
    if pet.stats.energy < PLAY_ENERGY_COST {
        return false;
    }
    pet.stats.happiness = clamp(pet.stats.happiness + PLAY_HAPPINESS);
    pet.stats.energy = clamp(pet.stats.energy - PLAY_ENERGY_COST);
    pet.last_interaction = now;
    true
}

/// Normaliza um nome: espaços nas pontas removidos, no máximo `max_chars`.
/// `None` se sobrar vazio.
pub fn clean_name(raw: &str, max_chars: usize) -> Option<String> {
    let name: String = raw.trim().chars().take(max_chars).collect();
    let name = name.trim_end().to_string();
    (!name.is_empty()).then_some(name)
}

// ──────────────────────────────────────────────
// Textos de resposta
// ──────────────────────────────────────────────

pub mod replies {
    pub const WELCOME: &str = "Welcome to MeshAgotchi!\n\
        A virtual pet game on LoRa mesh networks. Hatch and care for your unique pet by feeding, cleaning, and playing with them.\n\
        Send /help to get started.";

    pub const HELP: &str = "Commands:\n\
        /help - Help\n\
        /howto - Game guide\n\
        /hatch - New pet\n\
        /stats - Stats\n\
        /feed - Feed\n\
        /clean - Clean\n\
        /play - Play\n\
        /status - Status\n\
        /name <n> - Name";

    pub const HOWTO: [&str; 6] = [
        "MeshAgotchi Guide\nHOW TO PLAY:\n1. Start: /hatch\n2. Care: /feed, /clean, /play\n3. Monitor: /stats\n4. Check: /status",
        "STATS:\n- Health: Drops if hunger>80 or hygiene<20\n- Hunger: Increases, use /feed\n- Hygiene: Decreases, use /clean\n- Happiness: Use /play\n- Energy: Regen 10/hr, need 20 for /play",
        "EVOLUTION:\n- Egg: 0-1hr\n- Child: 1-24hrs\n- Teen: 24-72hrs\n- Adult: 72-168hrs\n- Elder: 168+hrs",
        "COMMANDS:\n/hatch - New pet\n/stats - Stats\n/feed - Decrease hunger\n/clean - Increase hygiene\n/play - Increase happiness",
        "/status - Quick status\n/name <n> - Name pet\n/help - List commands\n/howto - This guide\n\nTIPS:\n- Check /status regularly\n- Keep hunger<80, hygiene>20",
        "- Energy regens auto\n- Wait if too low to play\n- Each generation unique\nbased on Node ID",
    ];

    pub const ALREADY_ALIVE: &str = "You already have a living pet! Use /stats to check on them.";
    pub const NO_PET: &str = "No active pet. Use /hatch to create one.";
    pub const DEAD_PET: &str = "Your pet has died. Use /hatch to start a new generation.";
    pub const FED: &str = "Current supplied. Hunger decreased.";
    pub const CLEANED: &str = "Buffer cleared. Hygiene restored.";
    pub const PLAYED: &str = "Play session complete. Happiness increased!";
    pub const TOO_TIRED: &str = "Energy too low. Pet needs rest.";
    pub const NAME_USAGE: &str = "Usage: /name <name>";
    pub const STORE_FAILURE: &str = "Pet storage unavailable. Please try again later.";

    pub fn hatched(generation: u32) -> String {
        format!("Signal acquired! Pet Generation {generation} hatched!\nUse /stats to see your new pet.")
    }

    pub fn named(name: &str) -> String {
        format!("Pet named: {name}")
    }
}

/// Frases temáticas conforme os atributos; vazio se nada se destaca.
pub fn flavor_text(stats: &PetStats) -> String {
    let mut parts = Vec::new();
    if stats.hunger > 80.0 {
        parts.push("Low voltage detected. Supply current.");
    }
    if stats.hygiene < 20.0 {
        parts.push("Buffer overflow! CRC mismatch in sector 4 (Poop).");
    }
    if stats.happiness > 80.0 {
        parts.push("Signal Strength: 100%.");
    }
    if stats.health < 20.0 {
        parts.push("Packet loss critical... disconnecting...");
    }
    parts.join(" ")
}

/// Resposta de `/stats`.
pub fn stats_text(pet: &PetState) -> String {
    let s = &pet.stats;
    let mut lines = Vec::new();
    if let Some(name) = &pet.name {
        lines.push(format!("Name: {name}"));
    }
    lines.push(format!(
        "Gen {} {} ({})",
        pet.generation,
        pet.genome.species,
        pet.genome.temperament.as_str()
    ));
    lines.push(format!("Age: {}", pet.stage));
    lines.push(format!("Health: {:.0}/100", s.health));
    lines.push(format!("Hunger: {:.0}/100", s.hunger));
    lines.push(format!("Hygiene: {:.0}/100", s.hygiene));
    lines.push(format!("Happiness: {:.0}/100", s.happiness));
    lines.push(format!("Energy: {:.0}/100", s.energy));

    let flavor = flavor_text(s);
    if !flavor.is_empty() {
        lines.push(flavor);
    }
    lines.join("\n")
}

/// Resposta de `/status`: estágio, tempo de vida e próxima evolução.
pub fn status_text(pet: &PetState, now: Timestamp) -> String {
    if !pet.alive {
        let reason = pet.death_reason.as_deref().unwrap_or("Unknown");
        return format!("Pet died: {reason}. Use /hatch for new pet.");
    }

    let hours = pet.age_hours(now);
    let alive = if hours < 24.0 {
        format!("{hours:.1} hours")
    } else {
        format!("{:.1} days ({hours:.1} hours)", hours / 24.0)
    };

    let mut text = format!(
        "Status: {}\nHealth: {:.0}/100\nAlive: {alive}",
        pet.stage, pet.stats.health
    );

    let next = pet.stage.next().zip(stage_end_hours(pet.stage));
    if let Some((next_stage, end)) = next {
        let left = end - hours;
        if left > 0.0 {
            let eta = if left < 24.0 {
                format!("{left:.1} hours")
            } else {
                format!("{:.1} days", left / 24.0)
            };
            text.push_str(&format!("\nNext evolution: {eta} until {next_stage}"));
        }
    }
    text
}

// ──────────────────────────────────────────────
// Avisos proativos
// ──────────────────────────────────────────────

/// Aviso a enviar ao dono sem que ele tenha pedido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    StageUp { from: AgeStage, to: AgeStage },
    LowHealth,
    LowHygiene,
}

impl Notice {
    pub fn text(&self) -> String {
        match self {
            Self::StageUp { from, to } => match (from, to) {
                (AgeStage::Egg, AgeStage::Child) => {
                    "Signal acquired! Your pet has hatched! Use /stats to see them.".into()
                }
                (AgeStage::Child, AgeStage::Teen) => {
                    "Firmware update complete! Your pet is now a Teen.".into()
                }
                (AgeStage::Teen, AgeStage::Adult) => {
                    "System upgrade successful! Your pet reached Adulthood!".into()
                }
                (AgeStage::Adult, AgeStage::Elder) => {
                    "Legacy mode activated. Your pet is now an Elder.".into()
                }
                _ => format!("Age upgrade: {from} -> {to}"),
            },
            Self::LowHealth => {
                "WARNING: Health critical (<30). Packet loss imminent. Use /feed and /clean.".into()
            }
            Self::LowHygiene => "WARNING: Buffer overflow detected. Hygiene critical. Use /clean.".into(),
        }
    }
}

/// Aviso pendente para o pet, por prioridade: evolução, saúde, higiene.
///
/// Evolução não respeita cooldown; os alertas de atributo só saem se o
/// último aviso tiver mais de `cooldown_secs`.
pub fn pending_notice(pet: &PetState, now: Timestamp, cooldown_secs: u64) -> Option<Notice> {
    if !pet.alive {
        return None;
    }
    if pet.stage > pet.announced_stage {
        return Some(Notice::StageUp {
            from: pet.announced_stage,
            to: pet.stage,
        });
    }

    let cooled = pet
        .last_notification
        .is_none_or(|last| now.saturating_sub(last) >= cooldown_secs);
    if !cooled {
        return None;
    }
    if pet.stats.health < LOW_HEALTH_THRESHOLD {
        Some(Notice::LowHealth)
    } else if pet.stats.hygiene < LOW_HYGIENE_THRESHOLD {
        Some(Notice::LowHygiene)
    } else {
        None
    }
}

/// Registra no pet que o aviso foi enviado.
pub fn mark_notified(pet: &mut PetState, notice: Notice, now: Timestamp) {
    if let Notice::StageUp { to, .. } = notice {
        pet.announced_stage = to;
    }
    pet.last_notification = Some(now);
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genetics;
    use crate::types::NodeId;

    const HOUR: u64 = 3600;
    const T0: Timestamp = 1_700_000_000;

    fn pet() -> PetState {
        let owner = NodeId::new("AA11").unwrap();
        let genome = genetics::generate(&owner, 1);
        PetState::hatch(owner, 1, genome, T0)
    }

    #[test]
    fn one_hour_of_decay() {
        let mut p = pet();
        let out = apply_decay(&mut p, HOUR, T0 + HOUR);
        assert_eq!(out, DecayOutcome::Alive);
        assert_eq!(p.stats.hunger, 55.0);
        assert_eq!(p.stats.hygiene, 47.0);
        assert_eq!(p.stats.happiness, 48.0);
        assert_eq!(p.stats.energy, 100.0);
        assert_eq!(p.stats.health, 100.0);
        assert_eq!(p.last_tick, T0 + HOUR);
    }

    #[test]
    fn short_ticks_accumulate() {
        let mut p = pet();
        for i in 1..=60 {
            apply_decay(&mut p, 60, T0 + i * 60);
        }
        assert!((p.stats.hunger - 55.0).abs() < 0.01, "hunger = {}", p.stats.hunger);
    }

    #[test]
    fn health_drops_only_when_starving_or_dirty() {
        let mut p = pet();
        p.stats.hunger = 85.0;
        apply_decay(&mut p, HOUR, T0 + HOUR);
        assert_eq!(p.stats.health, 98.0);

        let mut q = pet();
        q.stats.hygiene = 21.0;
        apply_decay(&mut q, HOUR, T0 + HOUR);
        // Higiene decaída para 18 → saúde cai
        assert_eq!(q.stats.health, 98.0);
    }

    #[test]
    fn neglect_kills() {
        let mut p = pet();
        p.stats.health = 1.0;
        p.stats.hunger = 100.0;
        let out = apply_decay(&mut p, HOUR, T0 + HOUR);
        assert_eq!(out, DecayOutcome::Died(DEATH_NEGLECT));
        assert!(!p.alive);
        assert_eq!(p.death_reason.as_deref(), Some(DEATH_NEGLECT));

        // Pet morto não decai mais
        let snapshot = p.clone();
        assert_eq!(apply_decay(&mut p, HOUR, T0 + 2 * HOUR), DecayOutcome::Alive);
        assert_eq!(p, snapshot);
    }

    #[test]
    fn old_age_kills() {
        let mut p = pet();
        let now = T0 + 336 * HOUR;
        assert_eq!(death_reason(&p, now), Some(DEATH_OLD_AGE));
        assert_eq!(apply_decay(&mut p, 60, now), DecayOutcome::Died(DEATH_OLD_AGE));
    }

    #[test]
    fn stages_follow_age() {
        assert_eq!(stage_for_age(0.5), AgeStage::Egg);
        assert_eq!(stage_for_age(1.0), AgeStage::Egg);
        assert_eq!(stage_for_age(1.5), AgeStage::Child);
        assert_eq!(stage_for_age(30.0), AgeStage::Teen);
        assert_eq!(stage_for_age(100.0), AgeStage::Adult);
        assert_eq!(stage_for_age(200.0), AgeStage::Elder);
    }

    #[test]
    fn actions_clamp_and_play_needs_energy() {
        let mut p = pet();
        p.stats.hunger = 10.0;
        feed(&mut p, T0 + 5);
        assert_eq!(p.stats.hunger, 0.0);
        assert_eq!(p.last_interaction, T0 + 5);

        clean(&mut p, T0);
        clean(&mut p, T0);
        assert_eq!(p.stats.hygiene, 100.0);

        p.stats.energy = 19.0;
        assert!(!play(&mut p, T0));
        assert_eq!(p.stats.happiness, 50.0);
        p.stats.energy = 20.0;
        assert!(play(&mut p, T0));
        assert_eq!(p.stats.happiness, 75.0);
        assert_eq!(p.stats.energy, 0.0);
    }

    #[test]
    fn names_are_trimmed_and_capped() {
        assert_eq!(clean_name("  Bolt  ", 20).as_deref(), Some("Bolt"));
        assert_eq!(clean_name("   ", 20), None);
        assert_eq!(clean_name("abcdefghijklmnopqrstuvwxyz", 20).unwrap().chars().count(), 20);
    }

    #[test]
    fn flavor_reflects_thresholds() {
        let mut s = PetStats::default();
        assert_eq!(flavor_text(&s), "");
        s.hunger = 90.0;
        s.happiness = 90.0;
        assert_eq!(flavor_text(&s), "Low voltage detected. Supply current. Signal Strength: 100%.");
    }

    #[test]
    fn status_shows_next_evolution() {
        let mut p = pet();
        p.stage = AgeStage::Child;
        let text = status_text(&p, T0 + 12 * HOUR);
        assert!(text.starts_with("Status: child\nHealth: 100/100\nAlive: 12.0 hours"));
        assert!(text.ends_with("Next evolution: 12.0 hours until teen"), "{text}");

        p.stage = AgeStage::Elder;
        let text = status_text(&p, T0 + 200 * HOUR);
        assert!(text.contains("Alive: 8.3 days (200.0 hours)"));
        assert!(!text.contains("Next evolution"));

        p.alive = false;
        p.death_reason = Some(DEATH_OLD_AGE.into());
        assert_eq!(
            status_text(&p, T0),
            "Pet died: Natural death (old age). Use /hatch for new pet."
        );
    }

    #[test]
    fn stats_text_fits_one_message() {
        let mut p = pet();
        p.name = Some("abcdefghijklmnopqrst".into());
        p.stats = PetStats { hunger: 90.0, hygiene: 10.0, happiness: 90.0, energy: 0.0, health: 10.0 };
        // Flavor completo ultrapassa 200 bytes; o sanitizador de saída corta
        assert!(stats_text(&p).starts_with("Name: abcdefghijklmnopqrst\nGen 1 "));
        assert!(replies::HOWTO.iter().all(|part| part.len() < 190));
    }

    #[test]
    fn stage_up_has_priority_over_warnings() {
        let mut p = pet();
        p.stage = AgeStage::Child;
        p.stats.health = 10.0;
        let notice = pending_notice(&p, T0, 3600).unwrap();
        assert_eq!(notice, Notice::StageUp { from: AgeStage::Egg, to: AgeStage::Child });
        assert!(notice.text().starts_with("Signal acquired! Your pet has hatched!"));

        mark_notified(&mut p, notice, T0);
        // Cooldown segura o aviso de saúde
        assert_eq!(pending_notice(&p, T0 + 60, 3600), None);
        assert_eq!(pending_notice(&p, T0 + 3600, 3600), Some(Notice::LowHealth));
    }

    #[test]
    fn hygiene_warning_and_skipped_stage_text() {
        let mut p = pet();
        p.stats.hygiene = 25.0;
        assert_eq!(pending_notice(&p, T0, 3600), Some(Notice::LowHygiene));

        let skip = Notice::StageUp { from: AgeStage::Egg, to: AgeStage::Teen };
        assert_eq!(skip.text(), "Age upgrade: egg -> teen");
    }
}
