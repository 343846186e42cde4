//! Encounter Engine - terminal host.
//!
//! Plays the role of the chat front end: keeps a small chat history, reads
//! commands from stdin and renders the encounter after every change.

use std::sync::Arc;

use anyhow::Context;
use encounter_domain::{
    ChatId, Combatant, DisplayKind, EncounterOutcome, EncounterSettings, EncounterStart,
    HistoryEntry, ProfileId, SessionSnapshot,
};
use encounter_engine::infrastructure::{
    clock::SystemClock,
    in_memory::StaticTrackerSnapshots,
    ollama::OllamaClient,
    ports::ClockPort,
    sqlite_store::SqliteEncounterStore,
};
use encounter_engine::use_cases::{ArchiveFormat, PromptContext};
use encounter_engine::{App, Ports};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Commands:
  <text>                      chat message (idle) or your action (in combat)
  /start <message>            start an encounter from a message
  /retry                      regenerate the encounter setup
  /approve enemy|party <n>    accept a suggested combatant
  /dismiss enemy|party <n>    reject a suggested combatant
  /begin                      begin combat once suggestions are resolved
  /regen [turn]               regenerate the latest (or a given) turn
  /swipe <turn> <alt>         show another alternative of a turn
  /add enemy|party <name> <hp>
  /remove enemy|party <n>
  /end [victory|defeat|fled]  summarize and archive the encounter
  /abandon                    drop the encounter
  /profiles                   list encounter profiles
  /profile <id>|default       run this chat under a profile
  /export <id>                print a profile as JSON
  /import <path>              import a profile from a JSON file
  /archive [json|md]          export this chat's archived encounters
  /status                     show the encounter
  /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "encounter_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Encounter Engine");

    let db_path = std::env::var("ENCOUNTER_DB_PATH").unwrap_or_else(|_| "encounters.db".into());
    let chat_id = ChatId::new(std::env::var("ENCOUNTER_CHAT_ID").unwrap_or_else(|_| "terminal".into()));
    let settings = EncounterSettings::from_env();

    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
    let store = Arc::new(
        SqliteEncounterStore::new(&db_path, clock.clone())
            .await
            .with_context(|| format!("opening encounter database at {db_path}"))?,
    );
    let llm = Arc::new(OllamaClient::from_env());
    tracing::info!(model = %llm.model(), db = %db_path, "Engine configured");

    let tracker = Arc::new(StaticTrackerSnapshots::new());
    let app = App::new(
        Ports {
            llm,
            snapshots: store.clone(),
            archive: store.clone(),
            profiles: store,
            tracker: tracker.clone(),
            clock,
        },
        settings,
    )
    .await
    .context("loading the profile library")?;

    let mut host = TerminalHost {
        app,
        tracker,
        chat_id,
        history: Vec::new(),
        prompt_context: prompt_context_from_env(),
    };

    if let Some(state) = host.app.encounters.restore(&host.chat_id).await {
        println!("Restored a saved encounter ({state}).");
        host.render().await;
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = host.handle(line).await {
            println!("! {e:#}");
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

struct TerminalHost {
    app: App,
    tracker: Arc<StaticTrackerSnapshots>,
    chat_id: ChatId,
    history: Vec<HistoryEntry>,
    prompt_context: PromptContext,
}

impl TerminalHost {
    async fn handle(&mut self, line: &str) -> anyhow::Result<()> {
        let Some(command) = line.strip_prefix('/') else {
            return self.say(line).await;
        };
        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();
        let encounters = self.app.encounters.clone();
        let chat = self.chat_id.clone();

        match name {
            "start" => {
                let start = EncounterStart {
                    start_message: rest.to_string(),
                    history: self.history.clone(),
                    ..Default::default()
                };
                let applied = encounters
                    .start_encounter(&chat, start, &self.prompt_context)
                    .await?;
                report_save(applied.persisted);
            }
            "retry" => {
                encounters
                    .retry_initialization(&chat, &self.prompt_context)
                    .await?;
            }
            "approve" | "dismiss" => {
                let (side, index) = side_and_index(&args)?;
                let applied = match (name, side) {
                    ("approve", Side::Enemy) => encounters.approve_pending_enemy(&chat, index).await?,
                    ("approve", Side::Party) => {
                        encounters.approve_pending_party_member(&chat, index).await?
                    }
                    (_, Side::Enemy) => encounters.dismiss_pending_enemy(&chat, index).await?,
                    (_, Side::Party) => {
                        encounters.dismiss_pending_party_member(&chat, index).await?
                    }
                };
                report_save(applied.persisted);
            }
            "begin" => {
                encounters.begin_combat(&chat).await?;
            }
            "regen" => {
                match args.first() {
                    Some(turn) => {
                        let turn = parse_number(turn)?;
                        encounters
                            .regenerate_turn(&chat, turn.saturating_sub(1), &self.prompt_context)
                            .await?
                    }
                    None => {
                        encounters
                            .regenerate_last_action(&chat, &self.prompt_context)
                            .await?
                    }
                };
            }
            "swipe" => {
                let [turn, alternative] = args.as_slice() else {
                    anyhow::bail!("usage: /swipe <turn> <alt>");
                };
                encounters
                    .select_turn_alternative(
                        &chat,
                        parse_number(turn)?.saturating_sub(1),
                        parse_number(alternative)?.saturating_sub(1),
                    )
                    .await?;
            }
            "add" => {
                let [side, name, hp] = args.as_slice() else {
                    anyhow::bail!("usage: /add enemy|party <name> <hp>");
                };
                let combatant = Combatant::new(*name, hp.parse().context("hp must be a number")?);
                let change = match parse_side(side)? {
                    Side::Enemy => encounters.add_enemy(&chat, combatant).await,
                    Side::Party => encounters.add_party_member(&chat, combatant).await,
                };
                if change.is_none() {
                    println!("(nothing changed)");
                }
            }
            "remove" => {
                let (side, index) = side_and_index(&args)?;
                let change = match side {
                    Side::Enemy => encounters.remove_enemy(&chat, index).await,
                    Side::Party => encounters.remove_party_member(&chat, index).await,
                };
                if change.is_none() {
                    println!("(nothing changed)");
                }
            }
            "end" => {
                let outcome = args
                    .first()
                    .map(|tag| tag.parse::<EncounterOutcome>())
                    .transpose()?;
                let concluded = encounters
                    .conclude_encounter(&chat, outcome, &self.prompt_context)
                    .await?
                    .value;
                println!("\n{}", concluded.record.to_markdown());
                self.history
                    .push(HistoryEntry::assistant(concluded.record.summary.clone()));
                if let Some(tracker) = concluded.tracker {
                    self.tracker.commit(chat.clone(), tracker).await;
                    println!("(tracker updated)");
                }
                if !concluded.archived {
                    println!("(warning: the encounter could not be archived)");
                }
                return Ok(());
            }
            "abandon" => {
                encounters.abandon(&chat).await;
                println!("Encounter abandoned.");
                return Ok(());
            }
            "profiles" => {
                let active = self.app.profiles.default_profile_id().await;
                for profile in self.app.profiles.all_profiles().await {
                    let marker = if Some(&profile.id) == active.as_ref() { "*" } else { " " };
                    let kind = if profile.is_preset { "preset" } else { "custom" };
                    println!("{marker} {:<40} {} ({kind})", profile.id.as_str(), profile.name);
                }
                return Ok(());
            }
            "profile" => {
                let id = match rest {
                    "" => anyhow::bail!("usage: /profile <id>|default"),
                    "default" => None,
                    id => {
                        let id = ProfileId::new(id);
                        if self.app.profiles.profile_by_id(&id).await.is_none() {
                            anyhow::bail!("no profile with id {id}");
                        }
                        Some(id)
                    }
                };
                encounters.set_profile_override(&chat, id).await?;
                let profile = self
                    .app
                    .profiles
                    .active_profile(encounters.snapshot(&chat).await.profile_override.as_ref())
                    .await;
                println!("Encounters here now run as: {}", profile.name);
                return Ok(());
            }
            "export" => {
                println!("{}", self.app.profiles.export_profile(&ProfileId::new(rest)).await?);
                return Ok(());
            }
            "import" => {
                let json = tokio::fs::read_to_string(rest)
                    .await
                    .with_context(|| format!("reading {rest}"))?;
                let profile = self.app.profiles.import_profile(&json).await?;
                println!("Imported {} as {}", profile.name, profile.id);
                return Ok(());
            }
            "archive" => {
                let format = match rest {
                    "" => ArchiveFormat::Markdown,
                    other => other.parse()?,
                };
                println!("{}", self.app.archive.export(&chat, format).await?);
                return Ok(());
            }
            "status" => {}
            "help" => {
                println!("{HELP}");
                return Ok(());
            }
            other => anyhow::bail!("unknown command /{other}, try /help"),
        }

        self.render().await;
        Ok(())
    }

    /// Plain text: an action during combat, a chat message otherwise.
    async fn say(&mut self, text: &str) -> anyhow::Result<()> {
        let state = self.app.encounters.state(&self.chat_id).await;
        if state == encounter_domain::EncounterState::Active {
            self.app
                .encounters
                .take_action(&self.chat_id, text, &self.prompt_context)
                .await?;
            self.render().await;
        } else {
            self.history.push(HistoryEntry::user(text));
        }
        Ok(())
    }

    async fn render(&self) {
        let snapshot = self.app.encounters.snapshot(&self.chat_id).await;
        print!("{}", render_snapshot(&snapshot));
    }
}

fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut out = format!("\n== Encounter ({}) ==\n", snapshot.state);
    if let Some(stats) = &snapshot.combat_stats {
        out.push_str(&format!("{}\n", stats.environment));
        for (label, side) in [("Party", &stats.party), ("Enemies", &stats.enemies)] {
            out.push_str(&format!("{label}:\n"));
            for (i, c) in side.iter().enumerate() {
                let player = if c.is_player { " (you)" } else { "" };
                let statuses: Vec<_> = c.statuses.iter().map(|s| s.tag.as_str()).collect();
                out.push_str(&format!(
                    "  {}. {}{} {}/{} {}\n",
                    i + 1,
                    c.name,
                    player,
                    c.hp,
                    c.max_hp,
                    statuses.join(", ")
                ));
            }
        }
    }
    for (kind, pending) in [("enemy", &snapshot.pending_enemies), ("party", &snapshot.pending_party)] {
        for (i, c) in pending.iter().enumerate() {
            out.push_str(&format!("  suggested {kind} {}: {} ({} hp)\n", i + 1, c.name, c.max_hp));
        }
    }

    let mut turn = 0;
    for entry in snapshot.display_log.entries() {
        let line = entry.current();
        let alternatives = if entry.swipe_count() > 1 {
            format!(" [{}/{}]", entry.swipe_index() + 1, entry.swipe_count())
        } else {
            String::new()
        };
        match line.kind {
            DisplayKind::Intro => out.push_str(&format!("\n{}{}\n", line.message, alternatives)),
            DisplayKind::Action => {
                turn += 1;
                out.push_str(&format!("\n{turn}> {}\n", line.message));
            }
            DisplayKind::Narrative => {
                out.push_str(&format!("{}{}\n", line.message, alternatives));
                for action in line.enemy_actions.iter().chain(&line.party_actions) {
                    out.push_str(&format!("  - {action}\n"));
                }
            }
        }
    }
    if let Some(outcome) = snapshot.outcome {
        out.push_str(&format!("\nResult: {outcome}. Use /end to wrap up.\n"));
    }
    out
}

enum Side {
    Enemy,
    Party,
}

fn parse_side(text: &str) -> anyhow::Result<Side> {
    match text {
        "enemy" | "enemies" => Ok(Side::Enemy),
        "party" | "ally" => Ok(Side::Party),
        other => anyhow::bail!("expected enemy or party, got {other}"),
    }
}

/// `<side> <n>` with a 1-based `n`.
fn side_and_index(args: &[&str]) -> anyhow::Result<(Side, usize)> {
    let [side, index] = args else {
        anyhow::bail!("expected enemy|party <n>");
    };
    Ok((parse_side(side)?, parse_number(index)?.saturating_sub(1)))
}

fn parse_number(text: &str) -> anyhow::Result<usize> {
    text.parse()
        .with_context(|| format!("'{text}' is not a number"))
}

/// World and persona for prompts, from `ENCOUNTER_WORLD` and `ENCOUNTER_PERSONA`.
fn prompt_context_from_env() -> PromptContext {
    let mut context = PromptContext::new();
    if let Ok(world) = std::env::var("ENCOUNTER_WORLD") {
        context = context.with_world(world);
    }
    if let Ok(persona) = std::env::var("ENCOUNTER_PERSONA") {
        let (name, description) = persona.split_once(':').unwrap_or((persona.as_str(), ""));
        context = context.with_persona(encounter_engine::use_cases::CharacterCard::new(
            name.trim(),
            description.trim(),
        ));
    }
    context
}

fn report_save(persisted: bool) {
    if !persisted {
        println!("(warning: the encounter could not be saved)");
    }
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
