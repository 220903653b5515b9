//! Message dispatch and prefix commands.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::bot::coordinator::Coordinator;
use crate::bot::message::{truncate_safe, ChatMessage};
use crate::bot::messenger::{reply_or_edit, reply_or_edit_embed, Embed, Messenger};
use crate::bot::reminders::parse_duration;
use crate::bot::unix_now;
use crate::config::Config;
use crate::openrouter::{self, LlmError};
use crate::websearch::{SearchClient, SearchError, SearchResult};

const THINKING: &str = "💭 Thinking...";
const RATE_LIMIT_EMOJI: &str = "⏰";

/// Shortest delay `!remind` accepts, in seconds.
const MIN_REMINDER_SECS: i64 = 60;

/// Discord caps embed descriptions at 4096 characters.
const MAX_EMBED_DESCRIPTION: usize = 4000;

const HELP_TEXT: &str = "I can help you with the following:

  **AI & Knowledge**
  !ask <question> - Ask the AI
  !factcheck <claim> - Verify claims with web search

  **Utilities**
  !remind 5m <message> - Set reminder

  **Fun & Social**
  !flip - Flip a coin
  !roll [dice] - Roll dice (eg. 2d6 or 20)

  You can also mention me to get my attention.";

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    RateLimited,
    Command,
    Mention,
    Engaged,
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Everything a handler needs: config, shared state and the outbound clients.
pub struct Bot {
    pub(crate) config: Config,
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) llm: openrouter::Client,
    pub(crate) search: SearchClient,
}

impl Bot {
    pub fn new(
        config: Config,
        coordinator: Arc<Coordinator>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self, BotError> {
        let llm = openrouter::Client::new(&config.open_router)?;
        let search = SearchClient::new(config.search_api_key.clone())?;
        Ok(Self { config, coordinator, messenger, llm, search })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Entry point for every message not written by a bot.
    pub async fn handle_message(&self, msg: ChatMessage) -> Dispatch {
        let now = unix_now();

        if !self.coordinator.admit(&msg.user_id, now) {
            self.punish_rate_limited(&msg, now).await;
            return Dispatch::RateLimited;
        }

        self.coordinator.record_message(&msg.channel_id, msg.context_entry());

        if let Some((name, args)) = msg.command(&self.config.prefix) {
            self.handle_command(&msg, name, args).await;
            return Dispatch::Command;
        }

        if msg.mentions_bot {
            self.engage_from_mention(&msg).await;
            return Dispatch::Mention;
        }

        if rand::random::<f32>() < self.config.engage_chance {
            self.engage_with_message(&msg).await;
            return Dispatch::Engaged;
        }

        Dispatch::Ignored
    }

    async fn punish_rate_limited(&self, msg: &ChatMessage, now: i64) {
        warn!("⏰ Rate limited {} ({}) in channel {}", msg.username, msg.user_id, msg.channel_id);

        if let Err(e) = self
            .messenger
            .add_reaction(&msg.channel_id, &msg.message_id, RATE_LIMIT_EMOJI)
            .await
        {
            warn!("Failed to add warning reaction: {e}");
        }

        let Some(ref guild_id) = msg.guild_id else {
            return;
        };
        let until = now + self.config.rate_limit.mute_time;
        if let Err(e) = self.messenger.timeout_member(guild_id, &msg.user_id, until).await {
            error!("Failed to timeout user {}: {}", msg.username, e);
        }
    }

    async fn handle_command(&self, msg: &ChatMessage, name: &str, args: &str) {
        info!("Command '{}' from {} ({})", name, msg.username, msg.user_id);

        match name {
            "help" => self.say(msg, HELP_TEXT).await,
            "ask" => self.handle_ask(msg, args).await,
            "factcheck" => self.handle_factcheck(msg, args).await,
            "flip" => self.say(msg, coin_flip()).await,
            "roll" => {
                let (count, sides) = parse_roll(args);
                self.say(msg, &format_roll(count, sides, &roll_dice(count, sides))).await
            }
            "remind" => self.handle_remind(msg, args).await,
            _ => {}
        }
    }

    async fn say(&self, msg: &ChatMessage, text: &str) {
        if let Err(e) = self.messenger.send_message(&msg.channel_id, text).await {
            warn!("Failed to send message: {e}");
        }
    }

    async fn handle_ask(&self, msg: &ChatMessage, question: &str) {
        if question.is_empty() {
            self.say(msg, "Usage: `!ask <your question>` (eg. !ask What is the meaning of life?)").await;
            return;
        }

        let placeholder = self.messenger.send_message(&msg.channel_id, THINKING).await.ok();

        // The question itself is already the newest entry in the window
        let mut request = self.llm.request();
        request.extend(self.coordinator.conversation(&msg.channel_id));

        let text = match self.llm.send(&request).await {
            Ok(reply) if !reply.content.trim().is_empty() => self.coordinator.resolve_mentions(&reply.content),
            Ok(_) => {
                error!("Empty reply from model");
                "❌ Sorry I'm unable to think right now.".to_string()
            }
            Err(e) => {
                error!("Failed to send request: {e}");
                "❌ Sorry I'm unable to think right now.".to_string()
            }
        };

        if let Err(e) = reply_or_edit(self.messenger.as_ref(), &msg.channel_id, placeholder.as_ref(), &text).await {
            error!("Failed to send message: {e}");
        }
    }

    async fn handle_factcheck(&self, msg: &ChatMessage, claim: &str) {
        if claim.is_empty() {
            let usage = Embed {
                title: "🔍 Factcheck Command Usage".into(),
                description: "Verify claims with web search!".into(),
                colour: 0x3498db,
                fields: vec![
                    ("Usage".into(), "`!factcheck <claim>`".into(), false),
                    ("Example".into(), "`!factcheck The moon is made of cheese`".into(), false),
                ],
                ..Embed::default()
            };
            if let Err(e) = self.messenger.send_embed(&msg.channel_id, &usage).await {
                warn!("Failed to send usage: {e}");
            }
            return;
        }

        let placeholder = self.messenger.send_message(&msg.channel_id, THINKING).await.ok();
        let placeholder = placeholder.as_ref();

        let results = match self.search.search(&format!("fact check {claim}")).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Web search error: {e}");
                let text = "❌ Failed to search for information. Please try again later.";
                if let Err(e) = reply_or_edit(self.messenger.as_ref(), &msg.channel_id, placeholder, text).await {
                    error!("Failed to send error message: {e}");
                }
                return;
            }
        };

        let mut request = self.llm.request();
        request.push(openrouter::Message::user(factcheck_prompt(claim, &results)));

        let analysis = match self.llm.send(&request).await {
            Ok(reply) if !reply.content.trim().is_empty() => reply.content,
            outcome => {
                error!("Fact-check AI error: {:?}", outcome.err());
                let text = "❌ Failed to analyze the fact-check. Please try again later.";
                if let Err(e) = reply_or_edit(self.messenger.as_ref(), &msg.channel_id, placeholder, text).await {
                    error!("Failed to send error message: {e}");
                }
                return;
            }
        };

        let embed = factcheck_embed(claim, &analysis, &results, &msg.username, unix_now());
        if let Err(e) = reply_or_edit_embed(self.messenger.as_ref(), &msg.channel_id, placeholder, &embed).await {
            error!("Failed to send fact-check: {e}");
        }
    }

    async fn handle_remind(&self, msg: &ChatMessage, args: &str) {
        let (delay, text) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
        let text = text.trim();
        if delay.is_empty() || text.is_empty() {
            self.say(msg, "Usage: `!remind 5m Take a break` or `!remind 2h Meeting with team`").await;
            return;
        }

        let secs = match parse_duration(delay) {
            Ok(secs) if secs >= MIN_REMINDER_SECS => secs,
            _ => {
                self.say(msg, "Invalid time format. Use: 5m, 2h, 1d (minutes, hours, days)").await;
                return;
            }
        };

        let scheduled = self
            .coordinator
            .create_reminder(&msg.channel_id, &msg.user_id, text, secs, unix_now())
            .await;
        if scheduled.is_none() {
            self.say(msg, "I'm restarting right now, try again in a minute.").await;
            return;
        }

        let confirmation = format!("<@!{}> I'll remind you in {} about: \"{}\"", msg.user_id, delay, text);
        self.say(msg, &confirmation).await;
    }
}

fn coin_flip() -> &'static str {
    if rand::random_bool(0.5) { "🪙 Heads" } else { "🎯 Tails" }
}

/// Parse `NdM`, `M` or nothing into (count, sides). Out-of-range parts keep their default.
pub fn parse_roll(args: &str) -> (u32, u32) {
    let mut count = 1;
    let mut sides = 6;

    let arg = args.trim();
    if let Some((c, s)) = arg.split_once('d') {
        if let Ok(c) = c.parse::<u32>()
            && (1..=10).contains(&c)
        {
            count = c;
        }
        if let Ok(s) = s.parse::<u32>()
            && (1..=100).contains(&s)
        {
            sides = s;
        }
    } else if let Ok(s) = arg.parse::<u32>()
        && (1..=100).contains(&s)
    {
        sides = s;
    }

    (count, sides)
}

fn roll_dice(count: u32, sides: u32) -> Vec<u32> {
    (0..count).map(|_| rand::random_range(1..=sides)).collect()
}

fn format_roll(count: u32, sides: u32, rolls: &[u32]) -> String {
    let total: u32 = rolls.iter().sum();
    let list: Vec<String> = rolls.iter().map(u32::to_string).collect();
    format!("🎲 Rolled {}d{}: {} (Total: {})", count, sides, list.join(", "), total)
}

fn factcheck_prompt(claim: &str, results: &[SearchResult]) -> String {
    let mut context = String::new();
    for result in results {
        let _ = writeln!(context, "Title: {}, URL: {}, Content: {}", result.title, result.url, result.description);
    }

    format!(
        r#"Fact-check this claim using the search results below.

CLAIM: "{claim}"

SEARCH RESULTS:
{context}

Respond with:

VERDICT: [True/False/Partially True/Unclear] - one sentence why

EVIDENCE:
- Supporting: [specific quotes/data from sources]
- Contradicting: [specific quotes/data from sources]

CONTEXT: [missing context that changes the claim's validity]

CONFIDENCE: [High/Medium/Low] based on source quality and consensus

Rules:
- Quote exact evidence, don't paraphrase
- Name the source for each piece of evidence
- If sources conflict, show both sides
- "Unclear" if evidence is insufficient
- Skip sections if not applicable (e.g., no contradicting evidence)"#
    )
}

/// Embed colour for the model's verdict.
pub fn verdict_colour(analysis: &str) -> u32 {
    let lower = analysis.to_lowercase();
    if lower.contains("verdict: true") {
        0x27ae60
    } else if lower.contains("verdict: false") {
        0xe74c3c
    } else if lower.contains("partially true") {
        0xf39c12
    } else {
        0x95a5a6
    }
}

fn factcheck_embed(claim: &str, analysis: &str, results: &[SearchResult], username: &str, now: i64) -> Embed {
    let sources: String = results
        .iter()
        .take(3)
        .map(|r| format!("• [{}]({})\n", r.title, r.url))
        .collect();

    let description = format!("**Claim:** {}\n\n{}", claim, analysis);

    Embed {
        title: "🔍 Fact Check Analysis".into(),
        description: truncate_safe(&description, MAX_EMBED_DESCRIPTION).to_string(),
        colour: verdict_colour(analysis),
        fields: vec![(
            "📚 Sources Checked".into(),
            if sources.is_empty() { "No sources found".into() } else { sources },
            false,
        )],
        footer: Some(format!("Fact-checked by {} • Always verify with multiple sources", username)),
        timestamp: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str) -> SearchResult {
        SearchResult {
            title: title.into(),
            url: format!("https://example.com/{title}"),
            description: "desc".into(),
        }
    }

    #[test]
    fn test_parse_roll() {
        assert_eq!(parse_roll(""), (1, 6));
        assert_eq!(parse_roll("20"), (1, 20));
        assert_eq!(parse_roll("2d6"), (2, 6));
        assert_eq!(parse_roll("3d100"), (3, 100));
        assert_eq!(parse_roll("11d6"), (1, 6));
        assert_eq!(parse_roll("2d500"), (2, 6));
        assert_eq!(parse_roll("0"), (1, 6));
        assert_eq!(parse_roll("banana"), (1, 6));
    }

    #[test]
    fn test_roll_dice_in_range() {
        let rolls = roll_dice(10, 4);
        assert_eq!(rolls.len(), 10);
        assert!(rolls.iter().all(|r| (1..=4).contains(r)));
    }

    #[test]
    fn test_format_roll() {
        assert_eq!(format_roll(2, 6, &[3, 4]), "🎲 Rolled 2d6: 3, 4 (Total: 7)");
    }

    #[test]
    fn test_verdict_colour() {
        assert_eq!(verdict_colour("VERDICT: True - it is"), 0x27ae60);
        assert_eq!(verdict_colour("Verdict: False - it isn't"), 0xe74c3c);
        assert_eq!(verdict_colour("VERDICT: Partially True - sort of"), 0xf39c12);
        assert_eq!(verdict_colour("VERDICT: Unclear"), 0x95a5a6);
    }

    #[test]
    fn test_factcheck_prompt_lists_results() {
        let prompt = factcheck_prompt("the moon is cheese", &[result("a"), result("b")]);
        assert!(prompt.contains("CLAIM: \"the moon is cheese\""));
        assert!(prompt.contains("Title: a, URL: https://example.com/a, Content: desc"));
        assert!(prompt.contains("Title: b,"));
    }

    #[test]
    fn test_factcheck_embed_limits_sources() {
        let results: Vec<_> = ["a", "b", "c", "d"].iter().map(|t| result(t)).collect();
        let embed = factcheck_embed("claim", "VERDICT: False", &results, "alice", 1_700_000_000);
        let sources = &embed.fields[0].1;
        assert_eq!(sources.lines().count(), 3);
        assert!(!sources.contains("[d]"));
        assert_eq!(embed.colour, 0xe74c3c);
        assert!(embed.footer.as_deref().unwrap().contains("alice"));
    }

    #[test]
    fn test_factcheck_embed_truncates_description() {
        let long = "x".repeat(10_000);
        let embed = factcheck_embed("claim", &long, &[], "alice", 0);
        assert!(embed.description.len() <= MAX_EMBED_DESCRIPTION);
        assert_eq!(embed.fields[0].1, "No sources found");
    }
}
