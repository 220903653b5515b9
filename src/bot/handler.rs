//! Discord gateway events.

use std::sync::{Arc, OnceLock};

use serenity::all::{
    ActivityData, Context, EventHandler, Guild, GuildId, GuildMemberUpdateEvent, Member, Message, Ready,
    UnavailableGuild, User, UserId,
};
use serenity::async_trait;
use tracing::{debug, error, info};

use crate::bot::commands::Bot;
use crate::bot::message::ChatMessage;
use crate::bot::unix_now;

/// Names a member can be mentioned by: username, then nickname if set.
pub fn member_names(username: &str, nick: Option<&str>) -> Vec<String> {
    let mut names = vec![username.to_string()];
    if let Some(nick) = nick
        && !nick.is_empty()
        && nick != username
    {
        names.push(nick.to_string());
    }
    names
}

pub struct Handler {
    bot: Arc<Bot>,
    /// Set on ready; used to detect mentions.
    bot_user: OnceLock<UserId>,
}

impl Handler {
    pub fn new(bot: Arc<Bot>) -> Self {
        Self { bot, bot_user: OnceLock::new() }
    }

    fn to_chat_message(&self, msg: &Message) -> ChatMessage {
        let mentions_bot = self
            .bot_user
            .get()
            .is_some_and(|id| msg.mentions.iter().any(|u| u.id == *id));

        ChatMessage {
            message_id: msg.id.to_string(),
            channel_id: msg.channel_id.to_string(),
            guild_id: msg.guild_id.map(|g| g.to_string()),
            user_id: msg.author.id.to_string(),
            username: msg.author.name.clone(),
            text: msg.content.clone(),
            mentions_bot,
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        let _ = self.bot_user.set(ready.user.id);
        info!("Bot logged in as {} (id: {})", ready.user.name, ready.user.id);
        info!("Bot is in {} servers", ready.guilds.len());
        ctx.set_activity(Some(ActivityData::playing("!help for commands")));
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        info!("Joined server: {} ({} members)", guild.name, guild.member_count);

        let members = guild
            .members
            .values()
            .map(|m| (m.user.id.to_string(), member_names(&m.user.name, m.nick.as_deref())));
        let cached = self.bot.coordinator().cache_members(members);
        debug!("Cached {} member(s) of {}", cached, guild.name);
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, full: Option<Guild>) {
        match full {
            Some(guild) => info!("Left server: {}", guild.name),
            None => info!("Left server: {}", incomplete.id),
        }
        if let Err(e) = self.bot.coordinator().save(unix_now()) {
            error!("Failed to save after leaving server: {e}");
        }
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        let names = member_names(&new_member.user.name, new_member.nick.as_deref());
        self.bot
            .coordinator()
            .upsert_member(&new_member.user.id.to_string(), &names);
    }

    async fn guild_member_update(
        &self,
        _ctx: Context,
        _old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let names = member_names(&event.user.name, event.nick.as_deref());
        self.bot.coordinator().replace_member(&event.user.id.to_string(), &names);
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        _guild_id: GuildId,
        user: User,
        member_data_if_available: Option<Member>,
    ) {
        let nick = member_data_if_available.as_ref().and_then(|m| m.nick.as_deref());
        let names = member_names(&user.name, nick);
        self.bot.coordinator().remove_member(&user.id.to_string(), &names);
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let chat = self.to_chat_message(&msg);
        let outcome = self.bot.handle_message(chat).await;
        debug!("Message {} from {}: {:?}", msg.id, msg.author.name, outcome);
    }
}
