//! Raw dispatch name → canonical event name.

/// Canonical name used for dispatches missing from [`EVENT_NAMES`].
pub const SYSTEM: &str = "system";

/// Separator between canonical name segments.
pub const SEPARATOR: char = '.';

pub const EVENT_NAMES: &[(&str, &str)] = &[
    // Guilds
    ("GUILD_CREATE", "guild.create"),
    ("GUILD_UPDATE", "guild.update"),
    ("GUILD_DELETE", "guild.delete"),
    ("GUILD_BAN_ADD", "guild.ban.add"),
    ("GUILD_BAN_REMOVE", "guild.ban.remove"),
    ("GUILD_EMOJIS_UPDATE", "guild.emoji.update"),
    // Members
    ("GUILD_MEMBER_ADD", "guild.member.add"),
    ("GUILD_MEMBER_UPDATE", "guild.member.update"),
    ("GUILD_MEMBER_REMOVE", "guild.member.remove"),
    // Roles
    ("GUILD_ROLE_CREATE", "guild.role.create"),
    ("GUILD_ROLE_UPDATE", "guild.role.update"),
    ("GUILD_ROLE_DELETE", "guild.role.delete"),
    // Channels
    ("CHANNEL_CREATE", "channel.create"),
    ("CHANNEL_UPDATE", "channel.update"),
    ("CHANNEL_DELETE", "channel.delete"),
    ("CHANNEL_PINS_UPDATE", "channel.pins.update"),
    // Threads
    ("THREAD_CREATE", "thread.create"),
    ("THREAD_UPDATE", "thread.update"),
    ("THREAD_DELETE", "thread.delete"),
    ("THREAD_MEMBERS_UPDATE", "thread.member.update"),
    // Messages
    ("MESSAGE_CREATE", "message.guild.create"),
    ("AT_MESSAGE_CREATE", "message.guild.create"),
    ("MESSAGE_UPDATE", "message.guild.update"),
    ("MESSAGE_DELETE", "message.guild.delete"),
    ("PUBLIC_MESSAGE_DELETE", "message.guild.delete"),
    ("DIRECT_MESSAGE_CREATE", "message.direct.create"),
    ("DIRECT_MESSAGE_DELETE", "message.direct.delete"),
    ("GROUP_AT_MESSAGE_CREATE", "message.group.create"),
    ("C2C_MESSAGE_CREATE", "message.private.create"),
    // Reactions
    ("MESSAGE_REACTION_ADD", "reaction.add"),
    ("MESSAGE_REACTION_REMOVE", "reaction.remove"),
    ("MESSAGE_REACTION_REMOVE_ALL", "reaction.clear"),
    // Interactions
    ("INTERACTION_CREATE", "interaction.create"),
    // Presence
    ("TYPING_START", "typing.start"),
    ("PRESENCE_UPDATE", "presence.update"),
];

pub fn map(raw: &str) -> &'static str {
    EVENT_NAMES
        .iter()
        .find(|(name, _)| *name == raw)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(SYSTEM)
}

/// Every prefix of `name`, least specific first:
/// `a.b.c` → `a`, `a.b`, `a.b.c`.
pub fn prefixes(name: &str) -> impl Iterator<Item = &str> {
    name.match_indices(SEPARATOR)
        .map(|(i, _)| &name[..i])
        .chain(std::iter::once(name))
}
