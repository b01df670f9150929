//! Gateway intents.
//!
//! Intents declare which event categories the gateway should deliver. They
//! can be configured either as the raw bitmask or as a list of names.

use serde::Deserialize;
use tracing::warn;

/// Name → bit table.
pub const INTENTS: &[(&str, u64)] = &[
    ("GUILDS", 1 << 0),
    ("GUILD_MEMBERS", 1 << 1),
    ("GUILD_MODERATION", 1 << 2),
    ("GUILD_EXPRESSIONS", 1 << 3),
    ("GUILD_INTEGRATIONS", 1 << 4),
    ("GUILD_WEBHOOKS", 1 << 5),
    ("GUILD_INVITES", 1 << 6),
    ("GUILD_VOICE_STATES", 1 << 7),
    ("GUILD_PRESENCES", 1 << 8),
    ("GUILD_MESSAGES", 1 << 9),
    ("GUILD_MESSAGE_REACTIONS", 1 << 10),
    ("GUILD_MESSAGE_TYPING", 1 << 11),
    ("DIRECT_MESSAGES", 1 << 12),
    ("DIRECT_MESSAGE", 1 << 12),
    ("DIRECT_MESSAGE_REACTIONS", 1 << 13),
    ("DIRECT_MESSAGE_TYPING", 1 << 14),
    ("MESSAGE_CONTENT", 1 << 15),
    ("GUILD_SCHEDULED_EVENTS", 1 << 16),
    ("AUTO_MODERATION_CONFIGURATION", 1 << 20),
    ("AUTO_MODERATION_EXECUTION", 1 << 21),
    ("GUILD_MESSAGE_POLLS", 1 << 24),
    ("DIRECT_MESSAGE_POLLS", 1 << 25),
];

/// Configured intents: a bitmask or symbolic names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IntentsSpec {
    Bits(u64),
    Names(Vec<String>),
}

impl Default for IntentsSpec {
    fn default() -> Self {
        IntentsSpec::Bits(0)
    }
}

/// Look up a single intent name.
pub fn bit(name: &str) -> Option<u64> {
    INTENTS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, bit)| *bit)
}

/// Resolve configured intents to the bitmask sent with IDENTIFY.
///
/// Unknown names are skipped with a warning.
pub fn resolve(spec: &IntentsSpec) -> u64 {
    match spec {
        IntentsSpec::Bits(bits) => *bits,
        IntentsSpec::Names(names) => names.iter().fold(0, |acc, name| match bit(name) {
            Some(bit) => acc | bit,
            None => {
                warn!(intent = %name, "Invalid intent, skipping");
                acc
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn warnings_during(f: impl FnOnce()) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&count)));
        tracing::subscriber::with_default(subscriber, f);
        count.load(Ordering::SeqCst)
    }

    fn names(list: &[&str]) -> IntentsSpec {
        IntentsSpec::Names(list.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_numeric_passes_through() {
        assert_eq!(resolve(&IntentsSpec::Bits(33281)), 33281);
    }

    #[test]
    fn test_names_are_ored() {
        assert_eq!(resolve(&names(&["GUILDS", "GUILD_MESSAGES"])), 1 | (1 << 9));
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let bits = resolve(&names(&["GUILDS", "DIRECT_MESSAGE", "BOGUS"]));
        assert_eq!(bits, 1 | (1 << 12));
    }

    #[test]
    fn test_each_unknown_name_warns_once() {
        let warnings = warnings_during(|| {
            resolve(&names(&["GUILDS", "BOGUS"]));
        });
        assert_eq!(warnings, 1);

        let warnings = warnings_during(|| {
            resolve(&names(&["BOGUS", "GUILDS", "ALSO_BOGUS"]));
        });
        assert_eq!(warnings, 2);

        let warnings = warnings_during(|| {
            resolve(&names(&["GUILDS"]));
        });
        assert_eq!(warnings, 0);
    }

    #[test]
    fn test_empty_defaults_to_zero() {
        assert_eq!(resolve(&names(&[])), 0);
        assert_eq!(resolve(&IntentsSpec::default()), 0);
    }

    #[test]
    fn test_alias_matches_canonical_name() {
        assert_eq!(bit("DIRECT_MESSAGE"), bit("DIRECT_MESSAGES"));
        assert_eq!(bit("nope"), None);
    }
}
