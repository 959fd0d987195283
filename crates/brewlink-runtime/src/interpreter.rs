//! [`CommandInterpreter`] – free text to [`CommandIntent`].
//!
//! Classification is plain phrase containment over the trimmed, lower-cased
//! input. No tokenising, no grammar, no scoring:
//!
//! 1. The appliance noun must appear, otherwise the answer is
//!    [`CommandIntent::None`].
//! 2. Rules are tried in order; the first rule with a phrase present wins.
//!    The default order is power-on, then power-off, so a message that
//!    contains both trigger phrases turns the appliance **on**.
//!
//! A phrase only counts where it starts a word (the character before it is
//! not alphanumeric). This keeps `ligar` from matching inside `desligar`.

use brewlink_types::CommandIntent;
use tracing::debug;

/// One classification rule: any of `phrases` selects `intent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRule {
    pub intent: CommandIntent,
    pub phrases: Vec<String>,
}

impl CommandRule {
    pub fn new<I, S>(intent: CommandIntent, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            intent,
            phrases: phrases.into_iter().map(|p| p.into().to_lowercase()).collect(),
        }
    }
}

/// Pure, deterministic classifier. Cheap to clone and share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInterpreter {
    noun: String,
    rules: Vec<CommandRule>,
}

impl CommandInterpreter {
    pub fn new(noun: impl Into<String>, rules: Vec<CommandRule>) -> Self {
        Self {
            noun: noun.into().to_lowercase(),
            rules,
        }
    }

    /// Interpreter for `noun` with one power-on rule followed by one
    /// power-off rule.
    pub fn power_switch<I, J, S>(noun: impl Into<String>, on_phrases: I, off_phrases: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            noun,
            vec![
                CommandRule::new(CommandIntent::TurnOn, on_phrases),
                CommandRule::new(CommandIntent::TurnOff, off_phrases),
            ],
        )
    }

    pub fn classify(&self, text: &str) -> CommandIntent {
        let text = text.trim().to_lowercase();

        if !contains_phrase(&text, &self.noun) {
            return CommandIntent::None;
        }

        let intent = self
            .rules
            .iter()
            .find(|rule| rule.phrases.iter().any(|p| contains_phrase(&text, p)))
            .map_or(CommandIntent::None, |rule| rule.intent);
        debug!(?intent, "message classified");
        intent
    }
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::power_switch(
            "cafeteira",
            [CommandIntent::ON_COMMAND],
            [CommandIntent::OFF_COMMAND],
        )
    }
}

/// `true` when `phrase` occurs in `haystack` at the start of a word.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    haystack.match_indices(phrase).any(|(start, _)| {
        haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric())
    })
}
