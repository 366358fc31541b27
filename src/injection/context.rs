//! Conversation context and topic extraction

use crate::error::{Error, Result};
use crate::llm::Message;
use crate::memory::similarity::tokenize;
use regex::Regex;

/// Number of trailing user messages considered for retrieval
pub const RECENT_USER_MESSAGES: usize = 3;

/// Upper bound on extracted topics
pub const MAX_TOPICS: usize = 15;

/// Tokens this short or shorter never become topics
const MIN_TOPIC_CHARS: usize = 3;

/// Question patterns mapped to the synthetic topics they imply
const TOPIC_RULES: &[(&str, &str, &[&str])] = &[
    (
        "identity",
        r"(?i)\b(who am i|my name|about me|know about me|remember me|who i am)\b",
        &["identity", "name", "user-profile", "about"],
    ),
    (
        "personal",
        r"(?i)\b(how old|my age|birthday|born|where do i live|my family)\b",
        &["age", "birthday", "personal"],
    ),
    (
        "profession",
        r"(?i)\b(my job|my work|what do i do|profession|occupation|career|where do i work)\b",
        &["job", "work", "profession", "career"],
    ),
];

const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "could", "does", "doing",
    "from", "have", "having", "here", "into", "just", "know", "like", "more", "most", "much",
    "only", "other", "over", "please", "remember", "should", "some", "such", "tell", "than",
    "that", "their", "them", "then", "there", "these", "they", "thing", "things", "think",
    "this", "those", "very", "want", "what", "when", "where", "which", "while", "will",
    "with", "would", "your", "yours",
];

/// A recent user message and whether it asks about the user themselves
#[derive(Debug, Clone, PartialEq)]
pub struct RecentMessage {
    pub text: String,
    pub identity_query: bool,
}

/// Retrieval inputs derived from a conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationContext {
    /// Oldest first
    pub recent_messages: Vec<RecentMessage>,
    pub topics: Vec<String>,
}

impl ConversationContext {
    pub fn is_empty(&self) -> bool {
        self.recent_messages.is_empty()
    }

    pub fn has_identity_query(&self) -> bool {
        self.recent_messages.iter().any(|m| m.identity_query)
    }
}

struct CompiledTopicRule {
    name: &'static str,
    pattern: Regex,
    topics: &'static [&'static str],
}

/// Derives recent messages and topics from a conversation
pub struct ContextExtractor {
    rules: Vec<CompiledTopicRule>,
}

impl ContextExtractor {
    pub fn new() -> Result<Self> {
        let rules = TOPIC_RULES
            .iter()
            .map(|&(name, pattern, topics)| {
                let pattern = Regex::new(pattern).map_err(|e| {
                    Error::Internal(format!("Invalid topic pattern '{}': {}", name, e))
                })?;
                Ok(CompiledTopicRule {
                    name,
                    pattern,
                    topics,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Whether `text` asks who the user is
    pub fn is_identity_query(&self, text: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.name == "identity" && r.pattern.is_match(text))
    }

    /// Recent user messages and topics. Without `use_conversation_context`
    /// only the latest user message is considered.
    pub fn extract(&self, conversation: &[Message], use_conversation_context: bool) -> ConversationContext {
        let window = if use_conversation_context {
            RECENT_USER_MESSAGES
        } else {
            1
        };

        let mut recent: Vec<&str> = conversation
            .iter()
            .rev()
            .filter(|m| m.is_user() && !m.content.trim().is_empty())
            .take(window)
            .map(|m| m.content.as_str())
            .collect();
        recent.reverse();

        let mut topics: Vec<String> = Vec::new();

        for rule in &self.rules {
            if recent.iter().any(|text| rule.pattern.is_match(text)) {
                tracing::debug!("Context matched {} topic rule", rule.name);
                for topic in rule.topics {
                    push_topic(&mut topics, topic);
                }
            }
        }

        for text in &recent {
            for token in tokenize(text) {
                let Some(word) = topic_word(&token) else {
                    continue;
                };
                if word.chars().count() > MIN_TOPIC_CHARS && !STOP_WORDS.contains(&word) {
                    push_topic(&mut topics, word);
                }
            }
        }

        ConversationContext {
            recent_messages: recent
                .into_iter()
                .map(|text| RecentMessage {
                    text: text.to_string(),
                    identity_query: self.is_identity_query(text),
                })
                .collect(),
            topics,
        }
    }
}

/// Possessives lose their `'s`; any other contraction ("don't", "i'm") is
/// not a topic.
fn topic_word(token: &str) -> Option<&str> {
    let word = token.strip_suffix("'s").unwrap_or(token);
    (!word.contains('\'')).then_some(word)
}

fn push_topic(topics: &mut Vec<String>, topic: &str) {
    if topics.len() < MAX_TOPICS && !topics.iter().any(|t| t == topic) {
        topics.push(topic.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(turns: &[&str]) -> Vec<Message> {
        turns
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if i % 2 == 0 {
                    Message::user(*t)
                } else {
                    Message::assistant(*t)
                }
            })
            .collect()
    }

    #[test]
    fn test_takes_last_three_user_messages() {
        let extractor = ContextExtractor::new().unwrap();
        let conv = conversation(&["one", "a", "two", "b", "three", "c", "four"]);
        let ctx = extractor.extract(&conv, true);
        let texts: Vec<_> = ctx.recent_messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three", "four"]);
    }

    #[test]
    fn test_without_conversation_context_uses_latest_only() {
        let extractor = ContextExtractor::new().unwrap();
        let conv = conversation(&["gardening tips", "sure", "tomato plants"]);
        let ctx = extractor.extract(&conv, false);
        assert_eq!(ctx.recent_messages.len(), 1);
        assert_eq!(ctx.recent_messages[0].text, "tomato plants");
        assert_eq!(ctx.topics, vec!["tomato", "plants"]);
    }

    #[test]
    fn test_identity_question_adds_synthetic_topics() {
        let extractor = ContextExtractor::new().unwrap();
        let ctx = extractor.extract(&[Message::user("Who am I, really?")], true);
        assert!(ctx.has_identity_query());
        assert_eq!(&ctx.topics[..4], &["identity", "name", "user-profile", "about"]);
        assert!(ctx.topics.contains(&"really".to_string()));
    }

    #[test]
    fn test_profession_and_age_rules() {
        let extractor = ContextExtractor::new().unwrap();
        let ctx = extractor.extract(
            &[Message::user("What's a good career move at my age?")],
            true,
        );
        for topic in ["job", "career", "age", "birthday"] {
            assert!(ctx.topics.contains(&topic.to_string()), "missing {topic}");
        }
        assert!(!ctx.has_identity_query());
    }

    #[test]
    fn test_short_and_stop_words_dropped() {
        let extractor = ContextExtractor::new().unwrap();
        let ctx = extractor.extract(
            &[Message::user("What should I cook with this salmon and rice")],
            true,
        );
        assert_eq!(ctx.topics, vec!["cook", "salmon", "rice"]);
    }

    #[test]
    fn test_contractions_are_not_topics() {
        let extractor = ContextExtractor::new().unwrap();
        let ctx = extractor.extract(
            &[Message::user("What's my sister's favourite dish? I don't remember, they'll know")],
            true,
        );
        assert_eq!(ctx.topics, vec!["sister", "favourite", "dish"]);
    }

    #[test]
    fn test_topics_capped_and_deduped() {
        let extractor = ContextExtractor::new().unwrap();
        let text = (0..40)
            .map(|i| format!("word{i} word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let ctx = extractor.extract(&[Message::user(text)], true);
        assert_eq!(ctx.topics.len(), MAX_TOPICS);
        assert_eq!(ctx.topics[0], "word0");
        assert_eq!(ctx.topics[1], "word1");
    }

    #[test]
    fn test_no_user_messages() {
        let extractor = ContextExtractor::new().unwrap();
        let ctx = extractor.extract(&[Message::assistant("hello")], true);
        assert!(ctx.is_empty());
        assert!(ctx.topics.is_empty());
    }
}
