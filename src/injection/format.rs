//! Rendering selected memories into a host prompt

use crate::memory::{MemoryType, ScoredMemory};

/// First line of the injected block
pub const MEMORY_BLOCK_START: &str = "=== USER MEMORY ===";

/// Last line of the injected block
pub const MEMORY_BLOCK_END: &str = "=== END USER MEMORY ===";

/// When a host prompt contains this marker the block goes right before it
pub const CONVERSATION_MARKER: &str = "## Current Conversation";

const PREAMBLE: &str =
    "What you remember about the user from earlier conversations. Use it when it helps; do not recite it unprompted.";

/// Sections in display order
const SECTIONS: &[(MemoryType, &str)] = &[
    (MemoryType::Fact, "Facts about the user"),
    (MemoryType::Preference, "User preferences"),
    (MemoryType::Goal, "User goals"),
    (MemoryType::LongTerm, "Long-term context"),
    (MemoryType::ShortTerm, "Recent context"),
];

/// Render `memories` grouped by type, or `None` when there is nothing to
/// render. Order within a section follows the input order.
pub fn format_memories(memories: &[ScoredMemory]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }

    let mut out = String::new();
    out.push_str(MEMORY_BLOCK_START);
    out.push('\n');
    out.push_str(PREAMBLE);
    out.push('\n');

    for (memory_type, title) in SECTIONS {
        let mut section = memories
            .iter()
            .filter(|s| s.memory.memory_type == *memory_type)
            .peekable();
        if section.peek().is_none() {
            continue;
        }
        out.push_str(&format!("\n### {}\n", title));
        for scored in section {
            out.push_str(&format_bullet(scored));
            out.push('\n');
        }
    }

    out.push('\n');
    out.push_str(MEMORY_BLOCK_END);
    Some(out)
}

fn format_bullet(scored: &ScoredMemory) -> String {
    let memory = &scored.memory;
    let mut line = format!("- {}", memory.content.replace('\n', " "));
    if !memory.tags.is_empty() {
        line.push_str(&format!(" [tags: {}]", memory.tags.join(", ")));
    }
    line.push_str(&format!(" ({})", memory.timestamp.format("%B %-d, %Y")));
    line
}

/// Place `block` before the conversation marker, or append it.
pub fn insert_into_prompt(prompt: &str, block: &str) -> String {
    match prompt.find(CONVERSATION_MARKER) {
        Some(pos) => format!("{}{}\n\n{}", &prompt[..pos], block, &prompt[pos..]),
        None if prompt.is_empty() => block.to_string(),
        None => format!("{}\n\n{}", prompt.trim_end_matches('\n'), block),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Memory, MemorySource};
    use chrono::{TimeZone, Utc};

    fn scored(memory_type: MemoryType, content: &str, tags: &[&str]) -> ScoredMemory {
        let mut memory =
            Memory::new(memory_type, content, MemorySource::User).with_tags(tags.iter().copied());
        memory.timestamp = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        memory.last_accessed = memory.timestamp;
        ScoredMemory::new(memory, 0.8, "test")
    }

    #[test]
    fn test_empty_selection_renders_nothing() {
        assert!(format_memories(&[]).is_none());
    }

    #[test]
    fn test_sections_in_fixed_order() {
        let block = format_memories(&[
            scored(MemoryType::ShortTerm, "Asked about flights", &[]),
            scored(MemoryType::Goal, "Run a marathon", &["fitness"]),
            scored(MemoryType::Fact, "Lives in Lisbon", &["location", "home"]),
        ])
        .unwrap();

        assert!(block.starts_with(MEMORY_BLOCK_START));
        assert!(block.ends_with(MEMORY_BLOCK_END));
        let facts = block.find("### Facts about the user").unwrap();
        let goals = block.find("### User goals").unwrap();
        let recent = block.find("### Recent context").unwrap();
        assert!(facts < goals && goals < recent);
        assert!(!block.contains("### User preferences"));
        assert!(block.contains("- Lives in Lisbon [tags: location, home] (March 5, 2024)"));
        assert!(block.contains("- Asked about flights (March 5, 2024)"));
    }

    #[test]
    fn test_multiline_content_kept_on_one_bullet() {
        let block =
            format_memories(&[scored(MemoryType::Fact, "Has a dog\n[2024-03-06] Has two dogs", &[])])
                .unwrap();
        assert!(block.contains("- Has a dog [2024-03-06] Has two dogs (March 5, 2024)"));
    }

    #[test]
    fn test_insert_before_marker() {
        let prompt = "You are helpful.\n\n## Current Conversation\nuser: hi";
        let out = insert_into_prompt(prompt, "BLOCK");
        assert_eq!(
            out,
            "You are helpful.\n\nBLOCK\n\n## Current Conversation\nuser: hi"
        );
    }

    #[test]
    fn test_append_without_marker() {
        assert_eq!(insert_into_prompt("You are helpful.\n", "BLOCK"), "You are helpful.\n\nBLOCK");
        assert_eq!(insert_into_prompt("", "BLOCK"), "BLOCK");
    }
}
