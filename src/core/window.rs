//! Bounded prompt construction from chat history.
//!

/// One exchange of a conversation, oldest first when part of a history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub user_message: String,
    pub assistant_response: String,
}

impl ChatTurn {
    pub fn new(user_message: impl Into<String>, assistant_response: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_response: assistant_response.into(),
        }
    }

    fn fragment(&self) -> String {
        format!(
            "[INST] {} [/INST] {}\n",
            self.user_message, self.assistant_response
        )
    }
}

/// How much history may enter a single inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBudget {
    /// Ceiling on the characters of the historical portion of the prompt.
    pub char_ceiling: usize,
    /// Ceiling on the number of trailing turns considered.
    pub turn_ceiling: usize,
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            char_ceiling: 4000,
            turn_ceiling: 5,
        }
    }
}

/// Builds the prompt for `message` given the conversation so far.
///
/// The last `turn_ceiling` turns are replayed oldest to newest. Each turn
/// contributes one `[INST] user [/INST] assistant` line; accumulation stops at
/// the first turn that would push the historical portion past `char_ceiling`.
/// The current message is always appended as the final instruction.
pub fn build_prompt(message: &str, history: &[ChatTurn], budget: &PromptBudget) -> String {
    let retained = &history[history.len().saturating_sub(budget.turn_ceiling)..];

    let mut prompt = String::new();
    let mut used = 0;

    for turn in retained {
        let fragment = turn.fragment();
        let len = fragment.chars().count();
        if used + len > budget.char_ceiling {
            break;
        }
        used += len;
        prompt.push_str(&fragment);
    }

    prompt.push_str("[INST] ");
    prompt.push_str(message);
    prompt.push_str(" [/INST]");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A turn whose formatted fragment is exactly `len` characters.
    fn turn_of_len(tag: char, len: usize) -> ChatTurn {
        let overhead = "[INST]  [/INST] \n".len();
        let body = len - overhead;
        let user: String = std::iter::repeat(tag).take(body / 2).collect();
        let assistant: String = std::iter::repeat(tag).take(body - body / 2).collect();
        ChatTurn::new(user, assistant)
    }

    #[test]
    fn test_empty_history_yields_only_current_message() {
        let prompt = build_prompt("Hello", &[], &PromptBudget::default());
        assert_eq!(prompt, "[INST] Hello [/INST]");
    }

    #[test]
    fn test_turns_are_replayed_oldest_first() {
        let history = vec![ChatTurn::new("a", "1"), ChatTurn::new("b", "2")];
        let prompt = build_prompt("c", &history, &PromptBudget::default());
        assert_eq!(
            prompt,
            "[INST] a [/INST] 1\n[INST] b [/INST] 2\n[INST] c [/INST]"
        );
    }

    #[test]
    fn test_turn_ceiling_keeps_most_recent_turns() {
        let history: Vec<_> = (0..8)
            .map(|i| ChatTurn::new(format!("q{i}"), format!("a{i}")))
            .collect();
        let budget = PromptBudget {
            char_ceiling: 10_000,
            turn_ceiling: 3,
        };

        let prompt = build_prompt("now", &history, &budget);

        assert!(!prompt.contains("q4"));
        let q5 = prompt.find("q5").unwrap();
        let q6 = prompt.find("q6").unwrap();
        let q7 = prompt.find("q7").unwrap();
        assert!(q5 < q6 && q6 < q7);
    }

    #[test]
    fn test_six_thousand_char_turns_keep_four() {
        let history: Vec<_> = "ABCDEF".chars().map(|c| turn_of_len(c, 1000)).collect();
        let budget = PromptBudget {
            char_ceiling: 4000,
            turn_ceiling: 5,
        };

        let prompt = build_prompt("current", &history, &budget);
        let (historical, current) = prompt.split_at(4000);

        // 'A' falls outside the turn window, 'F' would cross the char ceiling.
        let expected: String = "BCDE"
            .chars()
            .map(|c| turn_of_len(c, 1000).fragment())
            .collect();
        assert_eq!(historical, expected);
        assert_eq!(current, "[INST] current [/INST]");
        assert!(!prompt.contains('A'));
        assert!(!prompt.contains('F'));
    }

    #[test]
    fn test_accumulation_stops_at_first_oversized_turn() {
        let history = vec![
            turn_of_len('a', 100),
            turn_of_len('b', 500),
            turn_of_len('c', 50),
        ];
        let budget = PromptBudget {
            char_ceiling: 300,
            turn_ceiling: 5,
        };

        let prompt = build_prompt("x", &history, &budget);

        assert!(prompt.contains('a'));
        assert!(!prompt.contains('b'));
        assert!(!prompt.contains('c'));
    }

    #[test]
    fn test_current_message_survives_exhausted_budget() {
        let history = vec![turn_of_len('z', 200)];
        let budget = PromptBudget {
            char_ceiling: 0,
            turn_ceiling: 5,
        };
        let long_message = "m".repeat(10_000);

        let prompt = build_prompt(&long_message, &history, &budget);

        assert_eq!(prompt, format!("[INST] {long_message} [/INST]"));
    }

    #[test]
    fn test_zero_turn_ceiling_drops_history() {
        let history = vec![ChatTurn::new("old", "reply")];
        let budget = PromptBudget {
            char_ceiling: 4000,
            turn_ceiling: 0,
        };
        assert_eq!(build_prompt("new", &history, &budget), "[INST] new [/INST]");
    }

    #[test]
    fn test_budget_counts_characters_not_bytes() {
        let turn = ChatTurn::new("é".repeat(10), "ü".repeat(10));
        let fragment_chars = turn.fragment().chars().count();
        let budget = PromptBudget {
            char_ceiling: fragment_chars,
            turn_ceiling: 5,
        };

        let prompt = build_prompt("q", &[turn], &budget);
        assert!(prompt.starts_with("[INST] éééééééééé"));
    }

    #[test]
    fn test_build_prompt_is_deterministic() {
        let history: Vec<_> = (0..6)
            .map(|i| ChatTurn::new(format!("user {i}"), format!("bot {i}")))
            .collect();
        let budget = PromptBudget::default();

        let first = build_prompt("same", &history, &budget);
        let second = build_prompt("same", &history, &budget);
        assert_eq!(first, second);
    }
}
