//! Prompt construction and reply parsing for the authoring operations.

/// Instruction appended to content creation requests that want markup.
const RICH_TEXT_INSTRUCTION: &str = "Create HTML and begin the text with <p>";

/// A prompt ready to send, with the instructions that go with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Translation of `text` from `source` to `target`.
pub fn translation(text: &str, source: &str, target: &str, rich_text: bool) -> Prompt {
    let mut system = format!(
        "You are a professional translator. Translate the text the user sends from \
         {source} to {target}. Reply with the translation only, without explanations \
         or quotes."
    );
    if rich_text {
        system.push_str(
            " The text is HTML: keep every tag and attribute unchanged and translate only the text content.",
        );
    }
    Prompt {
        system,
        user: text.to_owned(),
    }
}

/// Keyword extraction; `text` is shortened to `max_words` first.
pub fn keywords(text: &str, max_words: usize) -> Prompt {
    Prompt {
        system: "Find the keywords that best describe the text the user sends, as they \
                 would be used for search engine optimization. Reply with at most 10 \
                 keywords, one per line, without numbering or any other text."
            .to_owned(),
        user: shorten(text, max_words),
    }
}

/// A short description of `text`, e.g. for a page's meta description.
pub fn description(text: &str, max_words: Option<usize>) -> Prompt {
    let mut system = "Write a short description of the text the user sends, suitable as \
                      a summary or a meta description. Reply with the description only."
        .to_owned();
    if let Some(n) = max_words {
        system.push_str(&format!(" Use at most {n} words."));
    }
    Prompt {
        system,
        user: text.to_owned(),
    }
}

/// Free-form `instruction`, optionally applied to a given text.
pub fn on_text(instruction: &str, text: Option<&str>) -> Prompt {
    let system = "You are a writing assistant for a content management system. Follow \
                  the user's instructions and reply with the resulting text only."
        .to_owned();
    let user = match text.filter(|t| !t.trim().is_empty()) {
        Some(text) => format!("{instruction}\n\nText:\n\"\"\"\n{text}\n\"\"\""),
        None => instruction.to_owned(),
    };
    Prompt { system, user }
}

/// Content creation instructions assembled from the dialog's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creation {
    pub instruction: String,
    pub max_tokens: usize,
}

/// Combine the creation dialog's fields into one instruction.
///
/// `text_length` is either `"<n> | <instruction>"`, which sets the token
/// limit to `n`, or a plain instruction. A non-empty length instruction is
/// placed before `prompt`.
pub fn creation(
    prompt: &str,
    text_length: Option<&str>,
    rich_text: bool,
    default_max_tokens: usize,
) -> Creation {
    let (max_tokens, length) = match text_length.map(str::trim).filter(|s| !s.is_empty()) {
        Some(spec) => match parse_token_limit(spec) {
            Some((n, rest)) => (n, rest),
            None => (default_max_tokens, spec),
        },
        None => (default_max_tokens, ""),
    };

    let mut instruction = if length.is_empty() {
        prompt.to_owned()
    } else {
        format!("{length}\n\n{prompt}")
    };
    if rich_text {
        instruction.push_str("\n\n");
        instruction.push_str(RICH_TEXT_INSTRUCTION);
    }
    Creation {
        instruction,
        max_tokens,
    }
}

/// Split `"<digits> | <rest>"`.
fn parse_token_limit(spec: &str) -> Option<(usize, &str)> {
    let (number, rest) = spec.split_once('|')?;
    let number = number.trim();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((number.parse().ok()?, rest.trim()))
}

/// Parse a keyword reply into a list.
///
/// One keyword per line; bullets and numbering are stripped. A single line
/// of comma-separated keywords is split on the commas.
pub fn parse_keywords(reply: &str) -> Vec<String> {
    let lines: Vec<&str> = reply
        .lines()
        .map(strip_list_marker)
        .filter(|l| !l.is_empty())
        .collect();
    let items: Vec<&str> = match lines.as_slice() {
        [single] if single.contains(',') => single.split(',').map(str::trim).collect(),
        _ => lines,
    };
    items
        .into_iter()
        .map(|k| k.trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|k| !k.is_empty())
        .map(str::to_owned)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .strip_prefix(['-', '*', '•'])
        .map(str::trim_start)
        .unwrap_or(line);
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0
        && let Some(rest) = line[digits..].strip_prefix(['.', ')'])
    {
        return rest.trim_start();
    }
    line
}

/// Cut a text down to about `max_words` words by keeping its beginning and end.
///
/// Texts within the budget come back unchanged. Otherwise the first and the
/// last `max_words / 2` words are kept, joined by `...`.
pub fn shorten(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_owned();
    }
    let half = max_words / 2;
    let mut kept = Vec::with_capacity(half * 2 + 1);
    kept.extend_from_slice(&words[..half]);
    kept.push("...");
    kept.extend_from_slice(&words[words.len() - half..]);
    kept.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // shorten
    // ========================================================================

    #[test]
    fn shorten_short_text() {
        let text = "This is a short text.";
        assert_eq!(shorten(text, 10), text);
    }

    #[test]
    fn shorten_long_text() {
        let text = "This is a very long text that should be shortened. Well, not really very long, but long enough.";
        assert_eq!(shorten(text, 4), "This is ... enough.");
    }

    #[test]
    fn shorten_odd_budget() {
        let text = "This is a text with odd max words which we shorten.";
        assert_eq!(shorten(text, 3), "This ... shorten.");
    }

    #[test]
    fn shorten_even_budget() {
        let text = "This is a text with even max words which we shorten.";
        assert_eq!(shorten(text, 4), "This is ... shorten.");
    }

    #[test]
    fn shorten_empty_text() {
        assert_eq!(shorten("", 10), "");
    }

    #[test]
    fn shorten_odd_and_even_word_counts() {
        assert_eq!(
            shorten("This is a text with odd wordcount.", 4),
            "This is ... wordcount."
        );
        assert_eq!(
            shorten("This is a text with even number of words.", 4),
            "This is ... words."
        );
    }

    // ========================================================================
    // creation
    // ========================================================================

    #[test]
    fn creation_defaults() {
        let c = creation("Write about cats", None, false, 400);
        assert_eq!(c.instruction, "Write about cats");
        assert_eq!(c.max_tokens, 400);
    }

    #[test]
    fn creation_with_token_limit() {
        let c = creation("Write about cats", Some(" 100 | One paragraph"), false, 400);
        assert_eq!(c.max_tokens, 100);
        assert_eq!(c.instruction, "One paragraph\n\nWrite about cats");
    }

    #[test]
    fn creation_with_plain_length_instruction() {
        let c = creation("Write about cats", Some("A single sentence"), false, 400);
        assert_eq!(c.max_tokens, 400);
        assert_eq!(c.instruction, "A single sentence\n\nWrite about cats");
    }

    #[test]
    fn creation_with_bare_token_limit() {
        let c = creation("Write about cats", Some("50|"), true, 400);
        assert_eq!(c.max_tokens, 50);
        assert_eq!(
            c.instruction,
            "Write about cats\n\nCreate HTML and begin the text with <p>"
        );
    }

    #[test]
    fn creation_ignores_non_numeric_prefix() {
        let c = creation("p", Some("about 50 | words"), false, 400);
        assert_eq!(c.max_tokens, 400);
        assert_eq!(c.instruction, "about 50 | words\n\np");
    }

    // ========================================================================
    // keywords
    // ========================================================================

    #[test]
    fn keywords_one_per_line() {
        let reply = "1. rust\n2) async\n\n- streaming\n* caching \n• sse";
        assert_eq!(
            parse_keywords(reply),
            ["rust", "async", "streaming", "caching", "sse"]
        );
    }

    #[test]
    fn keywords_comma_separated() {
        assert_eq!(
            parse_keywords("rust, \"async\", ,streaming"),
            ["rust", "async", "streaming"]
        );
    }

    #[test]
    fn keywords_prompt_is_shortened() {
        let p = keywords("one two three four five six", 2);
        assert_eq!(p.user, "one ... six");
    }

    #[test]
    fn prompt_on_text_embeds_the_text() {
        let p = on_text("Summarize", Some("Lorem ipsum"));
        assert!(p.user.starts_with("Summarize"));
        assert!(p.user.contains("Lorem ipsum"));
        assert_eq!(on_text("Summarize", Some("  ")).user, "Summarize");
    }
}
