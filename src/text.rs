/// Utterance normalization.
///
/// Canonicalizes casing and punctuation spacing so that utterances coming from
/// different dataset dumps compare and display the same way.

/// Punctuation that is split off into its own token and re-attached to the
/// preceding word when rendering.
const ATTACHED_PUNCTUATION: [char; 4] = ['.', ',', '?', '!'];

/// Characters that count as a terminal mark; anything else gets a trailing `.`.
const TERMINAL_MARKS: [char; 6] = ['!', '.', '?', ')', '"', '\''];

/// Standardize the capitalization and punctuation spacing of an utterance.
///
/// - lowercases everything, then capitalizes the first word, the pronoun `i`
///   (which also covers `I'm`, `I've`, `I'll`, `I'd`) and any word following
///   a `.`, `?` or `!`
/// - removes spaces before `.,?!` and around apostrophes
/// - collapses runs of whitespace
/// - appends `.` unless the text already ends in one of `!.?)"'`
///
/// Blank input yields an empty string. Applying the function twice gives the
/// same result as applying it once.
pub fn normalize_reply(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut tokens = tokenize(&lowered);
    if tokens.is_empty() {
        return String::new();
    }

    let mut capitalize_next = true;
    for token in tokens.iter_mut() {
        if is_punctuation_token(token) {
            if token.starts_with(['.', '?', '!']) {
                capitalize_next = true;
            }
            continue;
        }
        if capitalize_next || token == "i" {
            *token = capitalize(token);
        }
        capitalize_next = false;
    }

    let mut out = render(&tokens);
    if let Some(last) = out.chars().last() {
        if !TERMINAL_MARKS.contains(&last) {
            out.push('.');
        }
    }
    out
}

/// Split on whitespace, then split every word so that each `.,?!` and
/// apostrophe becomes a token of its own.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        let mut current = String::new();
        for c in word.chars() {
            if ATTACHED_PUNCTUATION.contains(&c) || c == '\'' {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            } else {
                current.push(c);
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

fn is_punctuation_token(token: &str) -> bool {
    token == "'" || (token.len() == 1 && token.starts_with(ATTACHED_PUNCTUATION))
}

/// Join tokens with single spaces, except that `.,?!` hug the token before
/// them and apostrophes hug both neighbours.
fn render(tokens: &[String]) -> String {
    let mut out = String::new();
    let mut previous_was_apostrophe = false;
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && !is_punctuation_token(token) && !previous_was_apostrophe {
            out.push(' ');
        }
        out.push_str(token);
        previous_was_apostrophe = token == "'";
    }
    out
}

/// Uppercase the first character, but only when lowercasing the result gives
/// the original character back (keeps the function idempotent for characters
/// such as `ß` whose uppercase form is longer). Capital sigma is left alone
/// because its lowercase form depends on the surrounding letters.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let mut upper = first.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) if u != 'Σ' && u.to_lowercase().eq(std::iter::once(first)) => {
            let mut out = String::with_capacity(word.len());
            out.push(u);
            out.push_str(chars.as_str());
            out
        }
        _ => word.to_string(),
    }
}
