//! Tokenizer shared by the explicit-text and native query compilers.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?P<literal>'(?:[^']|'')*')
        | (?P<quoted>\x22[^\x22]*\x22)
        | :(?P<named>[A-Za-z_][A-Za-z0-9_]*)
        | \?(?P<positional>[0-9]*)
        | (?P<word>[A-Za-z_][A-Za-z0-9_]*(?:\.(?:[A-Za-z_][A-Za-z0-9_]*|\*))*)
        | (?P<number>[0-9]+(?:\.[0-9]+)?)
        | (?P<symbol><=|>=|<>|!=|\|\||[-+*/%=<>(),;.])
        ",
    )
    .expect("valid query token regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// `'text'` string literal.
    Literal,
    /// `"label"` quoted identifier.
    Quoted,
    /// `:name` placeholder.
    Named,
    /// `?` or `?N` placeholder.
    Positional,
    /// Identifier or dotted path.
    Word,
    Number,
    Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl<'a> Token<'a> {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, TokenKind::Named | TokenKind::Positional)
    }

    /// Placeholder name without the leading `:`.
    pub fn name(&self) -> &'a str {
        self.text.trim_start_matches([':', '?'])
    }
}

/// Splits `text` into tokens; anything between tokens must be whitespace.
pub(crate) fn tokenize(text: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut last_end = 0;

    for captures in TOKEN_RE.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let gap = &text[last_end..whole.start()];
        if !gap.trim().is_empty() {
            return Err(format!(
                "unexpected `{}` at offset {last_end}",
                gap.trim()
            ));
        }

        let kind = if captures.name("literal").is_some() {
            TokenKind::Literal
        } else if captures.name("quoted").is_some() {
            TokenKind::Quoted
        } else if captures.name("named").is_some() {
            TokenKind::Named
        } else if captures.name("positional").is_some() {
            TokenKind::Positional
        } else if captures.name("word").is_some() {
            TokenKind::Word
        } else if captures.name("number").is_some() {
            TokenKind::Number
        } else {
            TokenKind::Symbol
        };

        tokens.push(Token {
            kind,
            text: whole.as_str(),
            start: whole.start(),
            end: whole.end(),
        });
        last_end = whole.end();
    }

    let tail = text[last_end..].trim();
    if !tail.is_empty() {
        return Err(format!("unexpected `{tail}` at offset {last_end}"));
    }
    Ok(tokens)
}

/// Splits `tokens` at top-level commas (outside parentheses).
pub(crate) fn split_top_level<'t, 'a>(tokens: &'t [Token<'a>]) -> Vec<&'t [Token<'a>]> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, token) in tokens.iter().enumerate() {
        if token.is_symbol("(") {
            depth += 1;
        } else if token.is_symbol(")") {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && token.is_symbol(",") {
            items.push(&tokens[start..index]);
            start = index + 1;
        }
    }
    if start < tokens.len() {
        items.push(&tokens[start..]);
    }
    items
}

/// Index of the first top-level keyword at or after `from`.
pub(crate) fn find_keyword(tokens: &[Token<'_>], from: usize, keyword: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (index, token) in tokens.iter().enumerate().skip(from) {
        if token.is_symbol("(") {
            depth += 1;
        } else if token.is_symbol(")") {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && token.is_keyword(keyword) {
            return Some(index);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{find_keyword, split_top_level, tokenize, TokenKind};

    #[test]
    fn classifies_paths_placeholders_and_literals() {
        let tokens = tokenize("select m from Member m where m.username = :username and m.age > ?2 or m.username = 'o''neil'")
            .expect("tokenizes");
        let kinds = tokens.iter().map(|token| token.kind).collect::<Vec<_>>();
        assert_eq!(kinds[0], TokenKind::Word);
        assert!(tokens.iter().any(|token| token.text == "m.username" && token.kind == TokenKind::Word));
        let named = tokens
            .iter()
            .find(|token| token.kind == TokenKind::Named)
            .expect("named placeholder");
        assert_eq!(named.name(), "username");
        let positional = tokens
            .iter()
            .find(|token| token.kind == TokenKind::Positional)
            .expect("positional placeholder");
        assert_eq!(positional.name(), "2");
        assert_eq!(
            tokens.last().map(|token| token.kind),
            Some(TokenKind::Literal)
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = tokenize("select m from Member m where m.age # 3").expect_err("rejects `#`");
        assert!(err.contains('#'));
    }

    #[test]
    fn splits_select_items_outside_parentheses() {
        let tokens = tokenize("new MemberDto(m.id, m.username), count(m) from").expect("tokenizes");
        let end = find_keyword(&tokens, 0, "from").expect("from keyword");
        let items = split_top_level(&tokens[..end]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1][0].text, "count");
    }
}
