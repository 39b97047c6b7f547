//! Legacy SDL dialect support.
//!
//! Older SDL tooling accepts two forms the current grammar rejects:
//!
//! * empty field bodies: `type Query {}`
//! * interface lists without `&`: `type Cat implements Pet, Named { .. }`
//!
//! [`normalize`] rewrites both into current SDL. The rewrite never changes the
//! length of the text nor moves a line break, so source locations reported
//! against the normalized text are also valid against the original.

use std::borrow::Cow;

use apollo_parser::Lexer;
use apollo_parser::TokenKind;

const IMPLEMENTS: &str = "implements";

/// Keywords that start a new top-level definition.
const DEFINITION_KEYWORDS: &[&str] = &[
    "type",
    "interface",
    "union",
    "enum",
    "input",
    "scalar",
    "directive",
    "schema",
    "extend",
    "query",
    "mutation",
    "subscription",
    "fragment",
];

#[derive(Debug)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

fn is_trivia(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Whitespace | TokenKind::Comment | TokenKind::Comma
    )
}

/// Rewrite legacy SDL forms into current SDL.
///
/// Returns the input unchanged when there is nothing to rewrite. Lexing errors
/// are left in place for the parser to report.
pub(crate) fn normalize(sdl: &str) -> Cow<'_, str> {
    let tokens = tokenize(sdl);
    let mut blanks: Vec<usize> = Vec::new();
    let mut ampersands: Vec<usize> = Vec::new();

    // Curly braces, and parentheses or brackets, counted apart: an empty body
    // only follows a definition header, never a value position.
    let mut depth = 0usize;
    let mut nesting = 0usize;
    let mut previous: Option<TokenKind> = None;
    let mut index = 0;
    while index < tokens.len() {
        let token = &tokens[index];
        match token.kind {
            TokenKind::LCurly => {
                if depth == 0 && nesting == 0 && ends_header(previous) {
                    if let Some(close) = next_significant(&tokens, index + 1)
                        .filter(|&close| tokens[close].kind == TokenKind::RCurly)
                    {
                        blanks.push(token.start);
                        blanks.push(tokens[close].start);
                        previous = Some(TokenKind::RCurly);
                        index = close + 1;
                        continue;
                    }
                }
                depth += 1;
            }
            TokenKind::RCurly => depth = depth.saturating_sub(1),
            TokenKind::LParen | TokenKind::LBracket => nesting += 1,
            TokenKind::RParen | TokenKind::RBracket => nesting = nesting.saturating_sub(1),
            TokenKind::Name
                if depth == 0 && nesting == 0 && &sdl[token.start..token.end] == IMPLEMENTS =>
            {
                previous = Some(TokenKind::Name);
                index = interface_list(sdl, &tokens, index + 1, &mut ampersands);
                continue;
            }
            _ => {}
        }
        if !is_trivia(token.kind) {
            previous = Some(token.kind);
        }
        index += 1;
    }

    if blanks.is_empty() && ampersands.is_empty() {
        return Cow::Borrowed(sdl);
    }

    let mut bytes = sdl.as_bytes().to_vec();
    for offset in blanks {
        bytes[offset] = b' ';
    }
    for offset in ampersands {
        bytes[offset] = b'&';
    }
    tracing::trace!("normalized legacy SDL syntax");
    // Only ASCII bytes standing for ASCII tokens were replaced.
    Cow::Owned(String::from_utf8(bytes).unwrap_or_else(|_| sdl.to_string()))
}

/// Walk the names following `implements`, recording a separator byte to turn
/// into `&` between two names not already separated by one.
///
/// Returns the index of the first token after the list.
fn interface_list(
    sdl: &str,
    tokens: &[Token],
    mut index: usize,
    ampersands: &mut Vec<usize>,
) -> usize {
    let mut previous_was_name = false;
    let mut separator: Option<usize> = None;
    while index < tokens.len() {
        let token = &tokens[index];
        match token.kind {
            TokenKind::Name => {
                let text = &sdl[token.start..token.end];
                if DEFINITION_KEYWORDS.contains(&text) {
                    break;
                }
                if previous_was_name {
                    // Separated by a line break only: inserting would shift lines.
                    if let Some(offset) = separator {
                        ampersands.push(offset);
                    }
                }
                previous_was_name = true;
                separator = None;
            }
            TokenKind::Amp => {
                previous_was_name = false;
                separator = None;
            }
            TokenKind::Whitespace | TokenKind::Comma => {
                if separator.is_none() {
                    separator = replaceable_byte(&sdl[token.start..token.end])
                        .map(|offset| token.start + offset);
                }
            }
            TokenKind::Comment => {}
            _ => break,
        }
        index += 1;
    }
    index
}

/// The offset of a byte that can become `&` without moving a line break.
fn replaceable_byte(trivia: &str) -> Option<usize> {
    trivia
        .bytes()
        .position(|byte| matches!(byte, b',' | b' ' | b'\t'))
}

/// Whether a `{` after `previous` opens a definition body rather than an
/// object value.
fn ends_header(previous: Option<TokenKind>) -> bool {
    !matches!(
        previous,
        None | Some(TokenKind::Eq | TokenKind::Colon | TokenKind::LParen | TokenKind::LBracket)
    )
}

fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&index| !is_trivia(tokens[index].kind))
}

fn tokenize(sdl: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for result in Lexer::new(sdl) {
        match result {
            Ok(token) => {
                if token.kind() == TokenKind::Eof {
                    break;
                }
                let start = token.index();
                tokens.push(Token {
                    kind: token.kind(),
                    start,
                    end: start + token.data().len(),
                });
            }
            // Keep going: the parser reports lexing errors with better context.
            Err(_) => continue,
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_current_sdl_untouched() {
        let sdl = "type Query implements A & B { a: Int }\ninput I { o: Obj = {} }";
        assert!(matches!(normalize(sdl), Cow::Borrowed(_)));
    }

    #[test]
    fn blanks_empty_field_bodies() {
        let sdl = "type Query {}\ntype Person { name: String }";
        let normalized = normalize(sdl);
        assert_eq!(normalized, "type Query   \ntype Person { name: String }");
        assert_eq!(normalized.len(), sdl.len());
    }

    #[test]
    fn empty_body_with_whitespace_and_comments() {
        let sdl = "type Query {\n  # nothing yet\n}";
        assert_eq!(normalize(sdl), "type Query  \n  # nothing yet\n ");
    }

    #[test]
    fn keeps_nested_empty_objects() {
        let sdl = "input I { o: Obj = {} }";
        assert_eq!(normalize(sdl), sdl);
    }

    #[test]
    fn inserts_ampersands_between_interfaces() {
        assert_eq!(
            normalize("type Cat implements Pet, Named { a: Int }"),
            "type Cat implements Pet& Named { a: Int }"
        );
        assert_eq!(
            normalize("type Cat implements Pet Named Furry { a: Int }"),
            "type Cat implements Pet&Named&Furry { a: Int }"
        );
    }

    #[test]
    fn interface_list_stops_at_next_definition() {
        assert_eq!(
            normalize("type Cat implements Pet\ntype Dog implements Pet Named"),
            "type Cat implements Pet\ntype Dog implements Pet&Named"
        );
    }

    #[test]
    fn keeps_line_breaks_in_place() {
        let sdl = "type Cat implements Pet\n  Named { a: Int }";
        let normalized = normalize(sdl);
        assert_eq!(normalized, "type Cat implements Pet\n& Named { a: Int }");
        assert_eq!(
            normalized.matches('\n').count(),
            sdl.matches('\n').count()
        );
    }

    #[test]
    fn keeps_empty_object_values() {
        for sdl in [
            "directive @d(a: I = {}) on FIELD_DEFINITION",
            "type A @d(arg: {}) { a: Int }",
            "extend schema @d(arg: [{}])",
            "input I { o: [Obj] = [{}] }",
        ] {
            assert!(matches!(normalize(sdl), Cow::Borrowed(_)), "{sdl}");
        }
        assert_eq!(
            normalize("type A @d(arg: {}) {}"),
            "type A @d(arg: {})   "
        );
    }

    #[test]
    fn field_named_implements_is_not_a_keyword() {
        let sdl = "type Query { implements: String other: Int }";
        assert_eq!(normalize(sdl), sdl);
    }
}
