//! Hand-written parser for the connection-string mini-language.
//!
//! Grammar, informally:
//!
//! ```text
//! connections := clause (";" clause)* ";"?
//! clause      := name "(" options ")"
//! options     := [ option ("," option)* ]
//! option      := key "=" value
//! ```
//!
//! Values may be double-quoted to contain commas, parentheses, semicolons
//! or leading/trailing whitespace; a doubled quote inside a quoted value is
//! a literal quote. The parser is a single forward scan with a quote flag,
//! no lookahead beyond one character.

use crate::error::ConfigurationError;
use crate::transport::is_known_transport;

use super::{OptionMap, TransportSpec};

/// Parse a connection string into its ordered transport specifications.
///
/// An empty (or all-whitespace) string parses to an empty list, which the
/// engine treats as "no connections". All syntax faults report 1-based
/// character positions.
pub fn parse(connections: &str) -> Result<Vec<TransportSpec>, ConfigurationError> {
    let chars: Vec<char> = connections.chars().collect();
    let mut specs = Vec::new();
    let mut pos = 0;

    loop {
        while pos < chars.len() && (chars[pos].is_whitespace() || chars[pos] == ';') {
            pos += 1;
        }
        if pos >= chars.len() {
            break;
        }

        let clause_start = pos;
        while pos < chars.len() && chars[pos] != '(' && chars[pos] != ';' {
            pos += 1;
        }
        if pos >= chars.len() || chars[pos] != '(' {
            return Err(ConfigurationError::MissingOpenParen { position: pos + 1 });
        }
        let name: String = chars[clause_start..pos]
            .iter()
            .collect::<String>()
            .trim()
            .to_ascii_lowercase();
        pos += 1;

        let mut raw_options = String::new();
        let mut quoted = false;
        let mut closed = false;
        while pos < chars.len() {
            let symbol = chars[pos];
            pos += 1;
            if symbol == '"' {
                if quoted && pos < chars.len() && chars[pos] == '"' {
                    raw_options.push_str("\"\"");
                    pos += 1;
                    continue;
                }
                quoted = !quoted;
                raw_options.push('"');
            } else if symbol == ')' && !quoted {
                closed = true;
                break;
            } else {
                raw_options.push(symbol);
            }
        }
        if quoted {
            return Err(ConfigurationError::UnterminatedQuote { clause: name });
        }
        if !closed {
            return Err(ConfigurationError::MissingCloseParen { position: pos + 1 });
        }

        if !is_known_transport(&name) {
            return Err(ConfigurationError::UnknownTransport {
                name,
                position: clause_start + 1,
            });
        }

        let options = parse_options(&name, &raw_options)?;
        specs.push(TransportSpec {
            name,
            position: clause_start + 1,
            options,
        });
    }

    Ok(specs)
}

fn parse_options(clause: &str, raw: &str) -> Result<OptionMap, ConfigurationError> {
    let mut map = OptionMap::new();
    for piece in split_unquoted_commas(raw) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let Some(eq) = find_unquoted(piece, '=') else {
            return Err(ConfigurationError::MalformedOption {
                clause: clause.to_string(),
                text: piece.to_string(),
            });
        };
        let key = piece[..eq].trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(ConfigurationError::MalformedOption {
                clause: clause.to_string(),
                text: piece.to_string(),
            });
        }
        let value = unquote(piece[eq + 1..].trim());
        map.insert(clause, key, value)?;
    }
    Ok(map)
}

/// Split on commas that sit outside double quotes.
fn split_unquoted_commas(raw: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for symbol in raw.chars() {
        match symbol {
            '"' => {
                quoted = !quoted;
                current.push('"');
            }
            ',' if !quoted => {
                pieces.push(std::mem::take(&mut current));
            }
            _ => current.push(symbol),
        }
    }
    pieces.push(current);
    pieces
}

fn find_unquoted(piece: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (idx, symbol) in piece.char_indices() {
        match symbol {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Strip one level of surrounding quotes and collapse doubled quotes.
fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    inner.replace("\"\"", "\"")
}
