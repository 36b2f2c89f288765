/// A term with its position in the token stream, used for phrase matching
/// and proximity boosts.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub term: String,
    pub position: u32,
}

/// Lowercases and splits on non-alphanumeric boundaries. Underscores are
/// kept so identifiers like `worker_role` stay one term.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut position = 0u32;

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(Token {
                term: std::mem::take(&mut current),
                position,
            });
            position += 1;
        }
    }
    if !current.is_empty() {
        tokens.push(Token {
            term: current,
            position,
        });
    }
    tokens
}

pub fn terms(text: &str) -> Vec<String> {
    tokenize(text).into_iter().map(|t| t.term).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_lowercases() {
        let toks = terms("Hello, World! auth-token");
        assert_eq!(toks, vec!["hello", "world", "auth", "token"]);
    }

    #[test]
    fn keeps_underscores() {
        assert_eq!(terms("worker_role=qc"), vec!["worker_role", "qc"]);
    }

    #[test]
    fn positions_are_sequential() {
        let toks = tokenize("a b c");
        let positions: Vec<u32> = toks.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  ... !!").is_empty());
    }
}
