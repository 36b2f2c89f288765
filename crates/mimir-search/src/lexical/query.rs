//! Query language for the lexical index.
//!
//! Free terms are OR-combined (with a proximity boost applied at scoring
//! time). `AND`, `OR`, `NOT` are case-sensitive keywords; `"..."` matches an
//! exact phrase; `term*` matches by prefix; `term~` matches fuzzily with an
//! edit distance of 1 for short terms and 2 otherwise.

use crate::lexical::tokenizer::terms;

#[derive(Debug, Clone, PartialEq)]
pub enum TermQuery {
    Exact(String),
    Prefix(String),
    Fuzzy { term: String, distance: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Or(Vec<Query>),
    And(Vec<Query>),
    Not(Box<Query>),
    Term(TermQuery),
    Phrase(Vec<String>),
}

/// Parsed query plus whether it was plain free terms (eligible for the
/// proximity boost).
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub root: Option<Query>,
    pub free_terms: Vec<String>,
}

pub fn fuzzy_distance_for(term: &str) -> u8 {
    if term.chars().count() <= 4 {
        1
    } else {
        2
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    And,
    Or,
    Not,
    Phrase(Vec<String>),
    Word(TermQuery),
}

fn lex(input: &str) -> Vec<Lexeme> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();
    let mut word = String::new();

    let flush = |word: &mut String, out: &mut Vec<Lexeme>| {
        if word.is_empty() {
            return;
        }
        let raw = std::mem::take(word);
        match raw.as_str() {
            // Operators are case-sensitive; `and` is an ordinary term.
            "AND" => out.push(Lexeme::And),
            "OR" => out.push(Lexeme::Or),
            "NOT" => out.push(Lexeme::Not),
            _ => {
                if let Some(stem) = raw.strip_suffix('*') {
                    let toks = terms(stem);
                    if let Some(t) = toks.into_iter().next() {
                        out.push(Lexeme::Word(TermQuery::Prefix(t)));
                    }
                } else if let Some(stem) = raw.strip_suffix('~') {
                    let toks = terms(stem);
                    if let Some(t) = toks.into_iter().next() {
                        let distance = fuzzy_distance_for(&t);
                        out.push(Lexeme::Word(TermQuery::Fuzzy { term: t, distance }));
                    }
                } else {
                    for t in terms(&raw) {
                        out.push(Lexeme::Word(TermQuery::Exact(t)));
                    }
                }
            }
        }
    };

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                flush(&mut word, &mut out);
                let mut phrase = String::new();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    phrase.push(c);
                }
                let toks = terms(&phrase);
                if !toks.is_empty() {
                    out.push(Lexeme::Phrase(toks));
                }
            }
            c if c.is_whitespace() => flush(&mut word, &mut out),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut out);
    out
}

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn advance(&mut self) -> Option<Lexeme> {
        let l = self.lexemes.get(self.pos).cloned();
        if l.is_some() {
            self.pos += 1;
        }
        l
    }

    // or := and ((OR | implicit-adjacency) and)*
    fn parse_or(&mut self) -> Option<Query> {
        let mut parts = Vec::new();
        if let Some(first) = self.parse_and() {
            parts.push(first);
        }
        loop {
            match self.peek() {
                Some(Lexeme::Or) => {
                    self.advance();
                    if let Some(next) = self.parse_and() {
                        parts.push(next);
                    }
                }
                Some(Lexeme::Word(_)) | Some(Lexeme::Phrase(_)) | Some(Lexeme::Not) => {
                    if let Some(next) = self.parse_and() {
                        parts.push(next);
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Query::Or(parts)),
        }
    }

    // and := not (AND not)*
    fn parse_and(&mut self) -> Option<Query> {
        let mut parts = Vec::new();
        if let Some(first) = self.parse_not() {
            parts.push(first);
        } else {
            return None;
        }
        while matches!(self.peek(), Some(Lexeme::And)) {
            self.advance();
            match self.parse_not() {
                Some(next) => parts.push(next),
                None => break,
            }
        }
        match parts.len() {
            1 => parts.pop(),
            _ => Some(Query::And(parts)),
        }
    }

    // not := NOT not | primary
    fn parse_not(&mut self) -> Option<Query> {
        if matches!(self.peek(), Some(Lexeme::Not)) {
            self.advance();
            return self.parse_not().map(|q| Query::Not(Box::new(q)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Option<Query> {
        match self.peek() {
            Some(Lexeme::Word(_)) => match self.advance() {
                Some(Lexeme::Word(t)) => Some(Query::Term(t)),
                _ => None,
            },
            Some(Lexeme::Phrase(_)) => match self.advance() {
                Some(Lexeme::Phrase(p)) => Some(Query::Phrase(p)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Parse a query string. An empty or operator-only query yields `root: None`
/// (empty results, not an error).
pub fn parse(input: &str) -> ParsedQuery {
    let lexemes = lex(input);
    let free_terms = if lexemes.iter().all(|l| matches!(l, Lexeme::Word(TermQuery::Exact(_)))) {
        lexemes
            .iter()
            .filter_map(|l| match l {
                Lexeme::Word(TermQuery::Exact(t)) => Some(t.clone()),
                _ => None,
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut parser = Parser { lexemes, pos: 0 };
    ParsedQuery {
        root: parser.parse_or(),
        free_terms,
    }
}

/// Bounded Levenshtein distance; bails out early once `max` is exceeded.
pub fn edit_distance_within(a: &str, b: &str, max: u8) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max = max as usize;
    if a.len().abs_diff(b.len()) > max {
        return false;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
            row_min = row_min.min(curr[j + 1]);
        }
        if row_min > max {
            return false;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()] <= max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_terms_parse_to_or() {
        let q = parse("auth token");
        assert_eq!(q.free_terms, vec!["auth", "token"]);
        match q.root {
            Some(Query::Or(parts)) => assert_eq!(parts.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn boolean_operators_are_case_sensitive() {
        let q = parse("auth AND login");
        assert!(matches!(q.root, Some(Query::And(_))));
        assert!(q.free_terms.is_empty());

        // lowercase `and` is just a term
        let q = parse("auth and login");
        assert_eq!(q.free_terms, vec!["auth", "and", "login"]);
    }

    #[test]
    fn not_binds_to_the_next_primary() {
        let q = parse("auth AND NOT login");
        match q.root {
            Some(Query::And(parts)) => {
                assert_eq!(parts[0], Query::Term(TermQuery::Exact("auth".into())));
                assert!(matches!(parts[1], Query::Not(_)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn phrases_keep_order() {
        let q = parse("\"error handling\" retry");
        match q.root {
            Some(Query::Or(parts)) => {
                assert_eq!(parts[0], Query::Phrase(vec!["error".into(), "handling".into()]));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn prefix_and_fuzzy_suffixes() {
        let q = parse("auth* databse~");
        match q.root {
            Some(Query::Or(parts)) => {
                assert_eq!(parts[0], Query::Term(TermQuery::Prefix("auth".into())));
                assert_eq!(
                    parts[1],
                    Query::Term(TermQuery::Fuzzy {
                        term: "databse".into(),
                        distance: 2
                    })
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn fuzzy_distance_scales_with_length() {
        assert_eq!(fuzzy_distance_for("auth"), 1);
        assert_eq!(fuzzy_distance_for("database"), 2);
    }

    #[test]
    fn empty_query_has_no_root() {
        assert!(parse("").root.is_none());
        assert!(parse("  ").root.is_none());
        assert!(parse("AND OR").root.is_none());
    }

    #[test]
    fn edit_distance_bounds() {
        assert!(edit_distance_within("auth", "auht", 2));
        assert!(edit_distance_within("database", "databse", 2));
        assert!(!edit_distance_within("auth", "zebra", 2));
        assert!(!edit_distance_within("a", "abcd", 2));
    }
}
