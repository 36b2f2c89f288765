//! In-process inverted index with BM25 ranking.
//!
//! Writers are the graph CRUD hooks and the file indexer; both complete
//! their index writes before the triggering call returns, so a caller reads
//! its own writes. Searches run against a read guard held for the duration
//! of one query.

pub mod query;
pub mod tokenizer;

use mimir_core::{FulltextBackend, Node, Result, ScoredId};
use parking_lot::{RwLock, RwLockReadGuard};
use query::{edit_distance_within, parse, ParsedQuery, Query, TermQuery};
use std::collections::{HashMap, HashSet};
use tokenizer::tokenize;

/// Text fields contributing to the inverted index.
pub const INDEXED_FIELDS: [&str; 8] = [
    "content",
    "text",
    "title",
    "name",
    "description",
    "path",
    "workerRole",
    "requirements",
];

pub const DEFAULT_K1: f32 = 1.2;
pub const DEFAULT_B: f32 = 0.75;

const MAX_SNIPPET_LINES: usize = 3;
const SNIPPET_MAX_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchLine {
    pub line: u32,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    pub score: f32,
    pub matches: Vec<MatchLine>,
}

#[derive(Default)]
struct Inner {
    /// term -> doc id -> token positions
    postings: HashMap<String, HashMap<String, Vec<u32>>>,
    doc_terms: HashMap<String, HashSet<String>>,
    doc_lens: HashMap<String, u32>,
    doc_texts: HashMap<String, String>,
    total_len: u64,
}

pub struct LexicalIndex {
    inner: RwLock<Inner>,
    k1: f32,
    b: f32,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_K1, DEFAULT_B)
    }

    pub fn with_params(k1: f32, b: f32) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            k1,
            b,
        }
    }

    /// Index the searchable text fields of a node, replacing any previous
    /// entry for the same id.
    pub fn index_node(&self, node: &Node) {
        let mut fields = Vec::new();
        for key in INDEXED_FIELDS {
            if let Some(text) = node.prop_str(key) {
                fields.push((key.to_string(), text.to_string()));
            }
        }
        self.upsert_document(&node.id, &fields);
    }

    pub fn upsert_document(&self, id: &str, fields: &[(String, String)]) {
        let text = fields
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let tokens = tokenize(&text);

        let mut inner = self.inner.write();
        remove_doc(&mut inner, id);
        if tokens.is_empty() {
            return;
        }

        let mut doc_terms = HashSet::new();
        for token in &tokens {
            inner
                .postings
                .entry(token.term.clone())
                .or_default()
                .entry(id.to_string())
                .or_default()
                .push(token.position);
            doc_terms.insert(token.term.clone());
        }
        let len = tokens.len() as u32;
        inner.doc_terms.insert(id.to_string(), doc_terms);
        inner.doc_lens.insert(id.to_string(), len);
        inner.doc_texts.insert(id.to_string(), text);
        inner.total_len += len as u64;
    }

    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.write();
        remove_doc(&mut inner, id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire a read guard for one search; the snapshot stays consistent
    /// for the guard's lifetime.
    pub fn reader(&self) -> LexicalReader<'_> {
        LexicalReader {
            inner: self.inner.read(),
            k1: self.k1,
            b: self.b,
        }
    }

    /// Convenience wrapper: one-shot ranked query with snippets.
    pub fn search(&self, query: &str) -> Vec<LexicalHit> {
        self.reader().search(query)
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FulltextBackend for LexicalIndex {
    fn index_document(&self, id: &str, fields: &[(String, String)]) {
        self.upsert_document(id, fields);
    }

    fn remove_document(&self, id: &str) {
        self.remove(id);
    }

    fn query(&self, query: &str) -> Result<Vec<ScoredId>> {
        Ok(self
            .search(query)
            .into_iter()
            .map(|h| ScoredId {
                id: h.id,
                score: h.score,
            })
            .collect())
    }
}

fn remove_doc(inner: &mut Inner, id: &str) {
    let Some(terms) = inner.doc_terms.remove(id) else {
        return;
    };
    for term in terms {
        if let Some(docs) = inner.postings.get_mut(&term) {
            docs.remove(id);
            if docs.is_empty() {
                inner.postings.remove(&term);
            }
        }
    }
    if let Some(len) = inner.doc_lens.remove(id) {
        inner.total_len -= len as u64;
    }
    inner.doc_texts.remove(id);
}

pub struct LexicalReader<'a> {
    inner: RwLockReadGuard<'a, Inner>,
    k1: f32,
    b: f32,
}

type ScoreMap = HashMap<String, f32>;

impl<'a> LexicalReader<'a> {
    pub fn search(&self, raw: &str) -> Vec<LexicalHit> {
        let parsed = parse(raw);
        let Some(root) = &parsed.root else {
            return Vec::new();
        };

        let mut scores = self.eval(root);
        if parsed.free_terms.len() >= 2 {
            self.apply_proximity_boost(&parsed.free_terms, &mut scores);
        }

        let match_terms = self.collect_match_terms(&parsed);
        let mut hits: Vec<LexicalHit> = scores
            .into_iter()
            .map(|(id, score)| {
                let matches = self.snippets_for(&id, &match_terms);
                LexicalHit { id, score, matches }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits
    }

    fn eval(&self, node: &Query) -> ScoreMap {
        match node {
            Query::Term(term) => self.eval_term(term),
            Query::Phrase(terms) => self.eval_phrase(terms),
            Query::Or(children) => {
                let mut acc = ScoreMap::new();
                for child in children {
                    // A bare NOT inside OR has nothing to subtract from.
                    if matches!(child, Query::Not(_)) {
                        continue;
                    }
                    for (id, score) in self.eval(child) {
                        *acc.entry(id).or_insert(0.0) += score;
                    }
                }
                acc
            }
            Query::And(children) => {
                let mut positive: Option<ScoreMap> = None;
                let mut excluded: HashSet<String> = HashSet::new();
                for child in children {
                    match child {
                        Query::Not(inner) => {
                            excluded.extend(self.eval(inner).into_keys());
                        }
                        other => {
                            let child_scores = self.eval(other);
                            positive = Some(match positive {
                                None => child_scores,
                                Some(mut acc) => {
                                    acc.retain(|id, _| child_scores.contains_key(id));
                                    for (id, score) in child_scores {
                                        if let Some(s) = acc.get_mut(&id) {
                                            *s += score;
                                        }
                                    }
                                    acc
                                }
                            });
                        }
                    }
                }
                let mut acc = positive.unwrap_or_default();
                acc.retain(|id, _| !excluded.contains(id));
                acc
            }
            Query::Not(_) => ScoreMap::new(),
        }
    }

    fn eval_term(&self, term: &TermQuery) -> ScoreMap {
        match term {
            TermQuery::Exact(t) => self.bm25_for_term(t),
            TermQuery::Prefix(prefix) => {
                let mut acc = ScoreMap::new();
                for term in self.inner.postings.keys() {
                    if term.starts_with(prefix.as_str()) {
                        for (id, score) in self.bm25_for_term(term) {
                            let entry = acc.entry(id).or_insert(0.0);
                            if score > *entry {
                                *entry = score;
                            }
                        }
                    }
                }
                acc
            }
            TermQuery::Fuzzy { term, distance } => {
                let mut acc = ScoreMap::new();
                for candidate in self.inner.postings.keys() {
                    if edit_distance_within(candidate, term, *distance) {
                        for (id, score) in self.bm25_for_term(candidate) {
                            let entry = acc.entry(id).or_insert(0.0);
                            if score > *entry {
                                *entry = score;
                            }
                        }
                    }
                }
                acc
            }
        }
    }

    fn eval_phrase(&self, terms: &[String]) -> ScoreMap {
        let mut acc = ScoreMap::new();
        if terms.is_empty() {
            return acc;
        }
        let Some(first_docs) = self.inner.postings.get(&terms[0]) else {
            return acc;
        };

        'docs: for (id, first_positions) in first_docs {
            let mut rest = Vec::with_capacity(terms.len() - 1);
            for term in &terms[1..] {
                match self.inner.postings.get(term).and_then(|d| d.get(id)) {
                    Some(positions) => rest.push(positions),
                    None => continue 'docs,
                }
            }
            let adjacent = first_positions.iter().any(|&start| {
                rest.iter()
                    .enumerate()
                    .all(|(offset, positions)| positions.contains(&(start + offset as u32 + 1)))
            });
            if adjacent {
                let score: f32 = terms
                    .iter()
                    .map(|t| self.bm25_for_term(t).get(id).copied().unwrap_or(0.0))
                    .sum();
                acc.insert(id.clone(), score);
            }
        }
        acc
    }

    fn bm25_for_term(&self, term: &str) -> ScoreMap {
        let mut out = ScoreMap::new();
        let Some(docs) = self.inner.postings.get(term) else {
            return out;
        };
        let n = self.inner.doc_lens.len() as f32;
        let df = docs.len() as f32;
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
        let avg_len = if n > 0.0 {
            self.inner.total_len as f32 / n
        } else {
            1.0
        };

        for (id, positions) in docs {
            let tf = positions.len() as f32;
            let dl = self.inner.doc_lens.get(id).copied().unwrap_or(1) as f32;
            let denom = tf + self.k1 * (1.0 - self.b + self.b * dl / avg_len);
            out.insert(id.clone(), idf * tf * (self.k1 + 1.0) / denom);
        }
        out
    }

    /// Free-term queries reward documents where distinct query terms occur
    /// close together: adjacent terms get up to a 1.5x multiplier.
    fn apply_proximity_boost(&self, free_terms: &[String], scores: &mut ScoreMap) {
        for (id, score) in scores.iter_mut() {
            let mut min_gap: Option<u32> = None;
            for (i, a) in free_terms.iter().enumerate() {
                for b in free_terms.iter().skip(i + 1) {
                    if a == b {
                        continue;
                    }
                    let (Some(pa), Some(pb)) = (
                        self.inner.postings.get(a).and_then(|d| d.get(id)),
                        self.inner.postings.get(b).and_then(|d| d.get(id)),
                    ) else {
                        continue;
                    };
                    for &x in pa {
                        for &y in pb {
                            let gap = x.abs_diff(y);
                            min_gap = Some(min_gap.map_or(gap, |g| g.min(gap)));
                        }
                    }
                }
            }
            if let Some(gap) = min_gap {
                *score *= 1.0 + 0.5 / gap.max(1) as f32;
            }
        }
    }

    fn collect_match_terms(&self, parsed: &ParsedQuery) -> HashSet<String> {
        let mut terms = HashSet::new();
        if let Some(root) = &parsed.root {
            collect_positive_terms(root, &mut terms);
        }
        terms
    }

    fn snippets_for(&self, id: &str, match_terms: &HashSet<String>) -> Vec<MatchLine> {
        let Some(text) = self.inner.doc_texts.get(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let lower = line.to_lowercase();
            let matched = match_terms.iter().any(|t| lower.contains(t.as_str()));
            if matched {
                let snippet: String = line.trim().chars().take(SNIPPET_MAX_CHARS).collect();
                out.push(MatchLine {
                    line: line_no as u32 + 1,
                    snippet,
                });
                if out.len() >= MAX_SNIPPET_LINES {
                    break;
                }
            }
        }
        out
    }
}

fn collect_positive_terms(node: &Query, out: &mut HashSet<String>) {
    match node {
        Query::Term(TermQuery::Exact(t)) | Query::Term(TermQuery::Prefix(t)) => {
            out.insert(t.clone());
        }
        Query::Term(TermQuery::Fuzzy { term, .. }) => {
            out.insert(term.clone());
        }
        Query::Phrase(terms) => out.extend(terms.iter().cloned()),
        Query::Or(children) | Query::And(children) => {
            for child in children {
                collect_positive_terms(child, out);
            }
        }
        Query::Not(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimir_core::{Node, NodeType, Properties};
    use serde_json::json;

    fn doc(index: &LexicalIndex, id: &str, text: &str) {
        index.upsert_document(id, &[("content".to_string(), text.to_string())]);
    }

    #[test]
    fn ranks_by_bm25() {
        let index = LexicalIndex::new();
        doc(&index, "a", "auth auth auth flow");
        doc(&index, "b", "auth only once in a much longer document about other topics");
        doc(&index, "c", "nothing relevant here");

        let hits = index.search("auth");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn and_requires_all_terms() {
        let index = LexicalIndex::new();
        doc(&index, "a", "auth login");
        doc(&index, "b", "auth");
        let hits = index.search("auth AND login");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn not_excludes() {
        let index = LexicalIndex::new();
        doc(&index, "a", "auth login legacy");
        doc(&index, "b", "auth login");
        let hits = index.search("auth AND NOT legacy");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn phrase_requires_adjacency_in_order() {
        let index = LexicalIndex::new();
        doc(&index, "a", "graceful error handling");
        doc(&index, "b", "handling of the error");
        let hits = index.search("\"error handling\"");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn prefix_matches_stems() {
        let index = LexicalIndex::new();
        doc(&index, "a", "authentication module");
        doc(&index, "b", "authorization rules");
        doc(&index, "c", "unrelated");
        let hits = index.search("auth*");
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&"a") && ids.contains(&"b"));
        assert!(!ids.contains(&"c"));
    }

    #[test]
    fn fuzzy_tolerates_typos() {
        let index = LexicalIndex::new();
        doc(&index, "a", "database migrations");
        let hits = index.search("databse~");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn proximity_boost_prefers_adjacent_terms() {
        let index = LexicalIndex::new();
        doc(&index, "near", "the auth token is checked first");
        doc(&index, "far", "auth comes early but the final token word is far away here");
        let hits = index.search("auth token");
        assert_eq!(hits[0].id, "near");
    }

    #[test]
    fn empty_query_and_empty_index_return_empty() {
        let index = LexicalIndex::new();
        assert!(index.search("").is_empty());
        assert!(index.search("anything").is_empty());
        doc(&index, "a", "text");
        assert!(index.search("").is_empty());
    }

    #[test]
    fn remove_drops_document() {
        let index = LexicalIndex::new();
        doc(&index, "a", "auth");
        assert_eq!(index.search("auth").len(), 1);
        index.remove("a");
        assert!(index.search("auth").is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn reindex_replaces_previous_content() {
        let index = LexicalIndex::new();
        doc(&index, "a", "old words");
        doc(&index, "a", "new content");
        assert!(index.search("old").is_empty());
        assert_eq!(index.search("new").len(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn snippets_carry_line_numbers() {
        let index = LexicalIndex::new();
        doc(&index, "a", "first line\nsecond line has auth in it\nthird");
        let hits = index.search("auth");
        // field texts are joined with newlines, so the match is on line 2
        assert_eq!(hits[0].matches.len(), 1);
        assert_eq!(hits[0].matches[0].line, 2);
        assert!(hits[0].matches[0].snippet.contains("auth"));
    }

    #[test]
    fn index_node_uses_searchable_fields_only() {
        let index = LexicalIndex::new();
        let mut props = Properties::new();
        props.insert("title".into(), json!("auth design"));
        props.insert("internal".into(), json!("hidden zebra"));
        let node = Node::new(NodeType::Memory, props);
        index.index_node(&node);

        assert_eq!(index.search("auth").len(), 1);
        assert!(index.search("zebra").is_empty());
    }
}
