//! Hybrid search: BM25 and dense-vector rankers fused with weighted
//! Reciprocal Rank Fusion.
//!
//! The profile adapts to query length unless pinned by options or config.
//! Either ranker may be missing or failing; the engine degrades to the
//! survivor and only errors when no ranker produced a list.

use crate::lexical::{LexicalHit, LexicalIndex, MatchLine};
use crate::vector::{VectorHit, VectorIndex};
use mimir_core::properties::strip_large_fields;
use mimir_core::{
    Direction, EdgeType, EmbeddingProvider, GraphDriver, MimirError, Node, NodeType, Properties,
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_RRF_K: f32 = 60.0;
pub const DEFAULT_MIN_SCORE: f32 = 0.01;
pub const DEFAULT_LIMIT: usize = 10;
pub const EXPANSION_DECAY: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RrfProfile {
    pub k: f32,
    #[serde(rename = "vectorWeight")]
    pub vector_weight: f32,
    #[serde(rename = "bm25Weight")]
    pub bm25_weight: f32,
    #[serde(rename = "minScore")]
    pub min_score: f32,
}

impl RrfProfile {
    pub const KEYWORD: RrfProfile = RrfProfile {
        k: DEFAULT_RRF_K,
        vector_weight: 0.5,
        bm25_weight: 1.5,
        min_score: DEFAULT_MIN_SCORE,
    };
    pub const BALANCED: RrfProfile = RrfProfile {
        k: DEFAULT_RRF_K,
        vector_weight: 1.0,
        bm25_weight: 1.0,
        min_score: DEFAULT_MIN_SCORE,
    };
    pub const SEMANTIC: RrfProfile = RrfProfile {
        k: DEFAULT_RRF_K,
        vector_weight: 1.5,
        bm25_weight: 0.5,
        min_score: DEFAULT_MIN_SCORE,
    };

    pub fn by_name(name: &str) -> Option<RrfProfile> {
        match name.to_lowercase().as_str() {
            "keyword" => Some(Self::KEYWORD),
            "balanced" => Some(Self::BALANCED),
            "semantic" => Some(Self::SEMANTIC),
            _ => None,
        }
    }

    /// Length-based selection: short queries lean lexical, long queries lean
    /// semantic.
    pub fn adaptive(token_count: usize) -> RrfProfile {
        match token_count {
            0..=2 => Self::KEYWORD,
            3..=5 => Self::BALANCED,
            _ => Self::SEMANTIC,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub types: Option<Vec<NodeType>>,
    /// Equality filters on flat properties.
    pub filters: Option<Properties>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub min_similarity: Option<f32>,
    /// Graph expansion depth; 1 (default) disables expansion.
    pub depth: usize,
    pub rrf: Option<RrfProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f32,
    #[serde(rename = "lexicalScore", skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f32>,
    #[serde(rename = "vectorSimilarity", skip_serializing_if = "Option::is_none")]
    pub vector_similarity: Option<f32>,
    #[serde(rename = "matches", skip_serializing_if = "Vec::is_empty")]
    pub match_lines: Vec<SnippetLine>,
    /// 0 for direct hits, >0 for nodes reached by expansion.
    pub hops: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnippetLine {
    pub line: u32,
    pub snippet: String,
}

impl From<MatchLine> for SnippetLine {
    fn from(m: MatchLine) -> Self {
        Self {
            line: m.line,
            snippet: m.snippet,
        }
    }
}

pub struct HybridSearch {
    lexical: Arc<LexicalIndex>,
    vector: Arc<VectorIndex>,
    driver: Arc<dyn GraphDriver>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    default_profile: Option<RrfProfile>,
}

struct FusionCandidate {
    score: f32,
    lexical_score: Option<f32>,
    vector_similarity: Option<f32>,
    match_lines: Vec<MatchLine>,
}

impl HybridSearch {
    pub fn new(
        lexical: Arc<LexicalIndex>,
        vector: Arc<VectorIndex>,
        driver: Arc<dyn GraphDriver>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        default_profile: Option<RrfProfile>,
    ) -> Self {
        Self {
            lexical,
            vector,
            driver,
            provider,
            default_profile,
        }
    }

    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<ScoredNode>> {
        self.search_with_cancel(query, opts, &CancellationToken::new())
            .await
    }

    pub async fn search_with_cancel(
        &self,
        query: &str,
        opts: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredNode>> {
        let tokens = crate::lexical::tokenizer::terms(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let profile = opts
            .rrf
            .or(self.default_profile)
            .unwrap_or_else(|| RrfProfile::adaptive(tokens.len()));

        // Both rankers run concurrently; vector needs the query embedding
        // first and is skipped entirely when cancelled mid-flight.
        let lexical_fut = async { Some(self.lexical.search(query)) };
        let vector_fut = self.vector_candidates(query, opts, cancel);
        let (lexical_hits, vector_hits) = tokio::join!(lexical_fut, vector_fut);

        if lexical_hits.is_none() && vector_hits.is_none() {
            return Err(MimirError::Search("all rankers failed".into()));
        }

        let mut fused = fuse(
            lexical_hits.as_deref().unwrap_or(&[]),
            vector_hits.as_deref().unwrap_or(&[]),
            &profile,
        );
        debug!(candidates = fused.len(), "rrf fusion complete");

        // Resolve nodes and apply post-filters.
        let mut results: Vec<ScoredNode> = Vec::new();
        for (id, candidate) in fused.drain() {
            if let Some(min) = opts.min_similarity {
                if candidate.vector_similarity.map_or(true, |s| s < min) {
                    continue;
                }
            }
            let Some(node) = self.driver.get_node(&id).await? else {
                continue;
            };
            if !matches_filters(&node, opts) {
                continue;
            }
            results.push(ScoredNode {
                node,
                score: candidate.score,
                lexical_score: candidate.lexical_score,
                vector_similarity: candidate.vector_similarity,
                match_lines: candidate.match_lines.into_iter().map(Into::into).collect(),
                hops: 0,
            });
        }

        if opts.depth > 1 {
            self.expand(&mut results, opts).await?;
        }
        self.attach_chunk_parents(&mut results).await?;

        sort_results(&mut results);
        let limit = opts.limit.unwrap_or(DEFAULT_LIMIT);
        let mut page: Vec<ScoredNode> = results
            .into_iter()
            .skip(opts.offset)
            .take(limit)
            .collect();
        for result in &mut page {
            strip_large_fields(&mut result.node.properties);
        }
        Ok(page)
    }

    async fn vector_candidates(
        &self,
        query: &str,
        opts: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Option<Vec<VectorHit>> {
        let provider = self.provider.as_ref()?;
        let texts = vec![query.to_string()];
        let embedding = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("vector ranker skipped: cancelled");
                return None;
            }
            result = provider.embed(&texts) => match result {
                Ok(mut vecs) if !vecs.is_empty() => vecs.remove(0),
                Ok(_) => return None,
                Err(e) => {
                    warn!("query embedding failed, degrading to lexical: {}", e);
                    return None;
                }
            }
        };

        // Prefetch generously so post-filtering still fills the page.
        let k = opts.limit.unwrap_or(DEFAULT_LIMIT).saturating_mul(5).max(50);
        match self.vector.knn(&embedding, k, opts.min_similarity) {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!("vector ranker failed, degrading to lexical: {}", e);
                None
            }
        }
    }

    /// Breadth-first expansion around direct hits, dampening scores per hop.
    async fn expand(&self, results: &mut Vec<ScoredNode>, opts: &SearchOptions) -> Result<()> {
        let mut seen: HashSet<String> = results.iter().map(|r| r.node.id.clone()).collect();
        let mut extra = Vec::new();

        for hit in results.iter() {
            let mut queue: VecDeque<(String, u32, f32)> =
                VecDeque::from([(hit.node.id.clone(), 0, hit.score)]);
            while let Some((id, hops, score)) = queue.pop_front() {
                if hops as usize >= opts.depth {
                    continue;
                }
                for edge in self.driver.edges_of(&id, Direction::Both).await? {
                    let neighbor_id = if edge.source == id {
                        edge.target.clone()
                    } else {
                        edge.source.clone()
                    };
                    if !seen.insert(neighbor_id.clone()) {
                        continue;
                    }
                    let Some(node) = self.driver.get_node(&neighbor_id).await? else {
                        continue;
                    };
                    if !matches_filters(&node, opts) {
                        continue;
                    }
                    let damped = score * EXPANSION_DECAY;
                    extra.push(ScoredNode {
                        node,
                        score: damped,
                        lexical_score: None,
                        vector_similarity: None,
                        match_lines: Vec::new(),
                        hops: hops + 1,
                    });
                    queue.push_back((neighbor_id, hops + 1, damped));
                }
            }
        }
        results.extend(extra);
        Ok(())
    }

    /// A fileChunk hit also surfaces the owning file node; the parent's
    /// score is the best of its chunks when it was not a hit itself.
    async fn attach_chunk_parents(&self, results: &mut Vec<ScoredNode>) -> Result<()> {
        let present: HashSet<String> = results.iter().map(|r| r.node.id.clone()).collect();
        let mut parents: HashMap<String, f32> = HashMap::new();

        for hit in results.iter() {
            if hit.node.node_type != NodeType::FileChunk {
                continue;
            }
            for edge in self.driver.edges_of(&hit.node.id, Direction::In).await? {
                if edge.edge_type == EdgeType::Contains && !present.contains(&edge.source) {
                    let entry = parents.entry(edge.source.clone()).or_insert(hit.score);
                    if hit.score > *entry {
                        *entry = hit.score;
                    }
                }
            }
        }
        for (parent_id, score) in parents {
            if let Some(node) = self.driver.get_node(&parent_id).await? {
                if node.node_type == NodeType::File {
                    results.push(ScoredNode {
                        node,
                        score,
                        lexical_score: None,
                        vector_similarity: None,
                        match_lines: Vec::new(),
                        hops: 0,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Weighted RRF over the two rank lists. Vector hits are chunk-level and
/// collapse to their best rank per node.
fn fuse(
    lexical: &[LexicalHit],
    vector: &[VectorHit],
    profile: &RrfProfile,
) -> HashMap<String, FusionCandidate> {
    let mut out: HashMap<String, FusionCandidate> = HashMap::new();

    for (rank, hit) in lexical.iter().enumerate() {
        let contribution = profile.bm25_weight / (profile.k + rank as f32 + 1.0);
        let entry = out.entry(hit.id.clone()).or_insert(FusionCandidate {
            score: 0.0,
            lexical_score: None,
            vector_similarity: None,
            match_lines: Vec::new(),
        });
        entry.score += contribution;
        entry.lexical_score = Some(hit.score);
        entry.match_lines = hit.matches.clone();
    }

    let mut best_vector_rank: HashMap<&str, (usize, f32)> = HashMap::new();
    for (rank, hit) in vector.iter().enumerate() {
        best_vector_rank
            .entry(hit.id.as_str())
            .or_insert((rank, hit.score));
    }
    for (id, (rank, similarity)) in best_vector_rank {
        let contribution = profile.vector_weight / (profile.k + rank as f32 + 1.0);
        let entry = out.entry(id.to_string()).or_insert(FusionCandidate {
            score: 0.0,
            lexical_score: None,
            vector_similarity: None,
            match_lines: Vec::new(),
        });
        entry.score += contribution;
        entry.vector_similarity = Some(similarity);
    }

    out.retain(|_, c| c.score >= profile.min_score);
    out
}

fn matches_filters(node: &Node, opts: &SearchOptions) -> bool {
    if let Some(types) = &opts.types {
        if !types.contains(&node.node_type) {
            return false;
        }
    }
    if let Some(filters) = &opts.filters {
        for (key, expected) in filters {
            if node.properties.get(key) != Some(expected) {
                return false;
            }
        }
    }
    true
}

/// Score descending; ties broken by lexical score, recency, then id so the
/// ordering is fully deterministic.
fn sort_results(results: &mut [ScoredNode]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.lexical_score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.lexical_score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.node.updated.cmp(&a.node.updated))
            .then_with(|| a.node.id.cmp(&b.node.id))
    });
}
