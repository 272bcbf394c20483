//! Deterministic collaborators for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use ragloop::backend::{
    CompletionRequest, GenerationError, Generator, Index, IndexError, IndexHit, Purpose,
    RelevanceScorer, ScoringError, TokenStream,
};
use ragloop::config::Config;
use ragloop::embedding::{EmbeddingError, EmbeddingProvider};
use ragloop::planner::{
    NecessityJudge, Plan, PlanError, PlannerLimits, QueryRewriter, RetrievalPlanner,
};
use ragloop::retrieval::{FusionConfig, HybridRetriever, Query, RerankerGate, ThresholdPolicy};
use ragloop::stream::StreamEvent;
use ragloop::{Collaborators, Engine};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const CORPUS: &[(&str, &str)] = &[
    (
        "refund-policy",
        "Refunds are issued within 30 days of purchase for unused items.",
    ),
    (
        "refund-processing",
        "Refund processing takes 5 to 7 business days after the return arrives.",
    ),
    ("shipping", "Standard shipping takes 5 business days."),
    (
        "warranty",
        "The warranty covers manufacturing defects for one year.",
    ),
    (
        "returns",
        "To start a return, contact support with your order number.",
    ),
];

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// 26-dimensional letter histogram, enough to give stable nearest neighbors
pub struct LetterEmbedder;

impl EmbeddingProvider for LetterEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }
        let mut v = vec![0.01; 26];
        for c in text.to_ascii_lowercase().chars() {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        Ok(v)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        26
    }

    fn model_name(&self) -> &str {
        "letters"
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ok,
    Fail,
    Unreachable,
    /// Answer normally after a delay
    Slow(Duration),
}

impl Mode {
    async fn apply(self) -> Result<(), IndexError> {
        match self {
            Mode::Ok => Ok(()),
            Mode::Fail => Err(IndexError::Search("injected failure".to_string())),
            Mode::Unreachable => Err(IndexError::Unreachable("connection refused".to_string())),
            Mode::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

/// Steady mode plus modes queued for the next calls
#[derive(Debug)]
struct Modes {
    steady: Mode,
    queued: VecDeque<Mode>,
}

impl Modes {
    fn all_ok() -> Mutex<Self> {
        Mutex::new(Self {
            steady: Mode::Ok,
            queued: VecDeque::new(),
        })
    }

    fn next(&mut self) -> Mode {
        self.queued.pop_front().unwrap_or(self.steady)
    }
}

/// In-memory corpus with term-overlap lexical search and letter-histogram
/// vector search. Either side can be switched to fail, per call or for good.
pub struct FakeIndex {
    docs: Vec<(String, String, Vec<f32>)>,
    lexical_mode: Mutex<Modes>,
    vector_mode: Mutex<Modes>,
    hidden: Mutex<HashSet<String>>,
    lexical_queries: Mutex<Vec<String>>,
    vector_calls: AtomicUsize,
}

impl FakeIndex {
    pub fn new(corpus: &[(&str, &str)]) -> Self {
        let docs = corpus
            .iter()
            .map(|(id, text)| {
                let embedding = LetterEmbedder.embed(text).unwrap_or_default();
                (id.to_string(), text.to_string(), embedding)
            })
            .collect();

        Self {
            docs,
            lexical_mode: Modes::all_ok(),
            vector_mode: Modes::all_ok(),
            hidden: Mutex::new(HashSet::new()),
            lexical_queries: Mutex::new(Vec::new()),
            vector_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_lexical(&self, mode: Mode) {
        self.lexical_mode.lock().unwrap().steady = mode;
    }

    pub fn set_vector(&self, mode: Mode) {
        self.vector_mode.lock().unwrap().steady = mode;
    }

    /// Modes for the next lexical calls, one per call, before the steady
    /// mode applies again
    pub fn queue_lexical(&self, modes: &[Mode]) {
        self.lexical_mode.lock().unwrap().queued.extend(modes);
    }

    pub fn queue_vector(&self, modes: &[Mode]) {
        self.vector_mode.lock().unwrap().queued.extend(modes);
    }

    /// Make a document's text unfetchable while it stays searchable
    pub fn hide_text(&self, id: &str) {
        self.hidden.lock().unwrap().insert(id.to_string());
    }

    /// Query texts seen by lexical search, in call order
    pub fn lexical_queries(&self) -> Vec<String> {
        self.lexical_queries.lock().unwrap().clone()
    }

    pub fn vector_calls(&self) -> usize {
        self.vector_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Index for FakeIndex {
    async fn lexical_search(&self, text: &str, limit: usize) -> Result<Vec<IndexHit>, IndexError> {
        self.lexical_queries.lock().unwrap().push(text.to_string());
        let mode = self.lexical_mode.lock().unwrap().next();
        mode.apply().await?;

        let query_terms = terms(text);
        let mut hits: Vec<IndexHit> = self
            .docs
            .iter()
            .filter_map(|(id, doc, _)| {
                let doc_terms = terms(doc);
                let overlap = query_terms
                    .iter()
                    .filter(|t| doc_terms.iter().any(|d| d.starts_with(t.as_str())))
                    .count();
                (overlap > 0).then(|| IndexHit::new(id.clone(), overlap as f32))
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);
        let mode = self.vector_mode.lock().unwrap().next();
        mode.apply().await?;

        let mut hits: Vec<IndexHit> = self
            .docs
            .iter()
            .map(|(id, _, v)| IndexHit::new(id.clone(), cosine(embedding, v)))
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_chunk_text(&self, id: &str) -> Result<String, IndexError> {
        if self.hidden.lock().unwrap().contains(id) {
            return Err(IndexError::NotFound(id.to_string()));
        }
        self.docs
            .iter()
            .find(|(doc_id, _, _)| doc_id == id)
            .map(|(_, text, _)| text.clone())
            .ok_or_else(|| IndexError::NotFound(id.to_string()))
    }
}

/// Scores passages by query: the configured base score when the passage
/// shares a term with the query, 0.25 less otherwise.
pub struct FakeScorer {
    bases: HashMap<String, f32>,
    default_base: f32,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl FakeScorer {
    pub fn new(default_base: f32) -> Self {
        Self {
            bases: HashMap::new(),
            default_base,
            fail: AtomicBool::new(false),
            delay: None,
        }
    }

    pub fn with_query(mut self, query: &str, base: f32) -> Self {
        self.bases.insert(query.to_string(), base);
        self
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    /// Sleep before every score
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl RelevanceScorer for FakeScorer {
    async fn score(&self, query: &str, text: &str) -> Result<f32, ScoringError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScoringError::Model("injected failure".to_string()));
        }

        let base = self.bases.get(query).copied().unwrap_or(self.default_base);
        let doc_terms = terms(text);
        let related = terms(query)
            .iter()
            .any(|t| doc_terms.iter().any(|d| d.starts_with(t.as_str())));

        Ok(if related { base } else { (base - 0.25).max(0.0) })
    }
}

/// Generator scripted per purpose
pub struct FakeGenerator {
    judge_reply: Result<String, GenerationError>,
    delays: Vec<(Purpose, Duration)>,
    rewrites: Mutex<VecDeque<Result<String, GenerationError>>>,
    answer: Vec<String>,
    fail_after: Option<usize>,
    token_delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            judge_reply: Ok("RETRIEVE".to_string()),
            delays: Vec::new(),
            rewrites: Mutex::new(VecDeque::new()),
            answer: vec![
                "Refunds ".to_string(),
                "take ".to_string(),
                "30 days.".to_string(),
            ],
            fail_after: None,
            token_delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn judge(mut self, reply: &str) -> Self {
        self.judge_reply = Ok(reply.to_string());
        self
    }

    pub fn judge_fails(mut self) -> Self {
        self.judge_reply = Err(GenerationError::Network("judge unavailable".to_string()));
        self
    }

    /// Hold back the reply to every request of `purpose`
    pub fn delay(mut self, purpose: Purpose, delay: Duration) -> Self {
        self.delays.push((purpose, delay));
        self
    }

    /// Queue replies for successive rewrite calls
    pub fn rewrites(self, replies: &[&str]) -> Self {
        self.rewrites
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| Ok(r.to_string())));
        self
    }

    pub fn answer(mut self, tokens: &[&str]) -> Self {
        self.answer = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Break the answer stream after `n` tokens
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    pub fn requests(&self, purpose: Purpose) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.purpose == purpose)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<TokenStream, GenerationError> {
        let purpose = request.purpose;
        self.requests.lock().unwrap().push(request);

        if let Some((_, delay)) = self.delays.iter().find(|(p, _)| *p == purpose) {
            tokio::time::sleep(*delay).await;
        }

        let tokens: Vec<Result<String, GenerationError>> = match purpose {
            Purpose::NecessityJudgment => vec![self.judge_reply.clone()],
            Purpose::QueryRewrite => {
                let next = self.rewrites.lock().unwrap().pop_front();
                vec![next.unwrap_or_else(|| {
                    Err(GenerationError::Network("no rewrite scripted".to_string()))
                })]
            }
            Purpose::Answer => {
                let mut tokens: Vec<_> = self.answer.iter().cloned().map(Ok).collect();
                if let Some(n) = self.fail_after {
                    tokens.truncate(n);
                    tokens.push(Err(GenerationError::Stream("connection reset".to_string())));
                }
                tokens
            }
        };

        let delay = self.token_delay;
        let stream = futures::stream::iter(tokens).then(move |token| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            token
        });
        Ok(stream.boxed())
    }
}

/// Config with defaults tuned for fast, deterministic tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.planner.enable_query_rewrite = false;
    config.timeouts.judge_ms = 1_000;
    config.timeouts.rewrite_ms = 1_000;
    config.timeouts.retrieval_ms = 1_000;
    config.timeouts.rerank_ms = 1_000;
    config.timeouts.turn_budget_ms = 10_000;
    config
}

pub struct Harness {
    pub engine: Engine,
    pub index: Arc<FakeIndex>,
    pub generator: Arc<FakeGenerator>,
}

pub fn harness(config: &Config, scorer: FakeScorer, generator: FakeGenerator) -> Harness {
    let index = Arc::new(FakeIndex::new(CORPUS));
    let generator = Arc::new(generator);
    let collaborators = Collaborators {
        index: index.clone(),
        embedder: Arc::new(LetterEmbedder),
        scorer: Arc::new(scorer),
        generator: generator.clone(),
    };
    let engine = Engine::new(config, collaborators).expect("engine");

    Harness {
        engine,
        index,
        generator,
    }
}

pub struct PlannerHarness {
    pub planner: RetrievalPlanner,
    pub index: Arc<FakeIndex>,
    pub generator: Arc<FakeGenerator>,
}

/// The planner alone, wired the way the engine wires it
pub fn planner(config: &Config, scorer: FakeScorer, generator: FakeGenerator) -> PlannerHarness {
    let index = Arc::new(FakeIndex::new(CORPUS));
    let generator = Arc::new(generator);
    let window = config.planner.history_window;

    let fusion = FusionConfig::new(
        config.retrieval.rrf_k,
        config.retrieval.semantic_weight,
        config.retrieval.keyword_weight,
    )
    .expect("fusion config");
    let retriever = HybridRetriever::new(
        index.clone(),
        Arc::new(LetterEmbedder),
        fusion,
        config.retrieval.search_multiplier,
        config.retrieval.tolerate_partial_failure,
        config.timeouts.retrieval(),
    );
    let policy = ThresholdPolicy::new(
        config.rerank.confidence_threshold,
        config.rerank.floor_threshold,
        config.rerank.min_evidence,
    );
    let gate = RerankerGate::new(Arc::new(scorer), Arc::new(policy), config.timeouts.rerank());
    let judge = NecessityJudge::new(
        generator.clone(),
        config.planner.enable_retrieval_judge,
        config.timeouts.judge(),
        window,
    );
    let rewriter = QueryRewriter::new(
        generator.clone(),
        config.planner.enable_query_rewrite,
        config.timeouts.rewrite(),
        config.planner.max_rewrite_chars,
        window,
    );

    PlannerHarness {
        planner: RetrievalPlanner::new(
            judge,
            rewriter,
            retriever,
            gate,
            PlannerLimits::from_config(config),
        ),
        index,
        generator,
    }
}

/// Plan one turn and collect the events the planner emitted
pub async fn run_plan(
    planner: &RetrievalPlanner,
    text: &str,
) -> (Result<Plan, PlanError>, Vec<StreamEvent>) {
    let cancel = CancellationToken::new();
    let (sink, stream) = ragloop::stream::channel(64, cancel.clone());

    let plan = planner.plan(&Query::new(text, Vec::new()), &sink, &cancel).await;
    sink.send(StreamEvent::Done).await;
    drop(sink);

    let mut events = stream.collect_events().await;
    events.pop();
    (plan, events)
}

/// Exactly one terminal event, last; evidence at most once and before any token
pub fn assert_well_formed(events: &[StreamEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "expected one terminal event in {:?}", events);
    assert!(events.last().is_some_and(StreamEvent::is_terminal));

    let evidence_at: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, StreamEvent::Evidence { .. }))
        .map(|(i, _)| i)
        .collect();
    assert!(evidence_at.len() <= 1, "evidence emitted more than once");

    if let Some(&at) = evidence_at.first() {
        let first_token = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Token { .. }));
        if let Some(token_at) = first_token {
            assert!(at < token_at, "evidence emitted after a token");
        }
    }
}

pub fn traces(events: &[StreamEvent]) -> Vec<ragloop::planner::RoundTrace> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Process { trace } => Some((**trace).clone()),
            _ => None,
        })
        .collect()
}

pub fn final_evidence(events: &[StreamEvent]) -> Option<ragloop::retrieval::EvidenceSet> {
    events.iter().find_map(|e| match e {
        StreamEvent::Evidence { evidence } => Some(evidence.clone()),
        _ => None,
    })
}

pub fn answer_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
