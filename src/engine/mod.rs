//! Turn orchestration: wires the collaborators into the planner and the
//! answer streamer and runs each turn on its own task

use crate::backend::{Generator, Index, RelevanceScorer};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::planner::{
    NecessityJudge, PlanError, PlannerLimits, QueryRewriter, RetrievalPlanner,
};
use crate::retrieval::{
    EvidenceSet, FusionConfig, HybridRetriever, Query, RerankerGate, SufficiencyPolicy,
    ThresholdPolicy, Turn,
};
use crate::stream::{channel, AnswerStreamer, ErrorKind, StreamEvent, TurnStream};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Shared handles to the external collaborators, built once at start-up
#[derive(Clone)]
pub struct Collaborators {
    pub index: Arc<dyn Index>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub scorer: Arc<dyn RelevanceScorer>,
    pub generator: Arc<dyn Generator>,
}

/// Answers turns with a bounded retrieval loop
pub struct Engine {
    planner: Arc<RetrievalPlanner>,
    streamer: Arc<AnswerStreamer>,
    event_buffer: usize,
}

impl Engine {
    pub fn new(config: &Config, collaborators: Collaborators) -> Result<Self> {
        Self::with_policy(config, collaborators, Arc::new(threshold_policy(config)))
    }

    /// Build an engine with a custom sufficiency policy
    pub fn with_policy(
        config: &Config,
        collaborators: Collaborators,
        policy: Arc<dyn SufficiencyPolicy>,
    ) -> Result<Self> {
        let Collaborators {
            index,
            embedder,
            scorer,
            generator,
        } = collaborators;

        let history_window = config.planner.history_window;
        let retriever = build_retriever(config, index, embedder)?;
        let gate = RerankerGate::new(scorer, policy, config.timeouts.rerank());
        let judge = NecessityJudge::new(
            Arc::clone(&generator),
            config.planner.enable_retrieval_judge,
            config.timeouts.judge(),
            history_window,
        );
        let rewriter = QueryRewriter::new(
            Arc::clone(&generator),
            config.planner.enable_query_rewrite,
            config.timeouts.rewrite(),
            config.planner.max_rewrite_chars,
            history_window,
        );

        let planner = RetrievalPlanner::new(
            judge,
            rewriter,
            retriever,
            gate,
            PlannerLimits::from_config(config),
        );
        let streamer = AnswerStreamer::new(
            generator,
            history_window,
            config.generation.max_chunk_chars,
            config.generation.max_tokens,
            config.generation.temperature,
        );

        Ok(Self {
            planner: Arc::new(planner),
            streamer: Arc::new(streamer),
            event_buffer: config.generation.event_buffer,
        })
    }

    /// Start a turn on its own task and return its event stream
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_turn(&self, text: impl Into<String>, history: Vec<Turn>) -> TurnStream {
        let query = Query::new(text, history);
        let cancel = CancellationToken::new();
        let (sink, stream) = channel(self.event_buffer, cancel.clone());

        let planner = Arc::clone(&self.planner);
        let streamer = Arc::clone(&self.streamer);
        let span = tracing::info_span!("turn", id = %Uuid::new_v4());

        tokio::spawn(
            async move {
                tracing::info!(history = query.history().len(), "Turn started");

                match planner.plan(&query, &sink, &cancel).await {
                    Ok(plan) => {
                        tracing::info!(
                            rounds = plan.traces.len(),
                            termination = ?plan.termination,
                            evidence = plan.evidence.as_ref().map(EvidenceSet::len).unwrap_or(0),
                            "Planning finished"
                        );
                        streamer
                            .run(&query, plan.evidence.as_ref(), &sink, &cancel)
                            .await;
                    }
                    Err(PlanError::Cancelled) => {
                        tracing::info!("Turn cancelled during planning");
                        sink.send(StreamEvent::error(ErrorKind::Cancelled, "turn cancelled"))
                            .await;
                    }
                    Err(e @ PlanError::NoIndexAvailable(_)) => {
                        tracing::error!("{}", e);
                        sink.send(StreamEvent::error(ErrorKind::NoIndexAvailable, e.to_string()))
                            .await;
                    }
                }
            }
            .instrument(span),
        );

        stream
    }

    /// One round of hybrid retrieval and reranking, without planning or
    /// generation
    pub async fn search(&self, text: &str, top_n: usize) -> Result<EvidenceSet> {
        search_once(
            self.planner.retriever(),
            self.planner.gate(),
            self.planner.limits().top_k,
            text,
            top_n,
        )
        .await
    }
}

/// Retrieval and reranking only; needs no generator
pub struct Searcher {
    retriever: HybridRetriever,
    gate: RerankerGate,
    top_k: usize,
}

impl Searcher {
    pub fn new(
        config: &Config,
        index: Arc<dyn Index>,
        embedder: Arc<dyn EmbeddingProvider>,
        scorer: Arc<dyn RelevanceScorer>,
    ) -> Result<Self> {
        let policy = Arc::new(threshold_policy(config));

        Ok(Self {
            retriever: build_retriever(config, index, embedder)?,
            gate: RerankerGate::new(scorer, policy, config.timeouts.rerank()),
            top_k: config.rerank.top_k,
        })
    }

    pub async fn search(&self, text: &str, top_n: usize) -> Result<EvidenceSet> {
        search_once(&self.retriever, &self.gate, self.top_k, text, top_n).await
    }
}

fn threshold_policy(config: &Config) -> ThresholdPolicy {
    ThresholdPolicy::new(
        config.rerank.confidence_threshold,
        config.rerank.floor_threshold,
        config.rerank.min_evidence,
    )
}

fn build_retriever(
    config: &Config,
    index: Arc<dyn Index>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<HybridRetriever> {
    let fusion = FusionConfig::new(
        config.retrieval.rrf_k,
        config.retrieval.semantic_weight,
        config.retrieval.keyword_weight,
    )?;

    Ok(HybridRetriever::new(
        index,
        embedder,
        fusion,
        config.retrieval.search_multiplier,
        config.retrieval.tolerate_partial_failure,
        config.timeouts.retrieval(),
    ))
}

async fn search_once(
    retriever: &HybridRetriever,
    gate: &RerankerGate,
    top_k: usize,
    text: &str,
    top_n: usize,
) -> Result<EvidenceSet> {
    let query = Query::new(text, Vec::new()).reissue(1);
    let retrieval = retriever.retrieve(&query, top_n).await?;
    for failure in &retrieval.failures {
        tracing::warn!(
            origin = failure.origin.as_str(),
            "Search degraded: {}",
            failure.message
        );
    }

    if retrieval.candidates.is_empty() {
        return Ok(EvidenceSet::empty(1, "no candidates retrieved"));
    }

    let evidence = gate
        .rerank(&query, &retrieval.candidates, top_k.min(top_n))
        .await?;
    Ok(evidence)
}
