//! Sequential clustering pass over the ungrouped window.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use herald_core::{
    ClusterError, ClusterResult, CreateSingletonInput, Embedding, EmbeddingId, EmbeddingSource,
    Group, GroupId, GroupRepository, JoinGroupInput, Timestamp, Vector, incremental_mean,
};

use crate::candidates::CandidateSet;
use crate::config::{EngineConfig, RunRequest};
use crate::feed::UngroupedFeed;
use crate::report::RunReport;
use crate::retry::{timed, with_retry, with_shrinking_retry};

/// Drives one run: list candidates, stream ungrouped embeddings, match and write.
#[derive(Clone)]
pub struct ClusteringEngine {
    source: Arc<dyn EmbeddingSource>,
    repository: Arc<dyn GroupRepository>,
    config: EngineConfig,
}

impl ClusteringEngine {
    pub fn new(
        source: Arc<dyn EmbeddingSource>,
        repository: Arc<dyn GroupRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            repository,
            config,
        }
    }

    /// Use one adapter for both the embedding source and the group repository.
    pub fn with_store<S>(store: Arc<S>, config: EngineConfig) -> Self
    where
        S: EmbeddingSource + GroupRepository + 'static,
    {
        Self::new(store.clone(), store, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one clustering pass.
    ///
    /// Returns `Err` only when the run could not start: invalid parameters,
    /// the store unavailable before any write, or stored centroids whose
    /// dimension contradicts the configured one. Every other failure ends the
    /// run early with `partial = true`.
    pub async fn run(&self, request: RunRequest) -> ClusterResult<RunReport> {
        request.validate()?;
        self.config.validate()?;
        let mut run = Run::new(self, request);
        info!(
            "herald.engine: run start threshold={} lookback_days={} cutoff={}",
            request.threshold,
            request.lookback_days,
            run.report.cutoff.as_micros()
        );
        let outcome = run.execute().await;
        let report = run.finish();
        match outcome {
            Ok(()) => {
                info!(
                    "herald.engine: run done groups_created={} memberships_created={} skipped={} partial={} duration_ms={}",
                    report.groups_created,
                    report.memberships_created,
                    report.embeddings_skipped,
                    report.partial,
                    report.duration_ms
                );
                Ok(report)
            }
            Err(err) => {
                warn!("herald.engine: run aborted before any write: {err}");
                Err(err)
            }
        }
    }
}

/// What the caller should do after handling one embedding.
enum Flow {
    Continue,
    Halt,
}

struct Run<'a> {
    engine: &'a ClusteringEngine,
    request: RunRequest,
    started: Instant,
    report: RunReport,
    candidates: CandidateSet,
    dimension: Option<usize>,
    writes_made: bool,
}

impl<'a> Run<'a> {
    fn new(engine: &'a ClusteringEngine, request: RunRequest) -> Self {
        let started_at = Timestamp::now();
        let report = RunReport {
            started_at,
            cutoff: started_at.minus_days(request.lookback_days),
            ..RunReport::default()
        };
        Self {
            engine,
            request,
            started: Instant::now(),
            report,
            candidates: CandidateSet::default(),
            dimension: engine.config.expected_dimension,
            writes_made: false,
        }
    }

    fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    fn finish(mut self) -> RunReport {
        self.report.duration_ms = self.started.elapsed().as_millis() as u64;
        self.report
    }

    /// Unavailability before the first write aborts the run; anything later
    /// (or any other failure) ends it as partial.
    fn halt(&mut self, stage: &str, err: ClusterError) -> ClusterResult<()> {
        if err.is_unavailable() && !self.writes_made {
            return Err(err);
        }
        warn!("herald.engine: {stage} failed, finishing as partial: {err}");
        self.report.partial = true;
        Ok(())
    }

    async fn execute(&mut self) -> ClusterResult<()> {
        let ids = match self.load_candidate_ids().await {
            Ok(ids) => ids,
            Err(err) => return self.halt("listing candidate groups", err),
        };
        debug!("herald.engine: {} candidate groups in window", ids.len());
        self.candidates = CandidateSet::with_ids(ids);

        let config = self.config().clone();
        let mut feed = UngroupedFeed::new(
            self.engine.source.clone(),
            self.report.cutoff,
            config.ungrouped_batch_size,
            config.call_timeout,
            config.retry,
        );
        loop {
            if self.report.batches_processed >= config.max_batches as u64 {
                if !feed.is_exhausted() {
                    warn!(
                        "herald.engine: batch ceiling {} reached with work left",
                        config.max_batches
                    );
                    self.report.partial = true;
                }
                break;
            }
            let batch = match feed.next_page().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => return self.halt("fetching ungrouped embeddings", err),
            };
            if self.report.batches_processed + 1 < config.max_batches as u64 {
                feed.prefetch();
            }
            if !self.candidates.is_resolved()
                && let Err(err) = self.resolve_candidates().await
            {
                if matches!(err, ClusterError::DimensionMismatch { .. }) && !self.writes_made {
                    return Err(err);
                }
                return self.halt("loading candidate groups", err);
            }
            let deadline = Instant::now() + config.batch_timeout;
            let batch_len = batch.len();
            for (index, embedding) in batch.into_iter().enumerate() {
                if Instant::now() >= deadline {
                    warn!(
                        "herald.engine: batch deadline hit after {index} of {batch_len} embeddings"
                    );
                    self.report.partial = true;
                    return Ok(());
                }
                if let Flow::Halt = self.process(embedding).await? {
                    return Ok(());
                }
            }
            self.report.batches_processed += 1;
        }
        Ok(())
    }

    async fn load_candidate_ids(&mut self) -> ClusterResult<Vec<GroupId>> {
        let config = self.config().clone();
        let repository = self.engine.repository.clone();
        let cutoff = self.report.cutoff;
        let mut ids = Vec::new();
        let mut page_size = config.group_id_page_size;
        let mut offset = 0u64;
        loop {
            let attempted = with_shrinking_retry(
                config.retry,
                config.call_timeout,
                "fetch_active_group_ids",
                page_size,
                |limit| {
                    let repository = repository.clone();
                    async move { repository.fetch_active_group_ids(cutoff, limit, offset).await }
                },
            )
            .await;
            page_size = attempted.limit;
            let page = attempted.result?;
            offset += page.items.len() as u64;
            let done = !page.has_more || page.items.is_empty();
            ids.extend(page.items);
            if done {
                return Ok(ids);
            }
        }
    }

    /// Load full candidate records in chunks. Runs before the first write of the run.
    async fn resolve_candidates(&mut self) -> ClusterResult<()> {
        let config = self.config().clone();
        let repository = self.engine.repository.clone();
        let mut chunk = config.group_resolve_chunk;
        while !self.candidates.is_resolved() {
            let ids: Vec<GroupId> = self
                .candidates
                .unresolved()
                .iter()
                .take(chunk)
                .copied()
                .collect();
            let attempted = with_shrinking_retry(
                config.retry,
                config.call_timeout,
                "fetch_groups_by_ids",
                ids.len() as u32,
                |limit| {
                    let repository = repository.clone();
                    let subset = ids[..(limit as usize).min(ids.len())].to_vec();
                    async move { repository.fetch_groups_by_ids(&subset).await }
                },
            )
            .await;
            let used = (attempted.limit as usize).min(ids.len());
            chunk = chunk.min(used.max(1));
            let groups = attempted.result?;
            let mut accepted = Vec::with_capacity(groups.len());
            for group in groups.into_iter().filter(has_usable_centroid) {
                match self.dimension {
                    Some(expected) if group.dimension() != expected => {
                        if config.expected_dimension.is_some() {
                            return Err(ClusterError::dimension_mismatch(
                                expected,
                                group.dimension(),
                                format!("stored centroid of group {}", group.id),
                            ));
                        }
                        warn!(
                            "herald.engine: dropping candidate {} with dimension {} (run uses {expected})",
                            group.id,
                            group.dimension()
                        );
                    }
                    Some(_) => accepted.push(group),
                    None => {
                        self.dimension = Some(group.dimension());
                        accepted.push(group);
                    }
                }
            }
            self.candidates.resolve(used, accepted);
        }
        debug!(
            "herald.engine: resolved {} active candidates",
            self.candidates.len()
        );
        Ok(())
    }

    async fn process(&mut self, embedding: Embedding) -> ClusterResult<Flow> {
        let vector = match embedding.validated_vector(self.dimension) {
            Ok(vector) => vector,
            Err(err) => {
                warn!("herald.engine: skipping embedding {}: {err}", embedding.id);
                self.report.embeddings_skipped += 1;
                return Ok(Flow::Continue);
            }
        };
        if self.dimension.is_none() {
            self.dimension = Some(vector.dimension());
        }
        let mut conflicts = 0u32;
        loop {
            let outcome = self
                .candidates
                .best_match(vector.as_slice(), self.request.threshold);
            let joined = match outcome {
                Some(outcome) if outcome.matched => {
                    self.join(&embedding, &vector, outcome.group_id, outcome.score)
                        .await?
                }
                _ => return self.create_singleton(&embedding, vector).await,
            };
            match joined {
                JoinOutcome::Done(flow) => return Ok(flow),
                JoinOutcome::Rematch => {
                    conflicts += 1;
                    self.report.conflicts_retried += 1;
                    if conflicts >= self.config().retry.max_attempts {
                        warn!(
                            "herald.engine: leaving embedding {} ungrouped after {conflicts} conflicting joins",
                            embedding.id
                        );
                        self.report.partial = true;
                        return Ok(Flow::Continue);
                    }
                }
            }
        }
    }

    async fn join(
        &mut self,
        embedding: &Embedding,
        vector: &Vector,
        group_id: GroupId,
        score: f64,
    ) -> ClusterResult<JoinOutcome> {
        let Some(group) = self.candidates.get(group_id) else {
            return Ok(JoinOutcome::Rematch);
        };
        let expected_member_count = group.member_count;
        let new_centroid =
            match incremental_mean(&group.centroid, group.member_count, vector.as_slice()) {
                Ok(centroid) => centroid,
                Err(err) => {
                    warn!("herald.engine: skipping embedding {}: {err}", embedding.id);
                    self.report.embeddings_skipped += 1;
                    return Ok(JoinOutcome::Done(Flow::Continue));
                }
            };
        let input = JoinGroupInput {
            group_id,
            embedding_id: embedding.id,
            similarity: score,
            new_centroid: new_centroid.clone(),
            expected_member_count,
        };
        let repository = self.engine.repository.clone();
        let config = self.config().clone();
        let result = with_retry(config.retry, config.call_timeout, "join_group", || {
            let repository = repository.clone();
            let input = input.clone();
            async move { repository.join_group(input).await }
        })
        .await;
        match result {
            Ok(()) => {
                self.writes_made = true;
                self.report.memberships_created += 1;
                self.candidates
                    .apply_join(group_id, new_centroid, expected_member_count + 1);
                debug!(
                    "herald.engine: embedding {} joined group {group_id} (score {score:.4})",
                    embedding.id
                );
                Ok(JoinOutcome::Done(Flow::Continue))
            }
            Err(ClusterError::Conflict { message }) => {
                debug!("herald.engine: join conflict on group {group_id}: {message}");
                self.refresh_candidate(group_id).await;
                Ok(JoinOutcome::Rematch)
            }
            Err(ClusterError::NotFound { .. }) => {
                self.candidates.remove(group_id);
                Ok(JoinOutcome::Rematch)
            }
            Err(ClusterError::DuplicateMembership { message }) => {
                debug!("herald.engine: duplicate membership ignored: {message}");
                self.report.duplicates_ignored += 1;
                self.refresh_candidate(group_id).await;
                Ok(JoinOutcome::Done(Flow::Continue))
            }
            Err(err) => Ok(JoinOutcome::Done(self.halt_on_write(err)?)),
        }
    }

    async fn create_singleton(&mut self, embedding: &Embedding, vector: Vector) -> ClusterResult<Flow> {
        let input = CreateSingletonInput {
            embedding_id: embedding.id,
            centroid: vector.into_inner(),
        };
        let repository = self.engine.repository.clone();
        let config = self.config().clone();
        let attempted = with_shrinking_retry(
            config.retry,
            config.call_timeout,
            "create_singleton_group",
            1,
            |_| {
                let repository = repository.clone();
                let input = input.clone();
                async move { repository.create_singleton_group(input).await }
            },
        )
        .await;
        match attempted.result {
            Ok(group) => {
                self.writes_made = true;
                self.report.groups_created += 1;
                self.report.memberships_created += 1;
                debug!(
                    "herald.engine: embedding {} started group {}",
                    embedding.id, group.id
                );
                self.candidates.upsert(group);
                Ok(Flow::Continue)
            }
            Err(ClusterError::DuplicateMembership { message }) => {
                debug!("herald.engine: duplicate membership on singleton: {message}");
                self.adopt_owner(embedding.id, attempted.retries > 0).await;
                Ok(Flow::Continue)
            }
            Err(err) => self.halt_on_write(err),
        }
    }

    /// Take the group already holding `embedding_id` as a candidate. When an
    /// earlier attempt of this write failed and the owner is a singleton, that
    /// attempt committed and its group is counted as created by this run.
    async fn adopt_owner(&mut self, embedding_id: EmbeddingId, retried: bool) {
        let repository = self.engine.repository.clone();
        let owner = timed(self.config().call_timeout, "membership_owner", async move {
            repository.membership_owner(embedding_id).await
        })
        .await;
        let owner = match owner {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                self.report.duplicates_ignored += 1;
                return;
            }
            Err(err) => {
                warn!("herald.engine: could not resolve owner of embedding {embedding_id}: {err}");
                self.report.duplicates_ignored += 1;
                return;
            }
        };
        let Some(group) = self.refresh_candidate(owner).await else {
            self.report.duplicates_ignored += 1;
            return;
        };
        if retried && group.member_count == 1 {
            debug!("herald.engine: embedding {embedding_id} started group {owner} on an earlier attempt");
            self.writes_made = true;
            self.report.groups_created += 1;
            self.report.memberships_created += 1;
        } else {
            self.report.duplicates_ignored += 1;
        }
    }

    fn halt_on_write(&mut self, err: ClusterError) -> ClusterResult<Flow> {
        self.halt("writing clustering result", err)?;
        Ok(Flow::Halt)
    }

    /// Re-read a candidate after a rejected write; it drops out if frozen or unreadable.
    /// Returns the group when it stays a candidate.
    async fn refresh_candidate(&mut self, group_id: GroupId) -> Option<Group> {
        let repository = self.engine.repository.clone();
        let fetched = timed(
            self.config().call_timeout,
            "fetch_groups_by_ids",
            async move { repository.fetch_groups_by_ids(&[group_id]).await },
        )
        .await;
        let group = match fetched {
            Ok(groups) => groups.into_iter().find(|group| group.id == group_id),
            Err(err) => {
                warn!("herald.engine: could not refresh group {group_id}: {err}");
                None
            }
        };
        match group {
            Some(group)
                if group.is_active()
                    && has_usable_centroid(&group)
                    && self.dimension.is_none_or(|dimension| dimension == group.dimension()) =>
            {
                self.candidates.upsert(group.clone());
                Some(group)
            }
            _ => {
                self.candidates.remove(group_id);
                None
            }
        }
    }
}

/// Centroids that are empty, zero or non-finite cannot be matched against.
fn has_usable_centroid(group: &Group) -> bool {
    match Vector::new(group.centroid.clone()) {
        Ok(_) => true,
        Err(err) => {
            warn!("herald.engine: ignoring group {} with unusable centroid: {err}", group.id);
            false
        }
    }
}

enum JoinOutcome {
    Done(Flow),
    Rematch,
}
