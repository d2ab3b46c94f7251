//! Per-function analysis pipeline and batch driver.
//!
//! One function: decompile, collect context, compose the prompt, query the
//! model, recover an edit-set and apply it. Batches run functions strictly
//! one at a time and can be cancelled between functions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, TryRecvError};
use thiserror::Error;
use tracing::{info, warn};

use crate::analysis::classify::{classify_function, SpecialKind};
use crate::analysis::context::{build_context, ContextOptions};
use crate::analysis::prompt::{compose_prompt, is_large, reformat_prompt};
use crate::apply::{apply_edit_set, ApplyReport};
use crate::llm::{MainQueue, ModelClient, ModelReply};
use crate::model::{FunctionAddress, ModelEditSet};
use crate::oracle::{OracleError, SymbolOracle};
use crate::recovery::{recover_detailed, Strategy};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot analyze function at {address}: {source}")]
    Precondition {
        address: FunctionAddress,
        #[source]
        source: OracleError,
    },

    #[error("model reply for {0} was never delivered")]
    ReplyLost(FunctionAddress),
}

/// Options for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub context: ContextOptions,
    pub large_function_threshold: usize,
    /// Ask the model to restate a reply that yielded nothing usable.
    pub reformat_retry: bool,
}

impl AnalysisSettings {
    pub fn new(context: ContextOptions, config: &crate::llm::ModelConfig) -> Self {
        Self {
            context,
            large_function_threshold: config.large_function_threshold,
            reformat_retry: config.reformat_retry,
        }
    }
}

/// A fully composed request for one function.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub address: FunctionAddress,
    pub name: String,
    pub prompt: String,
    pub special: SpecialKind,
    pub large: bool,
}

/// Result of analysing one function.
#[derive(Debug, Clone)]
pub enum FunctionOutcome {
    Applied {
        report: ApplyReport,
        strategy: Strategy,
        /// The reply was a synthesized failure notice.
        fallback: bool,
    },
    Skipped {
        address: FunctionAddress,
        reason: String,
    },
}

impl FunctionOutcome {
    pub fn address(&self) -> FunctionAddress {
        match self {
            FunctionOutcome::Applied { report, .. } => report.function,
            FunctionOutcome::Skipped { address, .. } => *address,
        }
    }
}

/// Decompile and compose the prompt for `address`.
///
/// Fails when the function is missing or cannot be decompiled.
pub fn prepare(
    oracle: &dyn SymbolOracle,
    address: FunctionAddress,
    settings: &AnalysisSettings,
) -> Result<PreparedRequest, PipelineError> {
    let info = oracle
        .function(address.0)
        .or_else(|| oracle.function_containing(address.0))
        .ok_or(PipelineError::Precondition { address, source: OracleError::NoFunction(address.0) })?;
    let address = info.address;
    let decompiled = oracle
        .decompile(address)
        .map_err(|source| PipelineError::Precondition { address, source })?;
    let digest = build_context(oracle, address, &settings.context)
        .map_err(|source| PipelineError::Precondition { address, source })?;
    let binary = oracle.binary_info();
    let prompt = compose_prompt(
        address,
        &digest.render(),
        &decompiled,
        &binary,
        settings.large_function_threshold,
    );
    Ok(PreparedRequest {
        address,
        name: info.name,
        prompt,
        special: classify_function(oracle, address),
        large: is_large(&decompiled, settings.large_function_threshold),
    })
}

/// Recover an edit-set from `reply` and apply it to `address`.
pub fn settle(
    oracle: &mut dyn SymbolOracle,
    address: FunctionAddress,
    reply: &ModelReply,
) -> FunctionOutcome {
    let recovery = recover_detailed(reply.text());
    settle_recovered(oracle, address, recovery.edit_set, recovery.strategy, reply.is_fallback())
}

fn settle_recovered(
    oracle: &mut dyn SymbolOracle,
    address: FunctionAddress,
    edits: ModelEditSet,
    strategy: Strategy,
    fallback: bool,
) -> FunctionOutcome {
    let report = apply_edit_set(oracle, address, &edits);
    info!(
        function = %address,
        %strategy,
        applied = report.applied_count(),
        failed = report.failed_count(),
        "applied model edits"
    );
    FunctionOutcome::Applied { report, strategy, fallback }
}

/// Blocking single-function analysis, used by batches.
pub fn analyze_function(
    oracle: &mut dyn SymbolOracle,
    client: &ModelClient,
    address: FunctionAddress,
    settings: &AnalysisSettings,
) -> FunctionOutcome {
    let prepared = match prepare(oracle, address, settings) {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!(function = %address, error = %err, "skipping function");
            return FunctionOutcome::Skipped { address, reason: err.to_string() };
        }
    };

    let reply = client.invoke(&prepared.prompt);
    let mut recovery = recover_detailed(reply.text());
    if settings.reformat_retry
        && !reply.is_fallback()
        && recovery.strategy == Strategy::FreeText
        && recovery.edit_set.function_name.is_empty()
        && recovery.edit_set.variables.is_empty()
    {
        info!(function = %prepared.address, "reply had no usable structure; asking for JSON");
        let retry = client.invoke(&reformat_prompt(reply.text()));
        if !retry.is_fallback() {
            recovery = recover_detailed(retry.text());
        }
    }
    settle_recovered(oracle, prepared.address, recovery.edit_set, recovery.strategy, reply.is_fallback())
}

/// How long the interactive wait blocks on the queue between reply checks.
const REPLY_POLL: Duration = Duration::from_millis(50);

/// Single-function analysis with the model call on a worker thread.
///
/// The caller's thread keeps ownership of the oracle and runs queued jobs,
/// including ones posted by other workers, until its own reply is applied.
pub fn analyze_interactive(
    oracle: &mut dyn SymbolOracle,
    client: &ModelClient,
    queue: &MainQueue,
    address: FunctionAddress,
    settings: &AnalysisSettings,
) -> Result<FunctionOutcome, PipelineError> {
    let prepared = prepare(oracle, address, settings)?;
    let target = prepared.address;
    let (tx, rx) = bounded(1);
    client.invoke_async(prepared.prompt, &queue.handle(), move |oracle, reply| {
        let outcome = settle(oracle, target, &reply);
        let _ = tx.send(outcome);
    });
    loop {
        match rx.try_recv() {
            Ok(outcome) => return Ok(outcome),
            Err(TryRecvError::Disconnected) => return Err(PipelineError::ReplyLost(target)),
            Err(TryRecvError::Empty) => {
                queue.run_next_timeout(oracle, REPLY_POLL);
            }
        }
    }
}

/// Cooperative cancellation flag shared with a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callbacks for batch runs.
pub trait BatchObserver {
    fn on_start(&mut self, _total: usize) {}
    fn on_function(&mut self, _index: usize, _address: FunctionAddress) {}
    fn on_outcome(&mut self, _index: usize, _outcome: &FunctionOutcome) {}
    fn on_finish(&mut self, _summary: &BatchSummary) {}
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub applied: usize,
    pub skipped: usize,
    /// Replies that were synthesized failure notices.
    pub fallbacks: usize,
    pub cancelled: bool,
}

/// Analyze `addresses` one after another.
pub fn analyze_batch(
    oracle: &mut dyn SymbolOracle,
    client: &ModelClient,
    addresses: &[FunctionAddress],
    settings: &AnalysisSettings,
    cancel: &CancelToken,
    observer: &mut dyn BatchObserver,
) -> (Vec<FunctionOutcome>, BatchSummary) {
    let mut summary = BatchSummary { total: addresses.len(), ..BatchSummary::default() };
    let mut outcomes = Vec::with_capacity(addresses.len());
    observer.on_start(addresses.len());

    for (index, address) in addresses.iter().copied().enumerate() {
        if cancel.is_cancelled() {
            info!(done = index, total = addresses.len(), "batch cancelled");
            summary.cancelled = true;
            break;
        }
        observer.on_function(index, address);
        let outcome = analyze_function(oracle, client, address, settings);
        match &outcome {
            FunctionOutcome::Applied { fallback, .. } => {
                summary.applied += 1;
                if *fallback {
                    summary.fallbacks += 1;
                }
            }
            FunctionOutcome::Skipped { .. } => summary.skipped += 1,
        }
        observer.on_outcome(index, &outcome);
        outcomes.push(outcome);
    }

    info!(
        total = summary.total,
        applied = summary.applied,
        skipped = summary.skipped,
        "batch finished"
    );
    observer.on_finish(&summary);
    (outcomes, summary)
}
