mod common;

use common::*;
use namesmith_core::analysis::ContextOptions;
use namesmith_core::apply::EditOutcome;
use namesmith_core::db::ProjectDb;
use namesmith_core::llm::{MainQueue, ModelConfig, TransportError};
use namesmith_core::model::FunctionAddress;
use namesmith_core::oracle::SymbolOracle;
use namesmith_core::pipeline::{
    analyze_batch, analyze_function, analyze_interactive, prepare, AnalysisSettings,
    BatchObserver, BatchSummary, CancelToken, FunctionOutcome, NoopObserver,
};
use namesmith_core::recovery::Strategy;

const MAIN_REPLY: &str = r#"{
  "comment": "Loads the bi.txt configuration and sums helper results.",
  "function_name": "load_config",
  "variables": [
    {"original_name": "v1", "new_name": "argc"},
    {"original_name": "v9", "new_name": "missing"}
  ],
  "security_role": "Config loading"
}"#;

fn settings() -> AnalysisSettings {
    AnalysisSettings::new(ContextOptions::default(), &ModelConfig::default())
}

fn applied(outcome: &FunctionOutcome) -> &namesmith_core::apply::ApplyReport {
    match outcome {
        FunctionOutcome::Applied { report, .. } => report,
        FunctionOutcome::Skipped { reason, .. } => panic!("unexpected skip: {reason}"),
    }
}

#[test]
fn single_function_edits_are_applied_independently() {
    let transport = ScriptedTransport::new(vec![completion(MAIN_REPLY)]);
    let client = client_with(transport.clone());
    let mut oracle = sample_oracle();

    let outcome = analyze_function(&mut oracle, &client, FunctionAddress(MAIN), &settings());
    let report = applied(&outcome);

    assert_eq!(report.function_name, EditOutcome::Applied("load_config_1000".to_string()));
    assert!(matches!(&report.comment, EditOutcome::Applied(text)
        if text.starts_with("SECURITY ROLE: Config loading\n\nLoads the bi.txt")));
    assert!(report.variables[0].outcome.is_applied());
    assert!(report.variables[1].outcome.is_failed());

    let info = oracle.function(MAIN).expect("main");
    assert_eq!(info.name, "load_config_1000");
    let code = oracle.decompile(FunctionAddress(MAIN)).expect("code");
    assert!(code.contains("int main(int argc)"));
    assert!(!code.contains("v1"));
    assert_eq!(oracle.refresh_count(FunctionAddress(MAIN)), 1);

    let prompt = &transport.requests.lock().unwrap()[0].messages[1].content;
    assert!(prompt.contains("Function: main at 0x1000"));
    assert!(prompt.contains("- Filename: sample.elf"));
}

#[test]
fn applying_the_same_reply_twice_converges() {
    let transport = ScriptedTransport::new(vec![completion(MAIN_REPLY), completion(MAIN_REPLY)]);
    let client = client_with(transport);
    let mut oracle = sample_oracle();

    let first = analyze_function(&mut oracle, &client, FunctionAddress(MAIN), &settings());
    let after_first = oracle.to_snapshot();
    let second = analyze_function(&mut oracle, &client, FunctionAddress(MAIN), &settings());

    let report = applied(&second);
    assert_eq!(report.comment, EditOutcome::Unchanged);
    assert_eq!(report.function_name, EditOutcome::Unchanged);
    assert_eq!(report.variables[0].outcome, EditOutcome::Unchanged);
    assert!(applied(&first).applied_count() > 0);
    assert_eq!(oracle.to_snapshot(), after_first);
}

#[test]
fn missing_decompiler_skips_without_a_request() {
    let transport = ScriptedTransport::new(vec![]);
    let client = client_with(transport.clone());
    let mut oracle = sample_oracle();

    let outcome = analyze_function(&mut oracle, &client, FunctionAddress(WORKER), &settings());
    match outcome {
        FunctionOutcome::Skipped { address, reason } => {
            assert_eq!(address, FunctionAddress(WORKER));
            assert!(reason.contains("decompilation unavailable"));
        }
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(transport.request_count(), 0);
    assert!(prepare(&oracle, FunctionAddress(0xdead), &settings()).is_err());
}

#[test]
fn transport_failure_still_writes_a_comment() {
    let transport =
        ScriptedTransport::new(vec![Err(TransportError::Network("connection refused".into()))]);
    let client = client_with(transport);
    let mut oracle = sample_oracle();

    let outcome = analyze_function(&mut oracle, &client, FunctionAddress(HELPER), &settings());
    match &outcome {
        FunctionOutcome::Applied { fallback, strategy, .. } => {
            assert!(*fallback);
            assert_eq!(*strategy, Strategy::DirectJson);
        }
        other => panic!("expected applied fallback, got {other:?}"),
    }
    let comment = oracle.function(HELPER).and_then(|f| f.comment).expect("comment");
    assert!(comment.starts_with("Analysis failed with request error:"));
    assert_eq!(oracle.function(HELPER).expect("helper").name, "sub_2000");
}

#[test]
fn reformat_retry_is_opt_in() {
    let transport = ScriptedTransport::new(vec![
        completion("I have no idea."),
        completion(r#"{"function_name": "double_value"}"#),
    ]);
    let client = client_with(transport.clone());
    let mut oracle = sample_oracle();
    let mut retrying = settings();
    retrying.reformat_retry = true;

    let outcome = analyze_function(&mut oracle, &client, FunctionAddress(HELPER), &retrying);
    assert_eq!(applied(&outcome).function_name, EditOutcome::Applied("double_value_2000".into()));
    assert_eq!(transport.request_count(), 2);
    let retry_prompt = &transport.requests.lock().unwrap()[1].messages[1].content;
    assert!(retry_prompt.contains("I have no idea."));

    let transport = ScriptedTransport::new(vec![completion("I have no idea.")]);
    let client = client_with(transport.clone());
    let mut oracle = sample_oracle();
    let outcome = analyze_function(&mut oracle, &client, FunctionAddress(HELPER), &settings());
    assert_eq!(applied(&outcome).function_name, EditOutcome::Skipped);
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn repeated_free_text_renames_each_get_an_outcome() {
    let reply = "Loads the configuration.\n\nVariable names: v1 -> count, v1 -> total";
    let transport = ScriptedTransport::new(vec![completion(reply)]);
    let client = client_with(transport);
    let mut oracle = sample_oracle();

    let outcome = analyze_function(&mut oracle, &client, FunctionAddress(MAIN), &settings());
    let report = applied(&outcome);
    assert_eq!(report.variables.len(), 2);
    assert_eq!(report.variables[0].outcome, EditOutcome::Applied("count".to_string()));
    assert!(matches!(report.variables[1].outcome, EditOutcome::Failed(_)));
}

#[test]
fn interactive_analysis_applies_on_the_calling_thread() {
    let transport = ScriptedTransport::new(vec![completion(MAIN_REPLY)]);
    let client = client_with(transport);
    let queue = MainQueue::new();
    let mut oracle = sample_oracle();

    let outcome =
        analyze_interactive(&mut oracle, &client, &queue, FunctionAddress(MAIN), &settings())
            .expect("outcome");
    assert_eq!(outcome.address(), FunctionAddress(MAIN));
    assert_eq!(oracle.function(MAIN).expect("main").name, "load_config_1000");
}

#[test]
fn interactive_analysis_runs_other_jobs_until_its_reply_lands() {
    let transport = ScriptedTransport::new(vec![completion(MAIN_REPLY)]);
    let client = client_with(transport);
    let queue = MainQueue::new();
    let mut oracle = sample_oracle();
    queue.handle().post(|oracle| {
        oracle.set_function_comment(FunctionAddress(WORKER), "queued earlier").expect("comment");
    });

    let outcome =
        analyze_interactive(&mut oracle, &client, &queue, FunctionAddress(MAIN), &settings())
            .expect("outcome");
    assert_eq!(outcome.address(), FunctionAddress(MAIN));
    assert_eq!(oracle.function(MAIN).expect("main").name, "load_config_1000");
    assert_eq!(
        oracle.function(WORKER).and_then(|f| f.comment).as_deref(),
        Some("queued earlier")
    );
}

#[derive(Default)]
struct Recorder {
    started: Option<usize>,
    visited: Vec<FunctionAddress>,
    finished: Option<BatchSummary>,
    cancel_after_first: Option<CancelToken>,
}

impl BatchObserver for Recorder {
    fn on_start(&mut self, total: usize) {
        self.started = Some(total);
    }

    fn on_function(&mut self, _index: usize, address: FunctionAddress) {
        self.visited.push(address);
    }

    fn on_outcome(&mut self, _index: usize, _outcome: &FunctionOutcome) {
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
    }

    fn on_finish(&mut self, summary: &BatchSummary) {
        self.finished = Some(summary.clone());
    }
}

#[test]
fn batch_runs_sequentially_and_reports_skips() {
    let transport = ScriptedTransport::new(vec![
        completion(MAIN_REPLY),
        completion(r#"{"function_name": "double_value"}"#),
    ]);
    let client = client_with(transport);
    let mut oracle = sample_oracle();
    let mut recorder = Recorder::default();
    let addresses = [FunctionAddress(MAIN), FunctionAddress(WORKER), FunctionAddress(HELPER)];

    let (outcomes, summary) = analyze_batch(
        &mut oracle,
        &client,
        &addresses,
        &settings(),
        &CancelToken::new(),
        &mut recorder,
    );

    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        summary,
        BatchSummary { total: 3, applied: 2, skipped: 1, fallbacks: 0, cancelled: false }
    );
    assert_eq!(recorder.started, Some(3));
    assert_eq!(recorder.visited, addresses.to_vec());
    assert_eq!(recorder.finished, Some(summary));
    assert_eq!(oracle.function(HELPER).expect("helper").name, "double_value_2000");
}

#[test]
fn cancellation_stops_between_functions() {
    let transport = ScriptedTransport::new(vec![completion(MAIN_REPLY), completion(MAIN_REPLY)]);
    let client = client_with(transport.clone());
    let mut oracle = sample_oracle();
    let token = CancelToken::new();
    let mut recorder = Recorder { cancel_after_first: Some(token.clone()), ..Recorder::default() };

    let (outcomes, summary) = analyze_batch(
        &mut oracle,
        &client,
        &[FunctionAddress(MAIN), FunctionAddress(HELPER)],
        &settings(),
        &token,
        &mut recorder,
    );
    assert_eq!(outcomes.len(), 1);
    assert!(summary.cancelled);
    assert_eq!(transport.request_count(), 1);

    let cancelled = CancelToken::new();
    cancelled.cancel();
    let (outcomes, summary) = analyze_batch(
        &mut oracle,
        &client,
        &[FunctionAddress(MAIN)],
        &settings(),
        &cancelled,
        &mut NoopObserver,
    );
    assert!(outcomes.is_empty());
    assert!(summary.cancelled);
}

#[test]
fn project_database_records_applied_edits() {
    let db_dir = tempfile::tempdir().expect("tempdir");
    let mut db = ProjectDb::open(&db_dir.path().join("project.db")).expect("open db");
    db.import_snapshot(&sample_snapshot()).expect("import");

    let transport = ScriptedTransport::new(vec![completion(MAIN_REPLY)]);
    let client = client_with(transport);
    let outcome = analyze_function(&mut db, &client, FunctionAddress(MAIN), &settings());
    assert_eq!(applied(&outcome).applied_count(), 3);

    let fields: Vec<String> =
        db.edit_log(FunctionAddress(MAIN)).expect("log").into_iter().map(|e| e.field).collect();
    assert_eq!(fields, vec!["comment", "function_name", "variable"]);
    assert!(db.decompile(FunctionAddress(MAIN)).expect("code").contains("argc"));
}
