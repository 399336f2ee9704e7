use super::*;
use crate::budget::Thresholds;
use crate::testing::{
    FixedProcessTable, MockAgent, MockRun, MockTracker, MockVcs, assistant_event, init_event, read_event,
    shell_event,
};
use tempfile::TempDir;

const COMPLETE: &str = "<wiggum>COMPLETE</wiggum>";

fn settings(temp: &TempDir) -> LoopSettings {
    let mut config = WiggumConfig::default();
    config.loop_config.heartbeat_secs = 0;
    config.loop_config.echo_activity = false;
    config.watchdog.enabled = false;
    let mut settings = LoopSettings::from_config(&config, temp.path());
    settings.classifier.thresholds = Thresholds {
        warn: 1_000,
        rotate: 2_000,
    };
    settings.classifier.prompt_bytes = 0;
    settings
}

fn prompt() -> PromptBuilder {
    PromptBuilder::new("Build the parser", COMPLETE, "<wiggum>GUTTER</wiggum>")
}

fn rotating_run() -> MockRun {
    MockRun::new([read_event("a.rs", 4_000), read_event("b.rs", 4_000), read_event("c.rs", 4_000)])
}

async fn run_loop(
    settings: LoopSettings,
    agent: &MockAgent,
    tracker: &MockTracker,
    vcs: &MockVcs,
) -> TerminationReason {
    let mut iteration_loop = IterationLoop::new(settings, agent.clone(), tracker.clone(), vcs.clone(), prompt());
    iteration_loop.run(CancellationToken::new()).await.unwrap()
}

fn read_state(temp: &TempDir, file: &str) -> String {
    std::fs::read_to_string(temp.path().join(".wiggum").join(file)).unwrap_or_default()
}

#[tokio::test]
async fn test_zero_outstanding_completes_without_sentinel() {
    let temp = TempDir::new().unwrap();
    let agent = MockAgent::new(vec![MockRun::new([read_event("a.rs", 10)])]);
    let tracker = MockTracker::new([Some(0)]);

    let reason = run_loop(settings(&temp), &agent, &tracker, &MockVcs::new()).await;

    assert_eq!(reason, TerminationReason::Completed);
    assert_eq!(agent.launch_count(), 1);
    assert_eq!(tracker.query_count(), 1);
}

#[tokio::test]
async fn test_rotate_starts_next_iteration_cold() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    settings.resume = true;
    let agent = MockAgent::new(vec![
        MockRun::new([init_event("sess-1", "opus"), read_event("a.rs", 4_000), read_event("b.rs", 4_000)]),
        MockRun::new([assistant_event(COMPLETE)]),
    ]);

    let reason = run_loop(settings, &agent, &MockTracker::default(), &MockVcs::new()).await;

    assert_eq!(reason, TerminationReason::Completed);
    let launches = agent.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[1].iteration, 2);
    assert_eq!(launches[1].resume_session, None);
    assert!(launches[1].prompt.contains("ran out of context"));
    assert!(!launches[0].prompt.contains("ran out of context"));

    let activity = read_state(&temp, "activity.log");
    assert!(activity.contains("Iteration 1 ended by ROTATE"));
    assert!(activity.contains("warned"));
}

#[tokio::test]
async fn test_resume_passes_previous_session() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    settings.resume = true;
    settings.max_iterations = 2;
    let agent = MockAgent::new(vec![MockRun::new([init_event("sess-1", "opus")]), MockRun::default()]);

    let reason = run_loop(settings, &agent, &MockTracker::new([Some(1)]), &MockVcs::new()).await;

    assert_eq!(reason, TerminationReason::Exhausted);
    let launches = agent.launches();
    assert_eq!(launches[0].resume_session, None);
    assert_eq!(launches[1].resume_session.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn test_repeated_failure_guts_run_and_skips_checkpoint() {
    let temp = TempDir::new().unwrap();
    let failing = shell_event("make", 2, "");
    let agent = MockAgent::new(vec![MockRun::new([failing.clone(), failing.clone(), failing])]);
    let vcs = MockVcs::dirty();

    let reason = run_loop(settings(&temp), &agent, &MockTracker::new([Some(4)]), &vcs).await;

    assert_eq!(reason, TerminationReason::Guttered);
    assert_eq!(reason.exit_code(), 1);
    assert_eq!(agent.launch_count(), 1);
    assert_eq!(vcs.checkpoints().len(), 1, "only the initial checkpoint");
    let errors = read_state(&temp, "errors.log");
    assert_eq!(errors.matches("COMMAND_FAILED make").count(), 3);
    assert!(errors.contains("REPEATED_FAILURE make"));
}

#[tokio::test]
async fn test_exhausted_without_terminal_signal() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    settings.max_iterations = 3;
    let agent = MockAgent::new(Vec::new());

    let reason = run_loop(settings, &agent, &MockTracker::new([Some(2)]), &MockVcs::new()).await;

    assert_eq!(reason, TerminationReason::Exhausted);
    assert_eq!(agent.launch_count(), 3);
}

#[tokio::test]
async fn test_rotate_on_last_iteration_is_exhausted() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    settings.max_iterations = 1;
    let agent = MockAgent::new(vec![rotating_run()]);

    let reason = run_loop(settings, &agent, &MockTracker::default(), &MockVcs::new()).await;

    assert_eq!(reason, TerminationReason::Exhausted);
    assert_eq!(agent.launch_count(), 1);
}

#[tokio::test]
async fn test_complete_with_outstanding_work_continues() {
    let temp = TempDir::new().unwrap();
    let agent = MockAgent::new(vec![MockRun::new([assistant_event(COMPLETE)]), MockRun::default()]);
    let tracker = MockTracker::new([Some(2), Some(0)]);

    let reason = run_loop(settings(&temp), &agent, &tracker, &MockVcs::new()).await;

    assert_eq!(reason, TerminationReason::Completed);
    assert_eq!(agent.launch_count(), 2);
    assert!(read_state(&temp, "activity.log").contains("COMPLETE claimed with 2 outstanding item(s)"));
}

#[tokio::test]
async fn test_tracker_failure_is_not_fatal() {
    let temp = TempDir::new().unwrap();
    let agent = MockAgent::new(vec![MockRun::new([assistant_event(COMPLETE)])]);
    let tracker = MockTracker::default().then_error("bd not installed");

    let reason = run_loop(settings(&temp), &agent, &tracker, &MockVcs::failing()).await;

    assert_eq!(reason, TerminationReason::Completed);
}

#[tokio::test]
async fn test_hanging_agent_is_terminated_on_rotate() {
    let temp = TempDir::new().unwrap();
    let agent = MockAgent::new(vec![rotating_run().hanging(), MockRun::new([assistant_event(COMPLETE)])]);

    let reason = run_loop(settings(&temp), &agent, &MockTracker::default(), &MockVcs::new()).await;

    assert_eq!(reason, TerminationReason::Completed);
    assert_eq!(agent.launch_count(), 2);
    assert_eq!(agent.terminations(), 2);
}

#[tokio::test]
async fn test_watchdog_kill_guts_run() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    settings.watchdog_interval = Some(Duration::from_millis(10));
    let agent = MockAgent::new(vec![MockRun::default().hanging()]).with_pid(4242);
    let table = FixedProcessTable::default()
        .with(4242, 1, "cursor-agent")
        .with(4243, 4242, "bash")
        .with(4244, 4243, "python3");

    let mut iteration_loop = IterationLoop::new(
        settings,
        agent.clone(),
        MockTracker::new([Some(1)]),
        MockVcs::dirty(),
        prompt(),
    )
    .with_process_table(Arc::new(table.clone()));
    let reason = iteration_loop.run(CancellationToken::new()).await.unwrap();

    assert_eq!(reason, TerminationReason::Guttered);
    assert_eq!(iteration_loop.state().phase, LoopPhase::Guttered);
    assert_eq!(table.killed(), vec![4244]);
    assert_eq!(agent.terminations(), 1);
    let errors = read_state(&temp, "errors.log");
    assert_eq!(errors.matches("BLOCKING_PROCESS").count(), 1);
}

#[tokio::test]
async fn test_interrupt_terminates_agent() {
    let temp = TempDir::new().unwrap();
    let agent = MockAgent::new(vec![MockRun::default().hanging()]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut iteration_loop =
        IterationLoop::new(settings(&temp), agent.clone(), MockTracker::default(), MockVcs::new(), prompt());
    let reason = iteration_loop.run(cancel).await.unwrap();

    assert_eq!(reason, TerminationReason::Interrupted);
    assert_eq!(reason.exit_code(), 130);
    assert_eq!(agent.terminations(), 1);
    assert_eq!(agent.launch_count(), 1);
}

#[tokio::test]
async fn test_branch_checkpoints_and_pull_request() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    settings.branch = Some("wiggum/parser".into());
    settings.open_pr = true;
    let vcs = MockVcs::dirty();
    let agent = MockAgent::new(vec![MockRun::new([read_event("a.rs", 10)])]);

    let reason = run_loop(settings, &agent, &MockTracker::new([Some(0)]), &vcs).await;

    assert_eq!(reason, TerminationReason::Completed);
    assert_eq!(vcs.branches(), vec!["wiggum/parser"]);
    assert_eq!(vcs.checkpoints().len(), 2);
    let prs = vcs.pull_requests();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].0, "wiggum: wiggum/parser");
    assert!(read_state(&temp, "activity.log").contains("COMMIT wiggum: checkpoint"));
}

#[tokio::test]
async fn test_guardrails_reach_prompt() {
    let temp = TempDir::new().unwrap();
    let state_dir = temp.path().join(".wiggum");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("guardrails.md"), "- Never delete migrations\n").unwrap();
    let agent = MockAgent::new(Vec::new());

    run_loop(settings(&temp), &agent, &MockTracker::new([Some(0)]), &MockVcs::new()).await;

    assert!(agent.launches()[0].prompt.contains("Never delete migrations"));
}

#[tokio::test]
async fn test_run_logs_are_gitignored() {
    let temp = TempDir::new().unwrap();
    let agent = MockAgent::new(Vec::new());

    run_loop(settings(&temp), &agent, &MockTracker::new([Some(0)]), &MockVcs::new()).await;

    let ignore = read_state(&temp, ".gitignore");
    assert!(ignore.lines().any(|l| l == "activity.log"));
    assert!(ignore.lines().any(|l| l == "errors.log"));
}
