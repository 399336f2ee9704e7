//! End-to-end loop scenarios driven through the public API with scripted
//! agents and a real checklist tracker.

use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiggum_core::testing::{MockAgent, MockRun, MockVcs, assistant_event, read_event, shell_event};
use wiggum_core::tracker::ChecklistTracker;
use wiggum_core::{IterationLoop, LoopSettings, PromptBuilder, TerminationReason, WiggumConfig};

const CONFIG: &str = r#"
agent:
  model: tiny-model
loop:
  max_iterations: 3
  prompt: "Implement the checklist"
  echo_activity: false
  heartbeat_secs: 0
watchdog:
  enabled: false
budget:
  prompt_bytes: 0
  tiers:
    - name: tiny
      patterns: ["tiny"]
      warn: 500
      rotate: 1000
"#;

fn setup(tasks: &str) -> (TempDir, WiggumConfig) {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("TASKS.md"), tasks).unwrap();
    let config = WiggumConfig::parse_yaml(CONFIG).unwrap();
    config.validate().unwrap();
    (temp, config)
}

async fn run(root: &Path, config: &WiggumConfig, agent: &MockAgent) -> TerminationReason {
    let settings = LoopSettings::from_config(config, root);
    let prompt = PromptBuilder::new(
        config.base_prompt(root).unwrap(),
        &config.sentinels.complete,
        &config.sentinels.gutter,
    );
    let tracker = ChecklistTracker::new(root.join("TASKS.md"));
    let mut iteration_loop = IterationLoop::new(settings, agent.clone(), tracker, MockVcs::new(), prompt);
    iteration_loop.run(CancellationToken::new()).await.unwrap()
}

#[tokio::test]
async fn checked_off_checklist_completes_after_one_iteration() {
    let (temp, config) = setup("- [x] parse\n- [x] test\n");
    let agent = MockAgent::new(vec![MockRun::new([read_event("src/lib.rs", 100)])]);

    let reason = run(temp.path(), &config, &agent).await;

    assert_eq!(reason, TerminationReason::Completed);
    assert_eq!(agent.launch_count(), 1);
    assert!(agent.launches()[0].prompt.ends_with("Implement the checklist"));
}

#[tokio::test]
async fn open_items_override_complete_claims_until_exhausted() {
    let (temp, config) = setup("- [x] parse\n- [ ] test\n");
    let complete = assistant_event("All done! <wiggum>COMPLETE</wiggum>");
    let agent = MockAgent::new(vec![
        MockRun::new([complete.clone()]),
        MockRun::new([complete.clone()]),
        MockRun::new([complete]),
    ]);

    let reason = run(temp.path(), &config, &agent).await;

    assert_eq!(reason, TerminationReason::Exhausted);
    assert_eq!(reason.exit_code(), 2);
    assert_eq!(agent.launch_count(), 3);
}

#[tokio::test]
async fn configured_tier_drives_rotation() {
    let (temp, config) = setup("- [ ] parse\n");
    let agent = MockAgent::new(vec![
        MockRun::new([read_event("a.rs", 2_000), read_event("b.rs", 2_000), read_event("c.rs", 2_000)]),
        MockRun::new([shell_event("cargo test", 0, "ok")]),
    ]);

    let reason = run(temp.path(), &config, &agent).await;

    assert_eq!(reason, TerminationReason::Exhausted);
    let launches = agent.launches();
    assert!(launches[1].prompt.contains("ran out of context"));
    assert!(!launches[2].prompt.contains("ran out of context"));

    let activity = std::fs::read_to_string(temp.path().join(".wiggum/activity.log")).unwrap();
    assert!(activity.contains("READ a.rs"));
    assert!(activity.contains("READ b.rs"));
    assert!(!activity.contains("READ c.rs"));
    assert!(activity.contains("Iteration 1 ended by ROTATE"));
    assert!(activity.contains("Run ended: EXHAUSTED after 3 iteration(s)"));
}

#[tokio::test]
async fn gutter_sentinel_stops_run() {
    let (temp, config) = setup("- [ ] parse\n");
    let agent = MockAgent::new(vec![MockRun::new([
        assistant_event("I cannot resolve the linker error. <wiggum>GUT"),
        assistant_event("TER</wiggum>"),
    ])]);

    let reason = run(temp.path(), &config, &agent).await;

    assert_eq!(reason, TerminationReason::Guttered);
    assert_eq!(agent.launch_count(), 1);
    let errors = std::fs::read_to_string(temp.path().join(".wiggum/errors.log")).unwrap();
    assert!(errors.contains("AGENT_GUTTER"));
}
