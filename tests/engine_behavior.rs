//! Engine execution semantics: retries, failure propagation, prompts and
//! the two-level interrupt protocol.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use common::{context, minimal_cloud, mock_for};
use cou::catalog::ReleaseCatalog;
use cou::config::UpgradeGroup;
use cou::engine::{Engine, Prompter, RunOutcome};
use cou::juju::IdleScope;
use cou::steps::{Action, FailurePolicy, Step, StepState};

fn set_config_leaf(app: &str) -> Step {
    Step::leaf(
        format!("Change charm config of '{app}'"),
        Action::SetConfig {
            app: app.to_string(),
            key: "openstack-origin".to_string(),
            value: "cloud:focal-victoria".to_string(),
        },
    )
    .for_app(app)
}

fn wait_leaf(app: &str) -> Step {
    Step::leaf(
        format!("Wait for app '{app}' to reach the idle state"),
        Action::WaitIdle {
            scope: IdleScope::Application(app.to_string()),
            timeout: Duration::from_secs(30),
        },
    )
    .for_app(app)
}

struct ScriptedPrompter {
    answers: Mutex<Vec<bool>>,
    asked: AtomicUsize,
}

impl ScriptedPrompter {
    fn new(answers: Vec<bool>) -> ScriptedPrompter {
        ScriptedPrompter {
            answers: Mutex::new(answers),
            asked: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn confirm(&self, _description: &str) -> bool {
        self.asked.fetch_add(1, Ordering::Relaxed);
        let mut answers = self.answers.lock().unwrap();
        if answers.is_empty() {
            true
        } else {
            answers.remove(0)
        }
    }
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let mock =
        mock_for(minimal_cloud()).fail_transiently("set_config keystone openstack-origin=cloud:focal-victoria", 2);
    let catalog = ReleaseCatalog::load().unwrap();
    let ctx = context(UpgradeGroup::Whole);
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let mut plan = Step::group("root").with_children(vec![set_config_leaf("keystone")]);
    let outcome = engine.execute(&mut plan).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(plan.children[0].state, StepState::Done);
    assert_eq!(mock.call_count("set_config keystone"), 3);
}

#[tokio::test]
async fn retry_exhaustion_surfaces_the_failure() {
    let mock = mock_for(minimal_cloud())
        .fail_transiently("set_config keystone openstack-origin=cloud:focal-victoria", 99);
    let catalog = ReleaseCatalog::load().unwrap();
    let mut ctx = context(UpgradeGroup::Whole);
    ctx.settings.model_retries = 2;
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let mut plan = Step::group("root")
        .with_children(vec![set_config_leaf("keystone"), set_config_leaf("glance")]);
    let outcome = engine.execute(&mut plan).await;

    let RunOutcome::Failed(failure) = outcome else {
        panic!("expected a failure");
    };
    assert_eq!(failure.application.as_deref(), Some("keystone"));
    assert_eq!(failure.kind, "transient-connection");
    assert_eq!(failure.retries, 2);
    // the failing sibling aborts the rest of the sequence
    assert_eq!(plan.children[1].state, StepState::Cancelled);
    assert!(!mock.called("set_config glance"));
}

#[tokio::test]
async fn non_transient_failures_are_not_retried() {
    let mock = mock_for({
        let mut status = minimal_cloud();
        // keystone stays on ussuri, so the verification fails outright
        status
            .applications
            .get_mut("keystone")
            .unwrap()
            .units
            .get_mut("keystone/0")
            .unwrap()
            .workload_version = "17.0.1".to_string();
        status
    });
    let catalog = ReleaseCatalog::load().unwrap();
    let ctx = context(UpgradeGroup::Whole);
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let mut plan = Step::group("root").with_children(vec![Step::leaf(
        "Check if the workload of 'keystone' has been upgraded",
        Action::VerifyWorkload {
            app: "keystone".to_string(),
            charm: "keystone".to_string(),
            units: None,
            target: cou::catalog::OpenStackRelease::Victoria,
        },
    )
    .for_app("keystone")]);
    let outcome = engine.execute(&mut plan).await;

    let RunOutcome::Failed(failure) = outcome else {
        panic!("expected a failure");
    };
    assert_eq!(failure.retries, 0);
    assert_eq!(failure.kind, "unit-error");
    assert!(failure.message.contains("keystone/0"));
    assert_eq!(mock.call_count("status"), 1);
}

#[tokio::test]
async fn parallel_siblings_are_not_preempted_by_a_failure() {
    let mock = mock_for(minimal_cloud())
        .fail_transiently("refresh_charm keystone", 99)
        .with_wait_delay(Duration::from_millis(50));
    let catalog = ReleaseCatalog::load().unwrap();
    let mut ctx = context(UpgradeGroup::Whole);
    ctx.settings.model_retries = 0;
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let mut group = Step::parallel_group("both at once");
    group.add(Step::leaf(
        "Refresh 'keystone'",
        Action::RefreshCharm {
            app: "keystone".to_string(),
        },
    ));
    group.add(wait_leaf("glance"));
    let mut plan = Step::group("root").with_children(vec![group]);

    let outcome = engine.execute(&mut plan).await;

    assert!(matches!(outcome, RunOutcome::Failed(_)));
    // the slow sibling still ran to completion
    assert_eq!(plan.children[0].children[1].state, StepState::Done);
    assert!(mock.called("wait_for_idle glance"));
}

#[tokio::test]
async fn record_and_continue_keeps_the_sequence_going() {
    let mock = mock_for(minimal_cloud()).fail_transiently("refresh_charm keystone", 99);
    let catalog = ReleaseCatalog::load().unwrap();
    let mut ctx = context(UpgradeGroup::Whole);
    ctx.settings.model_retries = 0;
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let failing = Step::leaf(
        "Refresh 'keystone'",
        Action::RefreshCharm {
            app: "keystone".to_string(),
        },
    )
    .on_fail(FailurePolicy::RecordAndContinue);
    let mut plan = Step::group("root").with_children(vec![failing, set_config_leaf("glance")]);

    let outcome = engine.execute(&mut plan).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(plan.children[0].state, StepState::Failed);
    assert!(plan.children[0].failure.is_some());
    assert_eq!(plan.children[1].state, StepState::Done);
    assert!(mock.called("set_config glance"));
}

#[tokio::test]
async fn skip_remaining_stops_without_failing_the_parent() {
    let mock = mock_for(minimal_cloud()).fail_transiently("refresh_charm keystone", 99);
    let catalog = ReleaseCatalog::load().unwrap();
    let mut ctx = context(UpgradeGroup::Whole);
    ctx.settings.model_retries = 0;
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let failing = Step::leaf(
        "Refresh 'keystone'",
        Action::RefreshCharm {
            app: "keystone".to_string(),
        },
    )
    .on_fail(FailurePolicy::SkipRemaining);
    let mut plan = Step::group("root").with_children(vec![failing, set_config_leaf("glance")]);

    let outcome = engine.execute(&mut plan).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(plan.children[1].state, StepState::Cancelled);
    assert!(!mock.called("set_config glance"));
}

#[tokio::test]
async fn s5_first_signal_finishes_running_leaves_and_starts_nothing_new() {
    let mock = mock_for(minimal_cloud()).with_wait_delay(Duration::from_millis(200));
    let catalog = ReleaseCatalog::load().unwrap();
    let ctx = context(UpgradeGroup::Whole);
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let keystone = Step::group("Upgrade plan for 'keystone' to 'victoria'")
        .with_children(vec![wait_leaf("keystone")]);
    let ldap = Step::group("Upgrade plan for 'keystone-ldap' to 'victoria'")
        .with_children(vec![set_config_leaf("keystone-ldap")]);
    let mut plan = Step::group("root").with_children(vec![keystone, ldap]);

    let (soft, _hard) = engine.cancellation_tokens();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        soft.cancel();
    });

    let outcome = engine.execute(&mut plan).await;

    assert_eq!(outcome, RunOutcome::CancelledSafely);
    // the running wait completed
    assert_eq!(plan.children[0].children[0].state, StepState::Done);
    // the next application never started
    assert_eq!(plan.children[1].state, StepState::Cancelled);
    assert!(!mock.called("set_config keystone-ldap"));
}

#[tokio::test]
async fn second_signal_abandons_running_leaves() {
    let mock = mock_for(minimal_cloud()).with_wait_delay(Duration::from_secs(30));
    let catalog = ReleaseCatalog::load().unwrap();
    let ctx = context(UpgradeGroup::Whole);
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let mut plan = Step::group("root").with_children(vec![wait_leaf("keystone")]);

    let (soft, hard) = engine.cancellation_tokens();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        soft.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        hard.cancel();
    });

    let started = Instant::now();
    let outcome = engine.execute(&mut plan).await;

    assert_eq!(outcome, RunOutcome::Aborted);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(plan.children[0].state, StepState::Aborted);
}

#[tokio::test]
async fn signal_before_execution_terminates_immediately() {
    let mock = mock_for(minimal_cloud());
    let catalog = ReleaseCatalog::load().unwrap();
    let ctx = context(UpgradeGroup::Whole);
    let engine = Engine::new(&mock, &catalog, &ctx, false);

    let (soft, _hard) = engine.cancellation_tokens();
    soft.cancel();

    let mut plan = Step::group("root").with_children(vec![set_config_leaf("keystone")]);
    let outcome = engine.execute(&mut plan).await;

    assert_eq!(outcome, RunOutcome::CancelledSafely);
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn declined_prompt_soft_cancels_the_rest() {
    let mock = mock_for(minimal_cloud());
    let catalog = ReleaseCatalog::load().unwrap();
    let ctx = context(UpgradeGroup::Whole);
    let prompter = ScriptedPrompter::new(vec![true, false]);
    let engine =
        Engine::new(&mock, &catalog, &ctx, true).with_prompter(Box::new(prompter));

    let first = Step::group("Upgrade plan for 'keystone' to 'victoria'")
        .prompted()
        .with_children(vec![set_config_leaf("keystone")]);
    let second = Step::group("Upgrade plan for 'glance' to 'victoria'")
        .prompted()
        .with_children(vec![set_config_leaf("glance")]);
    let third = Step::group("Upgrade plan for 'cinder' to 'victoria'")
        .prompted()
        .with_children(vec![set_config_leaf("cinder")]);
    let mut plan = Step::group("root").with_children(vec![first, second, third]);

    let outcome = engine.execute(&mut plan).await;

    assert_eq!(outcome, RunOutcome::CancelledSafely);
    assert!(mock.called("set_config keystone"));
    assert!(!mock.called("set_config glance"));
    // the third subtree is cancelled without even prompting
    assert!(!mock.called("set_config cinder"));
    assert_eq!(plan.children[2].state, StepState::Cancelled);
}

#[tokio::test]
async fn auto_approve_never_prompts() {
    let mock = mock_for(minimal_cloud());
    let catalog = ReleaseCatalog::load().unwrap();
    let ctx = context(UpgradeGroup::Whole);
    // a prompter that would decline, if it were ever consulted
    let prompter = ScriptedPrompter::new(vec![false]);
    let engine = Engine::new(&mock, &catalog, &ctx, false).with_prompter(Box::new(prompter));

    let gated = Step::group("Upgrade plan for 'keystone' to 'victoria'")
        .prompted()
        .with_children(vec![set_config_leaf("keystone")]);
    let mut plan = Step::group("root").with_children(vec![gated]);

    let outcome = engine.execute(&mut plan).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(mock.called("set_config keystone"));
}
