use super::testing::{answer_event, FakeSwitch};
use super::*;
use crate::config::{GateConfig, HandoffMode};
use callgate_core::{CallId, SessionId};
use callgate_esl::{CommandTimeouts, HangupMeta, LinkEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const TARGET: &str = "sip:agent@voice.example.com";

fn gate(fake: &Arc<FakeSwitch>) -> GateOrchestrator {
    gate_with(fake, GateConfig::default())
}

fn gate_with(fake: &Arc<FakeSwitch>, mut config: GateConfig) -> GateOrchestrator {
    if config.handoff.target_uri.is_none() {
        config.handoff.target_uri = Some(TARGET.to_string());
    }
    GateOrchestrator::new(
        fake.clone(),
        "evertel",
        "playback(silence_stream://-1)",
        config,
        CommandTimeouts::new(Duration::from_millis(500)),
    )
}

fn scripted_answer(fake: &FakeSwitch, getvar: &str) {
    fake.reply("originate", "+OK abc-123\n");
    fake.reply("uuid_getvar", getvar);
    fake.reply("uuid_setvar", "+OK");
    fake.reply("uuid_transfer", "+OK");
    fake.reply("uuid_broadcast", "+OK Message sent");
    fake.answer_on_originate("abc-123");
}

fn with_session(id: &str) -> GateOptions {
    GateOptions {
        session_id: Some(SessionId::new(id)),
        ..Default::default()
    }
}

async fn wait_for_command(fake: &FakeSwitch, command: &str) -> Vec<String> {
    for _ in 0..100 {
        let issued = fake.issued(command);
        if !issued.is_empty() {
            return issued;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Vec::new()
}

#[tokio::test]
async fn test_answer_hands_off_to_agent() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");

    let result = gate(&fake).run("+15550100", with_session("sess-9")).await;

    assert_eq!(result.status, GateStatus::Answered);
    assert_eq!(result.phase, CallPhase::Active);
    assert_eq!(result.call_id(), Some(&CallId::new("abc-123")));
    assert!(result.meta.saw_answer_event);
    assert_eq!(result.meta.session_id, Some(SessionId::new("sess-9")));
    assert!(result.reason.is_none());

    let originate = &fake.issued("originate")[0];
    assert!(originate.starts_with("{bypass_media=false,ignore_early_media=true,originate_timeout=12,"));
    assert!(originate.contains("origination_export_vars=callgateway_session_id"));
    assert!(originate.contains("callgateway_session_id=sess-9"));
    assert!(originate.ends_with("}sofia/gateway/evertel/+15550100 &playback(silence_stream://-1)"));

    assert_eq!(
        fake.issued("uuid_setvar"),
        vec![
            "abc-123 effective_caller_id_number abc-123".to_string(),
            "abc-123 effective_caller_id_name CGW".to_string(),
        ]
    );
    assert_eq!(
        fake.issued("uuid_transfer"),
        vec![format!("abc-123 'bridge:{{sip_h_X-Session-Id=sess-9}}{}' inline", TARGET)]
    );
    assert!(fake.issued("uuid_kill").is_empty());

    result.monitor.unwrap().abort();
}

#[tokio::test]
async fn test_stored_session_id_wins() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "sess-stored\n");

    let result = gate(&fake).run("+15550100", with_session("sess-inline")).await;

    assert_eq!(result.status, GateStatus::Answered);
    assert_eq!(result.meta.session_id, Some(SessionId::new("sess-stored")));
    assert!(fake.issued("uuid_transfer")[0].contains("sip_h_X-Session-Id=sess-stored"));
    result.monitor.unwrap().abort();
}

#[tokio::test]
async fn test_missing_session_leaves_call_up() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");

    let result = gate(&fake).run("+15550100", GateOptions::default()).await;

    assert_eq!(result.status, GateStatus::Error);
    assert_eq!(result.phase, CallPhase::Error);
    assert_eq!(result.reason.as_deref(), Some("handoff_failed: missing session id"));
    assert!(fake.issued("uuid_transfer").is_empty());
    assert!(fake.issued("uuid_kill").is_empty());
    // the live call is still watched
    let monitor = result.monitor.unwrap();
    assert_eq!(monitor.call_id(), &CallId::new("abc-123"));
    monitor.abort();
}

#[tokio::test]
async fn test_refused_transfer_is_handoff_failure() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");
    fake.reply("uuid_transfer", "-ERR No such channel!");

    let result = gate(&fake).run("+15550100", with_session("sess-9")).await;

    assert_eq!(result.status, GateStatus::Error);
    assert_eq!(
        result.reason.as_deref(),
        Some("handoff_failed: -ERR No such channel!")
    );
    assert!(fake.issued("uuid_kill").is_empty());
    result.monitor.unwrap().abort();
}

#[tokio::test]
async fn test_broadcast_handoff_needs_no_session() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");
    let mut config = GateConfig::default();
    config.handoff.mode = HandoffMode::Broadcast;
    config.handoff.media = Some("playback(/var/prompts/hello.wav)".to_string());

    let result = gate_with(&fake, config).run("+15550100", GateOptions::default()).await;

    assert_eq!(result.status, GateStatus::Answered);
    assert_eq!(
        fake.issued("uuid_broadcast"),
        vec!["abc-123 playback(/var/prompts/hello.wav) aleg".to_string()]
    );
    assert!(fake.issued("uuid_transfer").is_empty());
    result.monitor.unwrap().abort();
}

#[tokio::test]
async fn test_originate_no_answer_skips_wait() {
    let fake = FakeSwitch::new();
    fake.reply("originate", "-ERR NO_ANSWER");

    let result = gate(&fake).run("+15550100", GateOptions::default()).await;

    assert_eq!(result.status, GateStatus::NoAnswer);
    assert_eq!(result.phase, CallPhase::NoAnswer);
    assert_eq!(result.reason.as_deref(), Some("originate_no_answer"));
    assert!(result.call_id().is_none());
    assert!(result.monitor.is_none());
    assert_eq!(fake.commands().len(), 1);
    assert_eq!(fake.subscriber_count(), 0);
}

#[tokio::test]
async fn test_originate_busy() {
    let fake = FakeSwitch::new();
    fake.reply("originate", "-ERR USER_BUSY\n");

    let result = gate(&fake).run("+15550100", GateOptions::default()).await;

    assert_eq!(result.status, GateStatus::Busy);
    assert_eq!(result.phase, CallPhase::Rejected);
    assert_eq!(result.reason.as_deref(), Some("-ERR USER_BUSY"));
}

#[tokio::test]
async fn test_originate_other_failure() {
    let fake = FakeSwitch::new();
    fake.reply("originate", "-ERR DESTINATION_OUT_OF_ORDER");

    let result = gate(&fake).run("+15550100", GateOptions::default()).await;

    assert_eq!(result.status, GateStatus::Error);
    assert_eq!(
        result.reason.as_deref(),
        Some("originate_failed: -ERR DESTINATION_OUT_OF_ORDER")
    );
}

#[tokio::test(start_paused = true)]
async fn test_ring_timeout_kills_channel() {
    let fake = FakeSwitch::new();
    fake.reply("originate", "+OK abc-123");
    fake.reply("uuid_kill", "+OK");

    let options = GateOptions {
        ring_timeout_secs: Some(1),
        ..Default::default()
    };
    let result = gate(&fake).run("+15550100", options).await;

    assert_eq!(result.status, GateStatus::NoAnswer);
    assert_eq!(result.phase, CallPhase::TimedOut);
    assert_eq!(result.reason.as_deref(), Some("no_answer_timeout"));
    // ring budget plus the answer margin
    assert!(result.elapsed >= Duration::from_secs(3));
    assert!(fake.issued("originate")[0].contains("originate_timeout=1"));
    assert!(result.monitor.is_none());

    assert_eq!(wait_for_command(&fake, "uuid_kill").await, vec!["abc-123".to_string()]);
    assert_eq!(fake.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cleanup_does_not_change_outcome() {
    let fake = FakeSwitch::new();
    fake.reply("originate", "+OK abc-123");
    fake.reply("uuid_kill", "-ERR No such channel!");

    let options = GateOptions {
        answer_timeout: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    let result = gate(&fake).run("+15550100", options).await;

    assert_eq!(result.reason.as_deref(), Some("no_answer_timeout"));
    assert_eq!(wait_for_command(&fake, "uuid_kill").await.len(), 1);
}

#[tokio::test]
async fn test_hangup_before_answer() {
    let fake = FakeSwitch::new();
    fake.reply("originate", "+OK abc-123");
    fake.hangup_on_originate(
        "abc-123",
        HangupMeta {
            hangup_cause: Some("NO_USER_RESPONSE".to_string()),
            sip_term_status: Some("480".to_string()),
            ..Default::default()
        },
    );

    let result = gate(&fake).run("+15550100", GateOptions::default()).await;

    assert_eq!(result.status, GateStatus::NoAnswer);
    assert_eq!(result.phase, CallPhase::NoAnswer);
    assert_eq!(result.reason.as_deref(), Some("hangup_before_answer"));
    assert!(!result.meta.saw_answer_event);
    assert_eq!(result.meta.hangup.hangup_cause.as_deref(), Some("NO_USER_RESPONSE"));
    assert_eq!(result.meta.hangup.sip_term_status.as_deref(), Some("480"));
    assert!(fake.issued("uuid_kill").is_empty());
}

#[tokio::test]
async fn test_disconnect_while_ringing_is_wait_exception() {
    let fake = FakeSwitch::new();
    fake.reply("originate", "+OK abc-123");
    fake.disconnect_on_originate("connection reset");

    let result = gate(&fake).run("+15550100", GateOptions::default()).await;

    assert_eq!(result.status, GateStatus::NoAnswer);
    assert_eq!(result.reason.as_deref(), Some("hangup_before_answer"));
    assert_eq!(result.meta.hangup.hangup_cause.as_deref(), Some("WAIT_EXCEPTION"));
    assert_eq!(fake.subscriber_count(), 0);
}

#[tokio::test]
async fn test_monitor_resolves_on_hangup() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");

    let mut result = gate(&fake).run("+15550100", with_session("sess-9")).await;
    let monitor = result.monitor.take().unwrap();
    // ring correlation is gone, only the monitor listens
    assert_eq!(fake.subscriber_count(), 1);

    fake.hangup("someone-else", HangupMeta::with_cause("NORMAL_CLEARING"));
    fake.hangup(
        "abc-123",
        HangupMeta {
            hangup_cause: Some("NORMAL_CLEARING".to_string()),
            billsec: Some("42".to_string()),
            ..Default::default()
        },
    );

    let ended = monitor.wait().await;
    assert_eq!(ended.outcome, Outcome::Hangup);
    assert_eq!(ended.call_id, CallId::new("abc-123"));
    assert_eq!(ended.meta.unwrap().billsec.as_deref(), Some("42"));
    assert_eq!(fake.subscriber_count(), 0);
}

#[tokio::test]
async fn test_answer_then_hangup_resolve_separately() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");
    fake.hangup_on_originate("abc-123", HangupMeta::with_cause("ORIGINATOR_CANCEL"));

    let result = gate(&fake).run("+15550100", with_session("sess-9")).await;
    assert_eq!(result.status, GateStatus::Answered);

    let ended = result.monitor.unwrap().wait().await;
    assert_eq!(ended.outcome, Outcome::Hangup);
    assert!(ended.saw_answer);
    assert_eq!(
        ended.meta.unwrap().hangup_cause.as_deref(),
        Some("ORIGINATOR_CANCEL")
    );
}

#[tokio::test(start_paused = true)]
async fn test_monitor_times_out() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");

    let options = GateOptions {
        in_call_timeout: Some(Duration::from_secs(5)),
        ..with_session("sess-9")
    };
    let result = gate(&fake).run("+15550100", options).await;

    let ended = result.monitor.unwrap().wait().await;
    assert_eq!(ended.outcome, Outcome::Timeout);
    assert!(ended.meta.is_none());
    assert_eq!(fake.subscriber_count(), 0);
}

#[tokio::test]
async fn test_aborted_monitor_reads_as_wait_exception() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");

    let result = gate(&fake).run("+15550100", with_session("sess-9")).await;
    let monitor = result.monitor.unwrap();
    monitor.abort();

    let ended = monitor.wait().await;
    assert_eq!(ended.outcome, Outcome::Hangup);
    assert_eq!(
        ended.meta.unwrap().hangup_cause.as_deref(),
        Some(correlator::WAIT_EXCEPTION_CAUSE)
    );
}

#[tokio::test]
async fn test_correlator_skips_lag_and_foreign_events() {
    let (tx, rx) = broadcast::channel(2);
    let call_id = CallId::new("abc-123");

    for other in ["o-1", "o-2", "o-3"] {
        tx.send(answer_event(other)).unwrap();
    }
    tx.send(answer_event("abc-123")).unwrap();

    let result = tokio_test::assert_ok!(
        await_outcome(rx, &call_id, Duration::from_secs(1), MatchSet::RING).await
    );
    assert_eq!(result.outcome, Outcome::Answered);
    assert!(result.saw_answer);
    assert_eq!(tx.receiver_count(), 0);
}

#[tokio::test]
async fn test_correlator_hangup_set_ignores_answer() {
    let (tx, rx) = broadcast::channel(8);
    let call_id = CallId::new("abc-123");
    tx.send(answer_event("abc-123")).unwrap();
    tx.send(LinkEvent::Disconnected {
        reason: "eof".to_string(),
    })
    .unwrap();

    let err = await_outcome(rx, &call_id, Duration::from_secs(1), MatchSet::HANGUP)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::WaitException(reason) if reason == "eof"));
}

#[tokio::test]
async fn test_unsafe_destination_never_reaches_switch() {
    let fake = FakeSwitch::new();
    fake.reply("originate", "+OK abc-123");

    let result = gate(&fake)
        .run("100 &bridge(sofia/gateway/evertel/+19005550000)", GateOptions::default())
        .await;

    assert_eq!(result.status, GateStatus::Error);
    assert!(result
        .reason
        .as_deref()
        .unwrap()
        .starts_with("originate_failed: protocol error: invalid destination"));
    assert!(fake.commands().is_empty());
    assert_eq!(fake.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_originate_timeout_is_error() {
    let fake = FakeSwitch::new();
    fake.stall("originate");

    let result = gate(&fake).run("+15550100", GateOptions::default()).await;

    assert_eq!(result.status, GateStatus::Error);
    assert_eq!(result.phase, CallPhase::Error);
    assert_eq!(
        result.reason.as_deref(),
        Some("originate_failed: api timeout: originate")
    );
    assert!(result.monitor.is_none());
    assert!(fake.issued("uuid_kill").is_empty());
    assert_eq!(fake.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handoff_timeouts_leave_call_up() {
    for stalled in ["uuid_setvar", "uuid_transfer"] {
        let fake = FakeSwitch::new();
        scripted_answer(&fake, "_undef_");
        fake.stall(stalled);

        let result = gate(&fake).run("+15550100", with_session("sess-9")).await;

        assert_eq!(result.status, GateStatus::Error);
        assert_eq!(result.phase, CallPhase::Error);
        assert_eq!(
            result.reason,
            Some(format!("handoff_failed: api timeout: {}", stalled))
        );
        assert!(fake.issued("uuid_kill").is_empty());

        let monitor = result.monitor.unwrap();
        assert_eq!(monitor.call_id(), &CallId::new("abc-123"));
        assert_eq!(fake.subscriber_count(), 1);
        monitor.abort();
    }
}

#[tokio::test]
async fn test_link_loss_ends_monitor_with_wait_exception() {
    let fake = FakeSwitch::new();
    scripted_answer(&fake, "_undef_");

    let mut result = gate(&fake).run("+15550100", with_session("sess-9")).await;
    let monitor = result.monitor.take().unwrap();

    fake.disconnect("connection reset");

    let ended = monitor.wait().await;
    assert_eq!(ended.outcome, Outcome::Hangup);
    assert_eq!(
        ended.meta.unwrap().hangup_cause.as_deref(),
        Some(correlator::WAIT_EXCEPTION_CAUSE)
    );
    assert_eq!(fake.subscriber_count(), 0);
}
