//! Session lifecycle tests against mock providers
//!
//! These drive the orchestrator the way the chat widget does (mount, resolve,
//! start, mute, stop) and check the resulting state and provider traffic.

mod common;

use common::{MockBackend, MockMicrophone, MountBuilder};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use voice_concierge::provider::{BackendControl, BackendMessage, FunctionOutput, TurnDetection};
use voice_concierge::{
    ConciergeError, ErrorKind, ProviderKind, SessionEvent, SessionStatus, VadMode, VoiceGate,
};

#[tokio::test]
async fn test_default_launch_arms_openai_with_server_vad() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();

    assert_eq!(mount.orchestrator.armed_kind(), Some(ProviderKind::OpenAi));
    assert!(mount.orchestrator.launch().vad.is_mode_a());
    assert!(!mount.orchestrator.launch().vad.use_client_vad);

    mount.orchestrator.start().await.unwrap();
    let snapshot = mount.orchestrator.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Listening);
    assert_eq!(snapshot.active_provider, Some(ProviderKind::OpenAi));
    assert_eq!(snapshot.vad_mode, Some(VadMode::Server));

    let configs = backend.configs.lock().clone();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].turn_detection, TurnDetection::Server);
    assert!(configs[0].tools_enabled);
    assert_eq!(mount.gemini.connect_count(), 0);
}

#[tokio::test]
async fn test_mode_b_forces_client_vad() {
    let mount = MountBuilder::new("rtmode=b&vad=0").build();
    let backend = mount.ready();

    let vad = &mount.orchestrator.launch().vad;
    assert!(vad.use_client_vad);
    assert!(!vad.is_mode_a());

    mount.orchestrator.start().await.unwrap();
    assert_eq!(mount.orchestrator.snapshot().vad_mode, Some(VadMode::Client));
    assert_eq!(backend.configs.lock()[0].turn_detection, TurnDetection::Manual);
}

#[tokio::test]
async fn test_push_to_talk_marks_turns_in_client_mode() {
    let mount = MountBuilder::new("rtmode=b").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    mount.orchestrator.push_to_talk(true).unwrap();
    mount.orchestrator.push_to_talk(true).unwrap();
    mount.orchestrator.push_to_talk(false).unwrap();

    assert_eq!(
        *backend.controls.lock(),
        vec![BackendControl::CommitInput, BackendControl::RequestResponse]
    );
}

#[tokio::test]
async fn test_push_to_talk_uses_activity_markers_for_gemini() {
    let mount = MountBuilder::new("provider=gemini&rtmode=b").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    mount.orchestrator.push_to_talk(true).unwrap();
    mount.orchestrator.push_to_talk(false).unwrap();

    assert_eq!(
        *backend.controls.lock(),
        vec![BackendControl::ActivityStart, BackendControl::ActivityEnd]
    );
}

#[tokio::test]
async fn test_push_to_talk_ignored_with_server_vad() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    mount.orchestrator.push_to_talk(true).unwrap();
    mount.orchestrator.push_to_talk(false).unwrap();
    assert!(backend.controls.lock().is_empty());
}

#[tokio::test]
async fn test_concurrent_starts_open_one_connection() {
    let backend = MockBackend::new().with_connect_delay(Duration::from_millis(50));
    let mount = MountBuilder::new("").openai(backend.clone()).build();
    mount.ready();

    let orchestrator = &mount.orchestrator;
    let (a, b, c) = tokio::join!(orchestrator.start(), orchestrator.start(), orchestrator.start());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    // Further starts while listening are no-ops too
    orchestrator.start().await.unwrap();
    orchestrator.start().await.unwrap();

    assert_eq!(backend.connect_count(), 1);
    assert_eq!(mount.microphone.acquires.load(Ordering::SeqCst), 1);
    assert!(orchestrator.is_listening());
}

#[tokio::test]
async fn test_start_before_selection_is_rejected() {
    let mount = MountBuilder::new("provider=gemini").build();
    mount.orchestrator.mount();

    let err = mount.orchestrator.start().await.unwrap_err();
    assert!(matches!(err, ConciergeError::SelectionPending));
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);
    assert_eq!(mount.armed_count(), 0);
    assert_eq!(mount.openai.connect_count() + mount.gemini.connect_count(), 0);
}

#[tokio::test]
async fn test_failed_arming_keeps_selection_open() {
    let mount = MountBuilder::new("provider=gemini").without_gemini().build();
    mount.orchestrator.mount();

    for _ in 0..2 {
        let err = mount.orchestrator.resolve_provider().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
    assert_eq!(mount.orchestrator.armed_kind(), None);
    assert_eq!(mount.armed_count(), 0);

    // start reports why instead of waiting for a selection forever
    let err = mount.orchestrator.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);
    assert_eq!(mount.openai.connect_count(), 0);
}

#[tokio::test]
async fn test_exactly_one_provider_armed_for_every_selection() {
    let cases = [
        ("", ProviderKind::OpenAi),
        ("provider=openai", ProviderKind::OpenAi),
        ("provider=gemini", ProviderKind::Gemini),
        ("provider=Google", ProviderKind::Gemini),
        ("provider=b", ProviderKind::Gemini),
        ("provider=something-else", ProviderKind::OpenAi),
    ];

    for (query, expected) in cases {
        let mount = MountBuilder::new(query).build();
        mount.orchestrator.mount();
        assert_eq!(mount.armed_count(), 0, "nothing armed before resolution ({})", query);

        assert_eq!(mount.orchestrator.resolve_provider().unwrap(), expected);
        // A second resolution keeps the first provider
        assert_eq!(mount.orchestrator.resolve_provider().unwrap(), expected);

        assert_eq!(mount.armed_count(), 1, "exactly one armed ({})", query);
        assert_eq!(mount.orchestrator.armed_kind(), Some(expected));

        mount.orchestrator.start().await.unwrap();
        let (used, unused) = match expected {
            ProviderKind::OpenAi => (&mount.openai, &mount.gemini),
            ProviderKind::Gemini => (&mount.gemini, &mount.openai),
        };
        assert_eq!(used.connect_count(), 1);
        assert_eq!(unused.connect_count(), 0);
        mount.orchestrator.unmount().await;
    }
}

#[tokio::test]
async fn test_stop_always_reaches_idle() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    mount.microphone.fail_release.store(true, Ordering::SeqCst);
    mount.output.fail_release.store(true, Ordering::SeqCst);
    mount.orchestrator.stop().await;

    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);
    // The connection is closed even though both releases failed
    assert_eq!(backend.disconnect_count(), 1);
    assert_eq!(mount.output.releases.load(Ordering::SeqCst), 1);
    assert!(!mount.microphone.is_open());

    // Stopping again is harmless
    mount.orchestrator.stop().await;
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn test_stop_from_muted_and_error_states() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();

    mount.orchestrator.start().await.unwrap();
    mount.orchestrator.toggle_mute();
    assert_eq!(mount.orchestrator.status(), SessionStatus::Muted);
    mount.orchestrator.stop().await;
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);

    backend.fail_connect.store(true, Ordering::SeqCst);
    assert!(mount.orchestrator.start().await.is_err());
    assert_eq!(mount.orchestrator.status(), SessionStatus::Error);
    mount.orchestrator.stop().await;
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);
    assert_eq!(mount.orchestrator.snapshot().last_error, None);
}

#[tokio::test]
async fn test_stop_during_initializing_releases_late_connection() {
    let backend = MockBackend::new().with_connect_delay(Duration::from_millis(50));
    let mount = MountBuilder::new("").openai(backend.clone()).build();
    mount.ready();

    let orchestrator = mount.orchestrator.clone();
    let start = tokio::spawn(async move { orchestrator.start().await });
    assert!(
        mount
            .eventually(|| mount.orchestrator.status() == SessionStatus::Initializing)
            .await
    );

    mount.orchestrator.stop().await;
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);

    start.await.unwrap().unwrap();
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);
    assert!(!mount.microphone.is_open());
    assert!(backend.disconnect_count() >= 2);
}

#[tokio::test]
async fn test_restart_after_stop_during_initializing() {
    let backend = MockBackend::new().with_connect_delay(Duration::from_millis(100));
    let mount = MountBuilder::new("").openai(backend.clone()).build();
    mount.ready();

    let orchestrator = mount.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.start().await });
    assert!(
        mount
            .eventually(|| mount.orchestrator.status() == SessionStatus::Initializing)
            .await
    );

    mount.orchestrator.stop().await;
    mount.orchestrator.start().await.unwrap();
    first.await.unwrap().unwrap();

    assert!(mount.orchestrator.is_listening());
    assert_eq!(backend.connect_count(), 2);
    assert!(mount.microphone.is_open());

    // Nothing from the abandoned attempt may fail the new session
    tokio::time::sleep(Duration::from_millis(150)).await;
    while let Some(event) = mount.handle.try_recv_event() {
        assert!(
            !matches!(
                event,
                SessionEvent::Notice { .. } | SessionEvent::StateChanged(SessionStatus::Error)
            ),
            "unexpected event {:?}",
            event
        );
    }
    assert!(mount.orchestrator.is_listening());

    backend.emit(BackendMessage::Transcript("hello again".into()));
    assert!(mount
        .wait_for(|e| matches!(e, SessionEvent::Transcript(_)))
        .await
        .is_some());
}

#[tokio::test]
async fn test_mute_keeps_connection_and_transcripts_flow() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    assert_eq!(mount.orchestrator.toggle_mute(), Some(true));
    assert!(mount.orchestrator.is_muted());

    // Captured audio is gated while muted
    mount.microphone.push_frame(vec![0.0; 320]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(backend.audio_frames.load(Ordering::SeqCst), 0);

    assert_eq!(mount.orchestrator.toggle_mute(), Some(false));
    assert!(mount.orchestrator.is_listening());
    assert_eq!(backend.disconnect_count(), 0);
    assert_eq!(backend.connect_count(), 1);

    backend.emit(BackendMessage::Transcript("three bedrooms near the park".into()));
    let event = mount
        .wait_for(|e| matches!(e, SessionEvent::Transcript(_)))
        .await
        .expect("transcript after unmute");
    match event {
        SessionEvent::Transcript(t) => assert_eq!(t.text, "three bedrooms near the park"),
        _ => unreachable!(),
    }

    mount.microphone.push_frame(vec![0.0; 320]);
    assert!(
        mount
            .eventually(|| backend.audio_frames.load(Ordering::SeqCst) == 1)
            .await
    );
}

#[tokio::test]
async fn test_transcripts_delivered_in_order() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    for text in ["one", "two", "three"] {
        backend.emit(BackendMessage::Transcript(text.into()));
    }

    let mut seen = Vec::new();
    while seen.len() < 3 {
        match mount.wait_for(|e| matches!(e, SessionEvent::Transcript(_))).await {
            Some(SessionEvent::Transcript(t)) => seen.push(t.text),
            _ => break,
        }
    }
    assert_eq!(seen, vec!["one", "two", "three"]);
    assert_eq!(mount.orchestrator.snapshot().transcript_count, 3);
}

#[tokio::test]
async fn test_function_call_round_trip() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    backend.emit(BackendMessage::FunctionCall {
        call_id: "call-1".into(),
        name: "search_properties".into(),
        arguments: json!({ "city": "Lisbon", "bedrooms": 2 }),
    });

    let event = mount
        .wait_for(|e| matches!(e, SessionEvent::FunctionResult { .. }))
        .await
        .expect("function result");
    match event {
        SessionEvent::FunctionResult { name, result } => {
            assert_eq!(name, "search_properties");
            assert_eq!(result.data["results"][0]["city"], "Lisbon");
        }
        _ => unreachable!(),
    }

    let calls = mount.search.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args["bedrooms"], 2);

    let outputs = backend.outputs.lock().clone();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, "call-1");
    assert!(matches!(outputs[0].1, FunctionOutput::Success(_)));
}

#[tokio::test]
async fn test_slow_search_does_not_stall_capture() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();
    *mount.search.delay.lock() = Some(Duration::from_millis(500));

    backend.emit(BackendMessage::FunctionCall {
        call_id: "call-slow".into(),
        name: "search_properties".into(),
        arguments: json!({ "city": "Porto" }),
    });
    assert!(mount.eventually(|| mount.search.calls.lock().len() == 1).await);

    // Audio and transcripts keep flowing while the search runs
    mount.microphone.push_frame(vec![0.0; 320]);
    backend.emit(BackendMessage::Transcript("with a garden please".into()));
    assert!(
        mount
            .eventually(|| backend.audio_frames.load(Ordering::SeqCst) == 1)
            .await
    );
    assert!(mount
        .wait_for(|e| matches!(e, SessionEvent::Transcript(_)))
        .await
        .is_some());
    assert_eq!(mount.search.finished_count(), 0);
    assert!(backend.outputs.lock().is_empty());

    assert!(mount
        .wait_for(|e| matches!(e, SessionEvent::FunctionResult { .. }))
        .await
        .is_some());
    assert_eq!(backend.outputs.lock()[0].0, "call-slow");
    assert!(mount.orchestrator.is_listening());
}

#[tokio::test]
async fn test_dispatch_failure_keeps_session_live() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();
    mount.search.fail.store(true, Ordering::SeqCst);

    backend.emit(BackendMessage::FunctionCall {
        call_id: "call-2".into(),
        name: "search_properties".into(),
        arguments: json!({}),
    });

    let event = mount
        .wait_for(|e| matches!(e, SessionEvent::Notice { .. }))
        .await
        .expect("dispatch notice");
    match event {
        SessionEvent::Notice { kind, persistent, .. } => {
            assert_eq!(kind, ErrorKind::DispatchFailed);
            assert!(!persistent);
        }
        _ => unreachable!(),
    }

    assert!(mount.orchestrator.is_listening());
    assert_eq!(backend.disconnect_count(), 0);
    assert!(mount.eventually(|| backend.outputs.lock().len() == 1).await);
    assert!(matches!(backend.outputs.lock()[0].1, FunctionOutput::Failure(_)));
}

#[tokio::test]
async fn test_disabled_function_calling_answers_with_failure() {
    let mount = MountBuilder::new("fc=0").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();
    assert!(!backend.configs.lock()[0].tools_enabled);

    backend.emit(BackendMessage::FunctionCall {
        call_id: "call-3".into(),
        name: "search_properties".into(),
        arguments: json!({}),
    });

    assert!(mount.eventually(|| backend.outputs.lock().len() == 1).await);
    assert!(mount.search.calls.lock().is_empty());
    assert!(mount.orchestrator.is_listening());
}

#[tokio::test]
async fn test_runtime_error_lands_in_error_and_is_retryable() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    backend.emit(BackendMessage::Error("socket reset".into()));
    assert!(
        mount
            .eventually(|| mount.orchestrator.status() == SessionStatus::Error)
            .await
    );
    assert_eq!(
        mount.orchestrator.snapshot().last_error,
        Some(ErrorKind::ProviderRuntimeError)
    );
    assert!(mount.eventually(|| !mount.microphone.is_open()).await);

    mount.orchestrator.start().await.unwrap();
    assert!(mount.orchestrator.is_listening());
    assert_eq!(mount.orchestrator.snapshot().last_error, None);
    assert_eq!(backend.connect_count(), 2);
}

#[tokio::test]
async fn test_connect_timeout_is_init_failure() {
    let backend = MockBackend::new().with_connect_delay(Duration::from_secs(5));
    let mount = MountBuilder::new("").openai(backend).build();
    mount.ready();

    let err = mount.orchestrator.start().await.unwrap_err();
    assert!(matches!(err, ConciergeError::ProviderInitFailed(_)));
    assert_eq!(mount.orchestrator.status(), SessionStatus::Error);
    assert!(!mount.microphone.is_open());

    let notice = mount
        .wait_for(|e| matches!(e, SessionEvent::Notice { .. }))
        .await
        .expect("init failure notice");
    assert!(matches!(notice, SessionEvent::Notice { persistent: false, .. }));
}

#[tokio::test]
async fn test_permission_denied_at_mount_disables_voice() {
    let microphone = MockMicrophone::new();
    *microphone.access_error.lock() = Some(ConciergeError::PermissionDenied("blocked".into()));
    let mount = MountBuilder::new("").microphone(microphone).build();

    assert!(matches!(
        mount.orchestrator.mount(),
        VoiceGate::Disabled(ConciergeError::PermissionDenied(_))
    ));
    mount.orchestrator.resolve_provider().unwrap();

    for _ in 0..2 {
        let err = mount.orchestrator.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);
    assert_eq!(mount.openai.connect_count(), 0);
}

#[tokio::test]
async fn test_permission_denied_at_start_disables_rest_of_mount() {
    let microphone = MockMicrophone::new();
    *microphone.acquire_error.lock() = Some(ConciergeError::PermissionDenied("dismissed".into()));
    let mount = MountBuilder::new("").microphone(microphone).build();
    mount.ready();

    assert!(mount.orchestrator.start().await.is_err());
    assert_eq!(mount.orchestrator.status(), SessionStatus::Error);
    assert!(!mount.orchestrator.gate().is_permitted());

    mount.orchestrator.stop().await;
    let err = mount.orchestrator.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(mount.microphone.acquires.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_visibility_resume_is_best_effort() {
    let mount = MountBuilder::new("").build();
    mount.ready();
    mount.orchestrator.start().await.unwrap();

    mount.orchestrator.handle_visibility_change(false);
    assert_eq!(mount.output.resumes.load(Ordering::SeqCst), 0);

    mount.output.fail_resume.store(true, Ordering::SeqCst);
    mount.orchestrator.handle_visibility_change(true);
    assert_eq!(mount.output.resumes.load(Ordering::SeqCst), 1);
    assert!(mount.orchestrator.is_listening());
}

#[tokio::test]
async fn test_assistant_audio_is_played() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.start().await.unwrap();

    backend.emit(BackendMessage::Audio(vec![0.1; 240]));
    assert!(
        mount
            .eventually(|| mount.output.played.load(Ordering::SeqCst) == 240)
            .await
    );
}

#[tokio::test]
async fn test_close_chat_stops_session() {
    let mount = MountBuilder::new("").build();
    let backend = mount.ready();
    mount.orchestrator.open_chat();
    mount.orchestrator.start().await.unwrap();

    mount.orchestrator.close_chat().await;
    assert_eq!(mount.orchestrator.status(), SessionStatus::Idle);
    assert!(!mount.orchestrator.is_chat_open());
    assert!(!mount.continuity.chat_open());
    assert!(!mount.continuity.voice_active());
    assert_eq!(backend.disconnect_count(), 1);
}
