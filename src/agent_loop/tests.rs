use super::test_utils::*;
use super::*;
use crate::context::{SUMMARY_HEADER, assemble_context};
use crate::events::AgentEvent;
use crate::llm::{ChatOutcome, Role, StreamDelta};
use crate::stores::{InMemoryStore, NewEntry, SessionStore};
use crate::tools::ToolRegistry;
use crate::types::{AgentConfig, ErrorKind, RetryConfig, SessionId};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn weather_tools() -> (ToolRegistry, WeatherTool) {
    let tool = WeatherTool::default();
    let mut tools = ToolRegistry::new();
    tools.register(tool.clone());
    (tools, tool)
}

fn agent(
    provider: &Arc<MockProvider>,
    tools: ToolRegistry,
    store: &Arc<InMemoryStore>,
    config: AgentConfig,
) -> anyhow::Result<AgentLoop> {
    Ok(AgentLoop::builder()
        .shared_provider(provider.clone())
        .tools(tools)
        .shared_store(StorageMode::Database, store.clone())
        .config(config)
        .build()?)
}

fn session() -> SessionId {
    SessionId::from_string("session-1")
}

/// Event `type` names, with runs of chunks collapsed into one.
fn event_types(events: &[crate::events::AgentEventEnvelope]) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for envelope in events {
        let name = serde_json::to_value(&envelope.event)
            .ok()
            .and_then(|v| v["type"].as_str().map(str::to_string))
            .unwrap_or_default();
        if name == "chunk" && types.last().is_some_and(|last| last == "chunk") {
            continue;
        }
        types.push(name);
    }
    types
}

// ===================
// Builder Tests
// ===================

#[test]
fn test_builder_requires_provider() {
    let Err(err) = AgentLoop::builder().build() else {
        panic!("expected a configuration error");
    };
    assert_eq!(err.kind, ErrorKind::Configuration);
}

#[test]
fn test_builder_defaults() -> anyhow::Result<()> {
    let agent = AgentLoop::builder()
        .provider(MockProvider::new(vec![]))
        .build()?;

    assert_eq!(agent.config().max_iterations, 10);
    assert!(agent.tools().is_empty());
    assert!(agent.store(StorageMode::Database).is_ok());
    assert!(agent.store(StorageMode::LocalFile).is_err());
    Ok(())
}

#[test]
fn test_builder_rejects_bad_provider_config() {
    let result = AgentLoop::builder()
        .provider_config(crate::providers::ProviderConfig::openai("", "http://x", "m"))
        .build();
    assert!(matches!(result, Err(e) if e.kind == ErrorKind::Configuration));
}

#[tokio::test]
async fn test_local_file_store_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let provider = Arc::new(MockProvider::new(vec![MockProvider::text_response("hello")]));
    let agent = AgentLoop::builder()
        .shared_provider(provider.clone())
        .local_file_store(dir.path().join("storage.json"))
        .build()?;

    let input = AgentInput::new(session(), 1000)
        .with_storage(StorageMode::LocalFile)
        .with_user_message("hi");
    agent.invoke(input).await?;

    let snapshot = agent
        .store(StorageMode::LocalFile)?
        .read_session(&session())
        .await?;
    assert_eq!(snapshot.entries.len(), 2);
    assert!(dir.path().join("storage.json").exists());
    Ok(())
}

// ===================
// Configuration Errors
// ===================

#[tokio::test]
async fn test_invalid_input_fails_before_any_call() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![]));
    let store = Arc::new(InMemoryStore::new());
    let agent = agent(&provider, ToolRegistry::new(), &store, AgentConfig::default())?;

    let inputs = [
        AgentInput::new(session(), 0),
        AgentInput {
            context_window: None,
            ..AgentInput::new(session(), 100)
        },
        AgentInput::new(session(), 100).with_max_iterations(0),
        AgentInput::new(session(), 100).with_threshold_fraction(0.0),
        AgentInput::new(SessionId::from_string(" "), 100),
        AgentInput::new(session(), 100).with_storage(StorageMode::LocalFile),
    ];

    for input in inputs {
        let Err(err) = agent.invoke(input.with_user_message("hi")).await else {
            panic!("expected a configuration error");
        };
        assert_eq!(err.kind, ErrorKind::Configuration, "{}", err.message);
    }

    assert_eq!(provider.call_count(), 0);
    assert!(store.read_session(&session()).await?.entries.is_empty());
    Ok(())
}

// ===================
// Run Loop Tests
// ===================

#[tokio::test]
async fn test_simple_text_response() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![MockProvider::text_response(
        "Hello! How can I help?",
    )]));
    let store = Arc::new(InMemoryStore::new());
    let agent = agent(&provider, ToolRegistry::new(), &store, AgentConfig::default())?;

    let response = agent
        .invoke(AgentInput::new(session(), 100).with_user_message("hi"))
        .await?;

    assert_eq!(response.content.as_deref(), Some("Hello! How can I help?"));
    assert!(!response.has_tool_calls());
    assert_eq!(provider.call_count(), 1);

    let snapshot = store.read_session(&session()).await?;
    let roles: Vec<_> = snapshot.entries.iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(snapshot.entries[1].token_consumption, Some(30));
    assert!(snapshot.compaction_records.is_empty());

    let request = &provider.requests()[0];
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].text().as_deref(), Some("hi"));
    Ok(())
}

#[tokio::test]
async fn test_system_prompt_and_tool_definitions_are_sent() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![]));
    let store = Arc::new(InMemoryStore::new());
    let (tools, _) = weather_tools();
    let config = AgentConfig::default().with_system_prompt("You are a weather bot.");
    let agent = agent(&provider, tools, &store, config)?;

    agent
        .invoke(AgentInput::new(session(), 1000).with_user_message("hi"))
        .await?;

    let request = &provider.requests()[0];
    assert_eq!(request.system.as_deref(), Some("You are a weather bot."));
    assert_eq!(request.tools.len(), 1);
    assert_eq!(request.tools[0].name, "get_weather");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_tool_call_round_trip() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![
        MockProvider::tool_call_response("call_1", "get_weather", json!({"city": "NYC"})),
        MockProvider::text_response("It's sunny in NYC."),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let (tools, weather) = weather_tools();
    let agent = agent(&provider, tools, &store, AgentConfig::default())?;

    let started = tokio::time::Instant::now();
    let response = agent
        .invoke(
            AgentInput::new(session(), 128_000)
                .with_user_message("What's the weather in NYC?")
                .with_max_iterations(5),
        )
        .await?;

    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(response.content.as_deref(), Some("It's sunny in NYC."));
    assert_eq!(provider.call_count(), 2);
    assert_eq!(weather.calls.load(Ordering::SeqCst), 1);

    let snapshot = store.read_session(&session()).await?;
    let roles: Vec<_> = snapshot.entries.iter().map(|e| e.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(snapshot.entries[1].content, None);
    assert_eq!(snapshot.entries[1].tool_calls()[0].name, "get_weather");
    let tool_result = snapshot.entries[2].tool_result();
    assert_eq!(tool_result.map(|r| r.call_id.as_str()), Some("call_1"));
    assert_eq!(
        tool_result.and_then(|r| r.result.as_deref()),
        Some("Sunny, 22°C in NYC")
    );

    // The second call replays the tool round trip.
    let second = &provider.requests()[1];
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.messages[1].content, None);
    assert_eq!(second.messages[1].tool_calls.len(), 1);
    assert_eq!(second.messages[2].tool_call_id.as_deref(), Some("call_1"));
    Ok(())
}

#[tokio::test]
async fn test_sibling_tool_results_persist_in_call_order() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![
        MockProvider::tool_calls_response(vec![
            ("call_a", "get_weather", json!({"city": "NYC"})),
            ("call_b", "missing_tool", json!({})),
            ("call_c", "get_weather", json!({})),
        ]),
        MockProvider::text_response("done"),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let (tools, _) = weather_tools();
    let config = AgentConfig::default().with_iteration_delay_ms(0);
    let agent = agent(&provider, tools, &store, config)?;

    agent
        .invoke(AgentInput::new(session(), 128_000).with_user_message("go"))
        .await?;

    let snapshot = store.read_session(&session()).await?;
    let results: Vec<_> = snapshot
        .entries
        .iter()
        .filter_map(|e| e.tool_result())
        .collect();
    let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["call_a", "call_b", "call_c"]);
    assert!(!results[0].is_error());
    assert!(results[1].error.as_deref().is_some_and(|e| e.contains("Unknown tool")));
    assert!(results[2].error.as_deref().is_some_and(|e| e.contains("city is required")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_iteration_limit_after_exactly_n_calls() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::repeating(MockProvider::tool_call_response(
        "call_1",
        "get_weather",
        json!({"city": "NYC"}),
    )));
    let store = Arc::new(InMemoryStore::new());
    let (tools, weather) = weather_tools();
    let agent = agent(&provider, tools, &store, AgentConfig::default())?;

    let result = agent
        .invoke(
            AgentInput::new(session(), 128_000)
                .with_user_message("loop forever")
                .with_max_iterations(3),
        )
        .await;

    let Err(err) = result else {
        panic!("expected the iteration limit");
    };
    assert_eq!(err.kind, ErrorKind::IterationLimit);
    assert!(err.message.contains('3'));
    assert_eq!(provider.call_count(), 3);
    assert_eq!(weather.calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_compaction_persists_record_and_shrinks_request() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![
        MockProvider::text_response("They exchanged greetings."),
        MockProvider::text_response("final answer"),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let agent = agent(&provider, ToolRegistry::new(), &store, AgentConfig::default())?;

    // Five 10-token entries; the new user message adds ten more.
    let text = "x".repeat(40);
    let mut ids = Vec::new();
    for role in [Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User] {
        let entry = store
            .append_entry(&session(), NewEntry::new(role, Some(text.clone())))
            .await?;
        ids.push(entry.id);
    }

    // 60 tokens >= 0.8 * 70; 0.4 * 70 = 28 tokens kept.
    let response = agent
        .invoke(AgentInput::new(session(), 70).with_user_message("y".repeat(40)))
        .await?;
    assert_eq!(response.content.as_deref(), Some("final answer"));
    assert_eq!(provider.call_count(), 2);

    let snapshot = store.read_session(&session()).await?;
    assert_eq!(snapshot.compaction_records.len(), 1);
    assert_eq!(snapshot.compaction_records[0].summary, "They exchanged greetings.");
    assert_eq!(snapshot.compaction_records[0].trigger_entry_id, ids[3]);

    let answered = &provider.requests()[1];
    assert_eq!(answered.messages.len(), 3);
    assert!(
        answered.messages[0]
            .text()
            .is_some_and(|t| t.starts_with(SUMMARY_HEADER))
    );

    // The next assembly replays from the anchor onwards.
    let context = assemble_context(&snapshot);
    assert!(context.has_summary());
    assert_eq!(context.entries[0].id, ids[3]);
    Ok(())
}

#[tokio::test]
async fn test_retry_recovers_from_rate_limit() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![
        ChatOutcome::RateLimited,
        MockProvider::text_response("after retry"),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let config = AgentConfig::default().with_retry(RetryConfig::fast(2));
    let agent = agent(&provider, ToolRegistry::new(), &store, config)?;

    let response = agent
        .invoke(AgentInput::new(session(), 1000).with_user_message("hi"))
        .await?;
    assert_eq!(response.content.as_deref(), Some("after retry"));
    assert_eq!(provider.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_provider_errors_without_retry() -> anyhow::Result<()> {
    for (outcome, recoverable) in [
        (ChatOutcome::RateLimited, true),
        (ChatOutcome::ServerError("boom".into()), true),
        (ChatOutcome::InvalidRequest("bad".into()), false),
    ] {
        let provider = Arc::new(MockProvider::new(vec![outcome]));
        let store = Arc::new(InMemoryStore::new());
        let agent = agent(&provider, ToolRegistry::new(), &store, AgentConfig::default())?;

        let Err(err) = agent
            .invoke(AgentInput::new(session(), 1000).with_user_message("hi"))
            .await
        else {
            panic!("expected a provider error");
        };
        assert_eq!(err.kind, ErrorKind::Provider);
        assert_eq!(err.recoverable, recoverable);
        assert_eq!(provider.call_count(), 1);

        // Only the user entry was written.
        assert_eq!(store.read_session(&session()).await?.entries.len(), 1);
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_tool_execution() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![MockProvider::tool_call_response(
        "call_1",
        "stall",
        json!({}),
    )]));
    let store = Arc::new(InMemoryStore::new());
    let mut tools = ToolRegistry::new();
    tools.register(StallTool);
    let agent = agent(&provider, tools, &store, AgentConfig::default())?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = agent
        .invoke(
            AgentInput::new(session(), 1000)
                .with_user_message("wait")
                .with_cancellation(cancel),
        )
        .await;

    assert!(matches!(result, Err(e) if e.kind == ErrorKind::Cancelled));
    let roles: Vec<_> = store
        .read_session(&session())
        .await?
        .entries
        .iter()
        .map(|e| e.role)
        .collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    Ok(())
}

#[tokio::test]
async fn test_deleted_session_fails_before_model_call() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![]));
    let store = Arc::new(InMemoryStore::new());
    let agent = agent(&provider, ToolRegistry::new(), &store, AgentConfig::default())?;

    store.append_entry(&session(), NewEntry::user("old")).await?;
    store.delete_session(&session()).await?;

    let result = agent
        .invoke(AgentInput::new(session(), 1000).with_user_message("hi"))
        .await;

    assert!(matches!(result, Err(e) if e.kind == ErrorKind::Storage));
    assert_eq!(provider.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_start() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![]));
    let store = Arc::new(InMemoryStore::new());
    let agent = agent(&provider, ToolRegistry::new(), &store, AgentConfig::default())?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = agent
        .invoke(AgentInput::new(session(), 1000).with_cancellation(cancel))
        .await;

    assert!(matches!(result, Err(e) if e.kind == ErrorKind::Cancelled));
    assert_eq!(provider.call_count(), 0);
    Ok(())
}

// ===================
// Streaming Tests
// ===================

#[tokio::test(start_paused = true)]
async fn test_streaming_event_sequence() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![
        MockProvider::tool_call_response("call_1", "get_weather", json!({"city": "NYC"})),
        MockProvider::text_response("It's sunny in NYC."),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let (tools, _) = weather_tools();
    let agent = agent(&provider, tools, &store, AgentConfig::default())?;

    let stream = agent.invoke_streaming(
        AgentInput::new(session(), 128_000).with_user_message("What's the weather in NYC?"),
    )?;
    let (events, result) = stream.collect().await;
    let response = result?;

    assert_eq!(response.content.as_deref(), Some("It's sunny in NYC."));
    assert_eq!(
        event_types(&events),
        vec![
            "start",
            "chunk",
            "thinking",
            "tool_calls",
            "tool_result",
            "iteration_complete",
            "start",
            "chunk",
            "iteration_complete",
            "done",
        ]
    );

    for (i, envelope) in events.iter().enumerate() {
        assert_eq!(envelope.sequence, i as u64);
    }

    // The streamed tool call was reassembled from its fragments.
    let calls = events.iter().find_map(|e| match &e.event {
        AgentEvent::ToolCalls { calls } => Some(calls.clone()),
        _ => None,
    });
    assert_eq!(
        calls.map(|c| c[0].arguments.clone()),
        Some(r#"{"city":"NYC"}"#.to_string())
    );

    let text: String = events
        .iter()
        .filter_map(|e| match &e.event {
            AgentEvent::Chunk {
                delta: StreamDelta::TextDelta { delta },
            } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "It's sunny in NYC.");

    let snapshot = store.read_session(&session()).await?;
    assert_eq!(snapshot.entries.len(), 4);
    assert_eq!(snapshot.entries[3].token_consumption, Some(30));
    Ok(())
}

#[tokio::test]
async fn test_streaming_error_event_precedes_error() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![ChatOutcome::InvalidRequest(
        "context too long".into(),
    )]));
    let store = Arc::new(InMemoryStore::new());
    let agent = agent(&provider, ToolRegistry::new(), &store, AgentConfig::default())?;

    let stream =
        agent.invoke_streaming(AgentInput::new(session(), 1000).with_user_message("hi"))?;
    let (events, result) = stream.collect().await;

    let Err(err) = result else {
        panic!("expected a provider error");
    };
    assert_eq!(err.kind, ErrorKind::Provider);
    assert!(!err.recoverable);

    match events.last().map(|e| &e.event) {
        Some(AgentEvent::Error {
            kind,
            message,
            recoverable,
        }) => {
            assert_eq!(*kind, ErrorKind::Provider);
            assert!(message.contains("context too long"));
            assert!(!recoverable);
        }
        other => panic!("expected an error event, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_streaming_retry_emits_retry_event() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![
        ChatOutcome::ServerError("overloaded".into()),
        MockProvider::text_response("ok"),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let config = AgentConfig::default().with_retry(RetryConfig::fast(1));
    let agent = agent(&provider, ToolRegistry::new(), &store, config)?;

    let stream =
        agent.invoke_streaming(AgentInput::new(session(), 1000).with_user_message("hi"))?;
    let (events, result) = stream.collect().await;

    assert_eq!(result?.content.as_deref(), Some("ok"));
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::Retry { attempt: 1, reason, .. } if reason == "overloaded"
    )));
    assert_eq!(provider.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_invoke_agent_dispatches_on_stream_flag() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new(vec![]));
    let store = Arc::new(InMemoryStore::new());

    let buffered = agent(&provider, ToolRegistry::new(), &store, AgentConfig::default())?;
    let invocation = buffered
        .invoke_agent(AgentInput::new(session(), 1000).with_user_message("a"))
        .await?;
    assert!(matches!(invocation, AgentInvocation::Buffered(r) if r.content.as_deref() == Some("Done")));

    let streaming = agent(
        &provider,
        ToolRegistry::new(),
        &store,
        AgentConfig::default().with_stream(true),
    )?;
    let AgentInvocation::Streaming(stream) = streaming
        .invoke_agent(AgentInput::new(session(), 1000).with_user_message("b"))
        .await?
    else {
        panic!("expected a streaming invocation");
    };
    let events = drain_events(stream.events).await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e.event, AgentEvent::Done { .. }))
    );
    Ok(())
}
