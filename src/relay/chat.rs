use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use super::error::AppError;
use super::hooks::ExchangeRecord;
use super::prompt::{build_messages, paywall_message, shape_reply};
use super::RelayState;
use crate::models::{
    day_key, resolve_session_id, ChatRequest, ChatResponse, ChatTurn, ReplySource, Role,
    UsageSnapshot,
};
use crate::outcome::Outcome;

pub async fn chat_handler(
    State(state): State<RelayState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!("Unreadable chat body: {}", rejection);
        AppError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let session_id = resolve_session_id(request.session_id().as_deref());
    let text = request
        .text()
        .ok_or_else(|| AppError::BadRequest("No text provided".to_string()))?
        .to_string();

    tracing::info!("CHAT: session={} chars={}", session_id, text.chars().count());

    let record = ExchangeRecord::begin(&session_id, &text);

    match run_chat(&state, &session_id, &text).await {
        Ok(response) => {
            let source = response.source.unwrap_or(ReplySource::Paywall);
            let record = record.answered(&response.reply, source, &response.usage);
            state.hooks.trigger_exchange(&record).await;
            Ok(Json(response))
        }
        Err(e) => {
            let record = record.failed(e.status().as_u16(), e.to_string());
            state.hooks.trigger_failure(&record).await;
            Err(e)
        }
    }
}

/// Quota check, name capture, optional fact shortcut, then the model
async fn run_chat(state: &RelayState, session_id: &str, text: &str) -> Result<ChatResponse, AppError> {
    let sessions = &state.sessions;
    let day = day_key(chrono::Utc::now());
    let language = state.detectors.language.detect(text);

    let usage = sessions
        .read_usage(session_id, &day)
        .await
        .or_fallback("usage read", sessions.empty_usage(&day));

    if usage.is_exhausted() {
        tracing::info!(
            "PAYWALL: session={} used={} limit={}",
            session_id,
            usage.used_today,
            usage.limit
        );
        return Ok(ChatResponse::paywalled(
            paywall_message(language).to_string(),
            usage,
        ));
    }

    let used = sessions
        .increment_usage(session_id, &day)
        .await
        .or_fallback("usage increment", usage.used_today);
    let usage = UsageSnapshot::new(used, usage.limit, day);

    let name = match state.detectors.names.detect(text) {
        Some(detected) => {
            tracing::info!(
                "NAME SAVED: session={} name={} pattern={}",
                session_id,
                detected.name,
                detected.language.code()
            );
            sessions
                .write_name(session_id, &detected.name)
                .await
                .or_default_logged("name write");
            Some(detected.name)
        }
        None => sessions.read_name(session_id).await.or_default_logged("name read"),
    };

    if let Some(reply) = try_fact_shortcut(state, text).await {
        tracing::info!("REPLY: session={} source=facts", session_id);
        return Ok(ChatResponse::answered(reply, ReplySource::Facts, usage));
    }

    sessions
        .append_turn(session_id, &ChatTurn::user(text))
        .await
        .or_default_logged("history append");

    let mut history = sessions
        .recent_turns(session_id)
        .await
        .or_default_logged("history read");

    // Stateless mode still has to send the current message
    let has_current = history
        .last()
        .map(|t| t.role == Role::User && t.content == text)
        .unwrap_or(false);
    if !has_current {
        history.push(ChatTurn::user(text));
    }

    let messages = build_messages(name.as_deref(), &history, state.settings.context_turns);
    let raw = state.model.complete(&messages).await?;
    let reply = shape_reply(&raw, &state.settings.reply_limits);

    sessions
        .append_turn(session_id, &ChatTurn::assistant(&reply))
        .await
        .or_default_logged("history append");

    tracing::info!(
        "REPLY: session={} source=model model={} chars={}",
        session_id,
        state.model.model_id(),
        reply.chars().count()
    );

    Ok(ChatResponse::answered(reply, ReplySource::Model, usage))
}

/// Templated answer from the knowledge graph, or `None` to continue to the model
async fn try_fact_shortcut(state: &RelayState, text: &str) -> Option<String> {
    let lookup = state.facts.as_ref()?;
    let question = state.detectors.facts.detect(text)?;

    match lookup
        .head_of_state(question.country.entity_id(), question.language)
        .await
    {
        Outcome::Success(label) => Some(question.answer(&label)),
        Outcome::Unavailable(reason) => {
            tracing::debug!("Fact lookup had no answer, using model: {}", reason);
            None
        }
        Outcome::Error(reason) => {
            tracing::warn!("Fact lookup failed, using model: {}", reason);
            None
        }
    }
}
