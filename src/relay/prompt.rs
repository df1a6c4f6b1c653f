use super::language::Language;
use super::llm::ChatMessage;
use crate::models::ChatTurn;

/// Used when the model returns nothing usable
pub const EMPTY_REPLY: &str = "No tengo respuesta.";

const BASE_INSTRUCTIONS: &str = "Eres PULSE.
Responde corto, directo y útil.
Máximo 2 oraciones.
Sin emojis.
Sin relleno.
Idioma: responde en el idioma del usuario.";

/// Output ceiling applied to every model reply
#[derive(Debug, Clone, Copy)]
pub struct ReplyLimits {
    pub max_lines: usize,
    pub max_chars: usize,
}

impl Default for ReplyLimits {
    fn default() -> Self {
        Self {
            max_lines: 2,
            max_chars: 500,
        }
    }
}

pub fn system_prompt(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{}\nNombre del usuario: {}", BASE_INSTRUCTIONS, name),
        None => BASE_INSTRUCTIONS.to_string(),
    }
}

/// System instruction followed by the newest `context_turns` turns
pub fn build_messages(name: Option<&str>, history: &[ChatTurn], context_turns: usize) -> Vec<ChatMessage> {
    let skip = history.len().saturating_sub(context_turns);
    let mut messages = Vec::with_capacity(context_turns.min(history.len()) + 1);
    messages.push(ChatMessage::system(system_prompt(name)));
    messages.extend(history.iter().skip(skip).map(ChatMessage::from));
    messages
}

/// Reduce a reply to its first non-empty lines and cap its length in characters
pub fn shape_reply(raw: &str, limits: &ReplyLimits) -> String {
    let joined = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(limits.max_lines)
        .collect::<Vec<_>>()
        .join("\n");

    let shaped = if joined.chars().count() > limits.max_chars {
        joined
            .chars()
            .take(limits.max_chars)
            .collect::<String>()
            .trim_end()
            .to_string()
    } else {
        joined
    };

    if shaped.is_empty() {
        EMPTY_REPLY.to_string()
    } else {
        shaped
    }
}

pub fn paywall_message(language: Language) -> &'static str {
    match language {
        Language::Es => "Límite gratis alcanzado. Vuelve mañana para seguir hablando con PULSE.",
        Language::En => "Free limit reached. Come back tomorrow to keep talking with PULSE.",
    }
}
