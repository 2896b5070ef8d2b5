//! Pure folding of protocol events into run progress.
//!
//! [`fold_event`] never touches the network or the state channel. The
//! orchestrator applies it under its state lock, one event at a time, and
//! decides the next [`RunState`](agentrun_core::RunState) from the returned
//! [`FoldOutcome`].

use tracing::debug;

use agentrun_core::conversation::{ChatRole, ConversationStatus, ToolCallStatus};
use agentrun_core::{ChatMessage, Conversation, Event, StreamingState, ToolCallInfo};

/// Mutable view of a `Running` state while events are applied.
#[derive(Clone, Debug, PartialEq)]
pub struct RunProgress {
    /// Backend run id, updated by `RUN_STARTED`.
    pub run_id: String,
    /// Conversation so far.
    pub conversation: Conversation,
    /// Text message being assembled.
    pub streaming: StreamingState,
}

/// What the orchestrator should do after an event was applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FoldOutcome {
    /// Keep streaming.
    Continue,
    /// `RUN_FINISHED` arrived.
    Finished,
    /// `RUN_ERROR` arrived.
    Errored(String),
}

/// Apply one event to `progress`.
pub fn fold_event(progress: &mut RunProgress, event: Event) -> FoldOutcome {
    match event {
        Event::RunStarted { run_id, .. } => {
            progress.run_id = run_id;
            progress.conversation.status = ConversationStatus::Running;
        }

        Event::TextMessageStart { message_id } => {
            flush_text(progress);
            progress.streaming = StreamingState::TextStreaming {
                message_id,
                text: String::new(),
            };
        }
        Event::TextMessageContent { message_id, delta } => {
            if let StreamingState::TextStreaming {
                message_id: current,
                text,
            } = &mut progress.streaming
                && *current == message_id
            {
                text.push_str(&delta);
            } else {
                debug!(%message_id, "text content without matching start");
                flush_text(progress);
                progress.streaming = StreamingState::TextStreaming {
                    message_id,
                    text: delta,
                };
            }
        }
        Event::TextMessageEnd { message_id } => {
            let in_flight = matches!(
                &progress.streaming,
                StreamingState::TextStreaming { message_id: current, .. } if *current == message_id
            );
            if in_flight {
                flush_text(progress);
            } else {
                debug!(%message_id, "text end for unknown message");
            }
        }

        Event::ToolCallStart {
            tool_call_id,
            tool_call_name,
            ..
        } => {
            progress
                .conversation
                .upsert_tool_call(ToolCallInfo::pending(tool_call_id, tool_call_name));
        }
        Event::ToolCallArgs {
            tool_call_id,
            delta,
        } => {
            if !progress
                .conversation
                .update_tool_call(&tool_call_id, |tc| tc.arguments.push_str(&delta))
            {
                debug!(%tool_call_id, "args for unknown tool call");
            }
        }
        Event::ToolCallEnd { .. } => {}
        Event::ToolCallResult {
            tool_call_id,
            content,
            ..
        } => {
            let updated = progress.conversation.update_tool_call(&tool_call_id, |tc| {
                tc.status = ToolCallStatus::Completed;
                tc.result = Some(content);
            });
            if !updated {
                debug!(%tool_call_id, "result for unknown tool call");
            }
        }

        Event::StateSnapshot { snapshot } => progress.conversation.agui_state = snapshot,
        Event::StateDelta { delta } => progress
            .conversation
            .pending_state_deltas
            .push(serde_json::Value::Array(delta)),

        Event::RunFinished { .. } => {
            flush_text(progress);
            progress.conversation.status = ConversationStatus::Completed;
            return FoldOutcome::Finished;
        }
        Event::RunError { message, .. } => {
            flush_text(progress);
            progress.conversation.status = ConversationStatus::Failed {
                error: message.clone(),
            };
            return FoldOutcome::Errored(message);
        }

        other => debug!(event_type = other.event_type(), "event ignored"),
    }
    FoldOutcome::Continue
}

/// Append the in-flight text (if any) as an assistant message.
fn flush_text(progress: &mut RunProgress) {
    if let StreamingState::TextStreaming { message_id, text } =
        std::mem::take(&mut progress.streaming)
    {
        progress
            .conversation
            .messages
            .push(ChatMessage::text(message_id, ChatRole::Assistant, text));
    }
}
