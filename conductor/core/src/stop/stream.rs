//! Stop-condition stream wrapper.

use futures::StreamExt;

use super::StopCondition;
use crate::events::{CanonicalEvent, FinishReason};
use crate::streaming::EventStream;

struct StopState {
    inner: Option<EventStream>,
    condition: Box<dyn StopCondition>,
    text: String,
    pending_done: bool,
}

/// Evaluate `condition` after every text delta and end the stream when it fires
///
/// The triggering delta is still forwarded, followed by a synthetic
/// `Done { finish_reason: StopCondition }`. Upstream is dropped at that point,
/// which stops its producer. Events already forwarded are never retracted.
pub fn with_stop_condition(stream: EventStream, condition: Box<dyn StopCondition>) -> EventStream {
    let state = StopState {
        inner: Some(stream),
        condition,
        text: String::new(),
        pending_done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.pending_done {
            state.pending_done = false;
            state.inner = None;
            return Some((CanonicalEvent::done(FinishReason::StopCondition), state));
        }

        let event = state.inner.as_mut()?.next().await?;
        match &event {
            CanonicalEvent::TextDelta(delta) => {
                state.text.push_str(delta);
                if state.condition.evaluate(&state.text, Some(delta)) {
                    tracing::debug!(
                        condition = state.condition.name(),
                        chars = state.text.len(),
                        "Stop condition ended stream"
                    );
                    state.pending_done = true;
                }
            }
            terminal if terminal.is_terminal() => state.inner = None,
            _ => {}
        }
        Some((event, state))
    })
    .boxed()
}
