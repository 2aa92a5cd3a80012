use crate::events::Event;
use crate::session::Session;

/// What the exit check decided for one round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The watched step has not answered yet
    Continue,
    /// A final response exists; stop the loop
    Escalate,
    /// Final event without any output: repair history and run again
    StallRecovery,
}

/// Decide whether the watched step has finished its reply.
///
/// Only the most recent event authored by `watched` is inspected; older
/// events matter only through [`has_output`].
#[must_use]
pub fn evaluate(session: &Session, watched: &str, response_state_key: Option<&str>) -> Verdict {
    let Some(latest) = session.latest_by(watched) else {
        log::debug!("No events from {watched} yet; continuing loop");
        return Verdict::Continue;
    };

    if !latest.is_final {
        log::debug!("Latest {watched} event {} is not final; continuing loop", latest.id);
        return Verdict::Continue;
    }

    if has_output(session, latest, watched, response_state_key) {
        log::debug!("Final response from {watched} (event {}); escalating", latest.id);
        Verdict::Escalate
    } else {
        Verdict::StallRecovery
    }
}

/// Whether the watched step produced a response this turn.
///
/// True when any of these holds:
/// - the configured state key holds a non-empty value
/// - the latest event's own text is non-blank
/// - any event by `watched` since the last user message has non-blank text
#[must_use]
pub fn has_output(
    session: &Session,
    latest: &Event,
    watched: &str,
    response_state_key: Option<&str>,
) -> bool {
    let in_state = response_state_key.is_some_and(|key| session.state.has_non_empty(key));
    in_state || latest.has_text() || session.since_last_user(watched).any(Event::has_text)
}
