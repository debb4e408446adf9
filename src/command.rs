use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::{Result, TelloError};

/// Timeout for commands that move the drone a given distance or angle.
pub const MOVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for take off, land and flips.
pub const MANOEUVRE_TIMEOUT: Duration = Duration::from_secs(20);

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// A single line of text to send to the drone.
#[derive(Debug, Clone)]
pub struct Command {
    pub(crate) id: u64,
    pub(crate) text: String,
    pub(crate) timeout: Duration,
    pub(crate) canceller: bool,
}

impl Command {
    /// A zero `timeout` waits for as long as the session lasts.
    pub fn new(text: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
            timeout,
            canceller: false,
        }
    }

    /// Marks the command as able to cut in front of whatever is running,
    /// eg an emergency stop.
    pub fn canceller(mut self) -> Self {
        self.canceller = true;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        if self.timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + self.timeout)
        }
    }
}

/// Direction to flip in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            FlipDirection::Left => "l",
            FlipDirection::Right => "r",
            FlipDirection::Forward => "f",
            FlipDirection::Back => "b",
        }
    }
}

#[derive(Debug, Clone)]
struct InFlightCommand {
    text: String,
    canceller: bool,
}

/// The commands currently being sent or waiting for their response.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    commands: Mutex<HashMap<u64, InFlightCommand>>,
}

impl InFlight {
    /// Records the command as in flight and decides whether it may skip
    /// the queue.
    ///
    /// Only cancellers get priority, and only if no other canceller is in
    /// flight. Landing never preempts a take off.
    pub(crate) fn enter(&self, command: &Command) -> (InFlightEntry<'_>, bool) {
        let mut commands = self.commands();

        let priority = command.canceller
            && !commands.values().any(|other| {
                other.canceller || (command.text == "land" && other.text == "takeoff")
            });

        commands.insert(
            command.id,
            InFlightCommand { text: command.text.clone(), canceller: command.canceller },
        );

        (InFlightEntry { in_flight: self, id: command.id }, priority)
    }

    pub(crate) fn len(&self) -> usize {
        self.commands().len()
    }

    pub(crate) fn clear(&self) {
        self.commands().clear();
    }

    fn commands(&self) -> MutexGuard<'_, HashMap<u64, InFlightCommand>> {
        self.commands.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes its command from the in-flight set when dropped.
#[derive(Debug)]
pub(crate) struct InFlightEntry<'a> {
    in_flight: &'a InFlight,
    id: u64,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        self.in_flight.commands().remove(&self.id);
    }
}

/// Accepts only an "ok" response.
pub(crate) fn expect_ok(response: &str) -> Result<()> {
    if response == "ok" {
        Ok(())
    } else {
        Err(invalid_response(response, "expected ok"))
    }
}

/// Parses a numeric response such as "100.0", dropping any fraction.
pub(crate) fn parse_number(response: &str) -> Result<i32> {
    response
        .parse::<f64>()
        .map(|n| n as i32)
        .map_err(|e| invalid_response(response, format!("not a number ({e})")))
}

fn invalid_response(response: &str, reason: impl Into<String>) -> TelloError {
    TelloError::InvalidResponse { response: response.to_string(), reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_get_unique_ids() {
        let a = Command::new("up 1", MOVE_TIMEOUT);
        let b = Command::new("up 1", MOVE_TIMEOUT);
        assert_ne!(a.id, b.id);
        assert!(!a.canceller);
        assert!(Command::new("land", MANOEUVRE_TIMEOUT).canceller().canceller);
    }

    #[test]
    fn zero_timeout_has_no_deadline() {
        assert!(Command::new("command", Duration::ZERO).deadline().is_none());
        assert!(Command::new("command", MOVE_TIMEOUT).deadline().is_some());
    }

    #[test]
    fn ordinary_commands_never_get_priority() {
        let in_flight = InFlight::default();
        let (_entry, priority) = in_flight.enter(&Command::new("up 1", MOVE_TIMEOUT));
        assert!(!priority);
    }

    #[test]
    fn emergency_preempts_ordinary_commands() {
        let in_flight = InFlight::default();
        let (_up, _) = in_flight.enter(&Command::new("up 100", MOVE_TIMEOUT));
        let (_emergency, priority) =
            in_flight.enter(&Command::new("emergency", MOVE_TIMEOUT).canceller());
        assert!(priority);
    }

    #[test]
    fn land_does_not_preempt_take_off() {
        let in_flight = InFlight::default();
        let (_take_off, _) = in_flight.enter(&Command::new("takeoff", MANOEUVRE_TIMEOUT));
        let (_land, priority) =
            in_flight.enter(&Command::new("land", MANOEUVRE_TIMEOUT).canceller());
        assert!(!priority);
    }

    #[test]
    fn emergency_preempts_take_off() {
        let in_flight = InFlight::default();
        let (_take_off, _) = in_flight.enter(&Command::new("takeoff", MANOEUVRE_TIMEOUT));
        let (_emergency, priority) =
            in_flight.enter(&Command::new("emergency", MOVE_TIMEOUT).canceller());
        assert!(priority);
    }

    #[test]
    fn only_one_canceller_at_a_time() {
        let in_flight = InFlight::default();
        let (_land, first) = in_flight.enter(&Command::new("land", MANOEUVRE_TIMEOUT).canceller());
        let (_emergency, second) =
            in_flight.enter(&Command::new("emergency", MOVE_TIMEOUT).canceller());
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn entries_leave_when_dropped() {
        let in_flight = InFlight::default();
        {
            let (_entry, _) = in_flight.enter(&Command::new("takeoff", MANOEUVRE_TIMEOUT));
            assert_eq!(in_flight.len(), 1);
        }
        assert_eq!(in_flight.len(), 0);

        let (_land, priority) =
            in_flight.enter(&Command::new("land", MANOEUVRE_TIMEOUT).canceller());
        assert!(priority);
    }

    #[test]
    fn response_parsing() {
        assert!(expect_ok("ok").is_ok());
        assert!(matches!(
            expect_ok("error"),
            Err(TelloError::InvalidResponse { response, .. }) if response == "error"
        ));
        assert_eq!(parse_number("100.0").unwrap(), 100);
        assert_eq!(parse_number("90").unwrap(), 90);
        assert!(parse_number("ok").is_err());
    }
}
