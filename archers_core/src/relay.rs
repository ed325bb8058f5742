//! Relay State Machine - what an archer does with one inbound counter.
//!
//! The wire value is always the sender's position. The receiver shifts it
//! by one hop on receipt (`+1` from the left, `-1` from the right), which
//! makes the value it holds equal to its own position:
//!
//! ```text
//!  pos:     1        2        3
//!         [A] --1--> [B] --2--> [C]      rightward pass
//!         [A] <--2-- [B] <--3-- [C]      return trip (C turns around)
//!  fire:    1        2        3
//! ```
//!
//! Processing is a pure function of the archer's [`Position`] and the
//! received message; the runtime in `archer.rs` carries out the step.

use crate::message::{CodecError, Message};
use archers_env::{Channel, EnvError, NodeId};
use thiserror::Error;

/// Which neighbour a message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Channel a message sent towards this side arrives on at the neighbour.
    pub fn arrives_on(&self) -> Channel {
        match self {
            Side::Left => Channel::FromRight,
            Side::Right => Channel::FromLeft,
        }
    }

    /// Channel the neighbour on this side sends to us on.
    pub fn listens_on(&self) -> Channel {
        match self {
            Side::Left => Channel::FromLeft,
            Side::Right => Channel::FromRight,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Where an archer sits in the line, as far as it can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub has_left: bool,
    pub has_right: bool,
}

impl Position {
    /// Position of archer `index` (0-based) in a line of `len`.
    pub fn in_line(index: usize, len: usize) -> Self {
        Self {
            has_left: index > 0,
            has_right: index + 1 < len,
        }
    }

    /// First archer: no left neighbour.
    pub fn is_head(&self) -> bool {
        !self.has_left
    }

    /// Last archer: no right neighbour.
    pub fn is_tail(&self) -> bool {
        !self.has_right
    }
}

/// Outcome of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStep {
    /// Message to pass on, and to whom. Sent before firing.
    pub forward: Option<(Side, Message)>,

    /// Value to fire with, if this archer is done relaying.
    pub fire: Option<i64>,
}

impl RelayStep {
    fn forward(side: Side, message: Message) -> Self {
        Self {
            forward: Some((side, message)),
            fire: None,
        }
    }

    fn forward_then_fire(side: Side, message: Message) -> Self {
        Self {
            forward: Some((side, message)),
            fire: Some(message.value),
        }
    }

    fn fire(value: i64) -> Self {
        Self {
            forward: None,
            fire: Some(value),
        }
    }
}

/// Errors while relaying. Inside a listener these are logged and swallowed.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Send to {peer} failed: {source}")]
    Send {
        peer: NodeId,
        #[source]
        source: EnvError,
    },

    /// Message on a channel whose neighbour does not exist
    #[error("No {side} neighbour (message arrived on {channel})")]
    NoNeighbour { side: Side, channel: Channel },

    /// Only the head of the line may start a volley
    #[error("Archer {0} is not the head of the line")]
    NotChainHead(NodeId),
}

/// Handles a message that arrived on `channel`.
///
/// | channel    | position      | step                               |
/// |------------|---------------|------------------------------------|
/// | from-left  | has right     | `+1`, forward right                |
/// | from-left  | tail          | `+1`, forward left, fire           |
/// | from-right | has left      | `-1`, forward left, fire           |
/// | from-right | head          | `-1`, fire                         |
pub fn relay(position: Position, channel: Channel, message: Message) -> Result<RelayStep, RelayError> {
    match channel {
        Channel::FromLeft => {
            if !position.has_left {
                return Err(RelayError::NoNeighbour { side: Side::Left, channel });
            }
            let held = message.incremented();
            if position.has_right {
                Ok(RelayStep::forward(Side::Right, held))
            } else {
                // Turn-around
                Ok(RelayStep::forward_then_fire(Side::Left, held))
            }
        }
        Channel::FromRight => {
            if !position.has_right {
                return Err(RelayError::NoNeighbour { side: Side::Right, channel });
            }
            let held = message.decremented();
            if position.has_left {
                Ok(RelayStep::forward_then_fire(Side::Left, held))
            } else {
                Ok(RelayStep::fire(held.value))
            }
        }
    }
}

/// The spontaneous first step at the head of the line.
///
/// A lone archer has nobody to send to and fires straight away.
pub fn originate(position: Position, id: NodeId) -> Result<RelayStep, RelayError> {
    if !position.is_head() {
        return Err(RelayError::NotChainHead(id));
    }
    if position.has_right {
        Ok(RelayStep::forward(Side::Right, Message::ORIGIN))
    } else {
        Ok(RelayStep::fire(Message::ORIGIN.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HEAD: Position = Position { has_left: false, has_right: true };
    const MIDDLE: Position = Position { has_left: true, has_right: true };
    const TAIL: Position = Position { has_left: true, has_right: false };
    const LONE: Position = Position { has_left: false, has_right: false };

    #[test]
    fn test_position_in_line() {
        assert_eq!(Position::in_line(0, 1), LONE);
        assert_eq!(Position::in_line(0, 3), HEAD);
        assert_eq!(Position::in_line(1, 3), MIDDLE);
        assert_eq!(Position::in_line(2, 3), TAIL);
    }

    #[test]
    fn test_from_left_with_right_neighbour_continues_right() {
        let step = relay(MIDDLE, Channel::FromLeft, Message::new(1)).unwrap();
        assert_eq!(step.forward, Some((Side::Right, Message::new(2))));
        assert_eq!(step.fire, None);
    }

    #[test]
    fn test_tail_turns_around_and_fires() {
        let step = relay(TAIL, Channel::FromLeft, Message::new(2)).unwrap();
        assert_eq!(step.forward, Some((Side::Left, Message::new(3))));
        assert_eq!(step.fire, Some(3));
    }

    #[test]
    fn test_from_right_with_left_neighbour_forwards_then_fires() {
        let step = relay(MIDDLE, Channel::FromRight, Message::new(3)).unwrap();
        assert_eq!(step.forward, Some((Side::Left, Message::new(2))));
        assert_eq!(step.fire, Some(2));
    }

    #[test]
    fn test_head_is_terminal_on_return() {
        let step = relay(HEAD, Channel::FromRight, Message::new(2)).unwrap();
        assert_eq!(step.forward, None);
        assert_eq!(step.fire, Some(1));
    }

    #[test]
    fn test_message_from_missing_neighbour_is_rejected() {
        assert!(matches!(
            relay(HEAD, Channel::FromLeft, Message::new(1)),
            Err(RelayError::NoNeighbour { side: Side::Left, .. })
        ));
        assert!(matches!(
            relay(TAIL, Channel::FromRight, Message::new(1)),
            Err(RelayError::NoNeighbour { side: Side::Right, .. })
        ));
    }

    #[test]
    fn test_originate() {
        let id = NodeId::from_seed(0);
        assert_eq!(
            originate(HEAD, id).unwrap().forward,
            Some((Side::Right, Message::ORIGIN))
        );
        assert_eq!(originate(LONE, id).unwrap(), RelayStep::fire(1));
        assert!(matches!(originate(MIDDLE, id), Err(RelayError::NotChainHead(_))));
        assert!(matches!(originate(TAIL, id), Err(RelayError::NotChainHead(_))));
    }

    #[test]
    fn test_side_channels() {
        assert_eq!(Side::Right.arrives_on(), Channel::FromLeft);
        assert_eq!(Side::Left.arrives_on(), Channel::FromRight);
        assert_eq!(Side::Left.listens_on(), Channel::FromLeft);
    }

    /// Drives one volley through a line of `len` archers without any I/O.
    fn simulate(len: usize) -> Vec<(usize, i64)> {
        let mut fires = Vec::new();
        let mut in_flight = Vec::new();

        let step = originate(Position::in_line(0, len), NodeId::from_seed(0)).unwrap();
        let mut pending = vec![(0usize, step)];

        while let Some((index, step)) = pending.pop() {
            if let Some((side, message)) = step.forward {
                let to = match side {
                    Side::Left => index - 1,
                    Side::Right => index + 1,
                };
                in_flight.push((to, side.arrives_on(), message));
            }
            if let Some(value) = step.fire {
                fires.push((index, value));
            }
            if let Some((to, channel, message)) = in_flight.pop() {
                let step = relay(Position::in_line(to, len), channel, message).unwrap();
                pending.push((to, step));
            }
        }
        fires
    }

    #[test]
    fn test_three_archer_volley() {
        let mut fires = simulate(3);
        fires.sort();
        assert_eq!(fires, vec![(0, 1), (1, 2), (2, 3)]);
    }

    proptest! {
        #[test]
        fn prop_every_archer_fires_once_with_its_position(len in 1usize..64) {
            let mut fires = simulate(len);
            prop_assert_eq!(fires.len(), len);
            fires.sort();
            for (index, value) in fires {
                prop_assert_eq!(value, index as i64 + 1);
            }
        }
    }
}
