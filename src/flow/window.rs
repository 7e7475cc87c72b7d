//! Per-direction flow-control window.
//!
//! A sender may have at most `maximum` bytes in flight beyond the
//! receiver's `acknowledge` position. Every fragment consumes `reserved`
//! credit, which covers its payload plus the receiver's `padding`.
//! Fragments with an empty payload may reserve nothing.

use thiserror::Error;

/// Window violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Reserved credit would exceed the window.
    #[error("window overrun: sequence {sequence} + reserved {reserved} > acknowledge {acknowledge} + maximum {maximum}")]
    Overrun {
        sequence: u64,
        reserved: u32,
        acknowledge: u64,
        maximum: u32,
    },

    /// Reserved credit does not cover payload plus padding.
    #[error("under-reserved fragment: reserved {reserved} < length {length} + padding {padding}")]
    Underreserved {
        reserved: u32,
        length: usize,
        padding: u32,
    },

    /// Sequence moved backwards.
    #[error("sequence regressed from {previous} to {sequence}")]
    SequenceRegressed { previous: u64, sequence: u64 },

    /// A WINDOW lowered acknowledge or maximum.
    #[error("credit retracted: acknowledge {previous_ack} -> {acknowledge}, maximum {previous_max} -> {maximum}")]
    CreditRetracted {
        previous_ack: u64,
        acknowledge: u64,
        previous_max: u32,
        maximum: u32,
    },

    /// A WINDOW acknowledged bytes never sent.
    #[error("acknowledge {acknowledge} beyond sequence {sequence}")]
    AckBeyondSequence { acknowledge: u64, sequence: u64 },

    /// Padding does not fit in a frame field once route overhead is added.
    #[error("padding {padding} + {extra} overflows")]
    PaddingOverflow { padding: u32, extra: u32 },
}

/// Padding advertised upstream: the downstream's own plus `extra` overhead.
pub fn add_padding(padding: u32, extra: u32) -> Result<u32, FlowError> {
    padding
        .checked_add(extra)
        .ok_or(FlowError::PaddingOverflow { padding, extra })
}

/// Flow state of one direction.
///
/// Invariant: `acknowledge <= sequence <= acknowledge + maximum`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub sequence: u64,
    pub acknowledge: u64,
    pub maximum: u32,
    pub budget_id: u64,
    pub padding: u32,
    pub capabilities: u8,
}

impl Window {
    /// Credit still available to the sender.
    #[inline]
    pub fn available(&self) -> u64 {
        self.limit().saturating_sub(self.sequence)
    }

    /// Highest sequence the sender may reach.
    #[inline]
    fn limit(&self) -> u64 {
        self.acknowledge.saturating_add(self.maximum as u64)
    }

    /// Everything sent has been acknowledged.
    #[inline]
    pub fn is_drained(&self) -> bool {
        self.sequence == self.acknowledge
    }

    /// Take the initial positions announced by a BEGIN.
    pub fn on_begin(&mut self, sequence: u64, acknowledge: u64) -> Result<(), FlowError> {
        if sequence < self.sequence {
            return Err(FlowError::SequenceRegressed {
                previous: self.sequence,
                sequence,
            });
        }
        if acknowledge < self.acknowledge {
            return Err(FlowError::CreditRetracted {
                previous_ack: self.acknowledge,
                acknowledge,
                previous_max: self.maximum,
                maximum: self.maximum,
            });
        }
        if acknowledge > sequence {
            return Err(FlowError::AckBeyondSequence {
                acknowledge,
                sequence,
            });
        }
        self.sequence = sequence;
        self.acknowledge = acknowledge;
        Ok(())
    }

    /// Check a fragment at `sequence` against the window without applying it.
    pub fn check(&self, sequence: u64, reserved: u32, length: usize) -> Result<(), FlowError> {
        if sequence < self.sequence {
            return Err(FlowError::SequenceRegressed {
                previous: self.sequence,
                sequence,
            });
        }
        if length > 0 && (reserved as u64) < length as u64 + self.padding as u64 {
            return Err(FlowError::Underreserved {
                reserved,
                length,
                padding: self.padding,
            });
        }
        self.end_of(sequence, reserved).map(|_| ())
    }

    /// Sequence after a fragment of `reserved` credit sent at `sequence`.
    fn end_of(&self, sequence: u64, reserved: u32) -> Result<u64, FlowError> {
        match sequence.checked_add(reserved as u64) {
            Some(end) if end <= self.limit() => Ok(end),
            _ => Err(FlowError::Overrun {
                sequence,
                reserved,
                acknowledge: self.acknowledge,
                maximum: self.maximum,
            }),
        }
    }

    /// Account for a received fragment.
    pub fn on_data(&mut self, sequence: u64, reserved: u32, length: usize) -> Result<(), FlowError> {
        self.check(sequence, reserved, length)?;
        self.sequence = self.end_of(sequence, reserved)?;
        Ok(())
    }

    /// Account for a fragment about to be sent at the current sequence.
    pub fn acquire(&mut self, reserved: u32, length: usize) -> Result<(), FlowError> {
        self.check(self.sequence, reserved, length)?;
        self.sequence = self.end_of(self.sequence, reserved)?;
        Ok(())
    }

    /// Apply a credit grant. Credit may only grow.
    pub fn on_credit(
        &mut self,
        acknowledge: u64,
        maximum: u32,
        budget_id: u64,
        padding: u32,
    ) -> Result<(), FlowError> {
        if acknowledge < self.acknowledge || maximum < self.maximum {
            return Err(FlowError::CreditRetracted {
                previous_ack: self.acknowledge,
                acknowledge,
                previous_max: self.maximum,
                maximum,
            });
        }
        if acknowledge > self.sequence {
            return Err(FlowError::AckBeyondSequence {
                acknowledge,
                sequence: self.sequence,
            });
        }

        self.acknowledge = acknowledge;
        self.maximum = maximum;
        self.budget_id = budget_id;
        self.padding = padding;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn window(maximum: u32, padding: u32) -> Window {
        let mut window = Window::default();
        window.on_credit(0, maximum, 0, padding).unwrap();
        window
    }

    #[test]
    fn test_acquire_within_window() {
        let mut w = window(10, 4);
        w.acquire(10, 6).unwrap();
        assert_eq!(w.sequence, 10);
        assert_eq!(w.available(), 0);
    }

    #[test]
    fn test_sequence_overflow_is_overrun() {
        let mut w = window(64, 0);
        let err = w.on_data(u64::MAX - 1, 3, 3).unwrap_err();
        assert!(matches!(err, FlowError::Overrun { sequence, .. } if sequence == u64::MAX - 1));
        assert_eq!(w.sequence, 0);
    }

    #[test]
    fn test_begin_positions_validated() {
        let mut w = Window::default();
        assert_eq!(
            w.on_begin(0, 10),
            Err(FlowError::AckBeyondSequence {
                acknowledge: 10,
                sequence: 0
            })
        );
        assert_eq!(w, Window::default());

        w.on_begin(20, 12).unwrap();
        assert_eq!((w.sequence, w.acknowledge), (20, 12));
        assert!(matches!(w.on_begin(19, 12), Err(FlowError::SequenceRegressed { .. })));
    }

    #[test]
    fn test_padding_overflow() {
        assert_eq!(add_padding(4, 2), Ok(6));
        assert_eq!(
            add_padding(u32::MAX, 2),
            Err(FlowError::PaddingOverflow {
                padding: u32::MAX,
                extra: 2
            })
        );
    }

    #[test]
    fn test_saturated_limit_does_not_overflow() {
        let mut w = Window {
            sequence: u64::MAX - 4,
            acknowledge: u64::MAX - 4,
            ..Window::default()
        };
        w.on_credit(u64::MAX - 4, u32::MAX, 0, 0).unwrap();
        assert_eq!(w.available(), 4);
        w.acquire(4, 4).unwrap();
        assert!(w.acquire(1, 1).is_err());
    }

    #[test]
    fn test_overrun_rejected() {
        let mut w = window(10, 4);
        let err = w.acquire(11, 7).unwrap_err();
        assert!(matches!(err, FlowError::Overrun { .. }));
        assert_eq!(w.sequence, 0);
    }

    #[test]
    fn test_underreserved_rejected() {
        let w = window(100, 4);
        assert_eq!(
            w.check(0, 7, 7),
            Err(FlowError::Underreserved {
                reserved: 7,
                length: 7,
                padding: 4
            })
        );
    }

    #[test]
    fn test_empty_fragment_reserves_nothing() {
        let mut w = window(0, 4);
        w.acquire(0, 0).unwrap();
        assert!(w.is_drained());
    }

    #[test]
    fn test_on_data_rejects_regression() {
        let mut w = window(100, 0);
        w.on_data(0, 20, 20).unwrap();
        let err = w.on_data(10, 5, 5).unwrap_err();
        assert!(matches!(err, FlowError::SequenceRegressed { previous: 20, .. }));
    }

    #[test]
    fn test_credit_retraction_rejected() {
        let mut w = window(100, 0);
        w.acquire(50, 50).unwrap();
        w.on_credit(40, 100, 0, 0).unwrap();

        assert!(matches!(
            w.on_credit(30, 100, 0, 0),
            Err(FlowError::CreditRetracted { .. })
        ));
        assert!(matches!(
            w.on_credit(40, 90, 0, 0),
            Err(FlowError::CreditRetracted { .. })
        ));
        assert_eq!(w.acknowledge, 40);
        assert_eq!(w.maximum, 100);
    }

    #[test]
    fn test_ack_beyond_sequence_rejected() {
        let mut w = window(100, 0);
        w.acquire(10, 10).unwrap();
        assert_eq!(
            w.on_credit(11, 100, 0, 0),
            Err(FlowError::AckBeyondSequence {
                acknowledge: 11,
                sequence: 10
            })
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Send(usize),
        Credit(u64, u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..64).prop_map(Op::Send),
            (0u64..128, 0u32..256).prop_map(|(ack, max)| Op::Credit(ack, max)),
        ]
    }

    proptest! {
        #[test]
        fn window_invariant_holds(padding in 0u32..8, ops in prop::collection::vec(op(), 0..64)) {
            let mut w = window(32, padding);
            for op in ops {
                match op {
                    Op::Send(len) => {
                        let reserved = if len == 0 { 0 } else { len as u32 + padding };
                        let _ = w.acquire(reserved, len);
                    }
                    Op::Credit(ack, max) => {
                        let _ = w.on_credit(ack, max, 0, padding);
                    }
                }
                prop_assert!(w.acknowledge <= w.sequence);
                prop_assert!(w.sequence - w.acknowledge <= w.maximum as u64);
            }
        }

        #[test]
        fn accepted_credit_is_monotonic(grants in prop::collection::vec((0u64..64, 0u32..128), 0..64)) {
            let mut w = Window { sequence: 64, ..Window::default() };
            let (mut ack, mut max) = (0u64, 0u32);
            for (a, m) in grants {
                if w.on_credit(a, m, 0, 0).is_ok() {
                    prop_assert!(w.acknowledge >= ack);
                    prop_assert!(w.maximum >= max);
                }
                ack = w.acknowledge;
                max = w.maximum;
            }
        }
    }
}
