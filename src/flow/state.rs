//! Stream half state machine.
//!
//! ```text
//! Unopened ──begin/accept──► Opening ──window──► Open ──closing──► Closing
//!     │                         │                 │                  │
//!     └─────────────────────────┴──────close──────┴──────────────────┴──► Closed
//! ```
//!
//! Every transition is a guard: it returns `true` only if the state
//! actually changed, so callers emit a frame exactly when it returns `true`.

/// Which half of a stream pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Half {
    /// Request direction (odd stream id).
    Initial,
    /// Response direction (even stream id).
    Reply,
}

impl Half {
    /// Half addressed by a stream id.
    #[inline]
    pub fn of(stream_id: u64) -> Self {
        if crate::protocol::is_initial(stream_id) {
            Half::Initial
        } else {
            Half::Reply
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Half::Initial => Half::Reply,
            Half::Reply => Half::Initial,
        }
    }
}

/// Lifecycle of one stream half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HalfState {
    #[default]
    Unopened,
    /// BEGIN written, no credit seen yet.
    Opening,
    Open,
    /// END requested, waiting for in-flight bytes to drain.
    Closing,
    Closed,
}

impl HalfState {
    /// Local BEGIN emitted.
    pub fn begin(&mut self) -> bool {
        self.advance(HalfState::Unopened, HalfState::Opening)
    }

    /// First credit received for a half we opened.
    pub fn window(&mut self) -> bool {
        self.advance(HalfState::Opening, HalfState::Open)
    }

    /// Remote BEGIN accepted.
    pub fn accept(&mut self) -> bool {
        self.advance(HalfState::Unopened, HalfState::Open)
    }

    /// Local END requested.
    pub fn closing(&mut self) -> bool {
        match self {
            HalfState::Opening | HalfState::Open => {
                *self = HalfState::Closing;
                true
            }
            _ => false,
        }
    }

    /// Terminal transition. A second close is a no-op.
    pub fn close(&mut self) -> bool {
        if *self == HalfState::Closed {
            return false;
        }
        *self = HalfState::Closed;
        true
    }

    fn advance(&mut self, from: HalfState, to: HalfState) -> bool {
        if *self != from {
            return false;
        }
        *self = to;
        true
    }

    #[inline]
    pub fn is_unopened(self) -> bool {
        self == HalfState::Unopened
    }

    #[inline]
    pub fn is_open(self) -> bool {
        self == HalfState::Open
    }

    #[inline]
    pub fn is_closing(self) -> bool {
        self == HalfState::Closing
    }

    #[inline]
    pub fn is_closed(self) -> bool {
        self == HalfState::Closed
    }

    /// Opened at some point, open or not.
    #[inline]
    pub fn is_started(self) -> bool {
        self != HalfState::Unopened
    }

    /// Started and not yet closed.
    #[inline]
    pub fn is_active(self) -> bool {
        self.is_started() && !self.is_closed()
    }
}

/// States of both halves of a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairState {
    pub initial: HalfState,
    pub reply: HalfState,
}

impl PairState {
    #[inline]
    pub fn get(&self, half: Half) -> HalfState {
        match half {
            Half::Initial => self.initial,
            Half::Reply => self.reply,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, half: Half) -> &mut HalfState {
        match half {
            Half::Initial => &mut self.initial,
            Half::Reply => &mut self.reply,
        }
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.initial.is_started() || self.reply.is_started()
    }

    /// Both halves closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.initial.is_closed() && self.reply.is_closed()
    }
}
