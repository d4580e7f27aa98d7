//! TMS sequences that move the TAP between any two states.
use crate::{error::ReadError, tap::TapState};

/// A TMS sequence of up to eight cycles, applied LSB first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TmsSequence {
    /// number of TCK cycles to clock
    pub length: u8,
    /// TMS level for each cycle, bit 0 first
    pub bits: u8,
}

impl TmsSequence {
    const fn new(bits: u8, length: u8) -> TmsSequence {
        TmsSequence { length, bits }
    }

    /// Eight cycles with TMS held high. Reaches TLR from any state.
    pub const RESET: TmsSequence = TmsSequence::new(0xff, 8);

    /// Extra TMS-low cycles clocked after entering RTI or PauDR.
    pub const SETTLE_CYCLES: u8 = 5;

    /// The sequence clocked to move the TAP from `src` to `dst`.
    ///
    /// Reset always uses [`TmsSequence::RESET`], independent of `src`.
    /// Entering RTI or PauDR appends [`TmsSequence::SETTLE_CYCLES`] cycles with TMS low,
    /// which keeps the TAP in the target state.
    pub fn transition(src: TapState, dst: TapState) -> TmsSequence {
        let mut sequence = if dst == TapState::TLR {
            TmsSequence::RESET
        } else {
            TMS_CYCLE_LOOKUP[src as usize][dst as usize]
        };
        if matches!(dst, TapState::RTI | TapState::PauDR) {
            sequence.length += TmsSequence::SETTLE_CYCLES;
        }
        sequence
    }

    /// Replays the sequence on a TAP that starts in `from`.
    pub fn apply(&self, from: TapState) -> TapState {
        (0..self.length).fold(from, |state, cycle| {
            let tms = cycle < 8 && (self.bits >> cycle) & 1 == 1;
            state.next(tms)
        })
    }
}

// Shortest-path TMS cycles between any two TAP states. Rows are the start state,
// columns the destination, both in `TapState` index order.
#[rustfmt::skip]
const TMS_CYCLE_LOOKUP: [[TmsSequence; 16]; 16] = {
    const fn t(bits: u8, length: u8) -> TmsSequence {
        TmsSequence::new(bits, length)
    }
    [
        /* TLR   */ [t(0x00,0),t(0x00,1),t(0x02,2),t(0x02,3),t(0x02,4),t(0x0a,4),t(0x0a,5),t(0x2a,6),t(0x1a,5),t(0x06,3),t(0x06,4),t(0x06,5),t(0x16,5),t(0x16,6),t(0x56,7),t(0x36,6)],
        /* RTI   */ [t(0x07,3),t(0x00,0),t(0x01,1),t(0x01,2),t(0x01,3),t(0x05,3),t(0x05,4),t(0x15,5),t(0x0d,4),t(0x03,2),t(0x03,3),t(0x03,4),t(0x0b,4),t(0x0b,5),t(0x2b,6),t(0x1b,5)],
        /* SelDR */ [t(0x03,2),t(0x03,3),t(0x00,0),t(0x00,1),t(0x00,2),t(0x02,2),t(0x02,3),t(0x0a,4),t(0x06,3),t(0x01,1),t(0x01,2),t(0x01,3),t(0x05,3),t(0x05,4),t(0x15,5),t(0x0d,4)],
        /* CapDR */ [t(0x1f,5),t(0x03,3),t(0x07,3),t(0x00,0),t(0x00,1),t(0x01,1),t(0x01,2),t(0x05,3),t(0x03,2),t(0x0f,4),t(0x0f,5),t(0x0f,6),t(0x2f,6),t(0x2f,7),t(0xaf,8),t(0x6f,7)],
        /* ShfDR */ [t(0x1f,5),t(0x03,3),t(0x07,3),t(0x07,4),t(0x00,0),t(0x01,1),t(0x01,2),t(0x05,3),t(0x03,2),t(0x0f,4),t(0x0f,5),t(0x0f,6),t(0x2f,6),t(0x2f,7),t(0xaf,8),t(0x6f,7)],
        /* Ex1DR */ [t(0x0f,4),t(0x01,2),t(0x03,2),t(0x03,3),t(0x02,3),t(0x00,0),t(0x00,1),t(0x02,2),t(0x01,1),t(0x07,3),t(0x07,4),t(0x07,5),t(0x17,5),t(0x17,6),t(0x57,7),t(0x37,6)],
        /* PauDR */ [t(0x1f,5),t(0x03,3),t(0x07,3),t(0x07,4),t(0x01,2),t(0x05,3),t(0x00,0),t(0x01,1),t(0x03,2),t(0x0f,4),t(0x0f,5),t(0x0f,6),t(0x2f,6),t(0x2f,7),t(0xaf,8),t(0x6f,7)],
        /* Ex2DR */ [t(0x0f,4),t(0x01,2),t(0x03,2),t(0x03,3),t(0x00,1),t(0x02,2),t(0x02,3),t(0x00,0),t(0x01,1),t(0x07,3),t(0x07,4),t(0x07,5),t(0x17,5),t(0x17,6),t(0x57,7),t(0x37,6)],
        /* UpdDR */ [t(0x07,3),t(0x00,1),t(0x01,1),t(0x01,2),t(0x01,3),t(0x05,3),t(0x05,4),t(0x15,5),t(0x00,0),t(0x03,2),t(0x03,3),t(0x03,4),t(0x0b,4),t(0x0b,5),t(0x2b,6),t(0x1b,5)],
        /* SelIR */ [t(0x01,1),t(0x01,2),t(0x05,3),t(0x05,4),t(0x05,5),t(0x15,5),t(0x15,6),t(0x55,7),t(0x35,6),t(0x00,0),t(0x00,1),t(0x00,2),t(0x02,2),t(0x02,3),t(0x0a,4),t(0x06,3)],
        /* CapIR */ [t(0x1f,5),t(0x03,3),t(0x07,3),t(0x07,4),t(0x07,5),t(0x17,5),t(0x17,6),t(0x57,7),t(0x37,6),t(0x0f,4),t(0x00,0),t(0x00,1),t(0x01,1),t(0x01,2),t(0x05,3),t(0x03,2)],
        /* ShfIR */ [t(0x1f,5),t(0x03,3),t(0x07,3),t(0x07,4),t(0x07,5),t(0x17,5),t(0x17,6),t(0x57,7),t(0x37,6),t(0x0f,4),t(0x0f,5),t(0x00,0),t(0x01,1),t(0x01,2),t(0x05,3),t(0x03,2)],
        /* Ex1IR */ [t(0x0f,4),t(0x01,2),t(0x03,2),t(0x03,3),t(0x03,4),t(0x0b,4),t(0x0b,5),t(0x2b,6),t(0x1b,5),t(0x07,3),t(0x07,4),t(0x02,3),t(0x00,0),t(0x00,1),t(0x02,2),t(0x01,1)],
        /* PauIR */ [t(0x1f,5),t(0x03,3),t(0x07,3),t(0x07,4),t(0x07,5),t(0x17,5),t(0x17,6),t(0x57,7),t(0x37,6),t(0x0f,4),t(0x0f,5),t(0x01,2),t(0x05,3),t(0x00,0),t(0x01,1),t(0x03,2)],
        /* Ex2IR */ [t(0x0f,4),t(0x01,2),t(0x03,2),t(0x03,3),t(0x03,4),t(0x0b,4),t(0x0b,5),t(0x2b,6),t(0x1b,5),t(0x07,3),t(0x07,4),t(0x00,1),t(0x02,2),t(0x02,3),t(0x00,0),t(0x01,1)],
        /* UpdIR */ [t(0x07,3),t(0x00,1),t(0x01,1),t(0x01,2),t(0x01,3),t(0x05,3),t(0x05,4),t(0x15,5),t(0x0d,4),t(0x03,2),t(0x03,3),t(0x03,4),t(0x0b,4),t(0x0b,5),t(0x2b,6),t(0x00,0)],
    ]
};

/// Looks up the raw table entry for a transition given by state indices.
///
/// Fails if either index is outside `0..16`. Unlike [`TmsSequence::transition`],
/// no reset or settle-cycle adjustment is applied.
pub fn generate_tms_bits(src: u8, dst: u8) -> Result<TmsSequence, ReadError> {
    let src = TapState::try_from(src)?;
    let dst = TapState::try_from(dst)?;
    Ok(TMS_CYCLE_LOOKUP[src as usize][dst as usize])
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = TapState> {
        (0u8..16).prop_map(|i| TapState::try_from(i).unwrap())
    }

    #[test]
    fn tlr_to_shift_dr() {
        let seq = generate_tms_bits(TapState::TLR.index(), TapState::ShfDR.index()).unwrap();
        assert_eq!(seq, TmsSequence { length: 4, bits: 0x02 });
    }

    #[test]
    fn diagonal_is_empty() {
        for state in TapState::ALL {
            let seq = generate_tms_bits(state.index(), state.index()).unwrap();
            assert_eq!(seq.length, 0);
        }
    }

    #[test]
    fn out_of_range_indices_fail() {
        assert!(matches!(
            generate_tms_bits(16, 0),
            Err(ReadError::InvalidState(16))
        ));
        assert!(matches!(
            generate_tms_bits(0, 200),
            Err(ReadError::InvalidState(200))
        ));
    }

    #[test]
    fn reset_ignores_table() {
        for src in TapState::ALL {
            assert_eq!(
                TmsSequence::transition(src, TapState::TLR),
                TmsSequence::RESET
            );
        }
    }

    #[test]
    fn settle_cycles_for_idle_and_pause_dr() {
        let rti = TmsSequence::transition(TapState::UpdDR, TapState::RTI);
        assert_eq!(rti, TmsSequence { length: 6, bits: 0x00 });
        let pause = TmsSequence::transition(TapState::ShfDR, TapState::PauDR);
        assert_eq!(pause, TmsSequence { length: 7, bits: 0x01 });
        let pause_ir = TmsSequence::transition(TapState::ShfIR, TapState::PauIR);
        assert_eq!(pause_ir, TmsSequence { length: 2, bits: 0x01 });
    }

    proptest! {
        #[test]
        fn table_lands_on_destination(src in any_state(), dst in any_state()) {
            let seq = generate_tms_bits(src.index(), dst.index()).unwrap();
            prop_assert!(seq.length <= 8);
            prop_assert_eq!(seq.apply(src), dst);
        }

        #[test]
        fn transition_lands_on_destination(src in any_state(), dst in any_state()) {
            prop_assert_eq!(TmsSequence::transition(src, dst).apply(src), dst);
        }
    }
}
