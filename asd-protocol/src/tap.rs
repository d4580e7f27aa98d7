use std::fmt::Display;

use crate::error::ReadError;

/// The 16 states of the JTAG Test Access Port state machine.
///
/// The discriminants are the indices used on the wire and in the TMS lookup table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum TapState {
    TLR = 0,
    RTI = 1,
    SelDR = 2,
    CapDR = 3,
    ShfDR = 4,
    Ex1DR = 5,
    PauDR = 6,
    Ex2DR = 7,
    UpdDR = 8,
    SelIR = 9,
    CapIR = 10,
    ShfIR = 11,
    Ex1IR = 12,
    PauIR = 13,
    Ex2IR = 14,
    UpdIR = 15,
}

impl TapState {
    /// All states, ordered by their index.
    pub const ALL: [TapState; 16] = [
        TapState::TLR,
        TapState::RTI,
        TapState::SelDR,
        TapState::CapDR,
        TapState::ShfDR,
        TapState::Ex1DR,
        TapState::PauDR,
        TapState::Ex2DR,
        TapState::UpdDR,
        TapState::SelIR,
        TapState::CapIR,
        TapState::ShfIR,
        TapState::Ex1IR,
        TapState::PauIR,
        TapState::Ex2IR,
        TapState::UpdIR,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            TapState::TLR => "TLR",
            TapState::RTI => "RTI",
            TapState::SelDR => "SelDR",
            TapState::CapDR => "CapDR",
            TapState::ShfDR => "ShfDR",
            TapState::Ex1DR => "Ex1DR",
            TapState::PauDR => "PauDR",
            TapState::Ex2DR => "Ex2DR",
            TapState::UpdDR => "UpdDR",
            TapState::SelIR => "SelIR",
            TapState::CapIR => "CapIR",
            TapState::ShfIR => "ShfIR",
            TapState::Ex1IR => "Ex1IR",
            TapState::PauIR => "PauIR",
            TapState::Ex2IR => "Ex2IR",
            TapState::UpdIR => "UpdIR",
        }
    }

    /// Whether data is shifted through TDI/TDO in this state.
    pub fn is_shift(self) -> bool {
        matches!(self, TapState::ShfDR | TapState::ShfIR)
    }

    /// The state reached after one TCK cycle with the given TMS level,
    /// as defined by the IEEE 1149.1 state diagram.
    pub fn next(self, tms: bool) -> TapState {
        use TapState::*;
        match (self, tms) {
            (TLR, false) => RTI,
            (TLR, true) => TLR,
            (RTI, false) => RTI,
            (RTI, true) => SelDR,
            (SelDR, false) => CapDR,
            (SelDR, true) => SelIR,
            (CapDR, false) => ShfDR,
            (CapDR, true) => Ex1DR,
            (ShfDR, false) => ShfDR,
            (ShfDR, true) => Ex1DR,
            (Ex1DR, false) => PauDR,
            (Ex1DR, true) => UpdDR,
            (PauDR, false) => PauDR,
            (PauDR, true) => Ex2DR,
            (Ex2DR, false) => ShfDR,
            (Ex2DR, true) => UpdDR,
            (UpdDR, false) => RTI,
            (UpdDR, true) => SelDR,
            (SelIR, false) => CapIR,
            (SelIR, true) => TLR,
            (CapIR, false) => ShfIR,
            (CapIR, true) => Ex1IR,
            (ShfIR, false) => ShfIR,
            (ShfIR, true) => Ex1IR,
            (Ex1IR, false) => PauIR,
            (Ex1IR, true) => UpdIR,
            (PauIR, false) => PauIR,
            (PauIR, true) => Ex2IR,
            (Ex2IR, false) => ShfIR,
            (Ex2IR, true) => UpdIR,
            (UpdIR, false) => RTI,
            (UpdIR, true) => SelDR,
        }
    }
}

impl TryFrom<u8> for TapState {
    type Error = ReadError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TapState::ALL
            .get(value as usize)
            .copied()
            .ok_or(ReadError::InvalidState(value))
    }
}

impl Display for TapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[test]
fn index_round_trip() {
    for state in TapState::ALL {
        assert_eq!(TapState::try_from(state.index()).unwrap(), state);
    }
    assert!(matches!(
        TapState::try_from(16),
        Err(ReadError::InvalidState(16))
    ));
}

#[test]
fn five_ones_reach_reset_from_anywhere() {
    for state in TapState::ALL {
        let end = (0..5).fold(state, |s, _| s.next(true));
        assert_eq!(end, TapState::TLR, "from {}", state);
    }
}
