//! The JTAG engine: TAP state per scan chain, padding and scan orchestration.
use std::sync::Arc;

use asd_protocol::{PaddingKind, frame::MAX_TRANSFER_BITS, tap::TapState, tms::TmsSequence};

use crate::{Transport, bridge::Bridge, error::AsdError};

pub const MAX_SCAN_CHAINS: usize = 4;
/// Upper bound of DR pre and post padding in bits.
pub const MAX_DR_PADDING: u32 = 262_144;
/// Upper bound of IR pre and post padding in bits.
pub const MAX_IR_PADDING: u32 = 2_000;

const PAD_BUFFER_SIZE: usize = MAX_DR_PADDING as usize / 8;

/// Path the bridge uses to move debug messages.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum MessageFlow {
    #[default]
    Bmc = 1,
    /// Messages flow through the bridge controller, which also relays
    /// out-of-band messages back to the client.
    Bic = 2,
}

impl MessageFlow {
    pub fn from_u8(value: u8) -> Option<MessageFlow> {
        match value {
            1 => Some(MessageFlow::Bmc),
            2 => Some(MessageFlow::Bic),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScanMode {
    Software,
    Hardware,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ScanState {
    /// The next shift starts a new scan and is preceded by pre-padding.
    #[default]
    Done,
    Run,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct Padding {
    pub dr_pre: u32,
    pub dr_post: u32,
    pub ir_pre: u32,
    pub ir_post: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanChain {
    pub tap_state: TapState,
    pub scan_state: ScanState,
    pub padding: Padding,
}

impl Default for ScanChain {
    fn default() -> Self {
        ScanChain {
            tap_state: TapState::TLR,
            scan_state: ScanState::Done,
            padding: Padding::default(),
        }
    }
}

/// Identity of the target the handler drives.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct HandlerSettings {
    pub fru: u8,
    pub msg_flow: MessageFlow,
    /// Ignore requests for software mode.
    pub force_jtag_hw: bool,
}

/// One physical shift, from a shift state to `end_state`.
#[derive(Debug)]
pub struct ScanRequest<'a> {
    pub mode: ScanMode,
    pub from: TapState,
    pub num_bits: u32,
    pub tdi: &'a [u8],
    pub tdo: &'a mut [u8],
    pub end_state: TapState,
}

pub struct JtagHandler<T> {
    bridge: Bridge<T>,
    settings: HandlerSettings,
    chains: [ScanChain; MAX_SCAN_CHAINS],
    active: usize,
    sw_mode: bool,
    pad_ones: Arc<[u8]>,
    pad_zeros: Arc<[u8]>,
}

impl<T: Transport> JtagHandler<T> {
    pub fn new(transport: T, settings: HandlerSettings) -> JtagHandler<T> {
        JtagHandler {
            bridge: Bridge::new(transport),
            settings,
            chains: [ScanChain::default(); MAX_SCAN_CHAINS],
            active: 0,
            sw_mode: false,
            pad_ones: vec![0xff; PAD_BUFFER_SIZE].into(),
            pad_zeros: vec![0x00; PAD_BUFFER_SIZE].into(),
        }
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    pub fn sw_mode(&self) -> bool {
        self.sw_mode
    }

    pub fn active_chain(&self) -> &ScanChain {
        &self.chains[self.active]
    }

    pub fn active_chain_index(&self) -> usize {
        self.active
    }

    fn chain_mut(&mut self) -> &mut ScanChain {
        &mut self.chains[self.active]
    }

    /// Enters ASD mode on the bridge, resets the TAP and all scan chains.
    ///
    /// A bridge refusing ASD mode is logged but does not fail initialization.
    pub fn initialize(&mut self, sw_mode: bool) -> Result<(), AsdError> {
        self.sw_mode = sw_mode && !self.settings.force_jtag_hw;
        log::info!(
            "Initializing JTAG in {} mode, fru {}",
            if self.sw_mode { "software" } else { "hardware" },
            self.settings.fru
        );
        if let Err(e) = self.bridge.asd_init(self.settings.msg_flow as u8) {
            log::error!("ASD init failed, fru {}: {}", self.settings.fru, e);
        }
        self.set_tap_state(TapState::TLR)?;
        self.chains = [ScanChain::default(); MAX_SCAN_CHAINS];
        Ok(())
    }

    /// Takes the bridge out of ASD mode. Failures are logged only.
    pub fn deinitialize(&mut self) {
        if let Err(e) = self.bridge.asd_deinit() {
            log::error!("ASD deinit failed, fru {}: {}", self.settings.fru, e);
        }
    }

    pub fn set_padding(&mut self, kind: PaddingKind, value: u32) -> Result<(), AsdError> {
        let max = if kind.is_ir() {
            MAX_IR_PADDING
        } else {
            MAX_DR_PADDING
        };
        if value > max {
            return Err(AsdError::Config(format!(
                "{:?} padding of {} bits exceeds {}",
                kind, value, max
            )));
        }
        let padding = &mut self.chain_mut().padding;
        match kind {
            PaddingKind::DRPre => padding.dr_pre = value,
            PaddingKind::DRPost => padding.dr_post = value,
            PaddingKind::IRPre => padding.ir_pre = value,
            PaddingKind::IRPost => padding.ir_post = value,
        }
        Ok(())
    }

    pub fn tap_reset(&mut self) -> Result<(), AsdError> {
        self.set_tap_state(TapState::TLR)
    }

    pub fn tap_state(&self) -> TapState {
        self.active_chain().tap_state
    }

    /// Moves the active chain to `target`. A reset is always clocked, other
    /// targets equal to the current state are a no-op.
    pub fn set_tap_state(&mut self, target: TapState) -> Result<(), AsdError> {
        let current = self.tap_state();
        if target != TapState::TLR && current == target {
            return Ok(());
        }
        let sequence = TmsSequence::transition(current, target);
        self.bridge.set_tap_state_wrapper(sequence)?;
        self.chain_mut().tap_state = target;
        log::info!("Goto state: {} ({})", target, target.index());
        Ok(())
    }

    /// Shifts `num_bits` through the active chain and ends in `end_state`.
    ///
    /// The chain must be in ShfDR or ShfIR. The first shift of a scan is preceded
    /// by the chain's pre-padding. Post-padding is shifted once the scan leaves the
    /// shift state. IR padding shifts ones, DR padding shifts zeros.
    pub fn shift(
        &mut self,
        num_bits: u32,
        tdi: &[u8],
        tdo: &mut [u8],
        end_state: TapState,
    ) -> Result<(), AsdError> {
        let current = self.tap_state();
        let padding = self.active_chain().padding;
        let (pre, post, pad) = match current {
            TapState::ShfIR => (padding.ir_pre, padding.ir_post, Arc::clone(&self.pad_ones)),
            TapState::ShfDR => (padding.dr_pre, padding.dr_post, Arc::clone(&self.pad_zeros)),
            other => {
                return Err(AsdError::State(format!(
                    "Shift called in {}, expected ShfDR or ShfIR",
                    other
                )));
            }
        };

        if self.active_chain().scan_state == ScanState::Done {
            self.chain_mut().scan_state = ScanState::Run;
            if pre > 0 {
                self.perform_shift(self.request(current, pre, &pad, &mut [], current))?;
            }
        }

        if post > 0 && current != end_state {
            self.chain_mut().scan_state = ScanState::Done;
            self.perform_shift(self.request(current, num_bits, tdi, tdo, current))?;
            self.perform_shift(self.request(current, post, &pad, &mut [], end_state))?;
        } else {
            self.perform_shift(self.request(current, num_bits, tdi, tdo, end_state))?;
            if current != end_state {
                self.chain_mut().scan_state = ScanState::Done;
            }
        }
        Ok(())
    }

    fn request<'a>(
        &self,
        from: TapState,
        num_bits: u32,
        tdi: &'a [u8],
        tdo: &'a mut [u8],
        end_state: TapState,
    ) -> ScanRequest<'a> {
        ScanRequest {
            mode: if self.sw_mode {
                ScanMode::Software
            } else {
                ScanMode::Hardware
            },
            from,
            num_bits,
            tdi,
            tdo,
            end_state,
        }
    }

    /// Transfers the data phase in frames and then moves to the request's end state.
    pub fn perform_shift(&mut self, mut request: ScanRequest<'_>) -> Result<(), AsdError> {
        if let Err(e) = self.read_write_scan(&mut request) {
            log::error!("Read write scan failed, fru {}: {}", self.settings.fru, e);
            return Err(e);
        }
        self.set_tap_state(request.end_state)?;
        self.chain_mut().tap_state = request.end_state;

        let register = if request.from == TapState::ShfIR {
            "IR"
        } else {
            "DR"
        };
        log::trace!("Shift {} TDI: {:02x?}", register, request.tdi);
        log::trace!("Shift {} TDO: {:02x?}", register, request.tdo);
        Ok(())
    }

    fn read_write_scan(&mut self, request: &mut ScanRequest<'_>) -> Result<(), AsdError> {
        let total = request.num_bits as u64;
        let mut write_bits = request.tdi.len() as u64 * 8;
        let mut read_bits = request.tdo.len() as u64 * 8;
        if write_bits < total && read_bits < total {
            return Err(AsdError::InvalidLength(format!(
                "read ({}) and write ({}) capacity below transfer length {}",
                read_bits, write_bits, total
            )));
        }
        write_bits = write_bits.min(total);
        read_bits = read_bits.min(total);
        log::trace!("{:?} scan of {} bits from {}", request.mode, total, request.from);

        let mut remaining = total;
        let mut last_transaction = false;
        let (mut tdi_offset, mut tdo_offset) = (0usize, 0usize);
        while remaining > 0 {
            let this_write = write_bits.min(MAX_TRANSFER_BITS as u64);
            let this_read = read_bits.min(MAX_TRANSFER_BITS as u64);
            if last_transaction || (this_write == 0 && this_read == 0) {
                return Err(AsdError::InvalidLength(format!(
                    "invalid segment: read={}, write={}, last_transaction={}",
                    this_read, this_write, last_transaction
                )));
            }
            remaining = remaining
                .checked_sub(this_write.max(this_read))
                .ok_or_else(|| {
                    AsdError::InvalidLength(format!(
                        "segment of {} bits overruns the transfer",
                        this_write.max(this_read)
                    ))
                })?;
            if remaining > 0 {
                log::debug!(
                    "Multi frame transfer, fru {}, {} bits remaining",
                    self.settings.fru,
                    remaining
                );
            }
            write_bits -= this_write;
            read_bits -= this_read;

            last_transaction = remaining == 0 && !request.end_state.is_shift();
            self.bridge.shift_wrapper(
                this_write as u16,
                request.tdi.get(tdi_offset..).unwrap_or_default(),
                this_read as u16,
                request.tdo.get_mut(tdo_offset..).unwrap_or_default(),
                last_transaction,
            )?;
            if last_transaction {
                let chain = self.chain_mut();
                chain.tap_state = if chain.tap_state == TapState::ShfDR {
                    TapState::Ex1DR
                } else {
                    TapState::Ex1IR
                };
            }
            tdi_offset += (this_write >> 3) as usize;
            tdo_offset += (this_read >> 3) as usize;
        }
        Ok(())
    }

    /// Clocks `cycles` TCK cycles with TMS low. Only meaningful in RTI, PauDR or PauIR,
    /// which the caller has to ensure.
    pub fn wait_cycles(&mut self, cycles: u32) -> Result<(), AsdError> {
        self.bridge.clock_cycle(cycles)
    }

    pub fn set_active_chain(&mut self, index: u8) -> Result<(), AsdError> {
        if index as usize >= MAX_SCAN_CHAINS {
            return Err(AsdError::Config(format!(
                "Scan chain {} out of range, maximum is {}",
                index,
                MAX_SCAN_CHAINS - 1
            )));
        }
        self.active = index as usize;
        Ok(())
    }

    /// The bridge runs TCK at a fixed rate, the request is accepted and ignored.
    pub fn set_tck(&mut self, period: u32) -> Result<(), AsdError> {
        log::debug!("Ignoring TCK period {}", period);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{Exchange, LoopbackTransport};
    use asd_protocol::frame::{ShiftFrame, TapStateFrame};
    use proptest::prelude::*;

    fn handler() -> (LoopbackTransport, JtagHandler<LoopbackTransport>) {
        let sim = LoopbackTransport::new();
        let settings = HandlerSettings {
            fru: 1,
            msg_flow: MessageFlow::Bic,
            force_jtag_hw: false,
        };
        (sim.clone(), JtagHandler::new(sim, settings))
    }

    fn shift_frames(sim: &LoopbackTransport) -> Vec<ShiftFrame> {
        sim.exchanges()
            .into_iter()
            .filter_map(|exchange| match exchange {
                Exchange::Shift(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn tlr_to_shift_dr() {
        let (sim, mut jtag) = handler();
        jtag.set_tap_state(TapState::ShfDR).unwrap();
        assert_eq!(
            sim.exchanges(),
            vec![Exchange::TapState(TapStateFrame {
                tms_length: 4,
                tms_bits: 0x02
            })]
        );
        assert_eq!(jtag.tap_state(), TapState::ShfDR);
        assert_eq!(sim.tap_state(), TapState::ShfDR);
    }

    #[test]
    fn failed_transition_keeps_state() {
        let (sim, mut jtag) = handler();
        sim.fail_after(0);
        assert!(jtag.set_tap_state(TapState::ShfDR).is_err());
        assert_eq!(jtag.tap_state(), TapState::TLR);
    }

    #[test]
    fn same_state_is_noop_except_reset() {
        let (sim, mut jtag) = handler();
        jtag.set_tap_state(TapState::RTI).unwrap();
        jtag.set_tap_state(TapState::RTI).unwrap();
        assert_eq!(sim.exchanges().len(), 1);
        jtag.tap_reset().unwrap();
        jtag.tap_reset().unwrap();
        assert_eq!(sim.exchanges().len(), 3);
        assert_eq!(
            sim.exchanges()[2],
            Exchange::TapState(TapStateFrame {
                tms_length: 8,
                tms_bits: 0xff
            })
        );
    }

    #[test]
    fn large_scan_with_pre_padding() {
        let (sim, mut jtag) = handler();
        jtag.set_padding(PaddingKind::DRPre, 8).unwrap();
        jtag.set_tap_state(TapState::ShfDR).unwrap();
        sim.clear_exchanges();

        let tdi: Vec<u8> = (0..=255).collect();
        let mut tdo = [0u8; 256];
        jtag.shift(2048, &tdi, &mut tdo, TapState::Ex1DR).unwrap();

        let frames = shift_frames(&sim);
        assert_eq!(sim.exchanges().len(), 3);
        assert_eq!(
            frames[0],
            ShiftFrame {
                write_bits: 8,
                write_data: Box::new([0x00]),
                read_bits: 0,
                last_transaction: false,
            }
        );
        assert_eq!((frames[1].write_bits, frames[1].read_bits), (1024, 1024));
        assert!(!frames[1].last_transaction);
        assert_eq!((frames[2].write_bits, frames[2].read_bits), (1024, 1024));
        assert!(frames[2].last_transaction);
        assert_eq!(&frames[2].write_data[..], &tdi[128..]);

        assert_eq!(&tdo[..], &tdi[..]);
        assert_eq!(jtag.tap_state(), TapState::Ex1DR);
        assert_eq!(sim.tap_state(), TapState::Ex1DR);
        assert_eq!(jtag.active_chain().scan_state, ScanState::Done);
    }

    #[test]
    fn pre_padding_only_on_first_shift_of_scan() {
        let (sim, mut jtag) = handler();
        jtag.set_padding(PaddingKind::DRPre, 3).unwrap();
        jtag.set_tap_state(TapState::ShfDR).unwrap();
        sim.clear_exchanges();

        jtag.shift(8, &[0xAA], &mut [], TapState::ShfDR).unwrap();
        assert_eq!(jtag.active_chain().scan_state, ScanState::Run);
        jtag.shift(8, &[0xBB], &mut [], TapState::ShfDR).unwrap();
        let frames = shift_frames(&sim);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].write_bits, 3);
        assert!(frames.iter().all(|f| !f.last_transaction));
    }

    #[test]
    fn ir_post_padding_shifts_ones() {
        let (sim, mut jtag) = handler();
        jtag.set_padding(PaddingKind::IRPost, 4).unwrap();
        jtag.set_tap_state(TapState::ShfIR).unwrap();
        sim.clear_exchanges();

        let mut tdo = [0u8; 1];
        jtag.shift(6, &[0x15], &mut tdo, TapState::RTI).unwrap();
        let exchanges = sim.exchanges();
        assert_eq!(
            exchanges[0],
            Exchange::Shift(ShiftFrame {
                write_bits: 6,
                write_data: Box::new([0x15]),
                read_bits: 6,
                last_transaction: false,
            })
        );
        assert_eq!(
            exchanges[1],
            Exchange::Shift(ShiftFrame {
                write_bits: 4,
                write_data: Box::new([0xff]),
                read_bits: 0,
                last_transaction: true,
            })
        );
        // Ex1IR to RTI plus settle cycles
        assert_eq!(
            exchanges[2],
            Exchange::TapState(TapStateFrame {
                tms_length: 7,
                tms_bits: 0x01
            })
        );
        assert_eq!(exchanges.len(), 3);
        assert_eq!(tdo, [0x15]);
        assert_eq!(jtag.tap_state(), TapState::RTI);
        assert_eq!(sim.tap_state(), TapState::RTI);
    }

    #[test]
    fn shift_requires_shift_state() {
        let (sim, mut jtag) = handler();
        let err = jtag.shift(8, &[0], &mut [0], TapState::RTI).unwrap_err();
        assert!(matches!(err, AsdError::State(_)));
        assert!(sim.exchanges().is_empty());
    }

    #[test]
    fn insufficient_capacity_is_rejected_before_io() {
        let (sim, mut jtag) = handler();
        jtag.set_tap_state(TapState::ShfDR).unwrap();
        sim.clear_exchanges();
        let err = jtag.shift(100, &[0; 4], &mut [], TapState::Ex1DR).unwrap_err();
        assert!(matches!(err, AsdError::InvalidLength(_)));
        assert!(sim.exchanges().is_empty());
    }

    #[test]
    fn padding_bounds() {
        let (_, mut jtag) = handler();
        assert!(jtag.set_padding(PaddingKind::DRPre, MAX_DR_PADDING).is_ok());
        assert!(matches!(
            jtag.set_padding(PaddingKind::DRPost, MAX_DR_PADDING + 1),
            Err(AsdError::Config(_))
        ));
        assert!(jtag.set_padding(PaddingKind::IRPost, MAX_IR_PADDING).is_ok());
        assert!(matches!(
            jtag.set_padding(PaddingKind::IRPre, MAX_IR_PADDING + 1),
            Err(AsdError::Config(_))
        ));
        assert_eq!(jtag.active_chain().padding.dr_pre, MAX_DR_PADDING);
        assert_eq!(jtag.active_chain().padding.dr_post, 0);
    }

    #[test]
    fn maximum_dr_padding_is_shifted() {
        let (sim, mut jtag) = handler();
        jtag.set_padding(PaddingKind::DRPre, MAX_DR_PADDING).unwrap();
        jtag.set_tap_state(TapState::ShfDR).unwrap();
        sim.clear_exchanges();
        jtag.shift(8, &[0x01], &mut [], TapState::ShfDR).unwrap();
        let frames = shift_frames(&sim);
        let padded: u32 = frames[..frames.len() - 1]
            .iter()
            .map(|f| f.write_bits as u32)
            .sum();
        assert_eq!(padded, MAX_DR_PADDING);
    }

    #[test]
    fn chains_are_independent() {
        let (_, mut jtag) = handler();
        jtag.set_tap_state(TapState::RTI).unwrap();
        jtag.set_padding(PaddingKind::IRPre, 5).unwrap();
        jtag.set_active_chain(2).unwrap();
        assert_eq!(jtag.active_chain_index(), 2);
        assert_eq!(jtag.tap_state(), TapState::TLR);
        assert_eq!(jtag.active_chain().padding, Padding::default());
        assert!(matches!(
            jtag.set_active_chain(MAX_SCAN_CHAINS as u8),
            Err(AsdError::Config(_))
        ));
        jtag.set_active_chain(0).unwrap();
        assert_eq!(jtag.tap_state(), TapState::RTI);
        assert_eq!(jtag.active_chain().padding.ir_pre, 5);
    }

    #[test]
    fn initialize_resets_bridge_and_chains() {
        let sim = LoopbackTransport::new();
        let settings = HandlerSettings {
            fru: 3,
            msg_flow: MessageFlow::Bic,
            force_jtag_hw: true,
        };
        let mut jtag = JtagHandler::new(sim.clone(), settings);
        jtag.set_padding(PaddingKind::DRPost, 7).unwrap();
        jtag.initialize(true).unwrap();
        assert!(!jtag.sw_mode());
        assert_eq!(
            sim.exchanges(),
            vec![
                Exchange::AsdInit(2),
                Exchange::TapState(TapStateFrame {
                    tms_length: 8,
                    tms_bits: 0xff
                })
            ]
        );
        assert_eq!(jtag.active_chain(), &ScanChain::default());
    }

    #[test]
    fn software_mode_when_not_forced() {
        let (_, mut jtag) = handler();
        jtag.initialize(true).unwrap();
        assert!(jtag.sw_mode());
    }

    #[test]
    fn deinitialize_never_fails() {
        let (sim, mut jtag) = handler();
        sim.fail_after(0);
        jtag.deinitialize();
        let (sim, mut jtag) = handler();
        jtag.deinitialize();
        assert_eq!(sim.exchanges(), vec![Exchange::AsdInit(0xFF)]);
    }

    #[test]
    fn wait_cycles_clamps() {
        let (sim, mut jtag) = handler();
        jtag.set_tap_state(TapState::RTI).unwrap();
        jtag.wait_cycles(256).unwrap();
        assert_eq!(
            sim.exchanges().last(),
            Some(&Exchange::TapState(TapStateFrame {
                tms_length: 255,
                tms_bits: 0
            }))
        );
        assert!(jtag.set_tck(1000).is_ok());
    }

    #[test]
    fn transport_failure_aborts_scan() {
        let (sim, mut jtag) = handler();
        jtag.set_tap_state(TapState::ShfDR).unwrap();
        sim.clear_exchanges();
        sim.fail_after(1);
        let tdi = [0u8; 256];
        assert!(matches!(
            jtag.shift(2048, &tdi, &mut [], TapState::Ex1DR),
            Err(AsdError::Transport(_))
        ));
        assert_eq!(shift_frames(&sim).len(), 1);
    }

    fn any_end_state() -> impl Strategy<Value = TapState> {
        prop_oneof![
            Just(TapState::ShfDR),
            Just(TapState::Ex1DR),
            Just(TapState::PauDR),
            Just(TapState::RTI),
            Just(TapState::UpdDR),
        ]
    }

    proptest! {
        #[test]
        fn segments_conserve_length(
            num_bits in 0u32..6000,
            tdi_bytes in 0usize..800,
            tdo_bytes in 0usize..800,
            end_state in any_end_state(),
        ) {
            let (sim, mut jtag) = handler();
            jtag.set_tap_state(TapState::ShfDR).unwrap();
            sim.clear_exchanges();

            let tdi = vec![0x5A; tdi_bytes];
            let mut tdo = vec![0; tdo_bytes];
            let request = ScanRequest {
                mode: ScanMode::Hardware,
                from: TapState::ShfDR,
                num_bits,
                tdi: &tdi,
                tdo: &mut tdo,
                end_state,
            };
            let capacity = 8 * tdi_bytes.max(tdo_bytes) as u32;
            let result = jtag.perform_shift(request);
            if num_bits > capacity {
                prop_assert!(matches!(result, Err(AsdError::InvalidLength(_))));
                prop_assert!(sim.exchanges().is_empty());
                return Ok(());
            }
            prop_assert!(result.is_ok());

            let frames = shift_frames(&sim);
            let total: u32 = frames
                .iter()
                .map(|f| f.write_bits.max(f.read_bits) as u32)
                .sum();
            prop_assert_eq!(total, num_bits.min(capacity));
            let written: u32 = frames.iter().map(|f| f.write_bits as u32).sum();
            prop_assert_eq!(written, num_bits.min(8 * tdi_bytes as u32));
            let read: u32 = frames.iter().map(|f| f.read_bits as u32).sum();
            prop_assert_eq!(read, num_bits.min(8 * tdo_bytes as u32));
            prop_assert!(frames.iter().all(|f| f.write_bits <= 1024 && f.read_bits <= 1024));
            prop_assert_eq!(jtag.tap_state(), end_state);
            prop_assert_eq!(sim.tap_state(), end_state);
        }

        #[test]
        fn only_final_segment_is_last(
            num_bits in 1u32..5000,
            end_state in any_end_state(),
        ) {
            let (sim, mut jtag) = handler();
            jtag.set_tap_state(TapState::ShfDR).unwrap();
            sim.clear_exchanges();

            let tdi = vec![0u8; num_bits.div_ceil(8) as usize];
            jtag.shift(num_bits, &tdi, &mut [], end_state).unwrap();
            let frames = shift_frames(&sim);
            let (last, rest) = frames.split_last().unwrap();
            prop_assert!(rest.iter().all(|f| !f.last_transaction));
            prop_assert_eq!(last.last_transaction, !end_state.is_shift());
        }

        #[test]
        fn zero_padding_is_idempotent(
            lengths in proptest::collection::vec(1u32..3000, 1..4),
            end_state in any_end_state(),
        ) {
            let (fresh_sim, mut fresh) = handler();
            let (zeroed_sim, mut zeroed) = handler();
            for kind in [PaddingKind::DRPre, PaddingKind::DRPost, PaddingKind::IRPre, PaddingKind::IRPost] {
                zeroed.set_padding(kind, 0).unwrap();
            }
            for jtag in [&mut fresh, &mut zeroed] {
                jtag.set_tap_state(TapState::ShfDR).unwrap();
                for &bits in &lengths {
                    let tdi = vec![0xC3; bits.div_ceil(8) as usize];
                    let mut tdo = vec![0; tdi.len()];
                    jtag.set_tap_state(TapState::ShfDR).unwrap();
                    jtag.shift(bits, &tdi, &mut tdo, end_state).unwrap();
                }
            }
            prop_assert_eq!(fresh_sim.exchanges(), zeroed_sim.exchanges());
            prop_assert_eq!(fresh.active_chain(), zeroed.active_chain());
        }
    }
}
