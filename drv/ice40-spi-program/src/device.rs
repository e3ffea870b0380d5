// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_ice40_api::{
    Config, ConfigError, DeviceState, Direction, DoneHandler, Duplex, Fault,
    HandlerError, Ice40Error, NoHandler, Pin, PinControl, ResetHandler, SpiBus,
    Step,
};
use ringbuf::{ringbuf_entry, Ringbuf};

use crate::gate::CsGate;
use crate::signal::Signal;
use crate::Trace;

/// Number of entries kept in each device's trace buffer.
pub const TRACE_DEPTH: usize = 32;

/// The error type of a [`Device`] on a given platform.
pub type DeviceError<P, B> =
    Ice40Error<<P as PinControl>::Error, <B as SpiBus>::Error>;

/// Everything `init` sets up. Its presence is what makes a device initialized.
pub(crate) struct Bound<C, D, R> {
    pub(crate) cs: Pin,
    full_duplex: C,
    half_duplex: C,
    turbo: Option<C>,
    done: Option<Signal<D>>,
    reset: Option<Signal<R>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    Full,
    Half,
    Turbo,
}

/// One iCE40 on one SPI bus.
///
/// `D` and `R` are the handler types for CDONE and CRESET_B on boards where
/// those aren't wired to our own GPIOs; they default to [`NoHandler`].
pub struct Device<P, B, D = NoHandler, R = NoHandler>
where
    P: PinControl,
    B: SpiBus,
    D: DoneHandler,
    R: ResetHandler,
{
    pub(crate) config: Config,
    pub(crate) pins: P,
    pub(crate) bus: B,
    done_handler: Option<D>,
    reset_handler: Option<R>,
    pub(crate) bound: Option<Bound<B::Channel, D, R>>,
    pub(crate) cs_enabled: bool,
    /// Set between a successful `begin_bitstream_load` and the end of that
    /// load, however it ends.
    pub(crate) loading: bool,
    pub(crate) state: DeviceState,
    pub(crate) trace: Ringbuf<Trace, TRACE_DEPTH>,
}

impl<P: PinControl, B: SpiBus> Device<P, B> {
    /// Creates a device whose CDONE and CRESET_B, if present, are plain pins.
    pub fn new(config: Config, pins: P, bus: B) -> Self {
        Self::with_handlers(config, pins, bus, None, None)
    }
}

impl<P, B, D, R> Device<P, B, D, R>
where
    P: PinControl,
    B: SpiBus,
    D: DoneHandler,
    R: ResetHandler,
{
    /// Creates a device that may reach CDONE and CRESET_B through handlers.
    ///
    /// Handlers are only consulted for signals whose pin is absent from
    /// `config`.
    pub fn with_handlers(
        config: Config,
        pins: P,
        bus: B,
        done_handler: Option<D>,
        reset_handler: Option<R>,
    ) -> Self {
        Self {
            config,
            pins,
            bus,
            done_handler,
            reset_handler,
            bound: None,
            cs_enabled: false,
            loading: false,
            state: DeviceState::Unconfigured,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub(crate) fn gpio_fault(
        step: Step,
    ) -> impl Fn(P::Error) -> DeviceError<P, B> + Copy {
        move |e| Ice40Error::TransportFailure(step, Fault::Gpio(e))
    }

    fn spi_fault(step: Step) -> impl Fn(B::Error) -> DeviceError<P, B> + Copy {
        move |e| Ice40Error::TransportFailure(step, Fault::Spi(e))
    }

    fn handler_fault(
        step: Step,
    ) -> impl Fn(HandlerError) -> DeviceError<P, B> + Copy {
        move |e| Ice40Error::TransportFailure(step, Fault::Handler(e))
    }

    fn fault(
        step: Step,
    ) -> impl Fn(Fault<P::Error, B::Error>) -> DeviceError<P, B> + Copy {
        move |f| Ice40Error::TransportFailure(step, f)
    }

    /// Sets up GPIOs and binds the SPI channels.
    ///
    /// The configuration is checked before anything is touched. CRESET_B is
    /// driven high before it becomes an output, so that the FPGA doesn't see
    /// a reset pulse just because we started up, and CS likewise starts out
    /// deasserted.
    ///
    /// Calling this on a device that is already initialized does nothing.
    /// Channels are only kept once all of them are bound, so if a later bind
    /// fails, a retried `init` binds every channel again from the start.
    pub fn init(&mut self) -> Result<(), DeviceError<P, B>> {
        if self.bound.is_some() {
            return Ok(());
        }

        let cs = self.config.validate()?;

        let gpio = Self::gpio_fault(Step::ConfigurePins);
        if let Some(reset) = self.config.reset {
            self.pins.set_level(reset, true).map_err(gpio)?;
            self.pins
                .set_direction(reset, Direction::Output)
                .map_err(gpio)?;
        }
        for pin in [self.config.done, self.config.int].into_iter().flatten() {
            self.pins
                .set_direction(pin, Direction::Input)
                .map_err(gpio)?;
        }
        self.pins.set_level(cs, true).map_err(gpio)?;
        self.pins.set_direction(cs, Direction::Output).map_err(gpio)?;

        let bind = Self::spi_fault(Step::BindChannel);
        let bus = self.config.bus;
        let full_duplex = self
            .bus
            .bind(bus, &self.config.channel(Duplex::Full))
            .map_err(bind)?;
        let half_duplex = self
            .bus
            .bind(bus, &self.config.channel(Duplex::Half))
            .map_err(bind)?;
        let turbo = match self.config.turbo_channel() {
            Some(channel) => Some(self.bus.bind(bus, &channel).map_err(bind)?),
            None => None,
        };

        self.bound = Some(Bound {
            cs,
            full_duplex,
            half_duplex,
            turbo,
            done: Signal::resolve(self.config.done, self.done_handler.take()),
            reset: Signal::resolve(
                self.config.reset,
                self.reset_handler.take(),
            ),
        });
        self.cs_enabled = true;
        self.state = DeviceState::Idle;
        ringbuf_entry!(self.trace, Trace::Initialized);
        Ok(())
    }

    /// Puts the FPGA into reset, turning off CS gating first and leaving CS
    /// deasserted.
    ///
    /// The device counts as being reset from the moment gating goes off, so
    /// if driving CRESET_B or CS fails, it is left in
    /// [`DeviceState::ConfiguringReset`] rather than claiming to be idle.
    ///
    /// A device with no way to drive CRESET_B is tolerated here (there's
    /// nothing to hold in reset); [`Device::enable`] will report it.
    pub fn disable(&mut self) -> Result<(), DeviceError<P, B>> {
        let Some(bound) = self.bound.as_mut() else {
            return Err(Ice40Error::NotInitialized);
        };

        self.cs_enabled = false;
        self.loading = false;
        self.state = DeviceState::ConfiguringReset;
        if let Some(reset) = bound.reset.as_mut() {
            reset
                .drive(&mut self.pins, false)
                .map_err(Self::fault(Step::HoldReset))?;
        }
        self.pins
            .set_level(bound.cs, true)
            .map_err(Self::gpio_fault(Step::DeassertCs))?;

        ringbuf_entry!(self.trace, Trace::Disabled);
        Ok(())
    }

    /// Releases the FPGA from reset. CS gating is left as it is.
    ///
    /// This is the second half of a reset pulse and is meant to follow
    /// [`Device::disable`]. It moves the device to
    /// [`DeviceState::ConfiguringEnabled`] whatever state it was in, but
    /// that alone does not start a bitstream load; only
    /// [`Device::begin_bitstream_load`] does.
    pub fn enable(&mut self) -> Result<(), DeviceError<P, B>> {
        let Some(bound) = self.bound.as_mut() else {
            return Err(Ice40Error::NotInitialized);
        };

        let Some(reset) = bound.reset.as_mut() else {
            return Err(Ice40Error::InvalidConfiguration(
                ConfigError::NoResetSignal,
            ));
        };
        reset
            .drive(&mut self.pins, true)
            .map_err(Self::fault(Step::ReleaseReset))?;

        self.loading = false;
        self.state = DeviceState::ConfiguringEnabled;
        ringbuf_entry!(self.trace, Trace::Enabled);
        Ok(())
    }

    /// Samples CDONE.
    pub fn get_done(&mut self) -> Result<bool, DeviceError<P, B>> {
        let Some(bound) = self.bound.as_mut() else {
            return Err(Ice40Error::NotInitialized);
        };

        let Some(done) = bound.done.as_mut() else {
            return Err(Ice40Error::InvalidConfiguration(
                ConfigError::NoDoneSignal,
            ));
        };
        let level = done
            .read(&self.pins)
            .map_err(Self::handler_fault(Step::ReadDone))?;

        ringbuf_entry!(self.trace, Trace::Done(level));
        Ok(level)
    }

    /// Samples the design's interrupt line, or returns `None` if the board
    /// doesn't have one.
    pub fn int_level(&self) -> Result<Option<bool>, DeviceError<P, B>> {
        if self.bound.is_none() {
            return Err(Ice40Error::NotInitialized);
        }
        Ok(self.config.int.map(|pin| self.pins.get_level(pin)))
    }

    /// Writes `data` on the half-duplex channel.
    pub fn send(&mut self, data: &[u8]) -> Result<(), DeviceError<P, B>> {
        self.transfer(ChannelKind::Half, Step::Send, Some(data), None)
    }

    /// Fills `buf` from the half-duplex channel.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<(), DeviceError<P, B>> {
        self.transfer(ChannelKind::Half, Step::Receive, None, Some(buf))
    }

    /// Writes `tx` while reading into `rx` on the full-duplex channel.
    pub fn transaction(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), DeviceError<P, B>> {
        self.transfer(ChannelKind::Full, Step::Transaction, Some(tx), Some(rx))
    }

    /// Like [`Device::transaction`], but on the turbo channel. Fails with
    /// `NotInitialized` on boards that don't configure one.
    pub fn turbo_transaction(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), DeviceError<P, B>> {
        self.transfer(ChannelKind::Turbo, Step::Transaction, Some(tx), Some(rx))
    }

    /// Runs one transfer through the CS gate. No chunking happens here; the
    /// bus enforces its own limit.
    pub(crate) fn transfer(
        &mut self,
        kind: ChannelKind,
        step: Step,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
    ) -> Result<(), DeviceError<P, B>> {
        let Some(bound) = self.bound.as_ref() else {
            return Err(Ice40Error::NotInitialized);
        };
        let channel = match kind {
            ChannelKind::Full => &bound.full_duplex,
            ChannelKind::Half => &bound.half_duplex,
            ChannelKind::Turbo => match &bound.turbo {
                Some(turbo) => turbo,
                None => return Err(Ice40Error::NotInitialized),
            },
        };

        let mut gate = CsGate::new(
            self.cs_enabled,
            bound.cs,
            &mut self.pins,
            &mut self.trace,
        );
        self.bus
            .transfer(channel, tx, rx, &mut gate)
            .map_err(Self::spi_fault(step))
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Whether transfers currently assert and release CS on their own.
    pub fn cs_enabled(&self) -> bool {
        self.cs_enabled
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_ice40_api::{ChannelConfig, TransferHooks};

    // Just enough of a platform to exercise the paths that never reach the
    // hardware; the full sequencing is covered by the integration tests.
    struct NullPins;

    impl PinControl for NullPins {
        type Error = ();

        fn set_direction(&mut self, _: Pin, _: Direction) -> Result<(), ()> {
            Ok(())
        }

        fn set_level(&mut self, _: Pin, _: bool) -> Result<(), ()> {
            Ok(())
        }

        fn get_level(&self, _: Pin) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct CountingBus {
        bound: usize,
        /// Fails the bind attempt with this index, counting from zero.
        refuse: Option<usize>,
    }

    impl SpiBus for CountingBus {
        type Error = ();
        type Channel = ChannelConfig;

        fn bind(
            &mut self,
            _: u8,
            config: &ChannelConfig,
        ) -> Result<ChannelConfig, ()> {
            if self.refuse == Some(self.bound) {
                self.refuse = None;
                return Err(());
            }
            self.bound += 1;
            Ok(*config)
        }

        fn transfer<H: TransferHooks>(
            &mut self,
            _: &ChannelConfig,
            _: Option<&[u8]>,
            _: Option<&mut [u8]>,
            hooks: &mut H,
        ) -> Result<(), ()> {
            hooks.pre_transfer();
            hooks.post_transfer();
            Ok(())
        }
    }

    const CONFIG: Config = Config {
        bus: 1,
        cs: Some(Pin(0)),
        done: Some(Pin(1)),
        reset: Some(Pin(2)),
        int: None,
        clock_hz_full_duplex: 1_000_000,
        clock_hz_half_duplex: 1_000_000,
        clock_hz_turbo: None,
        input_delay_ns: 0,
        max_transfer_size: 16,
    };

    #[test]
    fn everything_needs_init() {
        let mut dev = Device::new(CONFIG, NullPins, CountingBus::default());
        assert_eq!(dev.state(), DeviceState::Unconfigured);
        assert_eq!(dev.send(&[1]), Err(Ice40Error::NotInitialized));
        assert_eq!(dev.receive(&mut [0]), Err(Ice40Error::NotInitialized));
        assert_eq!(dev.disable(), Err(Ice40Error::NotInitialized));
        assert_eq!(dev.enable(), Err(Ice40Error::NotInitialized));
        assert_eq!(dev.get_done(), Err(Ice40Error::NotInitialized));
        assert_eq!(dev.int_level(), Err(Ice40Error::NotInitialized));
    }

    #[test]
    fn init_is_idempotent() {
        let mut dev = Device::new(CONFIG, NullPins, CountingBus::default());
        dev.init().unwrap();
        dev.init().unwrap();
        assert_eq!(dev.bus.bound, 2);
        assert_eq!(dev.state(), DeviceState::Idle);
        assert!(dev.cs_enabled());
        assert_eq!(
            dev.trace().payloads().collect::<Vec<_>>(),
            [Trace::Initialized]
        );
    }

    #[test]
    fn turbo_needs_its_clock() {
        let mut dev = Device::new(CONFIG, NullPins, CountingBus::default());
        dev.init().unwrap();
        assert_eq!(
            dev.turbo_transaction(&[0], &mut [0]),
            Err(Ice40Error::NotInitialized)
        );

        let config = Config {
            clock_hz_turbo: Some(50_000_000),
            ..CONFIG
        };
        let mut dev = Device::new(config, NullPins, CountingBus::default());
        dev.init().unwrap();
        assert_eq!(dev.bus.bound, 3);
        assert_eq!(dev.turbo_transaction(&[0], &mut [0]), Ok(()));
    }

    #[test]
    fn failed_bind_starts_over() {
        let config = Config {
            clock_hz_turbo: Some(50_000_000),
            ..CONFIG
        };
        let bus = CountingBus {
            refuse: Some(2),
            ..CountingBus::default()
        };
        let mut dev = Device::new(config, NullPins, bus);

        assert_eq!(
            dev.init(),
            Err(Ice40Error::TransportFailure(
                Step::BindChannel,
                Fault::Spi(())
            ))
        );
        assert_eq!(dev.state(), DeviceState::Unconfigured);
        assert_eq!(dev.send(&[1]), Err(Ice40Error::NotInitialized));

        // The two channels bound the first time around are bound again.
        dev.init().unwrap();
        assert_eq!(dev.bus.bound, 5);
        assert_eq!(dev.turbo_transaction(&[0], &mut [0]), Ok(()));
    }
}
