#![no_std]
#![no_main]
#![feature(type_alias_impl_trait)]

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Ticker};
use embedded_hal::digital::v2::InputPin;
use esp32c3_hal::{
    adc::{AdcConfig, AdcPin, Attenuation, ADC, ADC1},
    clock::{ClockControl, Clocks},
    embassy,
    gpio::{Analog, GpioPin, Input, Output, PullUp, PushPull},
    peripherals::Peripherals,
    prelude::*,
    timer::TimerGroup,
    uart::{config::Config as UartConfig, TxRxPins},
    Delay, Uart, IO,
};
use esp_backtrace as _;
use esp_storage::FlashStorage;
use gowired_input::{Button, ButtonConfig, ButtonEvent};
use gowired_protocol::{Cmd, Id, Report};
use gowired_shutter::{
    AcsParams, AcsSensor, ConfigBuilder, Direction, Events, Layout, Millis, Request, Shutter,
    ShutterDriver,
};

mod bus;

use bus::{bus_task, Bus, CmdChannel, ReportChannel, ReportSender};

macro_rules! singleton {
    ($val:expr, $T:ty) => {{
        static STATIC_CELL: ::static_cell::StaticCell<$T> = ::static_cell::StaticCell::new();
        STATIC_CELL.init($val)
    }};
}

pub type Channel<T, const N: usize> = embassy_sync::channel::Channel<CriticalSectionRawMutex, T, N>;
pub type Sender<T, const N: usize> =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, T, N>;
pub type Receiver<T, const N: usize> =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, T, N>;

static CMD_CHANNEL: CmdChannel = CmdChannel::new();
static REPORT_CHANNEL: ReportChannel = ReportChannel::new();

const SHUTTER_ID: Id = 1;
const FLASH_ADDR: u32 = 0x110000;
const BAUD_RATE: u32 = 9600;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

type Relay<const GPIO: u8> = GpioPin<Output<PushPull>, GPIO>;
type ButtonPin<const GPIO: u8> = GpioPin<Input<PullUp>, GPIO>;
type Sensor = AcsSensor<ADC1, ADC<'static, ADC1>, AdcPin<GpioPin<Analog, 2>, ADC1>>;
type Driver = ShutterDriver<Relay<4>, Relay<5>, Delay, FlashStorage, Sensor>;

fn now() -> Millis {
    Millis(Instant::now().as_millis() as u32)
}

// Buttons pull their pin to ground.
fn is_pressed<P: InputPin>(pin: &P) -> bool {
    matches!(pin.is_low(), Ok(true))
}

/// Everything the control loop owns: the shutter, its two wall buttons and
/// the way back to the bus.
struct Node {
    driver: Driver,
    up_button: Button,
    down_button: Button,
    up_pin: ButtonPin<6>,
    down_pin: ButtonPin<7>,
    reports: ReportSender,
}

impl Node {
    fn status(&self) -> Report {
        let shutter = self.driver.shutter();
        Report::Shutter {
            id: SHUTTER_ID,
            state: shutter.state(),
            position: shutter.position(),
            calibrated: shutter.is_calibrated(),
        }
    }

    fn send(&self, report: Report) {
        if let Err(report) = self.reports.try_send(report) {
            log::warn!("dropped report {report:?}");
        }
    }

    fn publish(&self, events: &Events) -> bool {
        let reports = Report::for_events(events, self.status());
        let any = !reports.is_empty();
        for report in reports {
            self.send(report);
        }
        any
    }

    fn request(&mut self, request: Request, now: Millis) -> bool {
        match self.driver.handle(request, now) {
            Ok(events) => self.publish(&events),
            Err(e) => {
                log::warn!("{request:?} rejected: {e}");
                false
            }
        }
    }

    fn command(&mut self, cmd: Cmd, now: Millis) {
        match cmd {
            Cmd::Shutter { id, action } if id == SHUTTER_ID => {
                // The controller always hears back, even when nothing changed.
                if !self.request(action.into(), now) {
                    self.send(self.status());
                }
            }
            Cmd::QueryStatus => self.send(self.status()),
            Cmd::Shutter { id, .. } | Cmd::Dimmer { id, .. } | Cmd::Heating { id, .. } => {
                log::debug!("ignoring command for device {id}");
            }
            Cmd::Temperature { .. } => {}
        }
    }

    fn poll(&mut self, now: Millis) {
        let up = self.up_button.poll(now, is_pressed(&self.up_pin));
        let down = self.down_button.poll(now, is_pressed(&self.down_pin));
        match up {
            Some(ButtonEvent::Click) => {
                self.request(Request::Button(Direction::Up), now);
            }
            Some(ButtonEvent::LongPress) => {
                log::info!("up held, calibrating");
                self.request(Request::AutoCalibrate, now);
            }
            None => {}
        }
        if down.is_some() {
            self.request(Request::Button(Direction::Down), now);
        }

        match self.driver.poll(now) {
            Ok(events) => {
                self.publish(&events);
            }
            Err(e) => log::error!("shutter: {e}"),
        }
    }
}

async fn control(mut node: Node) -> ! {
    node.send(node.status());
    let cmds = CMD_CHANNEL.receiver();
    let mut ticker = Ticker::every(POLL_INTERVAL);
    loop {
        ticker.next().await;
        let now = now();
        while let Ok(cmd) = cmds.try_receive() {
            node.command(cmd, now);
        }
        node.poll(now);
    }
}

#[main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger(log::LevelFilter::Info);

    let peripherals = Peripherals::take();
    let system = peripherals.SYSTEM.split();
    let clocks = singleton!(ClockControl::max(system.clock_control).freeze(), Clocks<'_>);
    embassy::init(clocks, TimerGroup::new(peripherals.TIMG0, clocks).timer0);

    let io = IO::new(peripherals.GPIO, peripherals.IO_MUX);

    let pins = TxRxPins::new_tx_rx(
        io.pins.gpio21.into_push_pull_output(),
        io.pins.gpio20.into_floating_input(),
    );
    let uart = Uart::new_with_config(
        peripherals.UART1,
        UartConfig {
            baudrate: BAUD_RATE,
            ..UartConfig::default()
        },
        Some(pins),
        clocks,
    );
    let bus = Bus::new(uart, io.pins.gpio3.into_push_pull_output());
    spawner.must_spawn(bus_task(bus, CMD_CHANNEL.sender(), REPORT_CHANNEL.receiver()));

    let analog = peripherals.APB_SARADC.split();
    let mut adc_config = AdcConfig::new();
    let current_pin =
        adc_config.enable_pin(io.pins.gpio2.into_analog(), Attenuation::Attenuation11dB);
    let adc = ADC::<ADC1>::new(analog.adc1, adc_config);
    // 12-bit converter, sensor output divided down to the 2.5 V range.
    let sensor = AcsSensor::new(
        adc,
        current_pin,
        AcsParams {
            reference_volts: 2.5,
            adc_steps: 4096,
            ..AcsParams::default()
        },
    );

    let config = ConfigBuilder::default()
        .with_layout(Layout::at(FLASH_ADDR))
        .with_auto_calibration(true)
        .build();
    let shutter = match Shutter::new(
        io.pins.gpio4.into_push_pull_output(),
        io.pins.gpio5.into_push_pull_output(),
        Delay::new(clocks),
        FlashStorage::new(),
        config,
    ) {
        Ok(shutter) => shutter,
        Err(e) => panic!("cannot start the shutter: {e}"),
    };
    log::info!(
        "shutter at {}%, calibrated: {}",
        shutter.position(),
        shutter.is_calibrated()
    );

    let node = Node {
        driver: ShutterDriver::new(shutter, Some(sensor)),
        up_button: Button::new(ButtonConfig::default()),
        down_button: Button::new(ButtonConfig::default()),
        up_pin: io.pins.gpio6.into_pull_up_input(),
        down_pin: io.pins.gpio7.into_pull_up_input(),
        reports: REPORT_CHANNEL.sender(),
    };
    control(node).await;
}
