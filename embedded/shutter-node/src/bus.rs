use embassy_time::Timer;
use embedded_hal::{digital::v2::OutputPin, serial};
use esp32c3_hal::{
    gpio::{GpioPin, Output, PushPull},
    peripherals::UART1,
    Uart,
};

use gowired_protocol::{encode, Cmd, FrameReader, Report, MAX_FRAME};

use crate::{Channel, Receiver, Sender};

pub type CmdSender = Sender<Cmd, 8>;
pub type CmdChannel = Channel<Cmd, 8>;
pub type ReportReceiver = Receiver<Report, 8>;
pub type ReportSender = Sender<Report, 8>;
pub type ReportChannel = Channel<Report, 8>;

/// The RS-485 transceiver: a UART plus the pin that enables its driver.
pub struct Bus {
    uart: Uart<'static, UART1>,
    transmit: GpioPin<Output<PushPull>, 3>,
}

impl Bus {
    pub fn new(uart: Uart<'static, UART1>, transmit: GpioPin<Output<PushPull>, 3>) -> Self {
        let mut bus = Bus { uart, transmit };
        bus.listen();
        bus
    }

    fn listen(&mut self) {
        let _ = self.transmit.set_low();
    }

    fn send(&mut self, report: &Report) {
        let mut buf = [0u8; MAX_FRAME];
        let frame = match encode(report, &mut buf) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("failed to encode {report:?}: {e}");
                return;
            }
        };

        let _ = self.transmit.set_high();
        for &byte in frame.iter() {
            if let Err(e) = nb::block!(serial::Write::write(&mut self.uart, byte)) {
                log::error!("uart write failed: {e:?}");
                break;
            }
        }
        // The driver has to stay on until the last stop bit is out.
        let _ = nb::block!(serial::Write::flush(&mut self.uart));
        self.listen();
    }
}

#[embassy_executor::task]
pub async fn bus_task(mut bus: Bus, cmds: CmdSender, reports: ReportReceiver) {
    let mut reader = FrameReader::<MAX_FRAME>::new();
    loop {
        while let Ok(report) = reports.try_receive() {
            log::debug!("sending {report:?}");
            bus.send(&report);
        }

        loop {
            match serial::Read::read(&mut bus.uart) {
                Ok(byte) => match reader.push::<Cmd>(byte) {
                    Some(Ok(cmd)) => {
                        log::debug!("got command {cmd:?}");
                        if let Err(cmd) = cmds.try_send(cmd) {
                            log::warn!("dropped command {cmd:?}");
                        }
                    }
                    Some(Err(e)) => log::warn!("bad frame: {e}"),
                    None => {}
                },
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    log::warn!("uart read failed: {e:?}");
                    reader = FrameReader::new();
                }
            }
        }

        Timer::after_millis(2).await;
    }
}
