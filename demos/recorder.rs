//! demos/recorder.rs
//!
//! Duty-cycled logger firmware: left codec input to 16 bit files on the SD
//! card, powered down between acquisition periods.
#![no_main]
#![no_std]
#[rtic::app(
    device = stm32h7xx_hal::stm32,
    peripherals = true,
)]
mod app {
    use core::ptr::addr_of_mut;

    use daisy_logger::{
        audio::{self, CODEC_CHANNELS},
        capture::{Capture, Route},
        config::Config,
        console::Console,
        hibernate::{RtcClock, Standby},
        logger,
        pool::Slot,
        recorder::{PowerControl, Recorder},
        sdcard::SdStorage,
        uart::Uart,
        BLOCK_SAMPLES, CHANNELS, DISK_BUFFER_BYTES, POOL_BLOCKS, QUEUE_DEPTH,
    };
    use log::{error, info};
    use stm32h7xx_hal::rtc::Rtc;

    type Session = Capture<'static, i16, BLOCK_SAMPLES, CHANNELS, QUEUE_DEPTH>;
    type Logger = Recorder<
        'static,
        'static,
        i16,
        SdStorage,
        RtcClock,
        BLOCK_SAMPLES,
        CHANNELS,
        QUEUE_DEPTH,
        DISK_BUFFER_BYTES,
    >;

    /// Left codec input into the only file channel.
    const ROUTES: &[Route] = &[Route::new(0, 0)];

    #[link_section = ".sram1_bss"]
    static mut SLOTS: [Slot<i16, BLOCK_SAMPLES>; POOL_BLOCKS] = [Slot::EMPTY; POOL_BLOCKS];

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        audio: audio::Audio,
        // one handle per context
        capture: &'static Session,
        frames: &'static Session,
        sdmmc: Option<daisy_logger::board::Sdmmc1>,
        rtc: Option<Rtc>,
        console: Option<Uart>,
        standby: Standby,
    }

    #[init(local = [session: Option<Session> = None])]
    fn init(ctx: init::Context) -> (Shared, Local, init::Monotonics) {
        logger::init();

        let mut core = ctx.core;
        let device = ctx.device;
        let (ccdr, backup) =
            match daisy_logger::board::Board::init_clocks(device.PWR, device.RCC, &device.SYSCFG) {
                Ok(clocks) => clocks,
                Err(err) => panic!("clock setup failed: {}", err),
            };
        let board = match daisy_logger::board_init!(core, device, ccdr, backup) {
            Ok(board) => board,
            Err(err) => panic!("board init failed: {}", err),
        };

        let slots = unsafe { &mut *addr_of_mut!(SLOTS) };
        let capture: &'static Session = match Capture::new(slots, ROUTES, CODEC_CHANNELS) {
            Ok(capture) => ctx.local.session.insert(capture),
            Err(err) => panic!("capture setup failed: {}", err),
        };

        info!("Startup done!!");

        (
            Shared {},
            Local {
                audio: board.audio,
                capture,
                frames: capture,
                sdmmc: Some(board.sdmmc),
                rtc: Some(board.rtc),
                console: Some(board.console),
                standby: Standby::new(core.SCB),
            },
            init::Monotonics(),
        )
    }

    #[idle(local = [capture, sdmmc, rtc, console, standby])]
    fn idle(ctx: idle::Context) -> ! {
        let standby = ctx.local.standby;
        let (Some(sdmmc), Some(rtc), Some(uart)) = (
            ctx.local.sdmmc.take(),
            ctx.local.rtc.take(),
            ctx.local.console.take(),
        ) else {
            error!("board resources missing");
            standby.halt()
        };
        let mut console = Console::new(uart);

        let recorder = Logger::new(
            *ctx.local.capture,
            SdStorage::new(sdmmc),
            RtcClock::new(rtc),
            Config::DEFAULT,
        );
        match recorder {
            Ok(mut recorder) => recorder.run(standby, &mut console),
            Err(err) => {
                error!("{}", err);
                standby.halt()
            }
        }
    }

    // Interrupt handler for audio
    #[task(binds = DMA1_STR0, local = [audio, frames], priority = 8)]
    fn audio_handler(ctx: audio_handler::Context) {
        ctx.local.audio.capture(*ctx.local.frames);
    }
}
