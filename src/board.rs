//! Contains setup for Daisy board hardware used by the logger.
use cortex_m::peripheral::{DCB, DWT};
use log::{info, warn};
use stm32h7xx_hal::{
    delay::Delay,
    dma,
    gpio::Speed,
    prelude::*,
    pwr, rcc,
    rcc::{backup, CoreClocks},
    rtc::{Rtc, RtcClock},
    sdmmc::{SdCard, Sdmmc},
    stm32,
    time::{Hertz, MegaHertz},
};

use crate::{audio::Audio, uart::Uart, Error, AUDIO_SAMPLE_HZ, CLOCK_RATE_HZ};

const HSE_CLOCK_MHZ: MegaHertz = MegaHertz::from_raw(16);
const LSE_CLOCK_HZ: Hertz = Hertz::from_raw(32_768);
const CONSOLE_BAUD: u32 = 115_200;

// PCLKx
const PCLK_HZ: Hertz = Hertz::from_raw(CLOCK_RATE_HZ.raw() / 4);
// PLL1
const PLL1_P_HZ: Hertz = CLOCK_RATE_HZ;
const PLL1_Q_HZ: Hertz = Hertz::from_raw(CLOCK_RATE_HZ.raw() / 8);
const PLL1_R_HZ: Hertz = Hertz::from_raw(CLOCK_RATE_HZ.raw() / 32);

const PLL3_P_HZ: Hertz = Hertz::from_raw(AUDIO_SAMPLE_HZ.raw() * 257);
const PLL3_Q_HZ: Hertz = Hertz::from_raw(PLL3_P_HZ.raw());
const PLL3_R_HZ: Hertz = Hertz::from_raw(PLL3_P_HZ.raw());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// WM8731 codec, needs an I2C register setup this crate does not do.
    Seed,
    Seed1_1,
    Seed2DFM,
}

pub type Sdmmc1 = Sdmmc<stm32::SDMMC1, SdCard>;

pub struct Board {
    pub audio: Audio,
    pub sdmmc: Sdmmc1,
    pub rtc: Rtc,
    pub console: Uart,
    pub delay: Delay,
    pub version: Version,
}

/// All peripherals and other resources required by the logger
pub struct BoardResources<'a> {
    pub clocks: &'a CoreClocks,
    pub syst: stm32::SYST,
    pub scb: &'a mut stm32::SCB,
    pub cpuid: &'a mut cortex_m::peripheral::CPUID,
    pub dcb: &'a mut DCB,
    pub dwt: &'a mut DWT,

    pub sai1: stm32::SAI1,
    pub sai1_rec: rcc::rec::Sai1,

    pub sdmmc1: stm32::SDMMC1,
    pub sdmmc1_rec: rcc::rec::Sdmmc1,

    pub rtc: stm32::RTC,
    pub rtc_rec: backup::Rtc,

    pub usart1: stm32::USART1,
    pub usart1_rec: rcc::rec::Usart1,

    pub gpiob: stm32::GPIOB,
    pub gpiob_rec: rcc::rec::Gpiob,

    pub gpioc: stm32::GPIOC,
    pub gpioc_rec: rcc::rec::Gpioc,

    pub gpiod: stm32::GPIOD,
    pub gpiod_rec: rcc::rec::Gpiod,

    pub gpioe: stm32::GPIOE,
    pub gpioe_rec: rcc::rec::Gpioe,

    pub dma1: stm32::DMA1,
    pub dma1_rec: rcc::rec::Dma1,
}

#[macro_export]
macro_rules! board_init {
    ($core:ident, $device:ident, $ccdr:ident, $backup:ident) => {{
        let resources = daisy_logger::board::BoardResources {
            clocks: &$ccdr.clocks,
            syst: $core.SYST,
            scb: &mut $core.SCB,
            cpuid: &mut $core.CPUID,
            dcb: &mut $core.DCB,
            dwt: &mut $core.DWT,
            sai1: $device.SAI1,
            sai1_rec: $ccdr.peripheral.SAI1,
            sdmmc1: $device.SDMMC1,
            sdmmc1_rec: $ccdr.peripheral.SDMMC1,
            rtc: $device.RTC,
            rtc_rec: $backup.RTC,
            usart1: $device.USART1,
            usart1_rec: $ccdr.peripheral.USART1,
            gpiob: $device.GPIOB,
            gpiob_rec: $ccdr.peripheral.GPIOB,
            gpioc: $device.GPIOC,
            gpioc_rec: $ccdr.peripheral.GPIOC,
            gpiod: $device.GPIOD,
            gpiod_rec: $ccdr.peripheral.GPIOD,
            gpioe: $device.GPIOE,
            gpioe_rec: $ccdr.peripheral.GPIOE,
            dma1: $device.DMA1,
            dma1_rec: $ccdr.peripheral.DMA1,
        };

        daisy_logger::board::Board::init(resources)
    }};
}

impl Board {
    fn detect_version(
        s2dfm_pin: stm32h7xx_hal::gpio::gpiod::PD4<stm32h7xx_hal::gpio::Analog>,
        seed1_1_pin: stm32h7xx_hal::gpio::gpiod::PD3<stm32h7xx_hal::gpio::Analog>,
    ) -> Version {
        let s2dfm_pin = s2dfm_pin.into_pull_up_input();
        let seed1_1_pin = seed1_1_pin.into_pull_up_input();

        let state = (seed1_1_pin.is_low(), s2dfm_pin.is_low());

        // Deinitialize the pins after reading
        s2dfm_pin.into_analog();
        seed1_1_pin.into_analog();

        match state {
            (true, _) => Version::Seed1_1,
            (false, true) => Version::Seed2DFM,
            _ => Version::Seed,
        }
    }

    /// Initialize clocks. The backup domain comes back separately for the RTC.
    pub fn init_clocks(
        pwr: stm32::PWR,
        rcc: stm32::RCC,
        syscfg: &stm32::SYSCFG,
    ) -> Result<(rcc::Ccdr, backup::BackupREC), Error> {
        // Power
        let pwr = pwr.constrain();
        let mut pwrcfg: pwr::PowerConfiguration = pwr.vos0(syscfg).freeze();
        let backup = pwrcfg
            .backup()
            .ok_or(Error::State("backup domain already taken"))?;

        let ccdr = rcc
            .constrain()
            .use_hse(HSE_CLOCK_MHZ.convert())
            .sys_ck(CLOCK_RATE_HZ)
            .pclk1(PCLK_HZ) // DMA clock
            // PLL1
            .pll1_strategy(rcc::PllConfigStrategy::Iterative)
            .pll1_p_ck(PLL1_P_HZ)
            .pll1_q_ck(PLL1_Q_HZ) // SDMMC kernel clock
            .pll1_r_ck(PLL1_R_HZ)
            // PLL3
            .pll3_strategy(rcc::PllConfigStrategy::Fractional)
            .pll3_p_ck(PLL3_P_HZ) // used for SAI1
            .pll3_q_ck(PLL3_Q_HZ)
            .pll3_r_ck(PLL3_R_HZ)
            .freeze(pwrcfg, syscfg);
        log_clocks(&ccdr);
        Ok((ccdr, backup))
    }

    /// Setup cache
    pub fn init_cache(
        scb: &mut cortex_m::peripheral::SCB,
        cpuid: &mut cortex_m::peripheral::CPUID,
    ) {
        scb.enable_icache();
        scb.enable_dcache(cpuid);
    }

    /// Start the core cycle counter used for loop timing.
    pub fn init_cycle_counter(dcb: &mut DCB, dwt: &mut DWT) {
        dcb.enable_trace();
        DWT::unlock();
        dwt.enable_cycle_counter();
    }

    /// Batteries included initialization
    pub fn init(resources: BoardResources) -> Result<Board, Error> {
        info!("Starting board init");
        let mut delay = Delay::new(resources.syst, *resources.clocks);
        Self::init_cycle_counter(resources.dcb, resources.dwt);

        // The RTC keeps running through standby, don't reset it
        let rtc = Rtc::open_or_init(
            resources.rtc,
            resources.rtc_rec,
            RtcClock::Lse {
                freq: LSE_CLOCK_HZ,
                bypass: false,
                css: false,
            },
            resources.clocks,
        );

        info!("Setting up GPIOs...");
        let gpiob = resources.gpiob.split(resources.gpiob_rec);
        let gpioc = resources.gpioc.split(resources.gpioc_rec);
        let gpiod = resources.gpiod.split(resources.gpiod_rec);
        let gpioe = resources.gpioe.split(resources.gpioe_rec);

        let version = Self::detect_version(gpiod.pd4, gpiod.pd3);
        info!("Board version {:?}", version);
        if version == Version::Seed {
            warn!("WM8731 codec is not supported");
            return Err(Error::Config("unsupported codec"));
        }

        info!("Setting up SDMMC...");
        let clk = gpioc.pc12.into_alternate::<12>().speed(Speed::VeryHigh);
        let cmd = gpiod
            .pd2
            .into_alternate::<12>()
            .internal_pull_up(true)
            .speed(Speed::VeryHigh);
        let d0 = gpioc
            .pc8
            .into_alternate::<12>()
            .internal_pull_up(true)
            .speed(Speed::VeryHigh);
        let d1 = gpioc
            .pc9
            .into_alternate::<12>()
            .internal_pull_up(true)
            .speed(Speed::VeryHigh);
        let d2 = gpioc
            .pc10
            .into_alternate::<12>()
            .internal_pull_up(true)
            .speed(Speed::VeryHigh);
        let d3 = gpioc
            .pc11
            .into_alternate::<12>()
            .internal_pull_up(true)
            .speed(Speed::VeryHigh);
        let sdmmc: Sdmmc1 = resources.sdmmc1.sdmmc(
            (clk, cmd, d0, d1, d2, d3),
            resources.sdmmc1_rec,
            resources.clocks,
        );

        info!("Setting up console on USART1...");
        let tx = gpiob.pb6.into_alternate::<7>();
        let rx = gpiob.pb7.into_alternate::<7>();
        let serial = resources
            .usart1
            .serial(
                (tx, rx),
                CONSOLE_BAUD.bps(),
                resources.usart1_rec,
                resources.clocks,
            )
            .map_err(|_| Error::Config("console baud rate"))?;
        let console = Uart::new(serial);

        info!("Setting up Audio...");
        let dma1_streams = dma::dma::StreamsTuple::new(resources.dma1, resources.dma1_rec);
        let audio = Audio::new(
            dma1_streams.0,
            resources.sai1,
            resources.sai1_rec,
            gpioe.pe2,
            gpioe.pe3,
            gpioe.pe4,
            gpioe.pe5,
            gpioe.pe6,
            gpiob.pb11,
            resources.clocks,
            version,
            &mut delay,
        );

        // Setup cache
        Self::init_cache(resources.scb, resources.cpuid);

        info!("Board init done!");
        Ok(Board {
            audio,
            sdmmc,
            rtc,
            console,
            delay,
            version,
        })
    }
}

fn log_clocks(ccdr: &rcc::Ccdr) {
    info!("Core {}", ccdr.clocks.c_ck());
    info!("hclk {}", ccdr.clocks.hclk());
    info!("pclk1 {}", ccdr.clocks.pclk1());
    info!(
        "PLL1\nP: {:?}\nQ: {:?}\nR: {:?}",
        ccdr.clocks.pll1_p_ck(),
        ccdr.clocks.pll1_q_ck(),
        ccdr.clocks.pll1_r_ck()
    );
    info!(
        "PLL3\nP: {:?}\nQ: {:?}\nR: {:?}",
        ccdr.clocks.pll3_p_ck(),
        ccdr.clocks.pll3_q_ck(),
        ccdr.clocks.pll3_r_ck()
    );
}
