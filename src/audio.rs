//! Audio module. Brings up the codec and the SAI receive stream and feeds
//! every completed half of the DMA ring into a [`Capture`].
use core::ptr::addr_of_mut;

use log::info;
use stm32h7xx_hal::{
    dma,
    gpio::{gpiob, gpioe, Analog},
    hal::blocking::delay::DelayMs,
    pac, rcc,
    rcc::rec,
    sai,
    sai::*,
    stm32,
    stm32::rcc::d2ccip1r::SAI1SEL_A,
};

use crate::{
    board::Version,
    capture::Capture,
    sample::{Sample, S24},
    BLOCK_SAMPLES,
};

/// Interleaved channels delivered by the codec.
pub const CODEC_CHANNELS: usize = 2;
/// Words in one half of the ring: one block of every codec channel.
pub const HALF_TRANSFER_SIZE: usize = BLOCK_SAMPLES * CODEC_CHANNELS;
pub const DMA_BUFFER_SIZE: usize = HALF_TRANSFER_SIZE * 2;

pub type DmaBuffer = [u32; DMA_BUFFER_SIZE];

#[link_section = ".sram1_bss"]
#[no_mangle]
static mut RX_BUFFER: DmaBuffer = [0; DMA_BUFFER_SIZE];

type RxStream = dma::Transfer<
    dma::dma::Stream0<stm32::DMA1>,
    sai::dma::ChannelA<stm32::SAI1>,
    dma::PeripheralToMemory,
    &'static mut DmaBuffer,
    dma::DBTransfer,
>;

type RxStreamS2dfm = dma::Transfer<
    dma::dma::Stream0<stm32::DMA1>,
    sai::dma::ChannelB<stm32::SAI1>,
    dma::PeripheralToMemory,
    &'static mut DmaBuffer,
    dma::DBTransfer,
>;

/// The receive half of SAI1 sits on block A or B depending on the codec.
enum RxDma {
    Normal(RxStream),
    S2dfm(RxStreamS2dfm),
}

/// SAI1 receive path into a DMA ring in SRAM1.
pub struct Audio {
    _sai: sai::Sai<stm32::SAI1, sai::I2S>,
    stream: RxDma,
    buffer: *const u32,
}

// `buffer` only points into the static receive ring
unsafe impl Send for Audio {}

impl Audio {
    /// Setup audio handler
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dma1_stream0: dma::dma::StreamX<stm32::DMA1, 0>,
        sai1_d: stm32::SAI1,
        sai1_p: rec::Sai1,

        // SAI pins
        sai_mclk_a: gpioe::PE2<Analog>,
        sai_sd_b: gpioe::PE3<Analog>,
        sai_fs_a: gpioe::PE4<Analog>,
        sai_sck_a: gpioe::PE5<Analog>,
        sai_sd_a: gpioe::PE6<Analog>,

        // codec reset / mode pin
        codec_pin: gpiob::PB11<Analog>,

        clocks: &rcc::CoreClocks,
        board_version: Version,
        delay: &mut impl DelayMs<u8>,
    ) -> Self {
        let rx_buffer: &'static mut DmaBuffer = unsafe { &mut *addr_of_mut!(RX_BUFFER) };
        let buffer = rx_buffer.as_ptr();
        let dma_config = dma::dma::DmaConfig::default()
            .priority(dma::config::Priority::High)
            .memory_increment(true)
            .peripheral_increment(false)
            .circular_buffer(true)
            .fifo_enable(false)
            .transfer_complete_interrupt(true)
            .half_transfer_interrupt(true);

        info!("Set up SAI...");
        let sai1_rec = sai1_p.kernel_clk_mux(SAI1SEL_A::Pll3P);
        let pins_a = (
            sai_mclk_a.into_alternate(),
            sai_sck_a.into_alternate(),
            sai_fs_a.into_alternate(),
            sai_sd_a.into_alternate(),
            Some(sai_sd_b.into_alternate()),
        );

        match board_version {
            Version::Seed | Version::Seed1_1 => {
                let mut stream = dma::Transfer::init(
                    dma1_stream0,
                    unsafe { pac::Peripherals::steal().SAI1.dma_ch_a() },
                    rx_buffer,
                    None,
                    dma_config,
                );
                let master_config =
                    I2SChanConfig::new(I2SDir::Rx).set_frame_sync_active_high(false);
                let mut sai = sai1_d.i2s_ch_a(
                    pins_a,
                    crate::AUDIO_SAMPLE_HZ,
                    I2SDataSize::BITS_24,
                    sai1_rec,
                    clocks,
                    I2sUsers::new(master_config),
                );

                info!("Setting up AK4556 Audio Codec...");
                let mut ak_reset =
                    codec_pin.into_push_pull_output_in_state(stm32h7xx_hal::gpio::PinState::High);
                delay.delay_ms(1);
                ak_reset.set_low();
                delay.delay_ms(1);
                ak_reset.set_high();

                info!("Start capture stream...");
                stream.start(|sai1_rb| {
                    sai.enable_dma(SaiChannel::ChannelA);
                    sai.enable();
                    info!("Sai1 fifo waiting to receive data.");
                    while sai1_rb.cha().sr.read().flvl().is_empty() {}
                    info!("Capture started!");
                });

                Audio {
                    _sai: sai,
                    stream: RxDma::Normal(stream),
                    buffer,
                }
            }
            Version::Seed2DFM => {
                let mut stream = dma::Transfer::init(
                    dma1_stream0,
                    unsafe { pac::Peripherals::steal().SAI1.dma_ch_b() },
                    rx_buffer,
                    None,
                    dma_config,
                );
                // block A only drives the clocks
                let master_config =
                    I2SChanConfig::new(I2SDir::Tx).set_frame_sync_active_high(false);
                let slave_config = I2SChanConfig::new(I2SDir::Rx)
                    .set_sync_type(I2SSync::Internal)
                    .set_frame_sync_active_high(false);
                let mut sai = sai1_d.i2s_ch_a(
                    pins_a,
                    crate::AUDIO_SAMPLE_HZ,
                    I2SDataSize::BITS_24,
                    sai1_rec,
                    clocks,
                    I2sUsers::new(master_config).add_slave(slave_config),
                );

                info!("Setting up PCM3060 Audio Codec...");
                codec_pin.into_push_pull_output_in_state(stm32h7xx_hal::gpio::PinState::Low);

                info!("Start capture stream...");
                stream.start(|sai1_rb| {
                    sai.enable_dma(SaiChannel::ChannelB);
                    sai.enable();
                    info!("Sai1 fifo waiting to receive data.");
                    while sai1_rb.chb().sr.read().flvl().is_empty() {}
                    info!("Capture started!");
                });

                Audio {
                    _sai: sai,
                    stream: RxDma::S2dfm(stream),
                    buffer,
                }
            }
        }
    }

    /// Offset of the half the DMA has just finished, if an event is pending.
    fn completed_half(&mut self) -> Option<usize> {
        macro_rules! poll {
            ($stream:expr) => {
                if $stream.get_half_transfer_flag() {
                    $stream.clear_half_transfer_interrupt();
                    Some(0)
                } else if $stream.get_transfer_complete_flag() {
                    $stream.clear_transfer_complete_interrupt();
                    Some(HALF_TRANSFER_SIZE)
                } else {
                    None
                }
            };
        }
        match &mut self.stream {
            RxDma::Normal(stream) => poll!(stream),
            RxDma::S2dfm(stream) => poll!(stream),
        }
    }

    /// Interrupt entry: convert the finished half to `S` and hand it to
    /// `capture`. Returns false for spurious interrupts.
    pub fn capture<S: Sample, const CH: usize, const Q: usize>(
        &mut self,
        capture: &Capture<'_, S, BLOCK_SAMPLES, CH, Q>,
    ) -> bool {
        let Some(offset) = self.completed_half() else {
            return false;
        };
        let mut frame = [S::ZERO; HALF_TRANSFER_SIZE];
        for (i, sample) in frame.iter_mut().enumerate() {
            // the DMA is writing the other half
            let word = unsafe { core::ptr::read_volatile(self.buffer.add(offset + i)) };
            *sample = S::from_s24(S24::from(word));
        }
        capture.on_frame(&frame);
        true
    }
}
