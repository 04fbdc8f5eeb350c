//! Log backend and panic handler, picked by the `log-*` features.
cfg_if::cfg_if! {
    if #[cfg(feature = "log-semihosting")] {
        use panic_semihosting as _;

        use lazy_static::lazy_static;
        use log::LevelFilter;

        pub use cortex_m_log::log::Logger;
        use cortex_m_log::printer::semihosting::{hio::HStdout, InterruptOk};

        lazy_static! {
            static ref LOGGER: Logger<InterruptOk<HStdout>> = Logger {
                level: LevelFilter::Info,
                inner: InterruptOk::<_>::stdout().expect("Get Semihosting stdout"),
            };
        }

        pub fn init() {
            // an earlier init keeps its logger
            let _ = cortex_m_log::log::init(&LOGGER);
        }
    }
    else if #[cfg(feature = "log-rtt")] {
        use panic_rtt_target as _;

        use log::{LevelFilter, Log, Metadata, Record};

        /// Forwards records to the RTT print channel.
        struct RttLogger {
            level: LevelFilter,
        }

        impl Log for RttLogger {
            fn enabled(&self, metadata: &Metadata) -> bool {
                metadata.level() <= self.level
            }

            fn log(&self, record: &Record) {
                if self.enabled(record.metadata()) {
                    rtt_target::rprintln!("{} {}", record.level(), record.args());
                }
            }

            fn flush(&self) {}
        }

        static LOGGER: RttLogger = RttLogger {
            level: LevelFilter::Info,
        };

        pub fn init() {
            rtt_target::rtt_init_print!();
            // an earlier init keeps its logger
            if log::set_logger(&LOGGER).is_ok() {
                log::set_max_level(LOGGER.level);
            }
        }
    }
    else {
        use panic_halt as _;

        pub fn init() {}
    }
}
