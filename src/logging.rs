use std::io::Write;

/// Initialise `env_logger` for the CLI. `RUST_LOG`, when set, wins over the
/// verbosity flags.
pub fn init_logger(verbose: bool, quiet: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = env_logger::try_init();
        return;
    }

    let default_level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Warn)
        .filter_module("jvault", default_level)
        .format(|buf, record| {
            if record.level() >= log::Level::Debug {
                writeln!(buf, "[{}] {}", record.level(), record.args())
            } else if record.level() <= log::Level::Warn {
                writeln!(buf, "{}: {}", record.level().as_str().to_lowercase(), record.args())
            } else {
                writeln!(buf, "{}", record.args())
            }
        });
    let _ = builder.try_init();
}
