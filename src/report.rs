use std::fmt::Display;

/// Severity of a reported line. Each maps onto a `log` level and a prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Ok,
    Pending,
    Warning,
    Error,
}

impl Severity {
    fn prefix(self) -> &'static str {
        match self {
            Severity::Ok => "[+]: ",
            Severity::Pending => "[~]: ",
            Severity::Warning => "[!]: ",
            Severity::Error => "[-]: ",
        }
    }

    fn level(self) -> log::Level {
        match self {
            Severity::Ok | Severity::Pending => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

/// Logger handle passed to each component. It owns its nesting depth, so
/// threads never share indentation state.
///
/// ```text
/// [+]: Found 2 service(s)
///  |  [+]: Service: 0000ffd5-...
///  |  [+]: Service: 0000ffd0-...
/// ```
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    depth: usize,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter one level deeper than this one.
    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
        }
    }

    pub fn ok(&self, msg: impl Display) {
        self.log(Severity::Ok, msg);
    }

    pub fn pending(&self, msg: impl Display) {
        self.log(Severity::Pending, msg);
    }

    pub fn warn(&self, msg: impl Display) {
        self.log(Severity::Warning, msg);
    }

    pub fn error(&self, msg: impl Display) {
        self.log(Severity::Error, msg);
    }

    pub fn log(&self, severity: Severity, msg: impl Display) {
        log::log!(severity.level(), "{}", format_line(severity, self.depth, &msg));
    }

    /// Section heading followed by a dash line.
    pub fn title(&self, title: &str) {
        log::info!("");
        log::info!("{}", title);
        log::info!("-");
    }
}

fn format_line(severity: Severity, depth: usize, msg: &dyn Display) -> String {
    format!("{}{}{}", " |  ".repeat(depth), severity.prefix(), msg)
}

pub fn print_header() {
    for line in [
        "______  _      _____ ",
        "|  _  \\| |    /  ___|",
        "| | | || |    \\ `--. ",
        "| | | || |     `--. \\  Dynamic LED Strips",
        concat!("| |/ / | |____/\\__/ /  Version ", env!("CARGO_PKG_VERSION")),
        "|___/  \\_____/\\____/ ",
    ] {
        log::info!("{}", line);
    }
}
