// src/config/constants.rs
//! System-wide configuration constants

/// Engine timing constants, in milliseconds unless noted
pub mod timing {
    /// Period of the progress timer driving Pump/Release/Incubate actions
    pub const PROGRESS_TICK_MS: u64 = 500;
    /// Period of each per-channel switch poll
    pub const SWITCH_POLL_MS: u64 = 100;
    /// Time allowed for a grab before the overrun guard fires
    pub const GRAB_DEADLINE_MS: u64 = 20_000;
    /// Display time of a completion ("done") sub-state
    pub const DONE_DELAY_MS: u64 = 1_000;
    /// Display time of the terminal step before starting over
    pub const FINISHED_DELAY_MS: u64 = 3_000;
    /// Blocking settle between forward and reverse purge in a reset
    pub const RESET_SETTLE_MS: u64 = 1_000;

    pub const MIN_TICK_MS: u64 = 10;
    pub const MAX_TICK_MS: u64 = 10_000;
    pub const MAX_DEADLINE_MS: u64 = 600_000;

    pub const SECONDS_PER_HOUR: f64 = 3600.0;
}

/// Buzzer patterns
pub mod buzzer {
    pub const COMPLETION_REPETITIONS: u32 = 3;
    pub const FAULT_REPETITIONS: u32 = 5;
    pub const MAX_REPETITIONS: u32 = 20;
}

/// Pump channel defaults
pub mod pumps {
    pub const DEFAULT_WASTE_ADDR: u8 = 0;
    pub const DEFAULT_LYSATE_ADDR: u8 = 1;
    /// Highest address a pump network accepts
    pub const MAX_PUMP_ADDR: u8 = 99;
    pub const DEFAULT_SYRINGE_DIAMETER_MM: f64 = 12.45;
    pub const MIN_SYRINGE_DIAMETER_MM: f64 = 0.1;
    pub const MAX_SYRINGE_DIAMETER_MM: f64 = 50.0;

    pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
    pub const DEFAULT_BAUD_RATE: u32 = 19200;
}

/// Switch pin names on the microcontroller link
pub mod switches {
    pub const WASTE_HOME: &str = "d2";
    pub const LYSATE_HOME: &str = "d3";
    pub const WASTE_GRAB: &str = "d4";
    pub const LYSATE_GRAB: &str = "d5";
}

/// Protocol file and step naming
pub mod protocol {
    pub const HOME_STEP: &str = "home";
    pub const SUMMARY_STEP: &str = "summary";
    pub const CHOOSER_STEP: &str = "protocol_chooser";
    pub const DONE_SUFFIX: &str = "_done";

    pub const DEFAULT_PROTOCOL_DIR: &str = "protocols/";
    pub const DEFAULT_PROTOCOL_FILE: &str = "default.json";

    pub const DEFAULT_HEADER: &str = "NO HEADER";
    pub const DEFAULT_DESCRIPTION: &str = "NO DESCRIPTION";
    pub const DEFAULT_NEXT_TEXT: &str = "Next";
}

/// File system paths
pub mod paths {
    pub const SYSTEM_CONFIG_PATH: &str = "/etc/chipflow/config.toml";
    pub const USER_CONFIG_DIR: &str = ".config/chipflow";
    pub const DEFAULT_CONFIG_FILE: &str = "config/default.toml";
    pub const LOCAL_CONFIG_FILE: &str = "chipflow.toml";
    /// Prefix for environment overrides, e.g. `CHIPFLOW_RUN_START_STEP`
    pub const ENV_PREFIX: &str = "CHIPFLOW_";
}
