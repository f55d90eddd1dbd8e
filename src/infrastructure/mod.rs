pub mod directories;
pub mod flag_file;
pub mod logging;
pub mod notifier;
pub mod shutdown;
