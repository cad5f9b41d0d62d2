mod system_monitor;

pub use system_monitor::SystemMonitor;
