pub mod alerts;
pub mod clock_watch;
pub mod monitor;
pub mod reference;
pub mod sntp;

pub use alerts::{Alert, AlertIssuer, AlertTrigger, LoggingAlertIssuer};
pub use monitor::{CheckOutcome, TimeOffsetRecord, TimeTrustMonitor};
pub use reference::{ReferenceTime, TimeReferenceService};
pub use sntp::SntpClient;
