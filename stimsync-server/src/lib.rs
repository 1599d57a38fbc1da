pub mod config;
pub mod control;
pub mod error;
pub mod fanout;
pub mod link;
pub mod relay;
pub mod tracker;

pub use config::{ScreenEndpoint, ServerConfig, TrackerConfig};
pub use control::{ControlClient, ControlListener};
pub use error::{
    ConfigError, ControlError, DeliveryFailure, MalformedTrackerFrame, TrackerError,
};
pub use fanout::{FailedDelivery, FanoutReport, StimServer};
pub use link::{ScreenLink, TcpScreenLink};
pub use relay::{ClosedLoopDriver, OffsetRelay};
pub use tracker::{ReadOutcome, TrackerFrame, TrackerLayout, TrackerReader};
