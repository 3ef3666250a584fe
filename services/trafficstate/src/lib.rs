pub mod broadcast;
pub mod history;
pub mod model;

pub use broadcast::{Broadcaster, ViewerHandle};
pub use history::HistoryStore;
pub use model::{
    AlertMessage, Location, Observation, ReadingError, TelemetryReading, TrafficLevel, ViewerEvent,
};
