// Dashboard event stream consumer
//
// Demultiplexes ALERT / FRAME / STATS payloads from a single connection into
// bounded views published through a watch channel.

mod consumer;
pub mod event;
pub mod view;

pub use consumer::{StreamConsumer, StreamHandle};
pub use event::{parse_event, Alert, AlertId, Frame, Severity, StreamEvent};
pub use view::{AlertBuffer, BufferedAlert, DashboardView, FrameCache};
