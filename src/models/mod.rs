pub mod peer;
pub mod session;
pub mod subject;

pub use peer::{PeerRecord, PeerStatus};
pub use session::FocusSession;
pub use subject::Subject;
