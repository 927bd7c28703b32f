pub mod auth;
pub mod calendar;
pub mod transport;
pub mod work_items;

pub use auth::{AuthProvider, BasicAuthProvider, BearerAuthProvider};
pub use calendar::{CalendarClient, CalendarSource, RawEvent};
pub use transport::HttpTransport;
pub use work_items::{WorkItemClient, WorkItemStore};
