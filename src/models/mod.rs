//! Dispatch domain models.
//!
//! Provides the records the engine reads and writes: providers and their
//! weekly schedules, job requests and their offers, and the outbound
//! messages produced as side effects.
//!
//! # Domain Mappings
//!
//! | u-dispatch | Home services | Ride hailing |
//! |------------|---------------|--------------|
//! | Provider | Plumber/Cleaner | Driver |
//! | WeeklySchedule | Working hours | Shift plan |
//! | JobRequest | Booking | Ride request |
//! | Offer | Pending offer | Ride offer |

mod criteria;
mod ids;
mod job;
mod notification;
mod provider;
mod schedule;

pub use criteria::CandidateCriteria;
pub use ids::{ClientId, JobId, ProviderId};
pub use job::{JobRequest, JobStatus, NewJobRequest, Offer};
pub use notification::{
    BroadcastTarget, LiveEvent, Notification, NotificationKind, OfflineReason, PushMessage,
    Recipient,
};
pub use provider::{AvailabilityStrategy, Credential, GeoPoint, Provider};
pub use schedule::{ClockTime, DailyWindow, WeeklySchedule};
