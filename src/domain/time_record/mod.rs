pub mod entity;
pub mod errors;
pub mod events;
pub mod repository;
pub mod service;
pub mod value_objects;

pub use entity::TimeRecord;
pub use errors::{CheckInError, TimeRecordError};
pub use events::{
    DomainEvent, EmployeeCheckedIn, EmployeeCheckedOut, EventHeader, EMPLOYEE_CHECKED_IN,
    EMPLOYEE_CHECKED_OUT, SCHEMA_VERSION,
};
pub use repository::{RepositoryError, TimeRecordRepository};
pub use service::{ClockAction, TimeClockService};
pub use value_objects::{EmployeeId, TimeRecordStatus};
