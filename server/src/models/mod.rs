pub mod event;
pub mod registration;
pub mod user;

pub use event::{CreateEventRequest, Event, EventPatch, EventStatus};
pub use registration::{RegisterRequest, Registration, RegistrationStatus, RegistrationView};
pub use user::{CreateUserRequest, User};
