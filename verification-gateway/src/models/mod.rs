pub mod device;
pub mod profile;
pub mod user;
pub mod verification;

pub use device::{DeviceDescriptor, Frame};
pub use profile::{ProfileCompleteness, ProfileStatus};
pub use user::{AuthUser, Role};
pub use verification::VerificationRecord;
