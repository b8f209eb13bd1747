//! Control core for a two-wheel-drive robotic car.
//!
//! Turns raw sensor pulses and remote button events into motor commands and
//! arbitrates between autonomous obstacle avoidance and operator intent.
//! Hardware access, remote connectivity and audio playback live behind the
//! `Hal`, `RemoteLink` and `AudioBackend` seams.

pub mod audio;
pub mod battery;
pub mod config;
pub mod hal;
pub mod horn;
pub mod motor;
pub mod remote;
pub mod sonar;
pub mod speed;
pub mod supervisor;
pub mod workers;

pub use audio::Audio;
pub use battery::PowerMonitor;
pub use config::Options;
pub use hal::Hal;
pub use horn::Horn;
pub use motor::{Direction, Motor, Side};
pub use remote::{ButtonState, CommandInterpreter, RemoteEvent, TargetSpeed};
pub use sonar::ObstacleSensor;
pub use speed::SpeedController;
pub use supervisor::Supervisor;
pub use workers::WorkerSet;
