//! Two phase battery discharge (constant current, then constant voltage)
//! driven over a serial link to an ET5406A+ electronic load.

pub mod config;
pub mod devices;
pub mod experiment;

pub use devices::{DeviceError, DeviceIdentity, Discovery, SerialConnector};
pub use experiment::channel::{SampleReceiver, SampleSender, StopToken, sample_channel};
pub use experiment::data::{BatteryChemistry, DischargeParameters, DischargeSummary, Mode, Sample};
pub use experiment::{DischargeController, DischargeError, DischargeHandle, RunOutcome, StopReason};
