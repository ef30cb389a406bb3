//! Client side of ks-offline.
//!
//! This crate provides the network seam, the offline cache controller and
//! the registration that drives controllers through their lifecycle. It is
//! shared by the server and CLI.

pub mod controller;
pub mod fetch;
pub mod registration;

pub use controller::{
    ActivateOutcome, ControllerState, Host, InstallOutcome, OfflineController, ResponseSource, Served,
};
pub use fetch::{FetchClient, FetchConfig, FetchRequest, FetchResponse, MemoryNetwork, Network};
pub use registration::{ClientId, ControllerInfo, RegisterOutcome, Registration, RegistrationStatus};
