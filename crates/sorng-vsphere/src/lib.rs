//! # SortOfRemote NG – vSphere control client
//!
//! Drives vCenter / ESXi through the vim25 SOAP API: sessions, inventory
//! lookup by name, task polling, VM power and resize, snapshots, disks,
//! CD/DVD drives, distributed port groups, custom attributes and datastore
//! file upload.
//!
//! ## Modules
//!
//! - **types** — Shared data structures (config, managed objects, devices, specs)
//! - **error** — Crate-specific error types
//! - **api** — `VimApi`, the seam between managers and the control plane
//! - **xml** / **marshal** — SOAP envelope writing and response decoding
//! - **vsphere** — `SoapClient`, the HTTPS implementation of `VimApi`
//! - **session** — Connect / disconnect / scoped sessions, cookie transform
//! - **task** — Task polling and the bool / Option result conventions
//! - **inventory** — Name lookup, clusters
//! - **vm** — Power, reboot, delete, rename, resize, summaries
//! - **snapshot** — Create, revert, remove, list
//! - **storage** — Virtual disks and CD/DVD drives
//! - **network** — Distributed port groups and NIC wiring
//! - **attributes** — Custom attributes
//! - **transfer** — Datastore upload via `/folder`
//! - **service** — Aggregate facade + shared state alias

pub mod types;
pub mod error;
pub mod api;
pub mod xml;
pub mod marshal;
pub mod vsphere;
pub mod session;
pub mod task;
pub mod inventory;
pub mod vm;
pub mod snapshot;
pub mod storage;
pub mod network;
pub mod attributes;
pub mod transfer;
pub mod service;

pub use api::VimApi;
pub use error::{VsphereError, VsphereErrorKind, VsphereResult};
pub use service::{VsphereService, VsphereServiceState};
pub use session::{connect, disconnect, session_cookie_to_map, with_session};
pub use types::VsphereConfig;
pub use vsphere::SoapClient;
