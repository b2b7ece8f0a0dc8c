// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

pub mod codec;
pub mod error;
pub mod protocol;
pub mod remote;

pub use error::{Error, Result};
pub use protocol::*;
pub use remote::{host_header, RemoteTarget};
