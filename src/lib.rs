// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! STIGQter: STIG checklist manager
//!
//! Keeps the NIST 800-53 / CCI catalog, imported DISA STIGs, assets and
//! their checklists in one SQLite database, and exchanges them with STIG
//! Viewer (`.ckl`) and eMASS Test Result workbooks.

pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod model;
pub mod workers;
pub(crate) mod xml;

pub use config::AppConfig;
pub use error::{Result, StigqterError};
