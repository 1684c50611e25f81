// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Small workers: create an asset, delete STIGs, clear the CCI catalog,
//! move parked STIG checks back to their real CCI

use async_trait::async_trait;
use tracing::info;

use super::{Progress, Worker};
use crate::db::Database;
use crate::model::Asset;
use crate::{Result, StigqterError};

/// Create an asset and map STIGs to it
pub struct WorkerAssetAdd {
    asset: Asset,
    stig_ids: Vec<i64>,
}

impl WorkerAssetAdd {
    pub fn new(asset: Asset, stig_ids: Vec<i64>) -> Self {
        Self { asset, stig_ids }
    }

    /// The asset as stored (its id is set after a successful run)
    pub fn asset(&self) -> &Asset {
        &self.asset
    }
}

#[async_trait]
impl Worker for WorkerAssetAdd {
    fn name(&self) -> &'static str {
        "asset-add"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(self.stig_ids.len() as u64 + 1, 0);
        progress.status(format!("Adding asset {}…", self.asset));
        db.add_asset(&mut self.asset)?;
        progress.advance();

        for stig_id in &self.stig_ids {
            let stig = db
                .get_stig(*stig_id)?
                .ok_or_else(|| StigqterError::NotFound(format!("STIG {}", stig_id)))?;
            progress.status(format!("Mapping {} to {}…", stig, self.asset));
            db.add_stig_to_asset(stig.id, self.asset.id)?;
            progress.advance();
        }

        info!("Added asset {} with {} STIG(s)", self.asset, self.stig_ids.len());
        Ok(())
    }
}

/// Delete STIGs; those still mapped to assets are kept with a warning
pub struct WorkerStigDelete {
    stig_ids: Vec<i64>,
    deleted: usize,
}

impl WorkerStigDelete {
    pub fn new(stig_ids: Vec<i64>) -> Self {
        Self { stig_ids, deleted: 0 }
    }

    pub fn deleted(&self) -> usize {
        self.deleted
    }
}

#[async_trait]
impl Worker for WorkerStigDelete {
    fn name(&self) -> &'static str {
        "stig-delete"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(self.stig_ids.len() as u64, 0);
        for stig_id in &self.stig_ids {
            progress.status(format!("Deleting STIG {}…", stig_id));
            match db.delete_stig(*stig_id) {
                Ok(()) => self.deleted += 1,
                Err(StigqterError::InUse(message)) => progress.warning("Unable to Delete STIG", message),
                Err(StigqterError::NotFound(what)) => {
                    progress.warning("Unable to Delete STIG", format!("{} was not found", what))
                }
                Err(e) => return Err(e),
            }
            progress.advance();
        }
        Ok(())
    }
}

/// Remove every family, control and CCI. While imported STIGs still use
/// the catalog nothing is removed and a warning is raised.
#[derive(Default)]
pub struct WorkerCciDelete;

impl WorkerCciDelete {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Worker for WorkerCciDelete {
    fn name(&self) -> &'static str {
        "cci-delete"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(1, 0);
        progress.status("Clearing DB of CCI/RMF information…");
        match db.delete_ccis() {
            Ok(()) => info!("Cleared the CCI catalog"),
            Err(StigqterError::InUse(message)) => progress.warning("Unable to Delete CCIs", message),
            Err(e) => return Err(e),
        }
        progress.advance();
        Ok(())
    }
}

/// Re-map STIG checks that were parked on CCI-000366 because the CCI
/// their benchmark named was not indexed at import time
#[derive(Default)]
pub struct WorkerMapUnmapped {
    remapped: usize,
}

impl WorkerMapUnmapped {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remapped(&self) -> usize {
        self.remapped
    }
}

#[async_trait]
impl Worker for WorkerMapUnmapped {
    fn name(&self) -> &'static str {
        "map-unmapped"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(1, 0);
        progress.status("Remapping unmapped CCIs…");
        self.remapped = db.map_unmapped()?;
        info!("Remapped {} STIG check(s) to their intended CCI", self.remapped);
        progress.advance();
        Ok(())
    }
}
