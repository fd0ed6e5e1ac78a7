// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Growing a filter by rehashing every item into a larger table.

use std::ffi::OsString;
use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::iter::Cursor;
use crate::metadata::Geometry;
use crate::storage::Backing;
use crate::storage::MappedFile;
use crate::table::Table;

/// Share of home slots in use at which an insert grows the filter, or fails
/// with `NoSpace` when auto-resize is off.
pub const RESIZE_LOAD_FACTOR: f64 = 0.95;

impl Table {
    pub(crate) fn is_over_threshold(&self) -> bool {
        self.noccupied_slots() as f64 >= RESIZE_LOAD_FACTOR * self.geometry.nslots as f64
    }

    /// Builds an in-memory table of `nslots` slots holding every item of this one.
    fn rehash(&self, nslots: usize) -> Result<Table, Error> {
        let geometry = &self.geometry;
        if !geometry.hash_mode.is_invertible() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "resize needs an invertible hash mode",
            )
            .with_context("hash_mode", format!("{:?}", geometry.hash_mode)));
        }
        let target = Geometry::new(
            nslots,
            geometry.key_bits,
            geometry.value_bits,
            geometry.hash_mode,
            geometry.seed,
        )?;
        let mut fresh = Table::allocate(target, self.auto_resize())?;
        fresh.offset_hint = self.offset_hint;

        // Fingerprints keep their value across geometries; only the split
        // into quotient and remainder moves.
        let mut cursor = Cursor::new(self, 0);
        while let Some(stored) = cursor.current(self) {
            fresh.insert_hash(stored.hash, stored.count)?;
            cursor.advance(self);
        }
        Ok(fresh)
    }
}

/// Replaces `table` with a rehashed copy of `nslots` slots. A mapped table
/// is rewritten to its file and mapped again. On error `table` is unchanged.
pub(crate) fn resize(table: &mut Table, nslots: usize) -> Result<(), Error> {
    let from = table.geometry.nslots;
    let fresh = table.rehash(nslots)?;
    let fresh = match table.path() {
        Some(path) => remap(fresh, path)?,
        None => fresh,
    };
    log::debug!(
        "resized filter from {} to {} slots; {} distinct items in {} slots",
        from,
        nslots,
        fresh.ndistinct_elts(),
        fresh.noccupied_slots()
    );
    *table = fresh;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".resize");
    PathBuf::from(name)
}

fn remap(fresh: Table, path: &Path) -> Result<Table, Error> {
    let staging = staging_path(path);
    let written = File::create(&staging).and_then(|file| {
        let (writer, _) = fresh.write_image(BufWriter::new(file))?;
        writer.into_inner().map_err(|err| err.into_error())?.sync_all()
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&staging);
        return Err(Error::io("failed to write resized filter", err)
            .with_context("path", staging.display()));
    }
    fs::rename(&staging, path).map_err(|err| {
        Error::io("failed to replace filter file", err).with_context("path", path.display())
    })?;

    let mut table = Table::with_backing(fresh.geometry, Backing::Mapped(MappedFile::open(path)?))?;
    table.offset_hint = fresh.offset_hint;
    Ok(table)
}
