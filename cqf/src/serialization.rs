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

//! The filter image: 17 header words followed by every block, all
//! little-endian 64-bit words. The same bytes are the in-memory layout, so a
//! file can be mapped and used in place.

use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Path;

use crate::codec::ImageReader;
use crate::codec::ImageWriter;
use crate::error::Error;
use crate::metadata::Geometry;
use crate::metadata::HEADER_BYTES;
use crate::metadata::HEADER_WORDS;
use crate::storage::Backing;
use crate::storage::MappedFile;
use crate::table::Table;

/// How a filter file is brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadMode {
    /// Read the whole image into owned memory. The file is not used afterwards.
    #[default]
    Copy,
    /// Map the file and use it as the live store; mutations write through.
    Map,
}

fn check_image_len(geometry: &Geometry, len: u64) -> Result<(), Error> {
    let expected = HEADER_BYTES as u64 + geometry.total_size_in_bytes();
    if len != expected {
        return Err(Error::malformed("filter image length does not match its header")
            .with_context("expected_bytes", expected)
            .with_context("actual_bytes", len));
    }
    Ok(())
}

impl Table {
    /// Streams the image to `writer`, returning it with the bytes written.
    pub(crate) fn write_image<W: Write>(&self, writer: W) -> std::io::Result<(W, u64)> {
        let mut image = ImageWriter::new(writer);
        for index in 0..self.store.words().len() {
            image.write_u64_le(self.store.load(index))?;
        }
        image.finish()
    }

    /// Reads an image of exactly `len` bytes into owned memory.
    pub(crate) fn read_image<R: Read>(reader: R, len: u64) -> Result<Table, Error> {
        let mut image = ImageReader::new(reader);
        let header = image.read_header()?;
        let geometry = Geometry::from_header_words(&header)?;
        check_image_len(&geometry, len)?;

        let table = Table::with_backing(geometry, Backing::zeroed(geometry.total_words())?)?;
        for (index, word) in header.into_iter().enumerate() {
            table.store.set_header(index, word);
        }
        for index in HEADER_WORDS..geometry.total_words() {
            let word = image
                .read_u64_le()
                .map_err(|_| Error::insufficient_data("blocks"))?;
            table.store.store(index, word);
        }
        Ok(table)
    }

    pub(crate) fn save(&self, path: &Path) -> Result<u64, Error> {
        let file = File::create(path).map_err(|err| {
            Error::io("failed to create filter file", err).with_context("path", path.display())
        })?;
        let (writer, written) = self.write_image(BufWriter::new(file)).map_err(|err| {
            Error::io("failed to write filter file", err).with_context("path", path.display())
        })?;
        writer
            .into_inner()
            .map_err(|err| Error::io("failed to write filter file", err.into_error()))?
            .sync_all()
            .map_err(|err| Error::io("failed to sync filter file", err))?;
        Ok(written)
    }

    pub(crate) fn load(path: &Path, mode: LoadMode) -> Result<Table, Error> {
        let file = File::open(path).map_err(|err| {
            Error::io("failed to open filter file", err).with_context("path", path.display())
        })?;
        let len = file
            .metadata()
            .map_err(|err| Error::io("failed to stat filter file", err))?
            .len();
        match mode {
            LoadMode::Copy => Table::read_image(BufReader::new(file), len),
            LoadMode::Map => {
                let header = ImageReader::new(&file).read_header()?;
                let geometry = Geometry::from_header_words(&header)?;
                check_image_len(&geometry, len)?;
                drop(file);
                Table::with_backing(geometry, Backing::Mapped(MappedFile::open(path)?))
            }
        }
    }
}
