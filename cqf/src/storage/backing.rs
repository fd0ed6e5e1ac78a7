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

use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;

use memmap2::MmapRaw;

use crate::error::Error;
use crate::error::ErrorKind;

/// Memory holding a filter image as little-endian 64-bit words.
#[derive(Debug)]
pub(crate) enum Backing {
    /// Heap memory owned by the filter.
    Owned(Box<[AtomicU64]>),
    /// A shared, writable mapping of a filter file.
    Mapped(MappedFile),
}

impl Backing {
    /// Allocates `len` zeroed words, reporting allocation failure instead of aborting.
    pub fn zeroed(len: usize) -> Result<Self, Error> {
        let mut words = Vec::new();
        words.try_reserve_exact(len).map_err(|err| {
            Error::new(ErrorKind::NoSpace, "failed to allocate filter memory")
                .with_context("words", len)
                .set_source(err)
        })?;
        words.extend((0..len).map(|_| AtomicU64::new(0)));
        Ok(Backing::Owned(words.into_boxed_slice()))
    }

    pub fn words(&self) -> &[AtomicU64] {
        match self {
            Backing::Owned(words) => words,
            Backing::Mapped(file) => file.words(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Backing::Owned(_) => None,
            Backing::Mapped(file) => Some(&file.path),
        }
    }

    pub fn flush(&self) -> Result<(), Error> {
        match self {
            Backing::Owned(_) => Ok(()),
            Backing::Mapped(file) => file
                .map
                .flush()
                .map_err(|err| Error::io("failed to flush filter file", err)),
        }
    }
}

/// A filter file mapped into memory; stores through the mapping reach the file.
#[derive(Debug)]
pub(crate) struct MappedFile {
    map: MmapRaw,
    len: usize,
    path: PathBuf,
}

impl MappedFile {
    /// Maps the whole file at `path` read-write. The file length must be a
    /// multiple of 8 bytes.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| Error::io("failed to open filter file", err).with_context("path", path.display()))?;
        Self::map(&file, path)
    }

    fn map(file: &File, path: &Path) -> Result<Self, Error> {
        let map = MmapRaw::map_raw(file)
            .map_err(|err| Error::io("failed to map filter file", err).with_context("path", path.display()))?;
        if map.len() % 8 != 0 {
            return Err(Error::malformed("filter file length is not a multiple of 8")
                .with_context("len", map.len()));
        }
        Ok(Self {
            len: map.len() / 8,
            map,
            path: path.to_path_buf(),
        })
    }

    #[allow(unsafe_code)]
    fn words(&self) -> &[AtomicU64] {
        // SAFETY: the mapping is page aligned, `len * 8` bytes long and lives as
        // long as `self`. `AtomicU64` has the layout of `u64`, and every access
        // goes through the atomics, so writes through a shared reference are
        // sound within this process.
        unsafe { std::slice::from_raw_parts(self.map.as_mut_ptr() as *const AtomicU64, self.len) }
    }
}
