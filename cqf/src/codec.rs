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

//! Little-endian word streams for filter images.

use std::io;
use std::io::Read;
use std::io::Write;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::error::Error;
use crate::metadata::HEADER_WORDS;

pub(crate) struct ImageWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> ImageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn write_u64_le(&mut self, n: u64) -> io::Result<()> {
        self.inner.write_u64::<LittleEndian>(n)?;
        self.written += 8;
        Ok(())
    }

    /// Flushes the sink and returns it with the number of bytes written.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.inner.flush()?;
        Ok((self.inner, self.written))
    }
}

pub(crate) struct ImageReader<R> {
    inner: R,
}

impl<R: Read> ImageReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_u64_le(&mut self) -> io::Result<u64> {
        self.inner.read_u64::<LittleEndian>()
    }

    pub fn read_header(&mut self) -> Result<[u64; HEADER_WORDS], Error> {
        let mut header = [0u64; HEADER_WORDS];
        for word in &mut header {
            *word = self
                .read_u64_le()
                .map_err(|_| Error::insufficient_data("header"))?;
        }
        Ok(header)
    }
}
