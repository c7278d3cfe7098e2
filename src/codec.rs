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

//! Little-endian byte buffers shared by the sketch, filter and index encoders.

use std::io;
use std::io::Cursor;
use std::io::Read;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

pub(crate) struct SketchBytes {
    bytes: Vec<u8>,
}

impl SketchBytes {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Writes the given byte slice to the `SketchBytes`.
    pub fn write(&mut self, buf: &[u8]) {
        self.bytes.extend_from_slice(buf);
    }

    pub fn write_u8(&mut self, n: u8) {
        self.bytes.push(n);
    }

    pub fn write_u16_le(&mut self, n: u16) {
        // Writes into a Vec never fail.
        let _ = self.bytes.write_u16::<LittleEndian>(n);
    }

    pub fn write_u32_le(&mut self, n: u32) {
        let _ = self.bytes.write_u32::<LittleEndian>(n);
    }

    pub fn write_u64_le(&mut self, n: u64) {
        let _ = self.bytes.write_u64::<LittleEndian>(n);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, s: &str) {
        self.write_u32_le(s.len() as u32);
        self.write(s.as_bytes());
    }
}

pub(crate) struct SketchSlice<'a> {
    slice: Cursor<&'a [u8]>,
}

impl<'a> SketchSlice<'a> {
    pub fn new(slice: &'a [u8]) -> SketchSlice<'a> {
        SketchSlice {
            slice: Cursor::new(slice),
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.slice.read_exact(buf)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        self.slice.read_u8()
    }

    pub fn read_u16_le(&mut self) -> io::Result<u16> {
        self.slice.read_u16::<LittleEndian>()
    }

    pub fn read_u32_le(&mut self) -> io::Result<u32> {
        self.slice.read_u32::<LittleEndian>()
    }

    pub fn read_u64_le(&mut self) -> io::Result<u64> {
        self.slice.read_u64::<LittleEndian>()
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> io::Result<String> {
        let len = self.read_u32_le()? as usize;
        if len > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "string length exceeds remaining bytes",
            ));
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        let total = self.slice.get_ref().len() as u64;
        total.saturating_sub(self.slice.position()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut bytes = SketchBytes::with_capacity(16);
        bytes.write_u8(7);
        bytes.write_u16_le(0x0102);
        bytes.write_u32_le(0x03040506);
        let bytes = bytes.into_bytes();
        assert_eq!(bytes, vec![7, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn test_read_back_mixed_values() {
        let mut bytes = SketchBytes::with_capacity(64);
        bytes.write_u64_le(u64::MAX - 3);
        bytes.write_str("sample-α");
        let bytes = bytes.into_bytes();

        let mut slice = SketchSlice::new(&bytes);
        assert_eq!(slice.read_u64_le().unwrap(), u64::MAX - 3);
        assert_eq!(slice.read_str().unwrap(), "sample-α");
        assert_eq!(slice.remaining(), 0);
        assert!(slice.read_u8().is_err());
    }

    #[test]
    fn test_truncated_string_is_rejected() {
        let mut bytes = SketchBytes::with_capacity(8);
        bytes.write_u32_le(100);
        bytes.write(b"abc");
        let bytes = bytes.into_bytes();
        let mut slice = SketchSlice::new(&bytes);
        assert!(slice.read_str().is_err());
    }
}
